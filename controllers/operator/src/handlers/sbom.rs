//! SBOM handler.
//!
//! An `SBOMSyft` becoming available triggers a vulnerability scan of its
//! image. The workload and container come from the object's annotations, or
//! from the image index filled by the pod handler.

use crate::command::Command;
use crate::error::HandlerError;
use crate::event::WatchEvent;
use crate::handlers::{meta_value, status_allowed, Emitter, EventHandler};
use crate::identity::{ContainerData, InstanceId};
use crate::state::ImageIndex;
use crds::metadata::{self, status};
use crds::SBOMSyft;
use tracing::info;

/// Statuses an SBOM may carry and still be scanned, empty for older writers
const ALLOWED_STATUSES: &[&str] = &["", status::LEARNING, status::COMPLETED];

#[derive(Clone, Debug)]
pub struct SbomHandler {
    index: ImageIndex,
}

impl SbomHandler {
    pub fn new(index: ImageIndex) -> Self {
        Self { index }
    }
}

/// True when an SBOM with these annotations must not be scanned
pub fn skip_sbom(annotations: Option<&std::collections::BTreeMap<String, String>>) -> bool {
    match annotations {
        None => true,
        Some(a) if a.is_empty() => true,
        Some(a) => !status_allowed(Some(a), ALLOWED_STATUSES),
    }
}

#[async_trait::async_trait]
impl EventHandler<SBOMSyft> for SbomHandler {
    fn name(&self) -> &'static str {
        "sbom"
    }

    async fn handle(&self, event: WatchEvent<SBOMSyft>, out: &Emitter) -> Result<(), HandlerError> {
        let Some(sbom) = event.into_actionable() else {
            return Ok(());
        };
        let annotations = sbom.metadata.annotations.as_ref();
        if skip_sbom(annotations) {
            return Ok(());
        }

        let image_id = meta_value(annotations, metadata::IMAGE_ID_KEY).unwrap_or_default();
        let owner = self.index.lookup(image_id);
        let mut container = ContainerData {
            image_id: image_id.to_string(),
            image_tag: meta_value(annotations, metadata::IMAGE_TAG_KEY)
                .unwrap_or_default()
                .to_string(),
            container_name: meta_value(annotations, metadata::CONTAINER_NAME_KEY)
                .map(str::to_string)
                .or_else(|| owner.as_ref().map(|o| o.container_name.clone()))
                .unwrap_or_default(),
            wlid: meta_value(annotations, metadata::WLID_KEY)
                .map(str::to_string)
                .or_else(|| owner.map(|o| o.wlid))
                .unwrap_or_default(),
            ..Default::default()
        };
        if let Some(raw) = meta_value(annotations, metadata::INSTANCE_ID_KEY) {
            if let Ok(instance) = InstanceId::parse(raw) {
                container.slug = instance.slug();
                container.instance_id = raw.to_string();
            }
        }
        validate(&container)?;

        info!(
            "Scanning SBOM wlid={} container={} tag={} image={}",
            container.wlid, container.container_name, container.image_tag, container.image_id
        );
        out.emit(Command::scan_images(container, None)).await;
        Ok(())
    }
}

/// Image, tag, container and workload are all required to scan
pub(crate) fn validate(container: &ContainerData) -> Result<(), HandlerError> {
    if container.image_id.is_empty() {
        return Err(HandlerError::MissingImageId);
    }
    if container.image_tag.is_empty() {
        return Err(HandlerError::MissingImageTag);
    }
    if container.container_name.is_empty() {
        return Err(HandlerError::MissingContainerName);
    }
    if container.wlid.is_empty() {
        return Err(HandlerError::MissingWlid);
    }
    Ok(())
}
