//! Filtered SBOM handler.
//!
//! A filtered SBOM describes one running container, so its identity comes
//! entirely from the instance id annotation. Scans are idempotent per slug.

use crate::command::{Command, CommandArgs, CommandName};
use crate::error::HandlerError;
use crate::event::WatchEvent;
use crate::handlers::sbom::validate;
use crate::handlers::{meta_value, status_allowed, Emitter, EventHandler};
use crate::identity::{ContainerData, InstanceId};
use crate::state::{Admission, WatchState};
use crds::metadata::{self, status};
use crds::SBOMSyftFiltered;
use std::collections::BTreeMap;
use tracing::{debug, info};

const ALLOWED_STATUSES: &[&str] = &["", status::READY, status::COMPLETED];

#[derive(Clone, Debug)]
pub struct FilteredSbomHandler {
    state: WatchState,
}

impl FilteredSbomHandler {
    pub fn new(state: WatchState) -> Self {
        Self { state }
    }
}

fn container_data(annotations: Option<&BTreeMap<String, String>>) -> Result<ContainerData, HandlerError> {
    let raw = meta_value(annotations, metadata::INSTANCE_ID_KEY)
        .ok_or(HandlerError::MissingAnnotation(metadata::INSTANCE_ID_KEY))?;
    let instance = InstanceId::parse(raw)?;
    let container = ContainerData {
        image_id: meta_value(annotations, metadata::IMAGE_ID_KEY)
            .unwrap_or_default()
            .to_string(),
        image_tag: meta_value(annotations, metadata::IMAGE_TAG_KEY)
            .unwrap_or_default()
            .to_string(),
        wlid: meta_value(annotations, metadata::WLID_KEY)
            .unwrap_or_default()
            .to_string(),
        container_name: instance.container_name.clone(),
        container_type: instance.container_type.as_str().to_string(),
        slug: instance.slug(),
        instance_id: raw.to_string(),
    };
    validate(&container)?;
    Ok(container)
}

#[async_trait::async_trait]
impl EventHandler<SBOMSyftFiltered> for FilteredSbomHandler {
    fn name(&self) -> &'static str {
        "filtered-sbom"
    }

    async fn handle(&self, event: WatchEvent<SBOMSyftFiltered>, out: &Emitter) -> Result<(), HandlerError> {
        let Some(sbom) = event.into_actionable() else {
            return Ok(());
        };
        let annotations = sbom.metadata.annotations.as_ref();
        if annotations.is_none_or(BTreeMap::is_empty) || !status_allowed(annotations, ALLOWED_STATUSES) {
            return Ok(());
        }

        let container = container_data(annotations)?;
        match self.state.admit(&container) {
            Admission::Scan => {
                info!(
                    "Scanning filtered SBOM wlid={} slug={} container={} image={}",
                    container.wlid, container.slug, container.container_name, container.image_id
                );
                let wlid = container.wlid.clone();
                let args = CommandArgs::Container {
                    container_data: container,
                    pod: None,
                };
                out.emit(Command::new(CommandName::ScanFilteredSbom, wlid, args)).await;
            }
            skipped => debug!("Skipping filtered SBOM {} ({:?})", container.slug, skipped),
        }
        Ok(())
    }
}
