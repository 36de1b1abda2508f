//! Workload and container identity.
//!
//! - WLID: `wlid://cluster-<cluster>/namespace-<ns>/<kind>-<name>`, kind lowercase
//! - instance id: one running container of a workload, rendered as
//!   `apiVersion-<v>/namespace-<ns>/kind-<kind>/name-<name>/containerName-<c>`
//! - slug: short stable name of an instance id, `<kind>-<name>-<container>-<hash4>`
//!
//! Pods are identified by their top-level workload, resolved through owner
//! references (ReplicaSet to Deployment, Job to CronJob).

use crate::error::HandlerError;
use crate::lookup::{controller_ref, ClusterLookup};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const WLID_PREFIX: &str = "wlid://";
const TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

/// Build a workload id
pub fn wlid(cluster: &str, namespace: &str, kind: &str, name: &str) -> String {
    format!(
        "{}cluster-{}/namespace-{}/{}-{}",
        WLID_PREFIX,
        cluster,
        namespace,
        kind.to_lowercase(),
        name
    )
}

/// Image id without the runtime prefix (`docker-pullable://`, ...)
pub fn extract_image_id(raw: &str) -> &str {
    match raw.split_once("://") {
        Some((_, id)) => id,
        None => raw,
    }
}

/// Digest part of an image id: the text after the last `:`
pub fn hash_from_image_id(image_id: &str) -> &str {
    image_id.rsplit(':').next().unwrap_or(image_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ContainerType {
    Container,
    InitContainer,
    EphemeralContainer,
}

impl ContainerType {
    fn key(self) -> &'static str {
        match self {
            Self::Container => "containerName",
            Self::InitContainer => "initContainerName",
            Self::EphemeralContainer => "ephemeralContainerName",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::InitContainer => "initContainer",
            Self::EphemeralContainer => "ephemeralContainer",
        }
    }
}

/// Identity of one container of a workload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId {
    pub api_version: String,
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub container_name: String,
    pub container_type: ContainerType,
    pub template_hash: Option<String>,
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "apiVersion-{}/namespace-{}/kind-{}/name-{}/{}-{}",
            self.api_version,
            self.namespace,
            self.kind,
            self.name,
            self.container_type.key(),
            self.container_name
        )?;
        if let Some(hash) = &self.template_hash {
            write!(f, "/templateHash-{}", hash)?;
        }
        Ok(())
    }
}

impl InstanceId {
    /// Parse the string form written into annotations
    pub fn parse(raw: &str) -> Result<Self, HandlerError> {
        let invalid = || HandlerError::InvalidInstanceId(raw.to_string());

        let rest = raw.strip_prefix("apiVersion-").ok_or_else(invalid)?;
        // the api version itself may contain a '/'
        let ns_at = rest.find("/namespace-").ok_or_else(invalid)?;
        let api_version = &rest[..ns_at];

        let mut id = Self {
            api_version: api_version.to_string(),
            namespace: String::new(),
            kind: String::new(),
            name: String::new(),
            container_name: String::new(),
            container_type: ContainerType::Container,
            template_hash: None,
        };
        for segment in rest[ns_at + 1..].split('/') {
            let (key, value) = segment.split_once('-').ok_or_else(invalid)?;
            match key {
                "namespace" => id.namespace = value.to_string(),
                "kind" => id.kind = value.to_string(),
                "name" => id.name = value.to_string(),
                "templateHash" => id.template_hash = Some(value.to_string()),
                "containerName" | "initContainerName" | "ephemeralContainerName" => {
                    id.container_name = value.to_string();
                    id.container_type = match key {
                        "initContainerName" => ContainerType::InitContainer,
                        "ephemeralContainerName" => ContainerType::EphemeralContainer,
                        _ => ContainerType::Container,
                    };
                }
                _ => return Err(invalid()),
            }
        }
        if api_version.is_empty() || id.kind.is_empty() || id.name.is_empty() || id.container_name.is_empty() {
            return Err(invalid());
        }
        Ok(id)
    }

    /// Short stable name of this instance
    pub fn slug(&self) -> String {
        let digest = hex::encode(Sha256::digest(self.to_string().as_bytes()));
        format!(
            "{}-{}-{}-{}",
            self.kind.to_lowercase(),
            self.name,
            self.container_name,
            &digest[..4]
        )
    }
}

/// Everything a scan command needs to know about one container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerData {
    pub image_tag: String,
    pub image_id: String,
    pub instance_id: String,
    pub container_name: String,
    pub container_type: String,
    pub slug: String,
    pub wlid: String,
}

impl ContainerData {
    /// Key of the (WLID, image) pair used by the watch state
    pub fn wlid_and_image(&self) -> String {
        format!("{}{}", self.wlid, self.image_id)
    }
}

/// Kind and name of the workload that directly or transitively owns a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodParent {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    /// True when the pod has no owner at all
    pub naked: bool,
}

/// Direct owner of a pod, or the pod itself when it has none
pub fn direct_owner(pod: &Pod) -> PodParent {
    let owners = pod.metadata.owner_references.as_ref();
    let owner = controller_ref(owners).or_else(|| owners.and_then(|o| o.first()));
    match owner {
        Some(o) => PodParent {
            api_version: o.api_version.clone(),
            kind: o.kind.clone(),
            name: o.name.clone(),
            naked: false,
        },
        None => PodParent {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            name: pod.metadata.name.clone().unwrap_or_default(),
            naked: true,
        },
    }
}

/// Resolve the top-level workload of a pod
pub async fn resolve_parent(pod: &Pod, lookup: &dyn ClusterLookup) -> Result<PodParent, HandlerError> {
    let owner = direct_owner(pod);
    if owner.kind != "ReplicaSet" && owner.kind != "Job" {
        return Ok(owner);
    }
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    let parent = lookup
        .controller_of(namespace, &owner.kind, &owner.name)
        .await
        .map_err(|e| HandlerError::Lookup(e.to_string()))?;
    Ok(match parent {
        Some(p) => PodParent {
            api_version: p.api_version,
            kind: p.kind,
            name: p.name,
            naked: false,
        },
        None => owner,
    })
}

fn statuses(pod: &Pod) -> impl Iterator<Item = (&ContainerStatus, ContainerType)> {
    let status = pod.status.as_ref();
    let regular = status
        .and_then(|s| s.container_statuses.as_ref())
        .into_iter()
        .flatten()
        .map(|c| (c, ContainerType::Container));
    let init = status
        .and_then(|s| s.init_container_statuses.as_ref())
        .into_iter()
        .flatten()
        .map(|c| (c, ContainerType::InitContainer));
    let ephemeral = status
        .and_then(|s| s.ephemeral_container_statuses.as_ref())
        .into_iter()
        .flatten()
        .map(|c| (c, ContainerType::EphemeralContainer));
    regular.chain(init).chain(ephemeral)
}

// Image reference from the pod spec, falling back to the status
fn image_tag(pod: &Pod, status: &ContainerStatus, container_type: ContainerType) -> String {
    let spec = pod.spec.as_ref();
    let from_spec = match container_type {
        ContainerType::Container => spec
            .and_then(|s| s.containers.iter().find(|c| c.name == status.name))
            .and_then(|c| c.image.clone()),
        ContainerType::InitContainer => spec
            .and_then(|s| s.init_containers.as_ref())
            .and_then(|cs| cs.iter().find(|c| c.name == status.name))
            .and_then(|c| c.image.clone()),
        ContainerType::EphemeralContainer => spec
            .and_then(|s| s.ephemeral_containers.as_ref())
            .and_then(|cs| cs.iter().find(|c| c.name == status.name))
            .and_then(|c| c.image.clone()),
    };
    from_spec.unwrap_or_else(|| status.image.clone())
}

/// Container data of every container of `pod` whose status carries an image id
pub fn pod_containers(pod: &Pod, cluster: &str, parent: &PodParent) -> Vec<ContainerData> {
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let direct = direct_owner(pod);
    let template_hash = pod
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(TEMPLATE_HASH_LABEL))
        .cloned();
    let workload_id = wlid(cluster, &namespace, &parent.kind, &parent.name);

    statuses(pod)
        .filter_map(|(status, container_type)| {
            let image_id = extract_image_id(&status.image_id);
            if image_id.is_empty() {
                return None;
            }
            let instance = InstanceId {
                api_version: direct.api_version.clone(),
                namespace: namespace.clone(),
                kind: direct.kind.clone(),
                name: direct.name.clone(),
                container_name: status.name.clone(),
                container_type,
                template_hash: template_hash.clone(),
            };
            Some(ContainerData {
                image_tag: image_tag(pod, status, container_type),
                image_id: image_id.to_string(),
                instance_id: instance.to_string(),
                container_name: status.name.clone(),
                container_type: container_type.as_str().to_string(),
                slug: instance.slug(),
                wlid: workload_id.clone(),
            })
        })
        .collect()
}
