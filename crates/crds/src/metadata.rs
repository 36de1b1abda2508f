//! Well-known annotation and label keys
//!
//! Keys written by the node agent and storage onto SBOM and profile objects.
//! The same keys are used as labels on profiles to point back at the workload.

pub const INSTANCE_ID_KEY: &str = "kubescape.io/instance-id";
pub const WLID_KEY: &str = "kubescape.io/wlid";
pub const STATUS_KEY: &str = "kubescape.io/status";
pub const COMPLETION_KEY: &str = "kubescape.io/completion";
pub const IMAGE_ID_KEY: &str = "kubescape.io/image-id";
pub const IMAGE_TAG_KEY: &str = "kubescape.io/image-tag";
pub const CONTAINER_NAME_KEY: &str = "kubescape.io/container-name";

pub const API_GROUP_KEY: &str = "kubescape.io/workload-api-group";
pub const API_VERSION_KEY: &str = "kubescape.io/workload-api-version";
pub const KIND_KEY: &str = "kubescape.io/workload-kind";
pub const NAME_KEY: &str = "kubescape.io/workload-name";
pub const NAMESPACE_KEY: &str = "kubescape.io/workload-namespace";

/// Values of [`STATUS_KEY`]
pub mod status {
    pub const INITIALIZING: &str = "initializing";
    pub const READY: &str = "ready";
    pub const LEARNING: &str = "learning";
    pub const COMPLETED: &str = "completed";
}

/// Values of [`COMPLETION_KEY`]
pub mod completion {
    pub const PARTIAL: &str = "partial";
    pub const COMPLETE: &str = "complete";
}
