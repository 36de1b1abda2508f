//! Request bodies posted to the scanner services

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scan session bookkeeping attached to every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSession {
    pub job_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_job_id: Option<String>,
}

impl ScanSession {
    /// New session with a random job id
    pub fn new() -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            parent_job_id: None,
        }
    }
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Request to scan one container image, or the filtered SBOM of one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageScanRequest {
    pub session: ScanSession,
    pub wlid: String,
    pub image_tag: String,
    pub image_hash: String,
    pub container_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub slug: String,

    /// Live pod object, forwarded untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<Value>,
}

/// Which runtime profile a [`ProfileScanRequest`] refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileKind {
    ApplicationProfile,
    ContainerProfile,
}

/// Request to scan the images referenced by a runtime profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileScanRequest {
    pub session: ScanSession,
    pub wlid: String,
    pub kind: ProfileKind,
    pub name: String,
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<Value>,
}

/// Request to run a configuration scan on one workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadScanRequest {
    pub session: ScanSession,
    pub wlid: String,

    /// Workload object as observed by the watch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
}
