//! SBOM CRDs
//!
//! Software bills of materials produced for container images:
//! - `SBOMSyft`: full SBOM of an image
//! - `SBOMSyftFiltered`: SBOM reduced to the files a running container touched

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "spdx.softwarecomposition.kubescape.io",
    version = "v1beta1",
    kind = "SBOMSyft",
    plural = "sbomsyfts",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SBOMSyftSpec {
    #[serde(default)]
    pub metadata: SPDXMeta,

    /// Raw syft document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syft: Option<serde_json::Value>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "spdx.softwarecomposition.kubescape.io",
    version = "v1beta1",
    kind = "SBOMSyftFiltered",
    plural = "sbomsyftfiltereds",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SBOMSyftFilteredSpec {
    #[serde(default)]
    pub metadata: SPDXMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syft: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SPDXMeta {
    #[serde(default)]
    pub tool: ToolMeta,

    #[serde(default)]
    pub report: ReportMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReportMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}
