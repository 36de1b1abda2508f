//! Runtime profile CRDs
//!
//! Behaviour recorded by the node agent while containers run:
//! - `ApplicationProfile`: per workload, one entry per container
//! - `ContainerProfile`: per container instance

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "spdx.softwarecomposition.kubescape.io",
    version = "v1beta1",
    kind = "ApplicationProfile",
    plural = "applicationprofiles",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationProfileSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub architectures: Vec<String>,

    #[serde(default)]
    pub containers: Vec<ProfileContainer>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<ProfileContainer>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ephemeral_containers: Vec<ProfileContainer>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "spdx.softwarecomposition.kubescape.io",
    version = "v1beta1",
    kind = "ContainerProfile",
    plural = "containerprofiles",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ContainerProfileSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub architectures: Vec<String>,

    #[serde(flatten)]
    pub container: ProfileContainer,
}

/// Recorded behaviour of a single container
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileContainer {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub syscalls: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub execs: Vec<ExecCall>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub opens: Vec<OpenCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecCall {
    pub path: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct OpenCall {
    pub path: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}
