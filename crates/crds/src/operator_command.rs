//! OperatorCommand CRD
//!
//! Durable command object created by the backend (or by users) and executed by
//! the operator. The operator reports progress back through `status`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label carried by every command addressed to the operator
pub const OPERATOR_COMMAND_APP_NAME_LABEL: &str = "kubescape.io/app-name";

/// Value of [`OPERATOR_COMMAND_APP_NAME_LABEL`] selecting operator commands
pub const OPERATOR_COMMAND_APP_NAME: &str = "operator";

/// Command type whose body is a serialized operator command
pub const OPERATOR_API_COMMAND_TYPE: &str = "OperatorAPI";

/// Executor name written into the status of handled commands
pub const OPERATOR_EXECUTER: &str = "operator";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "kubescape.io",
    version = "v1alpha1",
    kind = "OperatorCommand",
    plural = "operatorcommands",
    namespaced,
    status = "OperatorCommandStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCommandSpec {
    /// Unique identifier of the command
    #[serde(default)]
    pub guid: String,

    /// Command type, used to route the command to a consumer
    pub command_type: String,

    /// Version of the command body schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_version: Option<String>,

    /// Target designators
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub designators: Vec<BTreeMap<String, String>>,

    /// Command payload, base64 encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Time to live in nanoseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,

    /// Free-form arguments
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,

    /// Index of this command inside a batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_index: Option<i32>,

    /// Total number of commands in the batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_count: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCommandStatus {
    /// Component that executed the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executer: Option<String>,

    /// Whether execution has started
    #[serde(default)]
    pub started: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Whether execution has finished, successfully or not
    #[serde(default)]
    pub completed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Error reported by the executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperatorCommandStatusError>,

    /// Result payload, base64 encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCommandStatusError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
}

impl OperatorCommand {
    /// True once an executor marked the command as completed
    pub fn is_completed(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.completed)
    }
}
