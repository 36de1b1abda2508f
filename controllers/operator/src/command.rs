//! Commands produced by handlers and executed by the worker pool.
//!
//! A command names its target workload, what to do, and a typed argument
//! payload. The JSON form is what `OperatorCommand` bodies and the trigger
//! endpoint carry:
//!
//! ```json
//! {"CommandName": "scan", "wlid": "wlid://...", "args": {"kind": "container", ...}}
//! ```

use crate::identity::ContainerData;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandName {
    /// Vulnerability scan of container images
    #[serde(rename = "scan")]
    ScanImages,
    #[serde(rename = "scanFilteredSBOM")]
    ScanFilteredSbom,
    #[serde(rename = "scanApplicationProfile")]
    ScanApplicationProfile,
    #[serde(rename = "scanContainerProfile")]
    ScanContainerProfile,
    /// Configuration scan of one workload
    #[serde(rename = "kubescapeScan")]
    ScanWorkload,
}

impl CommandName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScanImages => "scan",
            Self::ScanFilteredSbom => "scanFilteredSBOM",
            Self::ScanApplicationProfile => "scanApplicationProfile",
            Self::ScanContainerProfile => "scanContainerProfile",
            Self::ScanWorkload => "kubescapeScan",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments, one variant per family of commands
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CommandArgs {
    #[default]
    None,
    #[serde(rename_all = "camelCase")]
    Container {
        container_data: ContainerData,
        /// Live pod, best effort
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pod: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Profile {
        name: String,
        namespace: String,
        /// Pod the profile was recorded for, when the profile is per pod
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pod: Option<Value>,
    },
    Workload {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        object: Option<Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub wlid: String,

    #[serde(rename = "CommandName")]
    pub name: CommandName,

    #[serde(default)]
    pub args: CommandArgs,
}

impl Command {
    pub fn new(name: CommandName, wlid: impl Into<String>, args: CommandArgs) -> Self {
        Self {
            wlid: wlid.into(),
            name,
            args,
        }
    }

    pub fn scan_images(container: ContainerData, pod: Option<Value>) -> Self {
        Self::new(
            CommandName::ScanImages,
            container.wlid.clone(),
            CommandArgs::Container {
                container_data: container,
                pod,
            },
        )
    }
}

/// Envelope accepted by the trigger endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commands {
    pub commands: Vec<Command>,
}
