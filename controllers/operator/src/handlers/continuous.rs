//! Continuous configuration scanning.
//!
//! Matching rules name the resources to watch:
//!
//! ```json
//! {"match": [{"apiGroups": ["apps"], "apiVersions": ["v1"], "resources": ["deployments"]}],
//!  "namespaces": ["default"]}
//! ```
//!
//! Each rule expands to every combination of its groups, versions and
//! resources. Every added or modified object of those resources triggers a
//! configuration scan of its workload, except pods, replica sets and jobs
//! that have an owner: their owner is scanned instead.

use crate::command::{Command, CommandArgs, CommandName};
use crate::error::{ControllerError, HandlerError};
use crate::event::WatchEvent;
use crate::handlers::{Emitter, EventHandler};
use crate::identity::wlid;
use crate::source::Gvr;
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Kinds that are usually created by another workload
const ORPHANABLE_KINDS: &[&str] = &["Pod", "ReplicaSet", "Job"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMatch {
    #[serde(rename = "apiGroups", default)]
    pub groups: Vec<String>,
    #[serde(rename = "apiVersions", default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingRules {
    #[serde(rename = "match", default)]
    pub resources: Vec<ResourceMatch>,
    #[serde(default)]
    pub namespaces: Vec<String>,
}

impl MatchingRules {
    pub fn from_file(path: &Path) -> Result<Self, ControllerError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::InvalidConfig(format!("cannot read matching rules {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Every GVR the rules match, without duplicates, in rule order
    pub fn gvrs(&self) -> Vec<Gvr> {
        let mut out: Vec<Gvr> = Vec::new();
        for rule in &self.resources {
            for group in &rule.groups {
                for version in &rule.versions {
                    for resource in &rule.resources {
                        let gvr = Gvr::new(group, version, resource);
                        if !out.contains(&gvr) {
                            out.push(gvr);
                        }
                    }
                }
            }
        }
        out
    }
}

/// True for pods, replica sets and jobs that have an owner
pub fn is_owned_workload(obj: &DynamicObject) -> bool {
    let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();
    ORPHANABLE_KINDS.contains(&kind)
        && obj
            .metadata
            .owner_references
            .as_ref()
            .is_some_and(|owners| !owners.is_empty())
}

#[derive(Clone, Debug)]
pub struct WorkloadHandler {
    cluster_name: String,
    namespaces: Vec<String>,
}

impl WorkloadHandler {
    pub fn new(cluster_name: impl Into<String>, namespaces: Vec<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            namespaces,
        }
    }
}

#[async_trait::async_trait]
impl EventHandler<DynamicObject> for WorkloadHandler {
    fn name(&self) -> &'static str {
        "workload"
    }

    async fn handle(&self, event: WatchEvent<DynamicObject>, out: &Emitter) -> Result<(), HandlerError> {
        let Some(obj) = event.into_actionable() else {
            return Ok(());
        };
        let kind = obj
            .types
            .as_ref()
            .map(|t| t.kind.clone())
            .filter(|k| !k.is_empty())
            .ok_or(HandlerError::UnsupportedObject("object with apiVersion and kind"))?;
        let namespace = obj.metadata.namespace.clone().unwrap_or_default();
        if !namespace.is_empty() && !self.namespaces.is_empty() && !self.namespaces.contains(&namespace) {
            return Ok(());
        }
        if is_owned_workload(&obj) {
            return Ok(());
        }

        let name = obj.metadata.name.clone().unwrap_or_default();
        let workload = wlid(&self.cluster_name, &namespace, &kind, &name);
        info!("Triggering configuration scan for {} {}/{}", kind, namespace, name);
        let object = serde_json::to_value(&obj).ok();
        out.emit(Command::new(CommandName::ScanWorkload, workload, CommandArgs::Workload { object }))
            .await;
        Ok(())
    }
}
