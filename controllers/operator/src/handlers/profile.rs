//! Runtime profile handlers.
//!
//! Application and container profiles are handled the same way, they only
//! differ in the statuses they accept and in the command they produce:
//!
//! | resource | statuses | command |
//! |---|---|---|
//! | `ApplicationProfile` | `""`, `ready`, `completed` | `scanApplicationProfile` |
//! | `ContainerProfile` | `""`, `learning`, `completed` | `scanContainerProfile` |
//!
//! The pod a profile was recorded for is attached when the profile's workload
//! labels point at a pod. With `skip_without_instances`, profiles whose
//! workload no longer has any pod are dropped.

use crate::command::{Command, CommandArgs, CommandName};
use crate::error::HandlerError;
use crate::event::WatchEvent;
use crate::handlers::{meta_value, status_allowed, Emitter, EventHandler};
use crate::lookup::{ClusterLookup, WorkloadRef};
use crds::metadata::{self, status};
use crds::{ApplicationProfile, ContainerProfile};
use kube::api::ObjectMeta;
use kube::Resource;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A profile resource and how it is turned into a command
pub trait ProfileResource: Resource + Send + Sync + 'static {
    const HANDLER: &'static str;
    const ALLOWED_STATUSES: &'static [&'static str];
    const COMMAND: CommandName;
}

impl ProfileResource for ApplicationProfile {
    const HANDLER: &'static str = "application-profile";
    const ALLOWED_STATUSES: &'static [&'static str] = &["", status::READY, status::COMPLETED];
    const COMMAND: CommandName = CommandName::ScanApplicationProfile;
}

impl ProfileResource for ContainerProfile {
    const HANDLER: &'static str = "container-profile";
    const ALLOWED_STATUSES: &'static [&'static str] = &["", status::LEARNING, status::COMPLETED];
    const COMMAND: CommandName = CommandName::ScanContainerProfile;
}

pub struct ProfileHandler<K> {
    lookup: Arc<dyn ClusterLookup>,
    skip_without_instances: bool,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for ProfileHandler<K> {
    fn clone(&self) -> Self {
        Self {
            lookup: Arc::clone(&self.lookup),
            skip_without_instances: self.skip_without_instances,
            _kind: PhantomData,
        }
    }
}

impl<K: ProfileResource> ProfileHandler<K> {
    pub fn new(lookup: Arc<dyn ClusterLookup>) -> Self {
        Self {
            lookup,
            skip_without_instances: false,
            _kind: PhantomData,
        }
    }

    #[must_use]
    pub fn skip_without_instances(mut self, skip: bool) -> Self {
        self.skip_without_instances = skip;
        self
    }

    // Live pod for profiles recorded per pod
    async fn pod_for(&self, meta: &ObjectMeta, namespace: &str) -> Result<Option<Value>, HandlerError> {
        let labels = meta.labels.as_ref();
        if meta_value(labels, metadata::KIND_KEY) != Some("Pod") {
            return Ok(None);
        }
        let name = meta_value(labels, metadata::NAME_KEY)
            .filter(|n| !n.is_empty())
            .ok_or(HandlerError::MissingAnnotation(metadata::NAME_KEY))?;
        let pod = self
            .lookup
            .get_pod(namespace, name)
            .await
            .map_err(|e| HandlerError::Lookup(e.to_string()))?;
        Ok(pod.and_then(|p| serde_json::to_value(p).ok()))
    }
}

/// Workload a profile's labels point at
pub fn workload_of(meta: &ObjectMeta) -> WorkloadRef {
    let labels = meta.labels.as_ref();
    let label = |key| meta_value(labels, key).unwrap_or_default().to_string();
    let namespace = meta_value(labels, metadata::NAMESPACE_KEY)
        .map(str::to_string)
        .or_else(|| meta.namespace.clone())
        .unwrap_or_default();
    WorkloadRef {
        api_group: label(metadata::API_GROUP_KEY),
        api_version: label(metadata::API_VERSION_KEY),
        kind: label(metadata::KIND_KEY),
        name: label(metadata::NAME_KEY),
        namespace,
    }
}

#[async_trait::async_trait]
impl<K: ProfileResource> EventHandler<K> for ProfileHandler<K> {
    fn name(&self) -> &'static str {
        K::HANDLER
    }

    async fn handle(&self, event: WatchEvent<K>, out: &Emitter) -> Result<(), HandlerError> {
        let Some(profile) = event.into_actionable() else {
            return Ok(());
        };
        let meta = profile.meta();
        let annotations = meta.annotations.as_ref();
        if annotations.is_none_or(|a| a.is_empty()) || !status_allowed(annotations, K::ALLOWED_STATUSES) {
            return Ok(());
        }
        meta_value(annotations, metadata::INSTANCE_ID_KEY)
            .filter(|v| !v.is_empty())
            .ok_or(HandlerError::MissingAnnotation(metadata::INSTANCE_ID_KEY))?;
        let wlid = meta_value(annotations, metadata::WLID_KEY)
            .filter(|v| !v.is_empty())
            .ok_or(HandlerError::MissingWlid)?
            .to_string();

        let name = meta.name.clone().unwrap_or_default();
        let namespace = meta.namespace.clone().unwrap_or_default();

        if self.skip_without_instances {
            let workload = workload_of(meta);
            let has_pods = self
                .lookup
                .has_pods_for_workload(&workload)
                .await
                .map_err(|e| HandlerError::Lookup(e.to_string()))?;
            if !has_pods {
                debug!("Skipping {} {}/{}: no running instances", K::HANDLER, namespace, name);
                return Ok(());
            }
        }

        // the pod only enriches the command
        let pod = match self.pod_for(meta, &namespace).await {
            Ok(pod) => pod,
            Err(e) => {
                warn!("Failed loading pod for {} {}/{}: {}", K::HANDLER, namespace, name, e);
                None
            }
        };

        info!("Scanning {} wlid={} name={} namespace={}", K::HANDLER, wlid, name, namespace);
        let args = CommandArgs::Profile { name, namespace, pod };
        out.emit(Command::new(K::COMMAND, wlid, args)).await;
        Ok(())
    }
}
