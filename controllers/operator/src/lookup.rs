//! Point lookups against the live cluster.
//!
//! Handlers use these to attach the live pod spec to commands, to resolve
//! the top-level workload owning a pod, and to check whether a profiled
//! workload still has pods. All lookups are best effort for callers.

use crate::error::WatchError;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DynamicObject, GroupVersionKind, ListParams};
use kube::discovery;
use kube::{Api, Client};
use std::fmt;

/// Workload a runtime profile was recorded for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadRef {
    pub api_group: String,
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

#[async_trait::async_trait]
pub trait ClusterLookup: Send + Sync {
    /// Fetch a pod, `None` if it does not exist
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, WatchError>;

    /// Controller owner of an intermediate workload (ReplicaSet, Job)
    async fn controller_of(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<Option<OwnerReference>, WatchError>;

    /// True if the workload's selector currently matches at least one pod
    async fn has_pods_for_workload(&self, workload: &WorkloadRef) -> Result<bool, WatchError>;
}

/// Controller owner reference of an object's metadata, if any
pub fn controller_ref(owners: Option<&Vec<OwnerReference>>) -> Option<&OwnerReference> {
    owners?.iter().find(|o| o.controller == Some(true))
}

/// Equality selector built from a workload's `spec.selector.matchLabels`
pub fn match_labels_selector(workload: &DynamicObject) -> Option<String> {
    let match_labels = workload
        .data
        .pointer("/spec/selector/matchLabels")
        .and_then(|v| v.as_object())?;
    let selector = match_labels
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|v| format!("{}={}", k, v)))
        .collect::<Vec<_>>()
        .join(",");
    (!selector.is_empty()).then_some(selector)
}

/// [`ClusterLookup`] over the Kubernetes API
#[derive(Clone)]
pub struct KubeLookup {
    client: Client,
}

impl fmt::Debug for KubeLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeLookup").finish_non_exhaustive()
    }
}

impl KubeLookup {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ClusterLookup for KubeLookup {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, WatchError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn controller_of(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<Option<OwnerReference>, WatchError> {
        let owners = match kind {
            "ReplicaSet" => {
                let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
                api.get_opt(name).await?.and_then(|rs| rs.metadata.owner_references)
            }
            "Job" => {
                let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
                api.get_opt(name).await?.and_then(|job| job.metadata.owner_references)
            }
            _ => None,
        };
        Ok(controller_ref(owners.as_ref()).cloned())
    }

    async fn has_pods_for_workload(&self, workload: &WorkloadRef) -> Result<bool, WatchError> {
        if workload.kind == "Pod" {
            return Ok(self.get_pod(&workload.namespace, &workload.name).await?.is_some());
        }
        // The server knows the resource name, irregular plurals included
        let gvk = GroupVersionKind::gvk(&workload.api_group, &workload.api_version, &workload.kind);
        let (resource, _caps) = discovery::pinned_kind(&self.client, &gvk).await?;
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &workload.namespace, &resource);

        let Some(obj) = api.get_opt(&workload.name).await? else {
            return Ok(false);
        };
        let Some(selector) = match_labels_selector(&obj) else {
            return Ok(false);
        };

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &workload.namespace);
        let list = pods.list(&ListParams::default().labels(&selector).limit(1)).await?;
        Ok(!list.items.is_empty())
    }
}
