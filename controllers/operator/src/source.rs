//! Resource sources.
//!
//! [`ResourceSource`] is the narrow seam between the watch loops and the
//! Kubernetes API: one paginated `list` call and one streaming `watch` call.
//! [`KubeSource`] implements it over `kube::Api`, tests use in-memory fakes.

use crate::error::WatchError;
use crate::event::WatchEvent;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::api::{ApiResource, DynamicObject, ListParams, VersionMatch, WatchParams};
use kube::discovery::Discovery;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt;
use tracing::debug;

/// Options of a list or watch call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub limit: Option<u32>,
    pub continue_token: Option<String>,
    /// List: only return state at least this new. Watch: start after this version.
    pub resource_version: Option<String>,
}

impl ListOptions {
    pub fn labels(mut self, selector: &str) -> Self {
        self.label_selector = Some(selector.to_string());
        self
    }

    pub fn fields(mut self, selector: &str) -> Self {
        self.field_selector = Some(selector.to_string());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One page of a list call
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage<K> {
    pub items: Vec<K>,
    /// Token for the next page, `None` on the last page
    pub continue_token: Option<String>,
    pub resource_version: Option<String>,
}

pub type EventStream<K> = BoxStream<'static, Result<WatchEvent<K>, WatchError>>;

/// List and watch access to one resource type
#[async_trait::async_trait]
pub trait ResourceSource<K>: Send + Sync {
    /// Human readable name used in logs
    fn describe(&self) -> String;

    async fn list(&self, opts: &ListOptions) -> Result<ListPage<K>, WatchError>;

    async fn watch(&self, opts: &ListOptions) -> Result<EventStream<K>, WatchError>;
}

/// Group, version and plural resource name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gvr {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl Gvr {
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
        }
    }
}

impl fmt::Display for Gvr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

/// [`ResourceSource`] over the Kubernetes API
#[derive(Clone)]
pub struct KubeSource<K: Resource> {
    api: Api<K>,
    name: String,
}

impl<K: Resource> fmt::Debug for KubeSource<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeSource").field("name", &self.name).finish()
    }
}

impl<K: Resource> KubeSource<K> {
    pub fn new(api: Api<K>, name: impl Into<String>) -> Self {
        Self {
            api,
            name: name.into(),
        }
    }
}

impl KubeSource<DynamicObject> {
    /// Cluster-wide source for an arbitrary resource, resolved through discovery
    pub fn dynamic(client: Client, resource: &ApiResource) -> Self {
        Self::new(
            Api::all_with(client, resource),
            format!("{}/{}", resource.api_version, resource.plural),
        )
    }
}

/// Resolve GVRs into API resources, unknown ones are returned separately
pub async fn resolve_gvrs(
    client: Client,
    gvrs: &[Gvr],
) -> Result<(Vec<(Gvr, ApiResource)>, Vec<Gvr>), WatchError> {
    let discovery = Discovery::new(client).run().await?;
    let mut resolved = Vec::new();
    let mut unknown = Vec::new();
    for gvr in gvrs {
        let found = discovery
            .groups()
            .filter(|g| g.name() == gvr.group)
            .flat_map(|g| g.versioned_resources(&gvr.version))
            .find(|(ar, _)| ar.plural == gvr.resource);
        match found {
            Some((ar, _)) => resolved.push((gvr.clone(), ar)),
            None => unknown.push(gvr.clone()),
        }
    }
    Ok((resolved, unknown))
}

fn list_params(opts: &ListOptions) -> ListParams {
    let mut lp = ListParams::default();
    if let Some(labels) = &opts.label_selector {
        lp = lp.labels(labels);
    }
    if let Some(fields) = &opts.field_selector {
        lp = lp.fields(fields);
    }
    if let Some(limit) = opts.limit {
        lp = lp.limit(limit);
    }
    match (&opts.continue_token, &opts.resource_version) {
        (Some(token), _) => lp = lp.continue_token(token),
        // a resource version may only accompany the first page
        (None, Some(rv)) if !rv.is_empty() => {
            lp = lp.at(rv).matching(VersionMatch::NotOlderThan);
        }
        _ => {}
    }
    lp
}

fn watch_params(opts: &ListOptions) -> WatchParams {
    let mut wp = WatchParams::default().timeout(290);
    if let Some(labels) = &opts.label_selector {
        wp = wp.labels(labels);
    }
    if let Some(fields) = &opts.field_selector {
        wp = wp.fields(fields);
    }
    wp
}

#[async_trait::async_trait]
impl<K> ResourceSource<K> for KubeSource<K>
where
    K: Resource + Clone + DeserializeOwned + fmt::Debug + Send + Sync + 'static,
{
    fn describe(&self) -> String {
        self.name.clone()
    }

    async fn list(&self, opts: &ListOptions) -> Result<ListPage<K>, WatchError> {
        let list = self.api.list(&list_params(opts)).await?;
        Ok(ListPage {
            items: list.items,
            continue_token: list.metadata.continue_.filter(|t| !t.is_empty()),
            resource_version: list.metadata.resource_version,
        })
    }

    async fn watch(&self, opts: &ListOptions) -> Result<EventStream<K>, WatchError> {
        let version = opts.resource_version.as_deref().unwrap_or("0");
        debug!("Opening watch on {} at version {}", self.name, version);
        let stream = self.api.watch(&watch_params(opts), version).await?;
        Ok(stream
            .map(|item| match item {
                Ok(kube::core::WatchEvent::Added(obj)) => Ok(WatchEvent::Added(obj)),
                Ok(kube::core::WatchEvent::Modified(obj)) => Ok(WatchEvent::Modified(obj)),
                Ok(kube::core::WatchEvent::Deleted(obj)) => Ok(WatchEvent::Deleted(obj)),
                Ok(kube::core::WatchEvent::Bookmark(bookmark)) => Ok(WatchEvent::Bookmark {
                    resource_version: bookmark.metadata.resource_version,
                }),
                Ok(kube::core::WatchEvent::Error(e)) => Ok(WatchEvent::Error(format!("{:?}", e))),
                Err(e) => Err(WatchError::Kube(e)),
            })
            .boxed())
    }
}
