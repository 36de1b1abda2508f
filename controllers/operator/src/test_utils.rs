//! Test utilities for unit testing watches and handlers
//!
//! Fixture builders for the watched objects plus in-memory fakes of
//! [`ResourceSource`] and [`ClusterLookup`].

use crate::command::Command;
use crate::error::WatchError;
use crate::event::WatchEvent;
use crate::handlers::{Emitter, HandlerFailure};
use crate::lookup::{ClusterLookup, WorkloadRef};
use crate::source::{EventStream, ListOptions, ListPage, ResourceSource};
use chrono::{DateTime, SecondsFormat, Utc};
use crds::metadata;
use crds::operator_command::{OPERATOR_API_COMMAND_TYPE, OPERATOR_COMMAND_APP_NAME, OPERATOR_COMMAND_APP_NAME_LABEL};
use crds::{OperatorCommand, OperatorCommandSpec, SBOMSyft, SBOMSyftFiltered};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Container, ContainerStatus, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DynamicObject, ObjectMeta, TypeMeta};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Helper to create a running pod with one container
///
/// The container's spec image is the container name, its status carries
/// `image_id`.
pub fn create_test_pod(name: &str, namespace: &str, container: &str, image_id: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{}", name)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: container.to_string(),
                image: Some(container.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            container_statuses: Some(vec![ContainerStatus {
                name: container.to_string(),
                image: container.to_string(),
                image_id: image_id.to_string(),
                ready: true,
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// Add a controller owner reference to a pod
pub fn with_owner(mut pod: Pod, api_version: &str, kind: &str, name: &str) -> Pod {
    pod.metadata
        .owner_references
        .get_or_insert_with(Vec::new)
        .push(OwnerReference {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: format!("uid-{}", name),
            controller: Some(true),
            ..Default::default()
        });
    pod
}

/// Helper to create an arbitrary workload in `default`
pub fn create_test_workload(api_version: &str, kind: &str, name: &str, uid: &str) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some(uid.to_string()),
            ..Default::default()
        },
        data: serde_json::json!({ "spec": {} }),
    }
}

/// Helper to create an SBOM of image `<name>` used by deployment `<name>`
pub fn create_test_sbom(name: &str, status: &str) -> SBOMSyft {
    let mut sbom = SBOMSyft::new(name, Default::default());
    sbom.metadata.namespace = Some("default".to_string());
    sbom.metadata.uid = Some(format!("uid-{}", name));
    sbom.metadata.annotations = Some(BTreeMap::from([
        (metadata::STATUS_KEY.to_string(), status.to_string()),
        (
            metadata::IMAGE_ID_KEY.to_string(),
            format!("docker.io/library/{}@sha256:{}", name, "0".repeat(64)),
        ),
        (metadata::IMAGE_TAG_KEY.to_string(), format!("{}:latest", name)),
        (
            metadata::WLID_KEY.to_string(),
            format!("wlid://cluster-clusterCHANGEME/namespace-default/deployment-{}", name),
        ),
        (metadata::CONTAINER_NAME_KEY.to_string(), name.to_string()),
    ]));
    sbom
}

/// Helper to create the filtered SBOM of container `<name>` of ReplicaSet `<name>-7c5d`
pub fn create_test_filtered_sbom(name: &str, status: &str) -> SBOMSyftFiltered {
    let mut sbom = SBOMSyftFiltered::new(&format!("replicaset-{}-7c5d-{}", name, name), Default::default());
    sbom.metadata.namespace = Some("default".to_string());
    sbom.metadata.uid = Some(format!("uid-filtered-{}", name));
    sbom.metadata.annotations = Some(BTreeMap::from([
        (metadata::STATUS_KEY.to_string(), status.to_string()),
        (
            metadata::INSTANCE_ID_KEY.to_string(),
            format!(
                "apiVersion-apps/v1/namespace-default/kind-ReplicaSet/name-{}-7c5d/containerName-{}",
                name, name
            ),
        ),
        (
            metadata::IMAGE_ID_KEY.to_string(),
            format!("docker.io/library/{}@sha256:{}", name, "1".repeat(64)),
        ),
        (metadata::IMAGE_TAG_KEY.to_string(), format!("{}:1.27", name)),
        (
            metadata::WLID_KEY.to_string(),
            format!("wlid://cluster-clusterCHANGEME/namespace-default/deployment-{}", name),
        ),
    ]));
    sbom
}

/// Helper to create profile metadata pointing at workload `kind/workload_name`
pub fn create_test_profile_meta(name: &str, status: &str, kind: &str, workload_name: &str) -> ObjectMeta {
    let api_group = if kind == "Pod" { "" } else { "apps" };
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some("default".to_string()),
        uid: Some(format!("uid-{}", name)),
        annotations: Some(BTreeMap::from([
            (metadata::STATUS_KEY.to_string(), status.to_string()),
            (
                metadata::INSTANCE_ID_KEY.to_string(),
                format!(
                    "apiVersion-v1/namespace-default/kind-{}/name-{}/containerName-main",
                    kind, workload_name
                ),
            ),
            (
                metadata::WLID_KEY.to_string(),
                "wlid://cluster-clusterCHANGEME/namespace-default/deployment-web".to_string(),
            ),
        ])),
        labels: Some(BTreeMap::from([
            (metadata::API_GROUP_KEY.to_string(), api_group.to_string()),
            (metadata::API_VERSION_KEY.to_string(), "v1".to_string()),
            (metadata::KIND_KEY.to_string(), kind.to_string()),
            (metadata::NAME_KEY.to_string(), workload_name.to_string()),
            (metadata::NAMESPACE_KEY.to_string(), "default".to_string()),
        ])),
        ..Default::default()
    }
}

/// Helper to create an `OperatorAPI` command created at `created`, without body
pub fn create_test_command(name: &str, uid: &str, created: DateTime<Utc>) -> OperatorCommand {
    let mut cmd = OperatorCommand::new(
        name,
        OperatorCommandSpec {
            guid: uid.to_string(),
            command_type: OPERATOR_API_COMMAND_TYPE.to_string(),
            ..Default::default()
        },
    );
    cmd.metadata.namespace = Some("kubescape".to_string());
    cmd.metadata.uid = Some(uid.to_string());
    cmd.metadata.labels = Some(BTreeMap::from([(
        OPERATOR_COMMAND_APP_NAME_LABEL.to_string(),
        OPERATOR_COMMAND_APP_NAME.to_string(),
    )]));
    cmd.metadata.creation_timestamp =
        serde_json::from_value(serde_json::json!(created.to_rfc3339_opts(SecondsFormat::Secs, true))).ok();
    cmd
}

/// Emitter whose command channel holds `capacity` commands
pub fn emitter(capacity: usize) -> (Emitter, mpsc::Receiver<Command>, mpsc::UnboundedReceiver<HandlerFailure>) {
    let (commands_tx, commands_rx) = mpsc::channel(capacity);
    let (errors_tx, errors_rx) = mpsc::unbounded_channel();
    (Emitter::new(commands_tx, errors_tx), commands_rx, errors_rx)
}

enum Session<K> {
    Events(Vec<WatchEvent<K>>),
    OpenError(String),
    // the watch call never returns
    Hang,
}

struct SourceScript<K> {
    sessions: VecDeque<Session<K>>,
    pages: VecDeque<Result<ListPage<K>, String>>,
    watch_versions: Vec<Option<String>>,
    list_calls: Vec<ListOptions>,
}

/// Scripted [`ResourceSource`]
///
/// Each `watch` call plays the next session and then closes the stream, fails
/// to open, or hangs in the open call. Once
/// the script is exhausted the stream stays open without events. Each `list`
/// call returns the next page, then empty pages.
pub struct FakeSource<K> {
    name: String,
    script: Arc<Mutex<SourceScript<K>>>,
}

impl<K> Clone for FakeSource<K> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            script: Arc::clone(&self.script),
        }
    }
}

impl<K> FakeSource<K> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Arc::new(Mutex::new(SourceScript {
                sessions: VecDeque::new(),
                pages: VecDeque::new(),
                watch_versions: Vec::new(),
                list_calls: Vec::new(),
            })),
        }
    }

    pub fn push_session(&self, events: Vec<WatchEvent<K>>) {
        self.script.lock().sessions.push_back(Session::Events(events));
    }

    pub fn push_open_error(&self, message: &str) {
        self.script.lock().sessions.push_back(Session::OpenError(message.to_string()));
    }

    /// Next watch call blocks forever before returning a stream
    pub fn push_hanging_open(&self) {
        self.script.lock().sessions.push_back(Session::Hang);
    }

    pub fn push_page(&self, page: Result<ListPage<K>, String>) {
        self.script.lock().pages.push_back(page);
    }

    pub fn watch_calls(&self) -> usize {
        self.script.lock().watch_versions.len()
    }

    /// Resource version passed to each watch call
    pub fn watch_versions(&self) -> Vec<Option<String>> {
        self.script.lock().watch_versions.clone()
    }

    pub fn list_calls(&self) -> Vec<ListOptions> {
        self.script.lock().list_calls.clone()
    }
}

#[async_trait::async_trait]
impl<K> ResourceSource<K> for FakeSource<K>
where
    K: Send + Sync + 'static,
{
    fn describe(&self) -> String {
        self.name.clone()
    }

    async fn list(&self, opts: &ListOptions) -> Result<ListPage<K>, WatchError> {
        let mut script = self.script.lock();
        script.list_calls.push(opts.clone());
        match script.pages.pop_front() {
            Some(Ok(page)) => Ok(page),
            Some(Err(message)) => Err(WatchError::Api(message)),
            None => Ok(ListPage {
                items: Vec::new(),
                continue_token: None,
                resource_version: None,
            }),
        }
    }

    async fn watch(&self, opts: &ListOptions) -> Result<EventStream<K>, WatchError> {
        let session = {
            let mut script = self.script.lock();
            script.watch_versions.push(opts.resource_version.clone());
            script.sessions.pop_front()
        };
        match session {
            Some(Session::Events(events)) => Ok(futures::stream::iter(events.into_iter().map(Ok)).boxed()),
            Some(Session::OpenError(message)) => Err(WatchError::Api(message)),
            Some(Session::Hang) => futures::future::pending().await,
            None => Ok(futures::stream::pending().boxed()),
        }
    }
}

/// In-memory [`ClusterLookup`]
#[derive(Clone, Default)]
pub struct FakeLookup {
    pods: Arc<Mutex<HashMap<(String, String), Pod>>>,
    owners: Arc<Mutex<HashMap<(String, String, String), OwnerReference>>>,
    has_pods: Arc<Mutex<HashMap<(String, String, String), bool>>>,
}

impl FakeLookup {
    /// Make `kind/name` in `namespace` controlled by `owner_kind/owner_name`
    pub fn set_owner(&self, namespace: &str, kind: &str, name: &str, api_version: &str, owner_kind: &str, owner_name: &str) {
        self.owners.lock().insert(
            (namespace.to_string(), kind.to_string(), name.to_string()),
            OwnerReference {
                api_version: api_version.to_string(),
                kind: owner_kind.to_string(),
                name: owner_name.to_string(),
                uid: format!("uid-{}", owner_name),
                controller: Some(true),
                ..Default::default()
            },
        );
    }

    pub fn add_pod(&self, pod: Pod) {
        let key = (
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        self.pods.lock().insert(key, pod);
    }

    pub fn set_has_pods(&self, namespace: &str, kind: &str, name: &str, has_pods: bool) {
        self.has_pods
            .lock()
            .insert((namespace.to_string(), kind.to_string(), name.to_string()), has_pods);
    }
}

#[async_trait::async_trait]
impl ClusterLookup for FakeLookup {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, WatchError> {
        Ok(self.pods.lock().get(&(namespace.to_string(), name.to_string())).cloned())
    }

    async fn controller_of(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<Option<OwnerReference>, WatchError> {
        let key = (namespace.to_string(), kind.to_string(), name.to_string());
        Ok(self.owners.lock().get(&key).cloned())
    }

    async fn has_pods_for_workload(&self, workload: &WorkloadRef) -> Result<bool, WatchError> {
        let key = (workload.namespace.clone(), workload.kind.clone(), workload.name.clone());
        Ok(self.has_pods.lock().get(&key).copied().unwrap_or(false))
    }
}
