//! Pod handler.
//!
//! Emits one `ScanImages` command per container whose image has not been
//! scanned for its workload yet. The cases, in terms of [`WatchState`]:
//! 1. new workload, new image: scan
//! 2. new workload, image already known elsewhere: scan
//! 3. known workload, new container image: scan
//! 4. known slug, same tag but a new image digest: scan
//! 5. new slug (workload restarted), same WLID and image: skip
//! 6. known slug, same image (ordinary resync): skip
//!
//! Pods without an owner that are younger than the guard time are checked
//! again once they reach it, and only scanned if they still exist. A pod has
//! at most one pending check, however many events it produces meanwhile.

use crate::command::Command;
use crate::error::HandlerError;
use crate::event::{created_at, WatchEvent};
use crate::handlers::{Emitter, EventHandler};
use crate::identity::{direct_owner, pod_containers, resolve_parent};
use crate::lookup::ClusterLookup;
use crate::state::{Admission, ImageIndex, WatchState};
use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const RUNNING: &str = "Running";

#[derive(Clone)]
pub struct PodHandler {
    cluster_name: String,
    guard_time: Duration,
    include_namespaces: Arc<Vec<String>>,
    exclude_namespaces: Arc<Vec<String>>,
    state: WatchState,
    index: ImageIndex,
    lookup: Arc<dyn ClusterLookup>,
    // UIDs of naked pods waiting for their delayed check
    pending_rechecks: Arc<Mutex<HashSet<String>>>,
}

impl PodHandler {
    pub fn new(
        cluster_name: impl Into<String>,
        state: WatchState,
        index: ImageIndex,
        lookup: Arc<dyn ClusterLookup>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            guard_time: Duration::from_secs(60 * 60),
            include_namespaces: Arc::new(Vec::new()),
            exclude_namespaces: Arc::new(Vec::new()),
            state,
            index,
            lookup,
            pending_rechecks: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    #[must_use]
    pub fn with_guard_time(mut self, guard_time: Duration) -> Self {
        self.guard_time = guard_time;
        self
    }

    /// Only handle pods of `include` (when non-empty), never pods of `exclude`
    #[must_use]
    pub fn with_namespaces(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        self.include_namespaces = Arc::new(include);
        self.exclude_namespaces = Arc::new(exclude);
        self
    }

    fn skip_namespace(&self, namespace: &str) -> bool {
        if !self.include_namespaces.is_empty() {
            return !self.include_namespaces.iter().any(|ns| ns == namespace);
        }
        self.exclude_namespaces.iter().any(|ns| ns == namespace)
    }

    // Time left until a naked pod is old enough to be scanned
    fn until_mature(&self, pod: &Pod) -> Option<Duration> {
        if !direct_owner(pod).naked {
            return None;
        }
        let created = created_at(&pod.metadata)?;
        let age = (Utc::now() - created).to_std().unwrap_or_default();
        self.guard_time.checked_sub(age).filter(|left| !left.is_zero())
    }

    async fn scan_pod(&self, pod: &Pod, out: &Emitter) -> Result<(), HandlerError> {
        let parent = resolve_parent(pod, self.lookup.as_ref()).await?;
        let containers = pod_containers(pod, &self.cluster_name, &parent);
        if containers.is_empty() {
            // nothing running yet
            return Ok(());
        }
        let pod_value = serde_json::to_value(pod).ok();

        for container in containers {
            self.index.record(&container);
            match self.state.admit(&container) {
                Admission::Scan => {
                    info!(
                        "Scanning image wlid={} slug={} container={} image={}",
                        container.wlid, container.slug, container.container_name, container.image_id
                    );
                    out.emit(Command::scan_images(container, pod_value.clone())).await;
                }
                skipped => debug!("Skipping {} ({:?})", container.slug, skipped),
            }
        }
        Ok(())
    }

    fn schedule_recheck(&self, pod: &Pod, delay: Duration, out: &Emitter) {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let name = pod.metadata.name.clone().unwrap_or_default();
        let key = pod
            .metadata
            .uid
            .clone()
            .unwrap_or_else(|| format!("{}/{}", namespace, name));
        if !self.pending_rechecks.lock().insert(key.clone()) {
            debug!("Delayed scan of naked pod {}/{} already pending", namespace, name);
            return;
        }
        debug!("Naked pod {}/{} detected, delaying scan by {:?}", namespace, name, delay);

        let this = self.clone();
        let out = out.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.pending_rechecks.lock().remove(&key);
            match this.lookup.get_pod(&namespace, &name).await {
                Ok(Some(pod)) => {
                    debug!("Performing delayed scan for naked pod {}/{}", namespace, name);
                    if let Err(e) = this.scan_pod(&pod, &out).await {
                        out.report("pod", e);
                    }
                }
                Ok(None) => debug!("Naked pod {}/{} is gone, not scanning", namespace, name),
                Err(e) => out.report("pod", HandlerError::Lookup(e.to_string())),
            }
        });
    }
}

#[async_trait::async_trait]
impl EventHandler<Pod> for PodHandler {
    fn name(&self) -> &'static str {
        "pod"
    }

    async fn handle(&self, event: WatchEvent<Pod>, out: &Emitter) -> Result<(), HandlerError> {
        let Some(pod) = event.into_actionable() else {
            return Ok(());
        };
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        if self.skip_namespace(namespace) {
            return Ok(());
        }
        let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
        if phase != Some(RUNNING) {
            return Ok(());
        }

        if let Some(delay) = self.until_mature(&pod) {
            self.schedule_recheck(&pod, delay, out);
            return Ok(());
        }
        self.scan_pod(&pod, out).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandArgs, CommandName};
    use crate::test_utils::{create_test_pod, emitter, with_owner, FakeLookup};

    const IMAGE: &str =
        "docker.io/library/nginx@sha256:6a59f1cbb8d28ac484176d52c473494859a512ddba3ea62a547258cf16c9b3ae";

    fn handler(lookup: FakeLookup) -> PodHandler {
        PodHandler::new("clusterCHANGEME", WatchState::new(), ImageIndex::new(), Arc::new(lookup))
    }

    #[tokio::test]
    async fn test_three_new_pods_produce_three_scans() {
        let handler = handler(FakeLookup::default());
        let (out, mut commands, _errors) = emitter(16);

        for name in ["first", "second", "third"] {
            let pod = create_test_pod(name, "default", "nginx", IMAGE);
            handler.handle(WatchEvent::Added(pod), &out).await.unwrap();
        }
        drop(out);

        let mut produced = Vec::new();
        while let Some(cmd) = commands.recv().await {
            produced.push(cmd);
        }
        assert_eq!(produced.len(), 3);
        for (cmd, name) in produced.iter().zip(["first", "second", "third"]) {
            assert_eq!(cmd.name, CommandName::ScanImages);
            assert_eq!(
                cmd.wlid,
                format!("wlid://cluster-clusterCHANGEME/namespace-default/pod-{}", name)
            );
            let CommandArgs::Container { container_data, pod } = &cmd.args else {
                panic!("expected container args");
            };
            assert_eq!(container_data.image_id, IMAGE);
            assert_eq!(container_data.container_name, "nginx");
            assert!(pod.is_some());
        }
    }

    #[tokio::test]
    async fn test_same_image_twice_scanned_once_changed_image_again() {
        let handler = handler(FakeLookup::default());
        let (out, mut commands, _errors) = emitter(16);

        let pod = create_test_pod("first", "default", "nginx", IMAGE);
        handler.handle(WatchEvent::Added(pod.clone()), &out).await.unwrap();
        handler.handle(WatchEvent::Modified(pod), &out).await.unwrap();
        let updated = create_test_pod("first", "default", "nginx", "docker.io/library/nginx@sha256:ffff");
        handler.handle(WatchEvent::Modified(updated), &out).await.unwrap();
        drop(out);

        let first = commands.recv().await.unwrap();
        let second = commands.recv().await.unwrap();
        assert!(commands.recv().await.is_none());
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_restarted_workload_with_same_image_skipped() {
        let lookup = FakeLookup::default();
        lookup.set_owner("default", "ReplicaSet", "web-1", "apps/v1", "Deployment", "web");
        lookup.set_owner("default", "ReplicaSet", "web-2", "apps/v1", "Deployment", "web");
        let handler = handler(lookup);
        let (out, mut commands, _errors) = emitter(16);

        let old = with_owner(create_test_pod("web-1-aaaaa", "default", "web", IMAGE), "apps/v1", "ReplicaSet", "web-1");
        let new = with_owner(create_test_pod("web-2-bbbbb", "default", "web", IMAGE), "apps/v1", "ReplicaSet", "web-2");
        handler.handle(WatchEvent::Added(old), &out).await.unwrap();
        handler.handle(WatchEvent::Added(new), &out).await.unwrap();
        drop(out);

        let cmd = commands.recv().await.unwrap();
        assert_eq!(cmd.wlid, "wlid://cluster-clusterCHANGEME/namespace-default/deployment-web");
        assert!(commands.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_ignored_events() {
        let handler = handler(FakeLookup::default()).with_namespaces(Vec::new(), vec!["kube-system".to_string()]);
        let (out, mut commands, _errors) = emitter(16);

        let system = create_test_pod("coredns", "kube-system", "coredns", IMAGE);
        handler.handle(WatchEvent::Added(system), &out).await.unwrap();
        let deleted = create_test_pod("first", "default", "nginx", IMAGE);
        handler.handle(WatchEvent::Deleted(deleted), &out).await.unwrap();
        let mut pending = create_test_pod("second", "default", "nginx", IMAGE);
        if let Some(status) = pending.status.as_mut() {
            status.phase = Some("Pending".to_string());
        }
        handler.handle(WatchEvent::Added(pending), &out).await.unwrap();
        drop(out);

        assert!(commands.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_young_naked_pod_scanned_after_guard_time_if_present() {
        let lookup = FakeLookup::default();
        let handler = handler(lookup.clone()).with_guard_time(Duration::from_secs(60));
        let (out, mut commands, _errors) = emitter(16);

        let mut young = create_test_pod("young", "default", "nginx", IMAGE);
        young.metadata.creation_timestamp = serde_json::from_value(serde_json::json!(Utc::now().to_rfc3339())).ok();
        let mut gone = create_test_pod("gone", "default", "nginx", IMAGE);
        gone.metadata.creation_timestamp = young.metadata.creation_timestamp.clone();
        lookup.add_pod(young.clone());

        handler.handle(WatchEvent::Added(young), &out).await.unwrap();
        handler.handle(WatchEvent::Added(gone), &out).await.unwrap();
        assert!(commands.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(61)).await;
        drop(out);
        let cmd = commands.recv().await.unwrap();
        assert!(cmd.wlid.ends_with("pod-young"));
        assert!(commands.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_young_naked_pod_checked_once_per_guard_window() {
        let lookup = FakeLookup::default();
        let handler = handler(lookup.clone()).with_guard_time(Duration::from_secs(60));
        let (out, mut commands, _errors) = emitter(16);

        let mut young = create_test_pod("young", "default", "nginx", IMAGE);
        young.metadata.creation_timestamp = serde_json::from_value(serde_json::json!(Utc::now().to_rfc3339())).ok();
        lookup.add_pod(young.clone());

        handler.handle(WatchEvent::Added(young.clone()), &out).await.unwrap();
        handler.handle(WatchEvent::Modified(young.clone()), &out).await.unwrap();
        handler.handle(WatchEvent::Modified(young), &out).await.unwrap();
        assert_eq!(handler.pending_rechecks.lock().len(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        drop(out);
        let cmd = commands.recv().await.unwrap();
        assert!(cmd.wlid.ends_with("pod-young"));
        assert!(commands.recv().await.is_none());
        assert!(handler.pending_rechecks.lock().is_empty());
    }

    #[test]
    fn test_include_namespaces_win_over_exclude() {
        let handler = handler(FakeLookup::default());
        assert!(!handler.skip_namespace("default"));

        let handler = handler.with_namespaces(vec!["default".to_string()], vec!["default".to_string()]);
        assert!(!handler.skip_namespace("default"));
        assert!(handler.skip_namespace("team-a"));
    }
}
