//! In-memory idempotence state shared by the handlers.
//!
//! [`WatchState`] remembers the last image seen per slug and every
//! (WLID, image) pair that was already scanned. Entries are only added or
//! overwritten and live as long as the process. [`WatchState::admit`] is the
//! only way handlers touch it: the read, the decision and the write happen
//! under both locks, so two events racing on one slug cannot both scan.
//!
//! [`ImageIndex`] maps image digests to the container and workload that run
//! them, for SBOM objects that only carry an image id.

use crate::identity::{hash_from_image_id, ContainerData};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Outcome of offering a container to the watch state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// New slug or new image, produce a command
    Scan,
    /// Slug already seen with this image
    SkipSameImage,
    /// New slug, but the (WLID, image) pair was already scanned
    SkipKnownPair,
}

impl Admission {
    pub fn should_scan(self) -> bool {
        matches!(self, Self::Scan)
    }
}

#[derive(Debug, Default)]
struct Inner {
    slug_to_image: RwLock<HashMap<String, String>>,
    wlid_and_image: RwLock<HashSet<String>>,
}

/// Slug and (WLID, image) memory. Clones share the same maps.
#[derive(Debug, Clone, Default)]
pub struct WatchState {
    inner: Arc<Inner>,
}

impl WatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `container` needs a scan and record it
    ///
    /// - slug known, same image: skip
    /// - slug known, image changed: record, scan
    /// - slug unknown, pair known: record slug, skip
    /// - slug unknown, pair unknown: record both, scan
    pub fn admit(&self, container: &ContainerData) -> Admission {
        // lock order: slugs, then pairs
        let mut slugs = self.inner.slug_to_image.write();
        let mut pairs = self.inner.wlid_and_image.write();
        let pair = container.wlid_and_image();

        match slugs.get(&container.slug) {
            Some(image) if *image == container.image_id => Admission::SkipSameImage,
            Some(_) => {
                slugs.insert(container.slug.clone(), container.image_id.clone());
                pairs.insert(pair);
                Admission::Scan
            }
            None => {
                slugs.insert(container.slug.clone(), container.image_id.clone());
                if pairs.insert(pair) {
                    Admission::Scan
                } else {
                    Admission::SkipKnownPair
                }
            }
        }
    }

    #[cfg(test)]
    pub fn image_for_slug(&self, slug: &str) -> Option<String> {
        self.inner.slug_to_image.read().get(slug).cloned()
    }

    #[cfg(test)]
    pub fn has_pair(&self, wlid: &str, image_id: &str) -> bool {
        self.inner
            .wlid_and_image
            .read()
            .contains(&format!("{}{}", wlid, image_id))
    }

    #[cfg(test)]
    pub fn slug_count(&self) -> usize {
        self.inner.slug_to_image.read().len()
    }
}

/// Container and workload known to run an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOwner {
    pub container_name: String,
    pub wlid: String,
}

/// Image digest to owner index, filled from observed pods
#[derive(Debug, Clone, Default)]
pub struct ImageIndex {
    inner: Arc<RwLock<HashMap<String, ImageOwner>>>,
}

impl ImageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, container: &ContainerData) {
        self.inner.write().insert(
            hash_from_image_id(&container.image_id).to_string(),
            ImageOwner {
                container_name: container.container_name.clone(),
                wlid: container.wlid.clone(),
            },
        );
    }

    /// Owner of an image id or bare digest
    pub fn lookup(&self, image_id: &str) -> Option<ImageOwner> {
        self.inner.read().get(hash_from_image_id(image_id)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(slug: &str, wlid: &str, image: &str) -> ContainerData {
        ContainerData {
            slug: slug.to_string(),
            wlid: wlid.to_string(),
            image_id: image.to_string(),
            container_name: "nginx".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_same_slug_same_image_scanned_once() {
        let state = WatchState::new();
        let c = container("pod-a-nginx-1234", "wlid://a", "nginx@sha256:1");

        assert_eq!(state.admit(&c), Admission::Scan);
        assert_eq!(state.admit(&c), Admission::SkipSameImage);
        assert_eq!(state.slug_count(), 1);
    }

    #[test]
    fn test_changed_image_scanned_again() {
        let state = WatchState::new();
        assert!(state.admit(&container("s", "wlid://a", "nginx@sha256:1")).should_scan());
        assert!(state.admit(&container("s", "wlid://a", "nginx@sha256:2")).should_scan());
        assert_eq!(state.image_for_slug("s").as_deref(), Some("nginx@sha256:2"));
        assert!(state.has_pair("wlid://a", "nginx@sha256:1"));
        assert!(state.has_pair("wlid://a", "nginx@sha256:2"));
    }

    #[test]
    fn test_new_slug_for_known_pair_skipped() {
        // a new ReplicaSet of the same deployment produces a new slug
        let state = WatchState::new();
        assert!(state.admit(&container("rs-1", "wlid://deploy", "nginx@sha256:1")).should_scan());
        assert_eq!(
            state.admit(&container("rs-2", "wlid://deploy", "nginx@sha256:1")),
            Admission::SkipKnownPair
        );
        assert_eq!(state.image_for_slug("rs-2").as_deref(), Some("nginx@sha256:1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_admissions_scan_once() {
        let state = WatchState::new();
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                state.admit(&container("s", "wlid://a", "img@sha256:1")).should_scan()
            }));
        }
        let mut scans = 0;
        for task in tasks {
            if task.await.unwrap() {
                scans += 1;
            }
        }
        assert_eq!(scans, 1);
    }

    #[test]
    fn test_image_index_lookup_by_digest() {
        let index = ImageIndex::new();
        index.record(&container("s", "wlid://a", "docker.io/library/nginx@sha256:abcd"));

        let owner = index.lookup("sha256:abcd").unwrap();
        assert_eq!(owner.wlid, "wlid://a");
        assert_eq!(owner.container_name, "nginx");
        assert!(index.lookup("sha256:ffff").is_none());
    }
}
