//! Cooldown queue.
//!
//! Admission filter in front of every handler:
//! - an event whose key was admitted less than one TTL ago is dropped
//! - admitted events go to an unbounded channel, so `enqueue` never blocks
//! - `stop()` closes the channel once, later `enqueue` calls are no-ops
//!
//! Keys are built by [`event_key`]. Events without a key always pass.

use crate::cache::ExpiringCache;
use crate::event::{event_key, KeyedObject, WatchEvent};
use crate::metrics::Metrics;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Default number of remembered keys
pub const DEFAULT_CAPACITY: usize = 512;

/// Default cooldown window
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

struct State<K> {
    seen: ExpiringCache<String>,
    // None once stopped
    sender: Option<mpsc::UnboundedSender<WatchEvent<K>>>,
}

/// Deduplicating, time-bounded event queue. Clones share the same queue.
pub struct CooldownQueue<K> {
    name: Arc<str>,
    state: Arc<Mutex<State<K>>>,
    metrics: Option<Metrics>,
}

impl<K> Clone for CooldownQueue<K> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            state: Arc::clone(&self.state),
            metrics: self.metrics.clone(),
        }
    }
}

impl<K> std::fmt::Debug for CooldownQueue<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CooldownQueue")
            .field("name", &self.name)
            .field("stopped", &self.state.lock().sender.is_none())
            .finish()
    }
}

impl<K: KeyedObject + Send + 'static> CooldownQueue<K> {
    /// Create a queue and the receiving end of its output stream
    pub fn new(
        name: &str,
        capacity: usize,
        ttl: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<WatchEvent<K>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            name: Arc::from(name),
            state: Arc::new(Mutex::new(State {
                seen: ExpiringCache::new(capacity, ttl),
                sender: Some(tx),
            })),
            metrics: None,
        };
        (queue, rx)
    }

    /// Count admitted and dropped events under this queue's name
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offer an event, returns whether it was forwarded
    pub fn enqueue(&self, event: WatchEvent<K>) -> bool {
        let key = event_key(&event);
        let mut state = self.state.lock();
        let Some(sender) = state.sender.as_ref() else {
            return false;
        };

        if let Some(key) = &key {
            if state.seen.contains(key) {
                debug!(queue = %self.name, key = %key, "dropping duplicate event");
                self.count_dropped();
                return false;
            }
        }

        if sender.send(event).is_err() {
            // consumer is gone, behave as stopped from now on
            state.sender = None;
            return false;
        }
        if let Some(key) = key {
            state.seen.insert(key);
        }
        self.count_admitted();
        true
    }

    /// Close the output stream, safe to call any number of times
    pub fn stop(&self) {
        if self.state.lock().sender.take().is_some() {
            debug!(queue = %self.name, "cooldown queue stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().sender.is_none()
    }

    fn count_admitted(&self) {
        if let Some(m) = &self.metrics {
            m.events_admitted.with_label_values(&[&*self.name]).inc();
        }
    }

    fn count_dropped(&self) {
        if let Some(m) = &self.metrics {
            m.events_dropped.with_label_values(&[&*self.name]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;
    use kube::api::ObjectMeta;

    fn pod(name: &str, uid: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some(uid.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<WatchEvent<Pod>>) -> Vec<WatchEvent<Pod>> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_within_ttl_forwarded_once() {
        let (queue, mut rx) = CooldownQueue::new("pods", DEFAULT_CAPACITY, DEFAULT_TTL);

        for _ in 0..10 {
            queue.enqueue(WatchEvent::Added(pod("nginx", "uid-1")));
        }

        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_type_or_uid_not_deduplicated() {
        let (queue, mut rx) = CooldownQueue::new("pods", DEFAULT_CAPACITY, DEFAULT_TTL);

        assert!(queue.enqueue(WatchEvent::Added(pod("a", "uid-1"))));
        assert!(queue.enqueue(WatchEvent::Modified(pod("a", "uid-1"))));
        assert!(queue.enqueue(WatchEvent::Added(pod("b", "uid-2"))));

        assert_eq!(drain(&mut rx).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_after_ttl_forwarded_again() {
        let (queue, mut rx) = CooldownQueue::new("pods", DEFAULT_CAPACITY, Duration::from_secs(1));

        assert!(queue.enqueue(WatchEvent::Added(pod("nginx", "uid-1"))));
        assert!(!queue.enqueue(WatchEvent::Added(pod("nginx", "uid-1"))));

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(queue.enqueue(WatchEvent::Added(pod("nginx", "uid-1"))));

        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_without_uid_always_pass() {
        let (queue, mut rx) = CooldownQueue::new("pods", DEFAULT_CAPACITY, DEFAULT_TTL);
        let mut no_uid = pod("nginx", "");
        no_uid.metadata.uid = None;

        assert!(queue.enqueue(WatchEvent::Added(no_uid.clone())));
        assert!(queue.enqueue(WatchEvent::Added(no_uid)));
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_then_enqueue_is_noop() {
        let (queue, mut rx) = CooldownQueue::new("pods", DEFAULT_CAPACITY, DEFAULT_TTL);
        queue.enqueue(WatchEvent::Added(pod("first", "uid-1")));

        queue.stop();
        queue.stop();
        assert!(queue.is_stopped());

        for i in 0..100 {
            assert!(!queue.enqueue(WatchEvent::Added(pod("later", &format!("uid-{}", i + 10)))));
        }

        // the event admitted before stop is still delivered, then the stream ends
        assert!(matches!(rx.recv().await, Some(WatchEvent::Added(_))));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receiver_stops_queue() {
        let (queue, rx) = CooldownQueue::new("pods", DEFAULT_CAPACITY, DEFAULT_TTL);
        drop(rx);

        assert!(!queue.enqueue(WatchEvent::Added(pod("nginx", "uid-1"))));
        assert!(queue.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_count_admitted_and_dropped() {
        let metrics = Metrics::new().unwrap();
        let (queue, _rx) = CooldownQueue::new("sbom", DEFAULT_CAPACITY, DEFAULT_TTL);
        let queue = queue.with_metrics(metrics.clone());

        queue.enqueue(WatchEvent::Added(pod("nginx", "uid-1")));
        queue.enqueue(WatchEvent::Added(pod("nginx", "uid-1")));

        assert_eq!(metrics.events_admitted.with_label_values(&["sbom"]).get(), 1);
        assert_eq!(metrics.events_dropped.with_label_values(&["sbom"]).get(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_stop_and_enqueue() {
        let (queue, mut rx) = CooldownQueue::new("pods", DEFAULT_CAPACITY, DEFAULT_TTL);
        let mut tasks = Vec::new();
        for t in 0..4 {
            let q = queue.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..200 {
                    q.enqueue(WatchEvent::Added(pod("p", &format!("{}-{}", t, i))));
                }
            }));
        }
        let stopper = queue.clone();
        tasks.push(tokio::spawn(async move { stopper.stop() }));
        for task in tasks {
            task.await.unwrap();
        }

        assert!(queue.is_stopped());
        // the stream terminates with whatever was admitted before stop
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert!(received <= 800);
    }
}
