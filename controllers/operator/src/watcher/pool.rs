//! Pool of self-healing watches sharing one output queue.
//!
//! Each watch runs on its own task. A watch that ends or panics is logged and
//! does not affect the others; the pool returns once every watch has ended.

use crate::cooldown::CooldownQueue;
use crate::event::KeyedObject;
use crate::watcher::SelfHealingWatch;
use kube::Resource;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct WatchPool<K> {
    watches: Vec<SelfHealingWatch<K>>,
}

impl<K> Default for WatchPool<K> {
    fn default() -> Self {
        Self { watches: Vec::new() }
    }
}

impl<K> WatchPool<K>
where
    K: Resource + KeyedObject + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, watch: SelfHealingWatch<K>) {
        self.watches.push(watch);
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Run every watch into `sink` until all of them have ended
    pub async fn run(self, sink: CooldownQueue<K>, cancel: CancellationToken) {
        let mut tasks = JoinSet::new();
        for watch in self.watches {
            let name = watch.describe();
            let sink = sink.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { (name, watch.run(sink, cancel).await) });
        }
        info!("Watch pool running {} watches into {}", tasks.len(), sink.name());

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, reason)) if reason.is_shutdown() => {
                    info!("{} watch ended: {}", name, reason);
                }
                Ok((name, reason)) => error!("{} watch ended unexpectedly: {}", name, reason),
                Err(e) => error!("Watch task panicked: {}", e),
            }
        }
    }
}
