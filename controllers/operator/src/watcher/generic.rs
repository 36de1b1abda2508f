//! Periodic list-based watch.
//!
//! For resources that are polled instead of streamed. Every period:
//! 1. list all pages, the first one with the saved resume marker
//! 2. push every item through the cooldown queue as `Modified`
//! 3. after the last page, save that page's resource version as the marker
//!
//! A failing list call aborts the cycle and keeps the previous marker, the
//! next tick lists again from there. Polling cannot tell first sight from an
//! update, which is why everything is `Modified`.

use crate::cooldown::CooldownQueue;
use crate::error::WatchError;
use crate::event::{KeyedObject, WatchEvent};
use crate::source::{ListOptions, ResourceSource};
use crate::watcher::ReadyFlag;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct GenericResourceWatch<K> {
    source: Arc<dyn ResourceSource<K>>,
    opts: ListOptions,
    period: Duration,
    page_size: u32,
    marker: Option<String>,
    ready: Option<ReadyFlag>,
}

impl<K> GenericResourceWatch<K>
where
    K: KeyedObject + Clone + Send + Sync + 'static,
{
    pub fn new(source: Arc<dyn ResourceSource<K>>, period: Duration, page_size: u32) -> Self {
        Self {
            source,
            opts: ListOptions::default(),
            period,
            page_size,
            marker: None,
            ready: None,
        }
    }

    /// Selectors applied to every list call
    #[must_use]
    pub fn with_options(mut self, opts: ListOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Flag set after the first successful cycle
    #[must_use]
    pub fn with_ready_flag(mut self, flag: ReadyFlag) -> Self {
        self.ready = Some(flag);
        self
    }

    /// Last committed resume marker
    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    /// List everything changed since the marker, returns the number of items seen
    pub async fn poll_cycle(&mut self, sink: &CooldownQueue<K>) -> Result<usize, WatchError> {
        let mut opts = ListOptions {
            limit: Some(self.page_size),
            resource_version: self.marker.clone(),
            continue_token: None,
            ..self.opts.clone()
        };
        let mut seen = 0;
        loop {
            let page = self.source.list(&opts).await?;
            seen += page.items.len();
            for item in page.items {
                if !sink.enqueue(WatchEvent::Modified(item)) && sink.is_stopped() {
                    return Err(WatchError::QueueStopped);
                }
            }
            match page.continue_token {
                Some(token) => opts.continue_token = Some(token),
                None => {
                    if page.resource_version.is_some() {
                        self.marker = page.resource_version;
                    }
                    return Ok(seen);
                }
            }
        }
    }

    /// Poll every period until cancelled or until `sink` stops
    pub async fn run(mut self, sink: CooldownQueue<K>, cancel: CancellationToken) -> WatchError {
        let name = self.source.describe();
        info!("Starting {} polling every {:?}", name, self.period);
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return WatchError::Cancelled,
                _ = ticker.tick() => {}
            }
            let result = tokio::select! {
                _ = cancel.cancelled() => return WatchError::Cancelled,
                result = self.poll_cycle(&sink) => result,
            };
            match result {
                Ok(seen) => {
                    debug!("{} poll cycle saw {} objects, marker {:?}", name, seen, self.marker);
                    if let Some(flag) = &self.ready {
                        flag.mark_ready();
                    }
                }
                Err(e) if e.is_shutdown() => {
                    info!("{} polling stopping: {}", name, e);
                    return e;
                }
                Err(e) => warn!("{} poll cycle failed, keeping marker {:?}: {}", name, self.marker, e),
            }
        }
    }
}
