//! Self-healing streaming watch.
//!
//! Loops Idle -> Connecting -> Streaming -> Idle until cancelled:
//! - a failed open is retried after a jittered, capped backoff delay
//! - a successful open resets the backoff
//! - a stream that ends is reopened right away from the last seen version
//! - an error event drops the saved version and reconnects after a delay
//!
//! Actionable events go to a [`CooldownQueue`]. A stopped queue ends the
//! loop with [`WatchError::QueueStopped`], cancellation with
//! [`WatchError::Cancelled`].

use crate::backoff::ExponentialBackoff;
use crate::cooldown::CooldownQueue;
use crate::error::WatchError;
use crate::event::{KeyedObject, WatchEvent};
use crate::source::{ListOptions, ResourceSource};
use crate::watcher::ReadyFlag;
use futures::StreamExt;
use kube::Resource;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct SelfHealingWatch<K> {
    source: Arc<dyn ResourceSource<K>>,
    opts: ListOptions,
    backoff: ExponentialBackoff,
    ready: Option<ReadyFlag>,
}

// How a single streaming session ended
enum SessionEnd {
    Closed,
    ErrorEvent(String),
}

impl<K> SelfHealingWatch<K>
where
    K: Resource + KeyedObject + Clone + Send + Sync + 'static,
{
    pub fn new(source: Arc<dyn ResourceSource<K>>, opts: ListOptions) -> Self {
        Self {
            source,
            opts,
            backoff: ExponentialBackoff::default(),
            ready: None,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Flag set after the first successful open
    #[must_use]
    pub fn with_ready_flag(mut self, flag: ReadyFlag) -> Self {
        self.ready = Some(flag);
        self
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }

    /// Run until cancelled or until `sink` stops, returns the reason
    ///
    /// Failed opens and error events are retried after the delay of the
    /// backoff given to [`Self::with_backoff`]. A zero backoff retries at once.
    pub async fn run(mut self, sink: CooldownQueue<K>, cancel: CancellationToken) -> WatchError {
        let name = self.source.describe();
        info!("Starting {} watch", name);
        let mut opts = self.opts.clone();

        loop {
            if cancel.is_cancelled() {
                return WatchError::Cancelled;
            }

            let opened = tokio::select! {
                _ = cancel.cancelled() => return WatchError::Cancelled,
                opened = self.source.watch(&opts) => opened,
            };
            let stream = match opened {
                Ok(stream) => stream,
                Err(e) => {
                    let delay = self.backoff.next_backoff();
                    warn!("Failed to open {} watch, retrying in {:?}: {}", name, delay, e);
                    if sleep_or_cancel(delay, &cancel).await {
                        return WatchError::Cancelled;
                    }
                    continue;
                }
            };

            self.backoff.reset();
            if let Some(flag) = &self.ready {
                flag.mark_ready();
            }
            debug!("{} watch streaming", name);

            let end = tokio::select! {
                _ = cancel.cancelled() => return WatchError::Cancelled,
                end = stream_into(stream, &sink, &mut opts) => end,
            };
            match end {
                Ok(SessionEnd::Closed) => debug!("{} watch closed, reconnecting", name),
                Ok(SessionEnd::ErrorEvent(msg)) => {
                    // the saved version is likely expired
                    opts.resource_version = None;
                    let delay = self.backoff.next_backoff();
                    warn!("{} watch received error event, reconnecting in {:?}: {}", name, delay, msg);
                    if sleep_or_cancel(delay, &cancel).await {
                        return WatchError::Cancelled;
                    }
                }
                Err(e) if e.is_shutdown() => {
                    info!("{} watch stopping: {}", name, e);
                    return e;
                }
                Err(e) => {
                    let delay = self.backoff.next_backoff();
                    warn!("{} watch failed, reconnecting in {:?}: {}", name, delay, e);
                    if sleep_or_cancel(delay, &cancel).await {
                        return WatchError::Cancelled;
                    }
                }
            }
        }
    }
}

// Forward one session's events, tracking the last seen resource version
async fn stream_into<K>(
    mut stream: crate::source::EventStream<K>,
    sink: &CooldownQueue<K>,
    opts: &mut ListOptions,
) -> Result<SessionEnd, WatchError>
where
    K: Resource + KeyedObject + Send + 'static,
{
    while let Some(item) = stream.next().await {
        let event = item?;
        match &event {
            WatchEvent::Error(msg) => return Ok(SessionEnd::ErrorEvent(msg.clone())),
            WatchEvent::Bookmark { resource_version } => {
                opts.resource_version = Some(resource_version.clone());
                continue;
            }
            _ => {}
        }
        if let Some(rv) = event.object().and_then(|o| o.meta().resource_version.clone()) {
            opts.resource_version = Some(rv);
        }
        if !sink.enqueue(event) && sink.is_stopped() {
            return Err(WatchError::QueueStopped);
        }
    }
    Ok(SessionEnd::Closed)
}

/// Sleep for `delay`, returns true if cancelled first
pub(crate) async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
