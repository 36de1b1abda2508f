//! Watcher for durable `OperatorCommand` objects.
//!
//! Startup lists every existing command before streaming, so commands created
//! while the operator was down are not missed. The watch that follows is a
//! [`SelfHealingWatch`] resuming from the list's version, retried with
//! unbounded backoff until cancelled or until the queue is stopped.
//!
//! Before fan-out, commands that are completed or older than the maximum age
//! are dropped. Each remaining command reaches every registered receiver
//! exactly once, however often the list and watch replay it.

use crate::backoff::ExponentialBackoff;
use crate::cache::ExpiringCache;
use crate::config::CooldownConfig;
use crate::cooldown::CooldownQueue;
use crate::error::WatchError;
use crate::event::{created_at, WatchEvent};
use crate::source::{ListOptions, ResourceSource};
use crate::watcher::{ReadyFlag, SelfHealingWatch};
use chrono::{DateTime, Utc};
use crds::OperatorCommand;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// UIDs remembered for exactly-once delivery
const DELIVERED_CAPACITY: usize = 4096;

pub struct CommandWatcher {
    source: Arc<dyn ResourceSource<OperatorCommand>>,
    opts: ListOptions,
    page_size: u32,
    max_age: Duration,
    cooldown: CooldownConfig,
    backoff: ExponentialBackoff,
    receivers: Vec<mpsc::UnboundedSender<OperatorCommand>>,
    ready: Option<ReadyFlag>,
}

/// True when `cmd` is neither completed nor older than `max_age` at `now`
pub fn is_due(cmd: &OperatorCommand, max_age: Duration, now: DateTime<Utc>) -> bool {
    if cmd.is_completed() {
        return false;
    }
    match (created_at(&cmd.metadata), chrono::Duration::from_std(max_age)) {
        (Some(created), Ok(max_age)) => now - created <= max_age,
        _ => true,
    }
}

impl CommandWatcher {
    pub fn new(source: Arc<dyn ResourceSource<OperatorCommand>>, opts: ListOptions) -> Self {
        Self {
            source,
            opts,
            page_size: 100,
            max_age: Duration::from_secs(30 * 60),
            cooldown: CooldownConfig::default(),
            backoff: ExponentialBackoff::default(),
            receivers: Vec::new(),
            ready: None,
        }
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: CooldownConfig) -> Self {
        self.cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_ready_flag(mut self, flag: ReadyFlag) -> Self {
        self.ready = Some(flag);
        self
    }

    /// Register a consumer, must be called before [`CommandWatcher::run`]
    pub fn register_for_commands(&mut self) -> mpsc::UnboundedReceiver<OperatorCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.receivers.push(tx);
        rx
    }

    /// List, then watch, until cancelled or the queue stops
    pub async fn run(self, cancel: CancellationToken) -> WatchError {
        let name = self.source.describe();
        let (queue, rx) = CooldownQueue::new(&name, self.cooldown.capacity, self.cooldown.ttl);
        let fan_out = tokio::spawn(fan_out(rx, self.receivers, self.max_age));

        let mut opts = self.opts.clone();
        match list_existing(self.source.as_ref(), &self.opts, self.page_size, &queue).await {
            Ok((count, rv)) => {
                info!("Queued {} existing commands from {}", count, name);
                opts.resource_version = rv;
            }
            Err(e) if e.is_shutdown() => return e,
            // the watch starts from scratch and replays existing objects
            Err(e) => warn!("Initial list of {} failed: {}", name, e),
        }

        let mut watch = SelfHealingWatch::new(Arc::clone(&self.source), opts).with_backoff(self.backoff);
        if let Some(flag) = self.ready {
            watch = watch.with_ready_flag(flag);
        }
        let reason = watch.run(queue.clone(), cancel).await;

        queue.stop();
        if let Err(e) = fan_out.await {
            warn!("Command fan-out task failed: {}", e);
        }
        reason
    }
}

async fn list_existing(
    source: &dyn ResourceSource<OperatorCommand>,
    base: &ListOptions,
    page_size: u32,
    queue: &CooldownQueue<OperatorCommand>,
) -> Result<(usize, Option<String>), WatchError> {
    let mut opts = ListOptions {
        limit: Some(page_size),
        ..base.clone()
    };
    let mut count = 0;
    loop {
        let page = source.list(&opts).await?;
        for cmd in page.items {
            if cmd.is_completed() {
                continue;
            }
            count += 1;
            if !queue.enqueue(WatchEvent::Added(cmd)) && queue.is_stopped() {
                return Err(WatchError::QueueStopped);
            }
        }
        match page.continue_token {
            Some(token) => opts.continue_token = Some(token),
            None => return Ok((count, page.resource_version)),
        }
    }
}

async fn fan_out(
    mut rx: mpsc::UnboundedReceiver<WatchEvent<OperatorCommand>>,
    mut receivers: Vec<mpsc::UnboundedSender<OperatorCommand>>,
    max_age: Duration,
) {
    let mut delivered = ExpiringCache::new(DELIVERED_CAPACITY, max_age);
    while let Some(event) = rx.recv().await {
        let Some(cmd) = event.into_actionable() else {
            continue;
        };
        let name = cmd.metadata.name.clone().unwrap_or_default();
        if !is_due(&cmd, max_age, Utc::now()) {
            debug!("Skipping completed or expired command {}", name);
            continue;
        }
        if let Some(uid) = cmd.metadata.uid.clone() {
            if !delivered.insert_if_absent(uid) {
                debug!("Command {} already delivered", name);
                continue;
            }
        }
        receivers.retain(|tx| tx.send(cmd.clone()).is_ok());
        debug!("Delivered command {} to {} receivers", name, receivers.len());
    }
}
