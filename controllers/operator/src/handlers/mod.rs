//! Event handlers.
//!
//! A handler turns one admitted [`WatchEvent`] into commands. Commands and
//! errors leave through separate channels of the [`Emitter`], so a failing
//! event never holds up commands produced for other events.
//!
//! Every handler:
//! 1. ignores `Deleted`, `Bookmark` and `Error` events
//! 2. applies its skip predicates (namespace, status annotation, ...)
//! 3. extracts the container identity, erroring when it is incomplete
//! 4. consults its [`crate::state::WatchState`] where scans must be idempotent
//! 5. emits a [`Command`]

pub mod continuous;
pub mod filtered_sbom;
pub mod operator_commands;
pub mod pod;
pub mod profile;
pub mod sbom;

pub use continuous::{MatchingRules, WorkloadHandler};
pub use filtered_sbom::FilteredSbomHandler;
pub use operator_commands::{CommandStatusReporter, KubeStatusReporter, OperatorCommandsHandler};
pub use pod::PodHandler;
pub use profile::{ProfileHandler, ProfileResource};
pub use sbom::SbomHandler;

use crate::command::Command;
use crate::error::HandlerError;
use crate::event::WatchEvent;
use crate::metrics::Metrics;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// An error together with the handler that reported it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub handler: &'static str,
    pub error: HandlerError,
}

/// Output side of the handlers
#[derive(Clone, Debug)]
pub struct Emitter {
    commands: mpsc::Sender<Command>,
    errors: mpsc::UnboundedSender<HandlerFailure>,
    metrics: Option<Metrics>,
}

impl Emitter {
    pub fn new(
        commands: mpsc::Sender<Command>,
        errors: mpsc::UnboundedSender<HandlerFailure>,
    ) -> Self {
        Self {
            commands,
            errors,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Send a command downstream, waits while the dispatcher is full
    pub async fn emit(&self, command: Command) -> bool {
        let name = command.name;
        debug!("Emitting {} for {}", name, command.wlid);
        if self.commands.send(command).await.is_err() {
            warn!("Command channel closed, dropping {} command", name);
            return false;
        }
        if let Some(m) = &self.metrics {
            m.commands_emitted.with_label_values(&[name.as_str()]).inc();
        }
        true
    }

    /// Report an error on the error stream, never blocks
    pub fn report(&self, handler: &'static str, error: HandlerError) {
        if let Some(m) = &self.metrics {
            m.handler_errors.with_label_values(&[handler]).inc();
        }
        // nobody listening is not a reason to fail the handler
        let _ = self.errors.send(HandlerFailure { handler, error });
    }
}

#[async_trait::async_trait]
pub trait EventHandler<K>: Send + Sync {
    /// Name used in logs and metrics
    fn name(&self) -> &'static str;

    async fn handle(&self, event: WatchEvent<K>, out: &Emitter) -> Result<(), HandlerError>;
}

/// Feed every event of `events` to `handler` until the stream ends
pub async fn run_handler<K, H>(handler: Arc<H>, mut events: mpsc::UnboundedReceiver<WatchEvent<K>>, out: Emitter)
where
    K: Send + 'static,
    H: EventHandler<K> + ?Sized,
{
    while let Some(event) = events.recv().await {
        if let Err(e) = handler.handle(event, &out).await {
            out.report(handler.name(), e);
        }
    }
    debug!("{} handler stopped", handler.name());
}

/// Value of `key` in an optional annotation or label map
pub(crate) fn meta_value<'a>(map: Option<&'a BTreeMap<String, String>>, key: &str) -> Option<&'a str> {
    map.and_then(|m| m.get(key)).map(String::as_str)
}

/// Status annotation check shared by the SBOM and profile handlers
///
/// A missing status annotation is treated like an empty one.
pub(crate) fn status_allowed(annotations: Option<&BTreeMap<String, String>>, allowed: &[&str]) -> bool {
    let status = meta_value(annotations, crds::metadata::STATUS_KEY).unwrap_or_default();
    allowed.contains(&status)
}
