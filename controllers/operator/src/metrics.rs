//! Prometheus metrics of the event pipeline.
//!
//! Every counter lives in a registry owned by [`Metrics`], rendered by the
//! `/metrics` endpoint in the Prometheus text format.

use prometheus::{IntCounterVec, Opts, Registry, TextEncoder};
use std::fmt;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Events forwarded by a cooldown queue, by queue
    pub events_admitted: IntCounterVec,
    /// Events suppressed by a cooldown queue, by queue
    pub events_dropped: IntCounterVec,
    /// Commands produced by handlers, by command
    pub commands_emitted: IntCounterVec,
    /// Commands run by the worker pool, by command and outcome
    pub commands_executed: IntCounterVec,
    /// Errors reported by handlers, by handler
    pub handler_errors: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("scan_operator".to_string()), None)?;

        let events_admitted = IntCounterVec::new(
            Opts::new("events_admitted_total", "Events forwarded by a cooldown queue"),
            &["queue"],
        )?;
        let events_dropped = IntCounterVec::new(
            Opts::new("events_dropped_total", "Duplicate events suppressed by a cooldown queue"),
            &["queue"],
        )?;
        let commands_emitted = IntCounterVec::new(
            Opts::new("commands_emitted_total", "Commands produced by event handlers"),
            &["command"],
        )?;
        let commands_executed = IntCounterVec::new(
            Opts::new("commands_executed_total", "Commands executed by the worker pool"),
            &["command", "outcome"],
        )?;
        let handler_errors = IntCounterVec::new(
            Opts::new("handler_errors_total", "Errors reported by event handlers"),
            &["handler"],
        )?;

        registry.register(Box::new(events_admitted.clone()))?;
        registry.register(Box::new(events_dropped.clone()))?;
        registry.register(Box::new(commands_emitted.clone()))?;
        registry.register(Box::new(commands_executed.clone()))?;
        registry.register(Box::new(handler_errors.clone()))?;

        Ok(Self {
            registry,
            events_admitted,
            events_dropped,
            commands_emitted,
            commands_executed,
            handler_errors,
        })
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}
