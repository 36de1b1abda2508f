//! Scan Operator
//!
//! Watches cluster resources and turns their changes into scan commands:
//! - Pods: image scans for every container whose image was not scanned yet
//! - SBOMs and filtered SBOMs: vulnerability scans of finished SBOMs
//! - ApplicationProfiles / ContainerProfiles: profile scans
//! - OperatorCommands: durable commands addressed to the operator
//! - arbitrary workloads when continuous scanning is enabled
//!
//! Every event source runs behind a self-healing watch and a cooldown queue,
//! commands are executed by a bounded worker pool. The operator also serves
//! probes, Prometheus metrics and a trigger endpoint over HTTP.

pub mod backoff;
pub mod cache;
pub mod command;
pub mod config;
pub mod controller;
pub mod cooldown;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod handlers;
pub mod identity;
pub mod lookup;
pub mod metrics;
pub mod server;
pub mod source;
pub mod state;
pub mod watcher;

#[cfg(test)]
pub mod test_utils;

pub use config::OperatorConfig;
pub use controller::Controller;
pub use error::ControllerError;
