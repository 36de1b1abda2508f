//! Operator error types.
//!
//! Three layers, each with its own enum:
//! - `WatchError`: opening, reading or listing a resource source
//! - `HandlerError`: translating one event into a command, never fatal
//! - `ControllerError`: startup and top-level failures of the operator

use kube::Error as KubeError;
use scanner_client::ScannerError;
use thiserror::Error;

/// Errors produced by resource sources and the watch loops built on them.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// The server sent an error event on an open watch
    #[error("Watch error event: {0}")]
    Api(String),

    /// The downstream queue was stopped, nothing can be delivered anymore
    #[error("Event queue stopped")]
    QueueStopped,

    /// Cancellation was requested
    #[error("Watch cancelled")]
    Cancelled,
}

impl WatchError {
    /// True for explicit shutdown, which must not be retried or logged as a failure
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::QueueStopped | Self::Cancelled)
    }
}

/// Errors reported by event handlers on their error stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("unsupported object type: expected {0}")]
    UnsupportedObject(&'static str),

    #[error("missing annotation {0}")]
    MissingAnnotation(&'static str),

    #[error("missing WLID")]
    MissingWlid,

    #[error("missing image ID")]
    MissingImageId,

    #[error("missing image tag")]
    MissingImageTag,

    #[error("missing container name")]
    MissingContainerName,

    #[error("invalid instance ID {0:?}")]
    InvalidInstanceId(String),

    #[error("lookup failed: {0}")]
    Lookup(String),
}

/// Errors that can occur in the operator.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Scanner service error
    #[error("Scanner error: {0}")]
    Scanner(#[from] ScannerError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// The worker pool no longer accepts work
    #[error("Worker pool is shut down")]
    PoolClosed,

    /// Command payload could not be decoded or encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP server failure
    #[error("HTTP server error: {0}")]
    Server(#[from] std::io::Error),

    /// Metrics registry failure
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<WatchError> for ControllerError {
    fn from(e: WatchError) -> Self {
        match e {
            WatchError::Kube(e) => Self::Kube(e),
            other => Self::Watch(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ControllerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
