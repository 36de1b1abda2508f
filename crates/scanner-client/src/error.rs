//! Scanner client errors

use thiserror::Error;

/// Errors that can occur when talking to a scanner service
#[derive(Debug, Error)]
pub enum ScannerError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Scanner answered with a non-success status
    #[error("Scanner API error: {0}")]
    Api(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Scanner kept refusing connections after all attempts
    #[error("Connection refused by {url} after {attempts} attempts")]
    ConnectionRefused { url: String, attempts: u32 },

    /// Invalid client configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
