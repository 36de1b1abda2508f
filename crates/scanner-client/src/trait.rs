//! ScannerClient trait for mocking
//!
//! The concrete [`crate::ScannerClient`] implements this trait, tests use
//! [`crate::MockScannerClient`] (feature `test-util`).

use crate::error::ScannerError;
use crate::models::{ImageScanRequest, ProfileScanRequest, WorkloadScanRequest};

/// Trait for scanner service operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ScannerClientTrait: Send + Sync {
    /// Base URL of the vulnerability scanner
    fn vuln_scan_url(&self) -> &str;

    /// Base URL of the configuration scanner
    fn config_scan_url(&self) -> &str;

    async fn scan_image(&self, request: &ImageScanRequest) -> Result<(), ScannerError>;
    async fn scan_filtered_sbom(&self, request: &ImageScanRequest) -> Result<(), ScannerError>;
    async fn scan_profile(&self, request: &ProfileScanRequest) -> Result<(), ScannerError>;
    async fn scan_workload(&self, request: &WorkloadScanRequest) -> Result<(), ScannerError>;
}
