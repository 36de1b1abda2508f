//! Mock ScannerClient for unit testing
//!
//! Records every request in memory instead of posting it. Failures can be
//! queued to exercise error paths of callers.

use crate::error::ScannerError;
use crate::models::{ImageScanRequest, ProfileScanRequest, WorkloadScanRequest};
use crate::scanner_trait::ScannerClientTrait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A request captured by [`MockScannerClient`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedRequest {
    Image(ImageScanRequest),
    FilteredSbom(ImageScanRequest),
    Profile(ProfileScanRequest),
    Workload(WorkloadScanRequest),
}

impl RecordedRequest {
    pub fn wlid(&self) -> &str {
        match self {
            Self::Image(r) | Self::FilteredSbom(r) => &r.wlid,
            Self::Profile(r) => &r.wlid,
            Self::Workload(r) => &r.wlid,
        }
    }
}

/// Mock ScannerClient for testing
#[derive(Clone, Debug, Default)]
pub struct MockScannerClient {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    // Messages returned as `ScannerError::Api` by the next calls, in order
    failures: Arc<Mutex<VecDeque<String>>>,
}

impl MockScannerClient {
    /// Create a new mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call fail with the given message
    pub fn fail_next(&self, message: impl Into<String>) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(message.into());
        }
    }

    /// All requests recorded so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn record(&self, request: RecordedRequest) -> Result<(), ScannerError> {
        if let Some(message) = self.failures.lock().ok().and_then(|mut f| f.pop_front()) {
            return Err(ScannerError::Api(message));
        }
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ScannerClientTrait for MockScannerClient {
    fn vuln_scan_url(&self) -> &str {
        "http://mock-vuln"
    }

    fn config_scan_url(&self) -> &str {
        "http://mock-config"
    }

    async fn scan_image(&self, request: &ImageScanRequest) -> Result<(), ScannerError> {
        self.record(RecordedRequest::Image(request.clone()))
    }

    async fn scan_filtered_sbom(&self, request: &ImageScanRequest) -> Result<(), ScannerError> {
        self.record(RecordedRequest::FilteredSbom(request.clone()))
    }

    async fn scan_profile(&self, request: &ProfileScanRequest) -> Result<(), ScannerError> {
        self.record(RecordedRequest::Profile(request.clone()))
    }

    async fn scan_workload(&self, request: &WorkloadScanRequest) -> Result<(), ScannerError> {
        self.record(RecordedRequest::Workload(request.clone()))
    }
}
