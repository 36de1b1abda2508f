//! Scanner HTTP client
//!
//! Posts scan requests as JSON to the vulnerability scanner and to the
//! configuration scanner. Connection-refused failures are retried a fixed
//! number of times, every other failure is returned immediately.

use crate::error::ScannerError;
use crate::models::{ImageScanRequest, ProfileKind, ProfileScanRequest, WorkloadScanRequest};
use crate::scanner_trait::ScannerClientTrait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

pub const SCAN_IMAGE_PATH: &str = "v1/scanImage";
pub const SCAN_FILTERED_SBOM_PATH: &str = "v1/scanFilteredSBOM";
pub const SCAN_APPLICATION_PROFILE_PATH: &str = "v1/scanApplicationProfile";
pub const SCAN_CONTAINER_PROFILE_PATH: &str = "v1/scanContainerProfile";
pub const SCAN_WORKLOAD_PATH: &str = "v1/scan";

/// Number of attempts made while the scanner refuses connections
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Scanner service client
#[derive(Debug, Clone)]
pub struct ScannerClient {
    client: Client,
    vuln_scan_url: String,
    config_scan_url: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl ScannerClient {
    /// Create a new scanner client
    ///
    /// # Arguments
    /// * `vuln_scan_url` - vulnerability scanner base URL (e.g., "http://kubevuln:8080")
    /// * `config_scan_url` - configuration scanner base URL (e.g., "http://kubescape:8080")
    pub fn new(vuln_scan_url: String, config_scan_url: String) -> Result<Self, ScannerError> {
        if vuln_scan_url.is_empty() || config_scan_url.is_empty() {
            return Err(ScannerError::InvalidConfig(
                "scanner URLs must not be empty".to_string(),
            ));
        }
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            vuln_scan_url: vuln_scan_url.trim_end_matches('/').to_string(),
            config_scan_url: config_scan_url.trim_end_matches('/').to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_secs(5),
        })
    }

    /// Override the connection-refused retry policy
    #[must_use]
    pub fn with_retry(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        base_url: &str,
        path: &str,
        body: &T,
    ) -> Result<(), ScannerError> {
        let url = format!("{}/{}", base_url, path);
        let payload = serde_json::to_vec(body)?;

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            debug!("POST {} (attempt {})", url, attempt);
            let sent = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .body(payload.clone())
                .send()
                .await;
            match sent {
                Ok(response) => break response,
                Err(e) if e.is_connect() => {
                    if attempt >= self.max_attempts {
                        return Err(ScannerError::ConnectionRefused {
                            url,
                            attempts: attempt,
                        });
                    }
                    warn!("Scanner at {} refused connection: {}, retrying", url, e);
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(ScannerError::Http(e)),
            }
        };

        let status = response.status();
        if !(200..=203).contains(&status.as_u16()) {
            let body = response.text().await.unwrap_or_default();
            return Err(ScannerError::Api(format!(
                "POST {} returned {} - {}",
                url, status, body
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ScannerClientTrait for ScannerClient {
    fn vuln_scan_url(&self) -> &str {
        &self.vuln_scan_url
    }

    fn config_scan_url(&self) -> &str {
        &self.config_scan_url
    }

    async fn scan_image(&self, request: &ImageScanRequest) -> Result<(), ScannerError> {
        self.post_json(&self.vuln_scan_url, SCAN_IMAGE_PATH, request).await
    }

    async fn scan_filtered_sbom(&self, request: &ImageScanRequest) -> Result<(), ScannerError> {
        self.post_json(&self.vuln_scan_url, SCAN_FILTERED_SBOM_PATH, request)
            .await
    }

    async fn scan_profile(&self, request: &ProfileScanRequest) -> Result<(), ScannerError> {
        let path = match request.kind {
            ProfileKind::ApplicationProfile => SCAN_APPLICATION_PROFILE_PATH,
            ProfileKind::ContainerProfile => SCAN_CONTAINER_PROFILE_PATH,
        };
        self.post_json(&self.vuln_scan_url, path, request).await
    }

    async fn scan_workload(&self, request: &WorkloadScanRequest) -> Result<(), ScannerError> {
        self.post_json(&self.config_scan_url, SCAN_WORKLOAD_PATH, request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_trailing_slash() {
        let client = ScannerClient::new(
            "http://kubevuln:8080/".to_string(),
            "http://kubescape:8080".to_string(),
        )
        .unwrap();
        assert_eq!(client.vuln_scan_url(), "http://kubevuln:8080");
        assert_eq!(client.config_scan_url(), "http://kubescape:8080");
    }

    #[test]
    fn test_new_rejects_empty_url() {
        let result = ScannerClient::new(String::new(), "http://kubescape:8080".to_string());
        assert!(matches!(result, Err(ScannerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_gives_up_after_max_attempts() {
        // Nothing listens on port 1
        let client = ScannerClient::new(
            "http://127.0.0.1:1".to_string(),
            "http://127.0.0.1:1".to_string(),
        )
        .unwrap()
        .with_retry(2, Duration::from_millis(1));

        let request = ImageScanRequest {
            session: crate::ScanSession::new(),
            wlid: "wlid://cluster-test/namespace-default/pod-nginx".to_string(),
            image_tag: "nginx:latest".to_string(),
            image_hash: "sha256:abc".to_string(),
            container_name: "nginx".to_string(),
            instance_id: String::new(),
            slug: String::new(),
            pod: None,
        };
        match client.scan_image(&request).await {
            Err(ScannerError::ConnectionRefused { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected ConnectionRefused, got {:?}", other),
        }
    }
}
