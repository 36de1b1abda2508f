//! Integration tests for the scanner client
//!
//! These tests require running scanner services.
//! Set VULN_SCAN_URL and CONFIG_SCAN_URL environment variables to run.

use scanner_client::{ScanSession, ScannerClient, ScannerClientTrait, WorkloadScanRequest};

fn client() -> ScannerClient {
    let vuln = std::env::var("VULN_SCAN_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let config = std::env::var("CONFIG_SCAN_URL").unwrap_or_else(|_| "http://localhost:8081".to_string());
    ScannerClient::new(vuln, config).expect("Failed to create client")
}

#[tokio::test]
#[ignore] // Requires running scanner services
async fn test_scan_workload() {
    let client = client();

    let result = client
        .scan_workload(&WorkloadScanRequest {
            session: ScanSession::new(),
            wlid: "wlid://cluster-local/namespace-default/deployment-nginx".to_string(),
            object: None,
        })
        .await;
    assert!(result.is_ok(), "Failed to request workload scan: {:?}", result);
}
