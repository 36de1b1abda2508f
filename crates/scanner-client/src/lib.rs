//! Scanner service client
//!
//! Client for the in-cluster scanner services the operator hands work to.
//!
//! # Example
//!
//! ```no_run
//! use scanner_client::{ImageScanRequest, ScanSession, ScannerClient, ScannerClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ScannerClient::new(
//!     "http://kubevuln:8080".to_string(),
//!     "http://kubescape:8080".to_string(),
//! )?;
//!
//! client
//!     .scan_image(&ImageScanRequest {
//!         session: ScanSession::new(),
//!         wlid: "wlid://cluster-prod/namespace-default/deployment-nginx".to_string(),
//!         image_tag: "nginx:1.27".to_string(),
//!         image_hash: "sha256:4c0fdaa8b6341bfdeca5f18f7837462c80cff90527ee35ef185571e1c327beac".to_string(),
//!         container_name: "nginx".to_string(),
//!         instance_id: String::new(),
//!         slug: String::new(),
//!         pod: None,
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Retry Logic**: connection-refused failures are retried a fixed number of times
//! - **Mocking**: `MockScannerClient` behind the `test-util` feature

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod scanner_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::ScannerClient;
pub use error::ScannerError;
pub use models::*;
pub use scanner_trait::ScannerClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{MockScannerClient, RecordedRequest};
