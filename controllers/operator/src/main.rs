//! Scan Operator
//!
//! Configuration comes from `OPERATOR_CONFIG` and environment variables,
//! log filtering from `RUST_LOG`.

use anyhow::Result;
use scan_operator::{Controller, OperatorConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // kube's rustls client needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Scan Operator");

    let config = OperatorConfig::load()?;
    info!("Configuration:");
    info!("  Cluster: {}", config.cluster_name);
    info!("  Namespace: {}", config.namespace);
    info!("  Workers: {}", config.worker_concurrency);
    info!("  Continuous scanning: {}", config.continuous_scan_enabled);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    info!("Scan Operator stopped");
    Ok(())
}
