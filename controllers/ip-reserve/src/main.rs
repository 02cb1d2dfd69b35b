//! IP Reserve Controller
//!
//! Keeps the pod IPs of removed stateful workloads out of Calico IPAM for a
//! bounded time, so a replacement pod can come back with the same address:
//! - Admission webhook: records the IPs of a pod being deleted or evicted
//! - Release task: periodically frees reservations past their TTL, or the
//!   oldest ones once the configured maximum is exceeded

mod backoff;
mod codec;
mod config;
mod controller;
mod coverage;
mod error;
mod http;
mod leader;
mod metrics;
mod policy;
mod releaser;
mod retention;
mod selector;
mod tls;
mod webhook;

#[cfg(test)]
mod test_utils;

use crate::config::{EngineConfig, RuntimeSettings};
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls client needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    info!("Starting IP Reserve Controller");

    let settings = RuntimeSettings::from_env()?;
    let config = EngineConfig::load(settings.config_path.as_deref(), settings.pod_namespace.clone())?;

    info!("Configuration:");
    info!("  Config file: {}", settings.config_path.as_ref().map_or_else(|| "none".to_string(), |p| p.display().to_string()));
    info!("  Max retained: {}", config.max_retained_count);
    info!("  Retention: {:?}", config.retention_duration);
    info!("  Release period: {:?}", config.release_period);
    info!("  Tracking record: {}", config.tracking);
    info!("  Reservation record: {}", config.reservation_name);
    info!("  Webhook: {} on {} (TLS: {})", settings.webhook_enabled, settings.webhook_addr, settings.webhook_tls.is_some());
    info!("  Release task: {}", settings.release_enabled);
    info!(
        "  Leader election: {}",
        settings
            .leader_election
            .as_ref()
            .map_or_else(|| "disabled".to_string(), |le| format!("lease {} as {}", le.lease_name, le.identity))
    );

    let controller = Controller::new(settings, config).await?;
    controller.run().await?;

    Ok(())
}
