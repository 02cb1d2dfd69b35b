//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the retention
//! engine to its two triggers (the admission webhook and the periodic release
//! task) and serves probes and metrics. With leader election on, only the
//! lease holder releases; every replica keeps serving the webhook.

use crate::config::{EngineConfig, RuntimeSettings};
use crate::error::ControllerError;
use crate::http::{probe_router, serve, serve_tls, webhook_router};
use crate::leader::{LeaderElector, LeaseSettings};
use crate::metrics::Metrics;
use crate::releaser::Releaser;
use crate::retention::RetentionStore;
use cluster_store::ClusterStore;
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Main controller for pod IP retention.
pub struct Controller {
    probe_server: JoinHandle<Result<(), ControllerError>>,
    webhook_server: Option<JoinHandle<Result<(), ControllerError>>>,
    releaser: Option<JoinHandle<()>>,
    elector: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("webhook", &self.webhook_server.is_some())
            .field("releaser", &self.releaser.is_some())
            .field("leader_election", &self.elector.is_some())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(settings: RuntimeSettings, config: EngineConfig) -> Result<Self, ControllerError> {
        info!("Initializing IP Reserve Controller");

        let kube_client = Client::try_default().await?;
        let store = ClusterStore::new(kube_client.clone(), config.tracking.clone(), config.reservation_name.clone());

        let engine = Arc::new(RetentionStore::new(Box::new(store), &config, Metrics::new()?)?);

        // Records are also created lazily, so a failure here is not fatal
        if let Err(e) = engine.bootstrap().await {
            warn!(error = %e, "Bootstrap of reservation records failed (will continue)");
        } else {
            info!(tracking = %config.tracking, reservation = %config.reservation_name, "Reservation records ready");
        }

        let probe_server = tokio::spawn(serve(settings.metrics_addr, probe_router(engine.metrics().clone()), "Metrics server"));

        let webhook_server = match (settings.webhook_enabled, settings.webhook_tls) {
            (false, _) => {
                info!("Admission webhook disabled");
                None
            }
            (true, Some(files)) => Some(tokio::spawn(serve_tls(
                settings.webhook_addr,
                webhook_router(engine.clone()),
                files,
                "Webhook server",
            ))),
            (true, None) => {
                warn!("Webhook served without TLS; the API server will only reach it through a TLS proxy");
                Some(tokio::spawn(serve(
                    settings.webhook_addr,
                    webhook_router(engine.clone()),
                    "Webhook server",
                )))
            }
        };

        let (releaser, elector) = if settings.release_enabled {
            let mut releaser = Releaser::new(engine, config.release_period);
            let elector = match settings.leader_election {
                Some(election) => {
                    let lease = LeaseSettings::new(election.lease_name, config.tracking.namespace.clone(), election.identity);
                    let (elector, leading) = LeaderElector::new(kube_client, lease);
                    releaser = releaser.with_leader_gate(leading);
                    Some(tokio::spawn(elector.run()))
                }
                None => None,
            };
            (Some(tokio::spawn(releaser.run())), elector)
        } else {
            info!("Release task disabled");
            (None, None)
        };

        Ok(Self {
            probe_server,
            webhook_server,
            releaser,
            elector,
        })
    }

    /// Runs the controller until shutdown or until a server stops.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("IP Reserve Controller running");

        let result = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                Ok(())
            }
            result = &mut self.probe_server => task_result("Metrics server", result),
            result = wait_optional(self.webhook_server.as_mut()) => task_result("Webhook server", result),
            result = wait_optional(self.releaser.as_mut()) => task_result("Release task", result.map(Ok)),
            result = wait_optional(self.elector.as_mut()) => task_result("Leader election", result.map(Ok)),
        };

        self.probe_server.abort();
        if let Some(handle) = &self.webhook_server {
            handle.abort();
        }
        if let Some(handle) = &self.releaser {
            handle.abort();
        }
        if let Some(handle) = &self.elector {
            handle.abort();
        }
        info!("IP Reserve Controller stopped");
        result
    }
}

/// Waits on an optional task; a missing task never completes.
async fn wait_optional<T>(handle: Option<&mut JoinHandle<T>>) -> Result<T, tokio::task::JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn task_result(
    what: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    match result {
        Ok(Ok(())) => Err(ControllerError::Task(format!("{what} exited unexpectedly"))),
        Ok(Err(e)) => Err(ControllerError::Task(format!("{what} error: {e}"))),
        Err(e) => Err(ControllerError::Task(format!("{what} panicked: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_task_never_completes() {
        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            wait_optional::<()>(None),
        )
        .await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_panicked_release_task_is_reported() {
        let mut handle: JoinHandle<()> = tokio::spawn(async { panic!("release loop died") });

        let result = task_result("Release task", wait_optional(Some(&mut handle)).await.map(Ok));

        assert!(matches!(result, Err(ControllerError::Task(ref msg)) if msg.starts_with("Release task panicked")));
    }

    #[tokio::test]
    async fn test_finished_release_task_is_unexpected() {
        let mut handle: JoinHandle<()> = tokio::spawn(async {});

        let result = task_result("Release task", wait_optional(Some(&mut handle)).await.map(Ok));

        assert!(matches!(result, Err(ControllerError::Task(ref msg)) if msg == "Release task exited unexpectedly"));
    }
}
