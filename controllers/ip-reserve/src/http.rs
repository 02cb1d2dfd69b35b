//! HTTP listeners
//!
//! Two routers: probes and metrics on one port, the admission webhook on the
//! other. The webhook is served over TLS unless explicitly disabled.

use crate::config::TlsFiles;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::retention::RetentionStore;
use crate::tls::{TlsListener, load_server_config};
use crate::webhook::review_response;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use kube::core::DynamicObject;
use kube::core::admission::AdmissionReview;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub const WEBHOOK_PATH: &str = "/pod-ip-reservation";

/// `/metrics`, `/healthz` and `/readyz`
pub fn probe_router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(ok_handler))
        .route("/readyz", get(ok_handler))
        .with_state(metrics)
}

/// The validating webhook endpoint
pub fn webhook_router(engine: Arc<RetentionStore>) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(webhook_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Binds `addr` and serves `router` until the task is dropped.
pub async fn serve(addr: SocketAddr, router: Router, what: &'static str) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "{} listening", what);
    axum::serve(listener, router).await?;
    Ok(())
}

/// Like `serve`, but every connection goes through a TLS handshake first.
pub async fn serve_tls(
    addr: SocketAddr,
    router: Router,
    files: TlsFiles,
    what: &'static str,
) -> Result<(), ControllerError> {
    let config = load_server_config(&files)?;
    let listener = TlsListener::bind(addr, config).await?;
    info!(%addr, cert = %files.cert.display(), "{} listening (TLS)", what);
    axum::serve(listener, router).await?;
    Ok(())
}

async fn metrics_handler(State(metrics): State<Metrics>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, metrics.content_type())], body),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                format!("# failed to encode metrics: {e}\n"),
            )
        }
    }
}

async fn ok_handler() -> &'static str {
    "ok"
}

async fn webhook_handler(
    State(engine): State<Arc<RetentionStore>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    Json(review_response(&engine, review).await)
}
