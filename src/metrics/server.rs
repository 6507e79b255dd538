//! Prometheus metrics endpoint.
//!
//! Serves `/metrics` in the Prometheus text format and `/health` for
//! liveness probes.

use axum::{Extension, Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{MetricsBindSnafu, MetricsError, PrometheusInitSnafu};

/// Install the global Prometheus recorder and serve it on `addr` until
/// `shutdown` is cancelled.
pub async fn init(addr: SocketAddr, shutdown: CancellationToken) -> Result<(), MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    let listener = TcpListener::bind(addr).await.context(MetricsBindSnafu {
        address: addr.to_string(),
    })?;
    info!(%addr, "Metrics server listening");

    tokio::spawn(async move {
        let serve = axum::serve(listener, router(handle))
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
        if let Err(e) = serve.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

/// Routes for the metrics and health endpoints.
pub fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(Extension(handle))
}

async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> String {
    handle.render()
}

pub(crate) async fn health_handler() -> &'static str {
    "ok\n"
}
