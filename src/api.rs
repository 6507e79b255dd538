//! HTTP ingestion endpoint.
//!
//! `POST /telemetry/{kind}` accepts the `data` object of a queue message and
//! runs it through the same [`RecordProcessor`] as the queue consumer.
//! Client errors answer 400, downstream failures 500.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use snafu::prelude::*;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::emit;
use crate::error::{PipelineError, ProcessError, ServerBindSnafu};
use crate::metrics::events::ApiRequest;
use crate::metrics::server::health_handler;
use crate::pipeline::{Reason, RecordProcessor};
use crate::record::{TelemetryData, TelemetryKind};

const INVALID_KIND: &str = "Invalid data type. Use gyroscope, gps, or photo";
const INVALID_JSON: &str = "Invalid JSON format";

/// Routes of the ingestion API.
pub fn router(processor: Arc<RecordProcessor>) -> Router {
    Router::new()
        .route("/telemetry/{kind}", post(ingest))
        .route("/health", get(health_handler))
        .with_state(processor)
}

/// Bind `addr` and serve the ingestion API until `shutdown` is cancelled.
pub async fn serve(
    addr: SocketAddr,
    processor: Arc<RecordProcessor>,
    shutdown: CancellationToken,
) -> Result<(), PipelineError> {
    let listener = TcpListener::bind(addr).await.context(ServerBindSnafu {
        address: addr.to_string(),
    })?;
    info!(%addr, "Ingestion API listening");

    tokio::spawn(async move {
        let serve = axum::serve(listener, router(processor))
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
        if let Err(e) = serve.await {
            error!("Ingestion API error: {}", e);
        }
    });

    Ok(())
}

async fn ingest(
    State(processor): State<Arc<RecordProcessor>>,
    Path(kind): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let (status, response) = match kind.parse::<TelemetryKind>() {
        Ok(kind) => store(&processor, kind, &body).await,
        Err(_) => (StatusCode::BAD_REQUEST, json!({ "error": INVALID_KIND })),
    };

    let label = kind
        .parse::<TelemetryKind>()
        .map(|kind| kind.as_str())
        .unwrap_or("unknown");
    emit!(ApiRequest {
        kind: label.to_string(),
        status: status.as_u16(),
    });

    (status, Json(response))
}

async fn store(
    processor: &RecordProcessor,
    kind: TelemetryKind,
    body: &[u8],
) -> (StatusCode, Value) {
    let data: TelemetryData = match serde_json::from_slice(body) {
        Ok(data) => data,
        Err(e) => {
            debug!(%kind, error = %e, "Rejected unparseable request body");
            return (StatusCode::BAD_REQUEST, json!({ "error": INVALID_JSON }));
        }
    };

    match processor.process(kind.as_str(), &data).await {
        Ok(_) => (
            StatusCode::OK,
            json!({ "message": format!("{kind} data stored successfully") }),
        ),
        Err(ProcessError::Invalid { rejection }) => {
            debug!(
                %kind,
                device_id = %data.device_id,
                reason = %rejection.reason,
                "Rejected request"
            );
            (
                StatusCode::BAD_REQUEST,
                json!({ "error": rejection.message, "reason": rejection.reason.as_str() }),
            )
        }
        Err(e) if e.is_permanent() => {
            warn!(%kind, device_id = %data.device_id, error = %e, "Rejected request");
            (
                StatusCode::BAD_REQUEST,
                json!({ "error": e.to_string(), "reason": Reason::from(&e).as_str() }),
            )
        }
        Err(e) => {
            error!(%kind, device_id = %data.device_id, error = %e, "Failed to store request");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": format!("Failed to store data: {e}") }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::{DisabledFaceMatcher, NoReferences, PhotoEnricher};
    use crate::storage::StorageProvider;
    use crate::table::StorageTable;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> Router {
        let root = StorageProvider::in_memory();
        let table = Arc::new(StorageTable::new(&root, "fleet-telemetry"));
        let enricher = PhotoEnricher::new(
            Arc::new(root.with_prefix("photos")),
            Arc::new(NoReferences),
            Arc::new(DisabledFaceMatcher),
        );
        router(Arc::new(RecordProcessor::new(table, enricher)))
    }

    async fn post_json(kind: &str, body: &str) -> (StatusCode, Value) {
        let response = app()
            .oneshot(
                Request::post(format!("/telemetry/{kind}"))
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_unknown_kind_is_checked_before_body() {
        let (status, body) = post_json("temperature", "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], INVALID_KIND);
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let (status, body) = post_json("gps", "{").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], INVALID_JSON);
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
