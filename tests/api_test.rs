//! HTTP ingestion endpoint tests

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use fleet_pulse::api::router;
use fleet_pulse::enrich::{DisabledFaceMatcher, NoReferences, PhotoEnricher};
use fleet_pulse::error::TableError;
use fleet_pulse::pipeline::RecordProcessor;
use fleet_pulse::storage::StorageProvider;
use fleet_pulse::table::{ItemAttributes, PersistedItem, StorageTable, TelemetryTable};

struct UnavailableTable;

#[async_trait]
impl TelemetryTable for UnavailableTable {
    async fn put_item(&self, _item: &PersistedItem) -> Result<(), TableError> {
        Err(TableError::TableTimeout {
            timeout: Duration::from_secs(10),
        })
    }

    async fn get_item(
        &self,
        _device_id: &str,
        _timestamp: &str,
    ) -> Result<Option<PersistedItem>, TableError> {
        Ok(None)
    }
}

fn app_with(table: Arc<dyn TelemetryTable>) -> Router {
    let enricher = PhotoEnricher::new(
        Arc::new(StorageProvider::in_memory()),
        Arc::new(NoReferences),
        Arc::new(DisabledFaceMatcher),
    );
    router(Arc::new(RecordProcessor::new(table, enricher)))
}

async fn post(app: Router, kind: &str, body: &str) -> (StatusCode, Value) {
    let response = app
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
async fn test_gyroscope_is_stored() {
    let table = Arc::new(StorageTable::new(&StorageProvider::in_memory(), "fleet-telemetry"));
    let (status, body) = post(
        app_with(table.clone()),
        "gyroscope",
        r#"{"device_id":"mac123","timestamp":"2025-05-16T12:00:00Z","x":0.5,"y":0.25,"z":1.0}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "gyroscope data stored successfully");

    let item = table
        .get_item("mac123", "2025-05-16T12:00:00Z")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        item.attributes,
        ItemAttributes::Gyroscope {
            x: 0.5,
            y: 0.25,
            z: 1.0
        }
    );
}

#[tokio::test]
async fn test_missing_timestamp() {
    let table = Arc::new(StorageTable::new(&StorageProvider::in_memory(), "fleet-telemetry"));
    let (status, body) = post(app_with(table.clone()), "gps", r#"{"device_id":"mac123"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing timestamp");
    assert_eq!(body["reason"], "missing_identity");
    assert!(table.scan().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_zero_gps_is_rejected() {
    let table = Arc::new(StorageTable::new(&StorageProvider::in_memory(), "fleet-telemetry"));
    let (status, body) = post(
        app_with(table),
        "gps",
        r#"{"device_id":"mac123","timestamp":"t1","latitude":0,"longitude":0}"#,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Missing or invalid GPS data (latitude, longitude)"
    );
    assert_eq!(body["reason"], "invalid_gps");
}

#[tokio::test]
async fn test_undecodable_photo_is_a_client_error() {
    let table = Arc::new(StorageTable::new(&StorageProvider::in_memory(), "fleet-telemetry"));
    let (status, body) = post(
        app_with(table),
        "photo",
        r#"{"device_id":"mac123","timestamp":"t1","image":"***"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "decode_error");
}

#[tokio::test]
async fn test_storage_failure_is_a_server_error() {
    let (status, body) = post(
        app_with(Arc::new(UnavailableTable)),
        "gyroscope",
        r#"{"device_id":"mac123","timestamp":"t1","x":1.0}"#,
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .starts_with("Failed to store data:")
    );
}
