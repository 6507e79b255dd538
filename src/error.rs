//! Error types for fleet-pulse using snafu.
//!
//! Each external capability (storage, queue, table, face matching) gets its own
//! error enum. Per-message errors are classified by [`ProcessError`] and never
//! escape the message that produced them; only setup failures surface as a
//! [`PipelineError`].

use std::time::Duration;

use snafu::prelude::*;

use crate::validate::Rejection;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error: {source}"))]
    S3Config { source: object_store::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Queue URL is empty.
    #[snafu(display("Queue URL cannot be empty"))]
    EmptyQueueUrl,

    /// Table URL is empty.
    #[snafu(display("Table URL cannot be empty"))]
    EmptyTableUrl,

    /// Table name is empty.
    #[snafu(display("Table name cannot be empty"))]
    EmptyTableName,

    /// Photo bucket URL is empty.
    #[snafu(display("Photo bucket URL cannot be empty"))]
    EmptyPhotoUrl,

    /// A size or concurrency setting is zero.
    #[snafu(display("'{field}' must be greater than zero"))]
    ZeroSetting { field: &'static str },

    /// Similarity threshold outside of 0..=100.
    #[snafu(display("Similarity threshold must be within 0..=100, got {value}"))]
    InvalidThreshold { value: f32 },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file: {source}"))]
    ReadFile { source: std::io::Error },
}

// ============ Queue Errors ============

/// Errors raised by a [`MessageQueue`](crate::queue::MessageQueue).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// Could not open the queue's backing store.
    #[snafu(display("Failed to open queue storage: {source}"))]
    QueueStorage { source: StorageError },

    /// Receiving a batch failed.
    #[snafu(display("Failed to receive messages: {source}"))]
    QueueReceive { source: StorageError },

    /// Deleting a delivered message failed.
    #[snafu(display("Failed to delete message {handle}: {source}"))]
    QueueDelete { handle: String, source: StorageError },

    /// A delivery handle is not a valid object path.
    #[snafu(display("Invalid delivery handle {handle}: {source}"))]
    QueueHandle {
        handle: String,
        source: object_store::path::Error,
    },

    /// Publishing a message failed.
    #[snafu(display("Failed to send message: {source}"))]
    QueueSend { source: StorageError },

    /// A message body could not be encoded.
    #[snafu(display("Failed to encode message: {source}"))]
    QueueEncode { source: serde_json::Error },

    /// The delete call did not finish in time.
    #[snafu(display("Queue delete timed out after {timeout:?}"))]
    DeleteTimeout { timeout: Duration },
}

// ============ Table Errors ============

/// Errors raised by a [`TelemetryTable`](crate::table::TelemetryTable).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TableError {
    /// Could not open the table's backing store.
    #[snafu(display("Failed to open table storage: {source}"))]
    TableStorage { source: StorageError },

    /// The upsert failed.
    #[snafu(display("Failed to write item: {source}"))]
    TableWrite { source: StorageError },

    /// The upsert did not finish in time.
    #[snafu(display("Table write timed out after {timeout:?}"))]
    TableTimeout { timeout: Duration },

    /// Reading an item back failed.
    #[snafu(display("Failed to read item: {source}"))]
    TableRead { source: StorageError },

    /// Item could not be serialized.
    #[snafu(display("Failed to serialize item: {source}"))]
    TableSerialize { source: serde_json::Error },

    /// A stored item could not be decoded.
    #[snafu(display("Failed to decode stored item {key}: {source}"))]
    TableDecode {
        key: String,
        source: serde_json::Error,
    },
}

// ============ Enrichment Errors ============

/// Errors raised while enriching a photo record.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EnrichError {
    /// The image payload is not valid base64.
    #[snafu(display("Failed to decode image payload: {source}"))]
    ImageDecode { source: base64::DecodeError },

    /// Writing the photo to object storage failed.
    #[snafu(display("Failed to store photo {key}: {source}"))]
    PhotoWrite { key: String, source: StorageError },

    /// Writing the photo did not finish in time.
    #[snafu(display("Photo write for {key} timed out after {timeout:?}"))]
    PhotoTimeout { key: String, timeout: Duration },
}

impl EnrichError {
    /// Malformed payloads never decode on redelivery; storage failures might succeed later.
    pub fn is_permanent(&self) -> bool {
        matches!(self, EnrichError::ImageDecode { .. })
    }
}

// ============ Face Match Errors ============

/// Errors from the face-matching capability. These never fail a record.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FaceMatchError {
    /// The HTTP request to the matcher failed.
    #[snafu(display("Face match request failed: {source}"))]
    FaceMatchRequest { source: reqwest::Error },

    /// The matcher answered with a non-success status.
    #[snafu(display("Face match service returned status {status}"))]
    FaceMatchStatus { status: u16 },

    /// Looking up the reference image failed.
    #[snafu(display("Reference image lookup failed: {source}"))]
    ReferenceLookup { source: StorageError },

    /// The lookup or comparison did not finish in time.
    #[snafu(display("Face matching timed out after {timeout:?}"))]
    FaceMatchTimeout { timeout: Duration },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder: {source}"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Failed to bind the metrics listener.
    #[snafu(display("Failed to bind metrics server to {address}: {source}"))]
    MetricsBind {
        address: String,
        source: std::io::Error,
    },
}

// ============ DLQ Errors ============

/// Errors that can occur during Dead Letter Queue operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
// Prefix avoids selector clashes with the other enums in this module
#[allow(clippy::enum_variant_names)]
pub enum DlqError {
    /// Failed to write to DLQ.
    #[snafu(display("Failed to write to DLQ: {source}"))]
    DlqWrite { source: StorageError },

    /// Failed to serialize a rejected message record.
    #[snafu(display("Failed to serialize DLQ record: {source}"))]
    DlqSerialize { source: serde_json::Error },

    /// Failed to create DLQ storage provider.
    #[snafu(display("Failed to create DLQ storage: {source}"))]
    DlqStorage { source: StorageError },
}

// ============ Per-record processing ============

/// Why a single record did not make it into the table.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProcessError {
    /// The record failed validation for its declared kind.
    #[snafu(display("{rejection}"))]
    Invalid { rejection: Rejection },

    /// Photo enrichment failed.
    #[snafu(display("Photo enrichment failed: {source}"))]
    Enrich { source: EnrichError },

    /// The table write failed.
    #[snafu(display("Persistence failed: {source}"))]
    Persist { source: TableError },
}

impl ProcessError {
    /// Permanent failures are deleted from the queue; the rest are redelivered.
    pub fn is_permanent(&self) -> bool {
        match self {
            ProcessError::Invalid { .. } => true,
            ProcessError::Enrich { source } => source.is_permanent(),
            ProcessError::Persist { .. } => false,
        }
    }
}

// ============ Pipeline Error (top-level) ============

/// Setup and runtime errors that stop the process.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Storage error.
    #[snafu(display("Storage error: {source}"))]
    PipelineStorage { source: StorageError },

    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Queue error.
    #[snafu(display("Queue error: {source}"))]
    Queue { source: QueueError },

    /// Table error.
    #[snafu(display("Table error: {source}"))]
    Table { source: TableError },

    /// HTTP client construction failed.
    #[snafu(display("Failed to build HTTP client: {source}"))]
    HttpClient { source: reqwest::Error },

    /// Address parsing error.
    #[snafu(display("Failed to parse address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Binding the ingestion API listener failed.
    #[snafu(display("Failed to bind ingestion API to {address}: {source}"))]
    ServerBind {
        address: String,
        source: std::io::Error,
    },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },

    /// DLQ error.
    #[snafu(display("DLQ error: {source}"))]
    Dlq { source: DlqError },
}
