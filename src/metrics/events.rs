//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

// ============================================================================
// Queue consumer events
// ============================================================================

/// Event emitted when a batch of messages is received from the queue.
pub struct MessagesReceived {
    pub count: usize,
}

impl InternalEvent for MessagesReceived {
    fn emit(self) {
        trace!(count = self.count, "Messages received");
        counter!("fleet_pulse_messages_received_total").increment(self.count as u64);
    }
}

/// Event emitted when a message reaches a terminal outcome.
pub struct MessageProcessed {
    /// `persisted`, `rejected` or `deferred`.
    pub outcome: &'static str,
    /// Telemetry kind for persisted messages, failure reason otherwise.
    pub label: &'static str,
}

impl InternalEvent for MessageProcessed {
    fn emit(self) {
        trace!(outcome = self.outcome, label = self.label, "Message processed");
        counter!(
            "fleet_pulse_messages_processed_total",
            "outcome" => self.outcome,
            "label" => self.label
        )
        .increment(1);
    }
}

/// Event emitted when deleting a message from the queue fails.
pub struct AckFailed;

impl InternalEvent for AckFailed {
    fn emit(self) {
        trace!("Ack failed");
        counter!("fleet_pulse_ack_failures_total").increment(1);
    }
}

/// Event emitted when the number of in-flight messages changes.
pub struct InFlightMessages {
    pub count: usize,
}

impl InternalEvent for InFlightMessages {
    fn emit(self) {
        trace!(count = self.count, "In-flight messages");
        gauge!("fleet_pulse_in_flight_messages").set(self.count as f64);
    }
}

/// Event emitted when a poll iteration finishes.
pub struct BatchCompleted {
    pub duration: Duration,
}

impl InternalEvent for BatchCompleted {
    fn emit(self) {
        trace!(duration_ms = self.duration.as_millis(), "Batch completed");
        histogram!("fleet_pulse_batch_duration_seconds").record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Per-stage timing
// ============================================================================

/// Processing stage of a single record.
#[derive(Debug, Clone, Copy)]
pub enum Stage {
    Enrich,
    Persist,
    Ack,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Enrich => "enrich",
            Stage::Persist => "persist",
            Stage::Ack => "ack",
        }
    }
}

/// Event emitted when a stage of record processing completes.
pub struct StageCompleted {
    pub stage: Stage,
    pub duration: Duration,
}

impl InternalEvent for StageCompleted {
    fn emit(self) {
        trace!(
            stage = self.stage.as_str(),
            duration_ms = self.duration.as_millis(),
            "Stage completed"
        );
        histogram!(
            "fleet_pulse_stage_duration_seconds",
            "stage" => self.stage.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Photo enrichment events
// ============================================================================

/// Event emitted when a decoded photo is written to object storage.
pub struct PhotoStored {
    pub bytes: usize,
}

impl InternalEvent for PhotoStored {
    fn emit(self) {
        trace!(bytes = self.bytes, "Photo stored");
        counter!("fleet_pulse_photo_bytes_total").increment(self.bytes as u64);
    }
}

/// Result of a face-match attempt.
#[derive(Debug, Clone, Copy)]
pub enum FaceMatchResult {
    Recognized,
    Unrecognized,
    NoReference,
    Error,
}

impl FaceMatchResult {
    fn as_str(&self) -> &'static str {
        match self {
            FaceMatchResult::Recognized => "recognized",
            FaceMatchResult::Unrecognized => "unrecognized",
            FaceMatchResult::NoReference => "no_reference",
            FaceMatchResult::Error => "error",
        }
    }
}

/// Event emitted when a face-match attempt finishes.
pub struct FaceMatchCompleted {
    pub result: FaceMatchResult,
    pub duration: Duration,
}

impl InternalEvent for FaceMatchCompleted {
    fn emit(self) {
        trace!(
            result = self.result.as_str(),
            duration_ms = self.duration.as_millis(),
            "Face match completed"
        );
        counter!("fleet_pulse_face_matches_total", "result" => self.result.as_str()).increment(1);
        histogram!("fleet_pulse_face_match_duration_seconds").record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Ingestion API and dead letter events
// ============================================================================

/// Event emitted when the HTTP ingestion endpoint answers a request.
pub struct ApiRequest {
    pub kind: String,
    pub status: u16,
}

impl InternalEvent for ApiRequest {
    fn emit(self) {
        trace!(kind = %self.kind, status = self.status, "API request");
        counter!(
            "fleet_pulse_api_requests_total",
            "kind" => self.kind,
            "status" => self.status.to_string()
        )
        .increment(1);
    }
}

/// Event emitted when rejected messages are flushed to the dead letter log.
pub struct DlqRecordsWritten {
    pub count: usize,
}

impl InternalEvent for DlqRecordsWritten {
    fn emit(self) {
        trace!(count = self.count, "DLQ records written");
        counter!("fleet_pulse_dlq_records_total").increment(self.count as u64);
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    Delete,
    List,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::Delete => "delete",
            StorageOperation::List => "list",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a storage request completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "fleet_pulse_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted when a storage request completes with duration.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        histogram!(
            "fleet_pulse_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
