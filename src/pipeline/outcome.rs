//! Terminal outcomes of a queue message.
//!
//! A message moves through `received -> decoded -> validated -> (enriched)
//! -> persisted -> deleted`. It stops early as `Rejected` (deleted without
//! persistence, never retried) or `Deferred` (left on the queue for
//! redelivery).

use crate::error::{EnrichError, ProcessError};
use crate::record::TelemetryKind;
use crate::validate::RejectReason;

/// Why a message was rejected or deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// The body is not a valid queue message.
    Malformed,
    /// The record failed validation.
    Invalid(RejectReason),
    /// The photo payload is not valid base64.
    DecodeError,
    /// The photo could not be written.
    StorageUnavailable,
    /// The table write failed.
    WriteUnavailable,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Malformed => "malformed",
            Reason::Invalid(reason) => reason.as_str(),
            Reason::DecodeError => "decode_error",
            Reason::StorageUnavailable => "storage_unavailable",
            Reason::WriteUnavailable => "write_unavailable",
        }
    }
}

impl From<&ProcessError> for Reason {
    fn from(error: &ProcessError) -> Self {
        match error {
            ProcessError::Invalid { rejection } => Reason::Invalid(rejection.reason),
            ProcessError::Enrich { source } => match source {
                EnrichError::ImageDecode { .. } => Reason::DecodeError,
                EnrichError::PhotoWrite { .. } | EnrichError::PhotoTimeout { .. } => {
                    Reason::StorageUnavailable
                }
            },
            ProcessError::Persist { .. } => Reason::WriteUnavailable,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// The item was written to the table.
    Persisted { kind: TelemetryKind },
    /// Permanently unprocessable; deleted without persistence.
    Rejected { reason: Reason, detail: String },
    /// Transient failure; left on the queue.
    Deferred { reason: Reason, detail: String },
}

impl MessageOutcome {
    /// Classify a processing failure.
    pub fn from_error(error: &ProcessError) -> Self {
        let reason = Reason::from(error);
        let detail = error.to_string();
        if error.is_permanent() {
            MessageOutcome::Rejected { reason, detail }
        } else {
            MessageOutcome::Deferred { reason, detail }
        }
    }

    /// Whether the message must be removed from the queue.
    pub fn should_delete(&self) -> bool {
        !matches!(self, MessageOutcome::Deferred { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Persisted { .. } => "persisted",
            MessageOutcome::Rejected { .. } => "rejected",
            MessageOutcome::Deferred { .. } => "deferred",
        }
    }

    /// Kind for persisted messages, reason code otherwise.
    pub fn label(&self) -> &'static str {
        match self {
            MessageOutcome::Persisted { kind } => kind.as_str(),
            MessageOutcome::Rejected { reason, .. } | MessageOutcome::Deferred { reason, .. } => {
                reason.as_str()
            }
        }
    }
}

/// What happened to one delivered message.
#[derive(Debug, Clone)]
pub struct MessageReport {
    pub message_id: String,
    pub outcome: MessageOutcome,
    /// Whether the queue delete succeeded.
    pub deleted: bool,
}

/// Counters for one batch, or summed over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub received: usize,
    pub persisted: usize,
    pub rejected: usize,
    pub deferred: usize,
    /// Deletes that should have happened but failed.
    pub ack_failures: usize,
    /// Messages left unfinished by shutdown or the batch deadline.
    pub abandoned: usize,
}

impl BatchStats {
    pub fn record(&mut self, report: &MessageReport) {
        match report.outcome {
            MessageOutcome::Persisted { .. } => self.persisted += 1,
            MessageOutcome::Rejected { .. } => self.rejected += 1,
            MessageOutcome::Deferred { .. } => self.deferred += 1,
        }
        if report.outcome.should_delete() && !report.deleted {
            self.ack_failures += 1;
        }
    }

    pub fn completed(&self) -> usize {
        self.persisted + self.rejected + self.deferred
    }

    /// True when at least one message left the queue.
    pub fn made_progress(&self) -> bool {
        self.persisted + self.rejected > self.ack_failures
    }

    pub fn merge(&mut self, other: &BatchStats) {
        self.received += other.received;
        self.persisted += other.persisted;
        self.rejected += other.rejected;
        self.deferred += other.deferred;
        self.ack_failures += other.ack_failures;
        self.abandoned += other.abandoned;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TableError;
    use crate::validate::Rejection;
    use std::time::Duration;

    fn report(outcome: MessageOutcome, deleted: bool) -> MessageReport {
        MessageReport {
            message_id: "m".to_string(),
            outcome,
            deleted,
        }
    }

    #[test]
    fn test_classification() {
        let invalid = ProcessError::Invalid {
            rejection: Rejection {
                reason: RejectReason::InvalidGps,
                message: "Missing or invalid GPS data (latitude, longitude)",
            },
        };
        let outcome = MessageOutcome::from_error(&invalid);
        assert!(matches!(
            outcome,
            MessageOutcome::Rejected {
                reason: Reason::Invalid(RejectReason::InvalidGps),
                ..
            }
        ));
        assert_eq!(outcome.label(), "invalid_gps");
        assert!(outcome.should_delete());

        let timeout = ProcessError::Persist {
            source: TableError::TableTimeout {
                timeout: Duration::from_secs(1),
            },
        };
        let outcome = MessageOutcome::from_error(&timeout);
        assert_eq!(outcome.label(), "write_unavailable");
        assert!(!outcome.should_delete());

        let photo = ProcessError::Enrich {
            source: EnrichError::PhotoTimeout {
                key: "k".to_string(),
                timeout: Duration::from_secs(1),
            },
        };
        assert_eq!(
            MessageOutcome::from_error(&photo),
            MessageOutcome::Deferred {
                reason: Reason::StorageUnavailable,
                detail: photo.to_string()
            }
        );
    }

    #[test]
    fn test_batch_stats() {
        let mut stats = BatchStats {
            received: 4,
            ..BatchStats::default()
        };
        stats.record(&report(
            MessageOutcome::Persisted {
                kind: TelemetryKind::Gps,
            },
            true,
        ));
        stats.record(&report(
            MessageOutcome::Persisted {
                kind: TelemetryKind::Photo,
            },
            false,
        ));
        stats.record(&report(
            MessageOutcome::Deferred {
                reason: Reason::WriteUnavailable,
                detail: String::new(),
            },
            false,
        ));

        assert_eq!(stats.persisted, 2);
        assert_eq!(stats.deferred, 1);
        assert_eq!(stats.ack_failures, 1);
        assert_eq!(stats.completed(), 3);
        assert!(stats.made_progress());

        let mut total = BatchStats::default();
        total.merge(&stats);
        total.merge(&stats);
        assert_eq!(total.received, 8);
    }
}
