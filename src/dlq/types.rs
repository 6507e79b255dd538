//! DLQ record and statistics types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A queue message that was deleted without being persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedMessage {
    /// Queue-assigned message id.
    pub message_id: String,
    /// Reason code, e.g. `missing_identity` or `decode_error`.
    pub reason: String,
    /// Human-readable detail.
    pub detail: String,
    /// Raw message body, lossily decoded as UTF-8.
    pub body: String,
    /// When the rejection was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Rejection counts keyed by reason code.
#[derive(Debug, Clone, Default)]
pub struct RejectionStats {
    by_reason: BTreeMap<String, usize>,
}

impl RejectionStats {
    pub fn increment(&mut self, reason: &str) {
        *self.by_reason.entry(reason.to_string()).or_default() += 1;
    }

    pub fn get(&self, reason: &str) -> usize {
        self.by_reason.get(reason).copied().unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.by_reason.values().sum()
    }
}

impl std::fmt::Display for RejectionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .by_reason
            .iter()
            .map(|(reason, count)| format!("{reason}={count}"))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_stats() {
        let mut stats = RejectionStats::default();
        stats.increment("invalid_gps");
        stats.increment("invalid_gps");
        stats.increment("malformed");

        assert_eq!(stats.get("invalid_gps"), 2);
        assert_eq!(stats.get("unknown_kind"), 0);
        assert_eq!(stats.total(), 3);
        assert_eq!(stats.to_string(), "invalid_gps=2, malformed=1");
    }

    #[test]
    fn test_rejected_message_deserialization() {
        let json = r#"{"message_id":"m-1","reason":"missing_identity","detail":"Missing timestamp","body":"{}","timestamp":"2025-05-16T12:00:00Z"}"#;
        let rejected: RejectedMessage = serde_json::from_str(json).unwrap();

        assert_eq!(rejected.message_id, "m-1");
        assert_eq!(rejected.reason, "missing_identity");
        assert_eq!(rejected.body, "{}");
    }
}
