//! Dead letter log writer.
//!
//! Buffers rejected messages and writes them as NDJSON part files. Each
//! flush produces a new object so earlier parts are never overwritten.

use chrono::Utc;
use snafu::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::{ErrorHandlingConfig, ServiceConfig};
use crate::emit;
use crate::error::{DlqError, DlqSerializeSnafu, DlqStorageSnafu, DlqWriteSnafu};
use crate::metrics::events::DlqRecordsWritten;
use crate::storage::StorageProvider;

use super::types::{RejectedMessage, RejectionStats};

const DEFAULT_BUFFER_SIZE: usize = 100;

/// Records messages that were deleted from the queue without persistence.
pub struct DeadLetterQueue {
    storage: StorageProvider,
    run_id: String,
    part: AtomicUsize,
    buffer: Mutex<Vec<RejectedMessage>>,
    stats: Mutex<RejectionStats>,
    buffer_size: usize,
}

impl DeadLetterQueue {
    /// Create a DLQ from configuration.
    ///
    /// Returns `None` if no DLQ path is configured.
    pub async fn from_config(
        config: &ErrorHandlingConfig,
        service: &ServiceConfig,
    ) -> Result<Option<Self>, DlqError> {
        let Some(dlq_path) = &config.dlq_path else {
            return Ok(None);
        };

        let storage =
            StorageProvider::for_url_with_options(dlq_path, service, &config.dlq_storage_options)
                .await
                .context(DlqStorageSnafu)?;

        info!("DLQ enabled: {}", storage.canonical_url());
        Ok(Some(Self::new(storage)))
    }

    /// Create a DLQ writing into `storage`.
    pub fn new(storage: StorageProvider) -> Self {
        Self {
            storage,
            run_id: Utc::now().format("%Y%m%d-%H%M%S").to_string(),
            part: AtomicUsize::new(0),
            buffer: Mutex::new(Vec::new()),
            stats: Mutex::new(RejectionStats::default()),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Record a rejected message.
    pub async fn record(&self, message_id: &str, reason: &str, detail: &str, body: &[u8]) {
        let rejected = RejectedMessage {
            message_id: message_id.to_string(),
            reason: reason.to_string(),
            detail: detail.to_string(),
            body: String::from_utf8_lossy(body).into_owned(),
            timestamp: Utc::now(),
        };

        debug!(message_id, reason, "Recording DLQ entry");

        self.stats.lock().await.increment(reason);

        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(rejected);
            buffer.len() >= self.buffer_size
        };

        if should_flush && let Err(e) = self.flush().await {
            error!("Failed to flush DLQ: {}", e);
        }
    }

    /// Write buffered records as a new part file.
    pub async fn flush(&self) -> Result<(), DlqError> {
        let records = {
            let mut buffer = self.buffer.lock().await;
            if buffer.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *buffer)
        };

        let mut ndjson = String::new();
        for record in &records {
            let line = serde_json::to_string(record).context(DlqSerializeSnafu)?;
            ndjson.push_str(&line);
            ndjson.push('\n');
        }

        let part = self.part.fetch_add(1, Ordering::Relaxed);
        let filename = format!("rejected-{}-{:05}.ndjson", self.run_id, part);
        if let Err(source) = self.storage.put(filename.as_str(), ndjson).await {
            // Keep the records for the next flush, ahead of anything recorded since
            let mut buffer = self.buffer.lock().await;
            buffer.splice(0..0, records);
            return Err(source).context(DlqWriteSnafu);
        }

        emit!(DlqRecordsWritten {
            count: records.len()
        });
        info!("Flushed {} records to DLQ ({})", records.len(), filename);
        Ok(())
    }

    /// Rejection counts recorded so far.
    pub async fn stats(&self) -> RejectionStats {
        self.stats.lock().await.clone()
    }

    /// Flush remaining records and log the totals.
    pub async fn finalize(&self) -> Result<(), DlqError> {
        self.flush().await?;
        let stats = self.stats.lock().await;
        info!(
            "DLQ finalized: {} rejected messages ({})",
            stats.total(),
            *stats
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use object_store::path::Path;
    use std::collections::HashMap;
    use tempfile::TempDir;

    async fn read_parts(storage: &StorageProvider) -> Vec<String> {
        let mut paths: Vec<Path> = storage.list(true).try_collect().await.unwrap();
        paths.sort();
        let mut contents = Vec::new();
        for path in paths {
            let bytes = storage.get(path).await.unwrap();
            contents.push(String::from_utf8(bytes.to_vec()).unwrap());
        }
        contents
    }

    #[tokio::test]
    async fn test_dlq_from_config_none_when_no_path() {
        let dlq =
            DeadLetterQueue::from_config(&ErrorHandlingConfig::default(), &ServiceConfig::default())
                .await
                .unwrap();
        assert!(dlq.is_none());
    }

    #[tokio::test]
    async fn test_dlq_writes_ndjson_to_local_path() {
        let temp_dir = TempDir::new().unwrap();
        let config = ErrorHandlingConfig {
            dlq_path: Some(temp_dir.path().to_str().unwrap().to_string()),
            dlq_storage_options: HashMap::new(),
        };

        let dlq = DeadLetterQueue::from_config(&config, &ServiceConfig::default())
            .await
            .unwrap()
            .unwrap();

        dlq.record("m-1", "malformed", "expected value at line 1", b"not json")
            .await;
        dlq.record("m-2", "missing_identity", "Missing timestamp", br#"{"type":"gps"}"#)
            .await;
        dlq.finalize().await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);

        let content = std::fs::read_to_string(entries[0].path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: RejectedMessage = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.message_id, "m-1");
        assert_eq!(first.body, "not json");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["reason"], "missing_identity");
    }

    #[tokio::test]
    async fn test_each_flush_writes_a_new_part() {
        let storage = StorageProvider::in_memory();
        let dlq = DeadLetterQueue::new(storage.clone());

        dlq.record("m-1", "invalid_gps", "Missing or invalid GPS data", b"{}")
            .await;
        dlq.flush().await.unwrap();
        dlq.record("m-2", "invalid_gps", "Missing or invalid GPS data", b"{}")
            .await;
        dlq.flush().await.unwrap();
        dlq.flush().await.unwrap();

        let parts = read_parts(&storage).await;
        assert_eq!(parts.len(), 2);
        assert!(parts[0].contains("m-1"));
        assert!(parts[1].contains("m-2"));

        let stats = dlq.stats().await;
        assert_eq!(stats.get("invalid_gps"), 2);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_records() {
        let temp_dir = TempDir::new().unwrap();
        let dlq_dir = temp_dir.path().join("dlq");
        let url = dlq_dir.to_str().unwrap().to_string();
        let storage = StorageProvider::for_url(&url, &ServiceConfig::default())
            .await
            .unwrap();
        let dlq = DeadLetterQueue::new(storage.clone());

        // A plain file where the directory should be makes every write fail
        std::fs::remove_dir_all(&dlq_dir).unwrap();
        std::fs::write(&dlq_dir, b"").unwrap();

        dlq.record("m-1", "malformed", "", b"x").await;
        assert!(dlq.flush().await.is_err());
        dlq.record("m-2", "malformed", "", b"y").await;

        std::fs::remove_file(&dlq_dir).unwrap();
        std::fs::create_dir(&dlq_dir).unwrap();
        dlq.flush().await.unwrap();

        let parts = read_parts(&storage).await;
        assert_eq!(parts.len(), 1);
        let ids: Vec<String> = parts[0]
            .lines()
            .map(|line| serde_json::from_str::<RejectedMessage>(line).unwrap().message_id)
            .collect();
        assert_eq!(ids, vec!["m-1", "m-2"]);
    }

    #[tokio::test]
    async fn test_buffer_flushes_when_full() {
        let storage = StorageProvider::in_memory();
        let mut dlq = DeadLetterQueue::new(storage.clone());
        dlq.buffer_size = 2;

        dlq.record("m-1", "malformed", "", b"x").await;
        assert!(read_parts(&storage).await.is_empty());

        dlq.record("m-2", "malformed", "", b"y").await;
        let parts = read_parts(&storage).await;
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].lines().count(), 2);
    }
}
