//! Queue backed by an object store prefix.
//!
//! Each message is one JSON object named `<utc-time>-<seq>-<uuid>.json`, so a
//! lexicographic listing returns messages in send order. The object path is
//! the delivery handle; deleting it acknowledges the message.
//!
//! A received message is leased for the visibility timeout. Leased messages
//! are skipped by later receives from this queue, so a message that keeps
//! failing cannot hold the head of the queue. Once the lease expires the
//! message is delivered again.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::TryStreamExt;
use object_store::path::Path;
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::ServiceConfig;
use crate::error::{
    QueueDeleteSnafu, QueueError, QueueHandleSnafu, QueueReceiveSnafu, QueueSendSnafu,
    QueueStorageSnafu,
};
use crate::storage::StorageProvider;

use super::{DeliveryHandle, Envelope, MessageQueue};

const MESSAGE_SUFFIX: &str = ".json";
const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(120);

pub struct ObjectStoreQueue {
    storage: StorageProvider,
    sequence: AtomicU64,
    visibility_timeout: Duration,
    /// Lease expiry per delivered message path.
    leases: Mutex<HashMap<Path, Instant>>,
}

impl ObjectStoreQueue {
    pub fn new(storage: StorageProvider) -> Self {
        Self {
            storage,
            sequence: AtomicU64::new(0),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Open the queue at a storage URL.
    pub async fn open(
        url: &str,
        service: &ServiceConfig,
        options: &HashMap<String, String>,
    ) -> Result<Self, QueueError> {
        let storage = StorageProvider::for_url_with_options(url, service, options)
            .await
            .context(QueueStorageSnafu)?;
        Ok(Self::new(storage))
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn storage(&self) -> &StorageProvider {
        &self.storage
    }

    /// Number of messages on the queue, leased or not.
    pub async fn pending(&self) -> Result<usize, QueueError> {
        Ok(self.message_paths().await?.len())
    }

    async fn message_paths(&self) -> Result<Vec<Path>, QueueError> {
        let mut paths: Vec<Path> = self
            .storage
            .list(false)
            .try_collect()
            .await
            .context(QueueReceiveSnafu)?;
        paths.retain(|path| path.as_ref().ends_with(MESSAGE_SUFFIX));
        paths.sort();
        Ok(paths)
    }
}

#[async_trait]
impl MessageQueue for ObjectStoreQueue {
    async fn receive(&self, max: usize) -> Result<Vec<Envelope>, QueueError> {
        let paths = self.message_paths().await?;

        let now = Instant::now();
        let mut leases = self.leases.lock().await;
        leases.retain(|_, expires| *expires > now);

        let mut envelopes = Vec::with_capacity(max.min(paths.len()));
        for path in paths {
            if envelopes.len() >= max {
                break;
            }
            if leases.contains_key(&path) {
                continue;
            }
            let body = match self.storage.get(path.clone()).await {
                Ok(body) => body,
                // Deleted by a concurrent consumer between list and get
                Err(e) if e.is_not_found() => continue,
                Err(source) => return Err(QueueError::QueueReceive { source }),
            };

            let message_id = path
                .filename()
                .and_then(|name| name.strip_suffix(MESSAGE_SUFFIX))
                .unwrap_or_default()
                .to_string();

            envelopes.push(Envelope {
                message_id,
                body,
                handle: DeliveryHandle::new(path.as_ref()),
            });
            leases.insert(path, now + self.visibility_timeout);
        }

        debug!(
            count = envelopes.len(),
            leased = leases.len(),
            "Received messages"
        );
        Ok(envelopes)
    }

    async fn delete(&self, handle: DeliveryHandle) -> Result<(), QueueError> {
        // The handle holds the already encoded path
        let path = Path::parse(handle.as_str()).context(QueueHandleSnafu {
            handle: handle.as_str(),
        })?;

        match self.storage.delete(path.clone()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(source) => {
                return Err(source).context(QueueDeleteSnafu {
                    handle: handle.as_str(),
                });
            }
        }

        self.leases.lock().await.remove(&path);
        Ok(())
    }

    async fn send(&self, body: Bytes) -> Result<String, QueueError> {
        // The sequence keeps sends from this process ordered within one clock tick
        let message_id = format!(
            "{}-{:06}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%.6fZ"),
            self.sequence.fetch_add(1, Ordering::Relaxed),
            uuid::Uuid::new_v4()
        );
        let path = format!("{message_id}{MESSAGE_SUFFIX}");
        self.storage
            .put(path.as_str(), body)
            .await
            .context(QueueSendSnafu)?;
        Ok(message_id)
    }
}
