//! Message queue capability.
//!
//! The consumer only needs three operations from a queue: receive a bounded
//! batch, delete a delivery, and (for the publish side) send a body. Delivery
//! is at-least-once: a message that is never deleted will be seen again.

mod storage;

use async_trait::async_trait;
use bytes::Bytes;
use snafu::prelude::*;

use crate::error::{QueueEncodeSnafu, QueueError};
use crate::record::{QueueMessage, TelemetryRecord};

pub use storage::ObjectStoreQueue;

/// Opaque token that deletes one specific delivery.
///
/// Consumed by [`MessageQueue::delete`], so a handle is redeemed at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct DeliveryHandle(String);

impl DeliveryHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One delivered message.
#[derive(Debug)]
pub struct Envelope {
    pub message_id: String,
    pub body: Bytes,
    pub handle: DeliveryHandle,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Receive up to `max` messages. An empty vector means the queue is idle.
    async fn receive(&self, max: usize) -> Result<Vec<Envelope>, QueueError>;

    /// Delete a delivery. Deleting an already removed message succeeds.
    async fn delete(&self, handle: DeliveryHandle) -> Result<(), QueueError>;

    /// Publish a raw body, returning the new message id.
    async fn send(&self, body: Bytes) -> Result<String, QueueError>;
}

/// Publish a validated record in the queue wire format.
pub async fn publish(
    queue: &dyn MessageQueue,
    record: &TelemetryRecord,
) -> Result<String, QueueError> {
    let body = QueueMessage::from(record).encode().context(QueueEncodeSnafu)?;
    queue.send(Bytes::from(body)).await
}
