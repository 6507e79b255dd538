//! Dead letter log for rejected messages.
//!
//! Messages the pipeline deletes without persisting (malformed bodies,
//! validation failures, undecodable photos) are written as NDJSON to a
//! configurable storage location for later inspection and replay.

mod queue;
mod types;

pub use queue::DeadLetterQueue;
pub use types::{RejectedMessage, RejectionStats};
