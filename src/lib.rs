//! fleet-pulse: ingestion pipeline for vehicle fleet telemetry.
//!
//! Devices publish gyroscope, GPS and photo readings to a message queue. The
//! pipeline validates each message, stores photos and flags recognized faces,
//! upserts the record into a table keyed by `(device_id, timestamp)`, and
//! deletes the message only once it is persisted or permanently rejected.
//! The same processing is exposed over HTTP.
//!
//! # Example
//!
//! ```ignore
//! use fleet_pulse::error::{ConfigSnafu, PipelineError};
//! use fleet_pulse::{Config, run_pipeline, spawn_signal_handler};
//! use snafu::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("config.yaml").context(ConfigSnafu)?;
//!     let stats = run_pipeline(config, false, spawn_signal_handler()).await?;
//!     println!("Persisted {} messages", stats.persisted);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod dlq;
pub mod enrich;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod record;
pub mod storage;
pub mod table;
pub mod validate;

// Re-export main types
pub use config::Config;
pub use pipeline::{BatchStats, Pipeline, RecordProcessor, run_pipeline, spawn_signal_handler};
pub use storage::StorageProvider;
