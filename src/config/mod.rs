//! Configuration loading and validation.
//!
//! The whole configuration is read once at startup from a YAML file (with
//! environment variable interpolation) and handed to the components that
//! need it. Nothing in the pipeline reads the environment afterwards.

mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{
    ConfigError, EmptyPhotoUrlSnafu, EmptyQueueUrlSnafu, EmptyTableNameSnafu, EmptyTableUrlSnafu,
    EnvInterpolationSnafu, InvalidThresholdSnafu, ReadFileSnafu, YamlParseSnafu, ZeroSettingSnafu,
};

pub use vars::{interpolate, interpolate_with};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Settings shared by every cloud client.
    #[serde(default)]
    pub service: ServiceConfig,
    pub queue: QueueConfig,
    pub table: TableConfig,
    pub photos: PhotoConfig,
    /// Dead letter handling (optional).
    #[serde(default)]
    pub error_handling: ErrorHandlingConfig,
    /// Metrics configuration (optional, enabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// HTTP ingestion endpoint (optional, disabled by default).
    #[serde(default)]
    pub api: ApiConfig,
}

/// Region and endpoint applied to every client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Cloud region, e.g. `us-east-1`.
    #[serde(default)]
    pub region: Option<String>,
    /// Endpoint override that redirects every client (LocalStack, MinIO).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Allow plain HTTP to the endpoint.
    #[serde(default)]
    pub allow_http: bool,
    /// Send unsigned requests (anonymous local stacks).
    #[serde(default)]
    pub skip_signature: bool,
}

/// Queue consumer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Storage URL of the queue prefix, e.g. `s3://fleet-queue/incoming`.
    pub url: String,
    /// Maximum messages received per poll (default: 10).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Messages processed concurrently within a batch (default: 4).
    #[serde(default = "default_max_concurrent_messages")]
    pub max_concurrent_messages: usize,
    /// Seconds to wait after an empty poll (default: 5).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Upper bound on one batch; unfinished messages stay on the queue (default: 60).
    #[serde(default = "default_batch_deadline_secs")]
    pub batch_deadline_secs: u64,
    /// Timeout applied to each external call (default: 10).
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Seconds a received message stays hidden from later receives (default: 120).
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

fn default_batch_size() -> usize {
    10
}

fn default_max_concurrent_messages() -> usize {
    4
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_batch_deadline_secs() -> u64 {
    60
}

fn default_call_timeout_secs() -> u64 {
    10
}

fn default_visibility_timeout_secs() -> u64 {
    120
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn batch_deadline(&self) -> Duration {
        Duration::from_secs(self.batch_deadline_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

/// Item table settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Storage URL under which the table lives.
    pub url: String,
    /// Table name (default: `fleet-telemetry`).
    #[serde(default = "default_table_name")]
    pub name: String,
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

fn default_table_name() -> String {
    "fleet-telemetry".to_string()
}

/// Photo storage and face matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoConfig {
    /// Bucket URL for decoded photos, e.g. `s3://my-test-bucket`.
    pub url: String,
    /// Minimum similarity (0-100) for a face match to count (default: 70).
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Store of enrolled reference images, keyed `{device_id}.jpg`.
    #[serde(default)]
    pub reference_url: Option<String>,
    /// HTTP face-matching service. Recognition is off when unset.
    #[serde(default)]
    pub face_match_endpoint: Option<String>,
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

fn default_similarity_threshold() -> f32 {
    70.0
}

/// Error handling configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    /// Where rejected messages are written as NDJSON (DLQ disabled when unset).
    #[serde(default)]
    pub dlq_path: Option<String>,
    /// Storage options for DLQ (credentials, region, etc.)
    #[serde(default)]
    pub dlq_storage_options: HashMap<String, String>,
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

/// HTTP ingestion endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind (default: "0.0.0.0:8080").
    #[serde(default = "default_api_address")]
    pub address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_api_address(),
        }
    }
}

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        let content = vars::interpolate(&content).map_err(|errors| {
            EnvInterpolationSnafu {
                message: errors.join("\n"),
            }
            .build()
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text (no interpolation).
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.queue.url.is_empty(), EmptyQueueUrlSnafu);
        ensure!(!self.table.url.is_empty(), EmptyTableUrlSnafu);
        ensure!(!self.table.name.is_empty(), EmptyTableNameSnafu);
        ensure!(!self.photos.url.is_empty(), EmptyPhotoUrlSnafu);

        for (field, value) in [
            ("queue.batch_size", self.queue.batch_size as u64),
            (
                "queue.max_concurrent_messages",
                self.queue.max_concurrent_messages as u64,
            ),
            ("queue.batch_deadline_secs", self.queue.batch_deadline_secs),
            ("queue.call_timeout_secs", self.queue.call_timeout_secs),
            (
                "queue.visibility_timeout_secs",
                self.queue.visibility_timeout_secs,
            ),
        ] {
            ensure!(value > 0, ZeroSettingSnafu { field });
        }

        let threshold = self.photos.similarity_threshold;
        ensure!(
            (0.0..=100.0).contains(&threshold),
            InvalidThresholdSnafu { value: threshold }
        );
        Ok(())
    }
}
