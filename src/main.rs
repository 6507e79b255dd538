//! fleet-pulse: consume telemetry from a queue and persist it.
//!
//! Runs as a long-lived poller, or processes a single batch with `--once`
//! for scheduled invocations.

use clap::Parser;
use fleet_pulse::error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError};
use fleet_pulse::{Config, metrics, run_pipeline, spawn_signal_handler};
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Fleet telemetry ingestion pipeline.
#[derive(Parser, Debug)]
#[command(name = "fleet-pulse")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Process a single batch and exit.
    #[arg(long)]
    once: bool,

    /// Dry run - validate configuration without processing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("fleet-pulse starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Queue: {}", config.queue.url);
        info!("Table: {} ({})", config.table.name, config.table.url);
        info!("Photos: {}", config.photos.url);
        info!(
            "Face matching: {}",
            config
                .photos
                .face_match_endpoint
                .as_deref()
                .unwrap_or("disabled")
        );
        if let Some(endpoint) = &config.service.endpoint {
            info!("Service endpoint override: {}", endpoint);
        }
        info!("Configuration is valid");
        return Ok(());
    }

    let shutdown = spawn_signal_handler();

    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr, shutdown.clone())
            .await
            .context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    let stats = run_pipeline(config, args.once, shutdown).await?;

    info!("Pipeline completed successfully");
    info!("  Messages received: {}", stats.received);
    info!("  Persisted: {}", stats.persisted);
    info!("  Rejected: {}", stats.rejected);
    info!("  Deferred: {}", stats.deferred);
    info!("  Ack failures: {}", stats.ack_failures);
    info!("  Abandoned: {}", stats.abandoned);

    Ok(())
}
