//! Queue consumer pipeline.
//!
//! Each poll iteration receives a bounded batch, runs every message through
//! [`RecordProcessor`] concurrently, and deletes exactly the messages that
//! were persisted or permanently rejected. Everything else stays on the
//! queue and is redelivered; per-message failures never abort the batch.
//!
//! # Shutdown
//!
//! A [`CancellationToken`] and a per-batch deadline bound every iteration.
//! Messages still in flight when either fires are dropped without being
//! deleted, which is safe because persistence is an idempotent upsert.

mod outcome;
mod processor;
mod signal;

use futures::stream::{self, StreamExt};
use snafu::prelude::*;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, QueueConfig};
use crate::dlq::DeadLetterQueue;
use crate::emit;
use crate::enrich::{
    DisabledFaceMatcher, FaceMatcher, HttpFaceMatcher, NoReferences, PhotoEnricher,
    ReferenceImages, StorageReferences,
};
use crate::error::{
    AddressParseSnafu, DlqSnafu, HttpClientSnafu, PipelineError, PipelineStorageSnafu, QueueError,
    QueueSnafu, TableSnafu,
};
use crate::metrics::events::{
    AckFailed, BatchCompleted, InFlightMessages, MessageProcessed, MessagesReceived, Stage,
    StageCompleted,
};
use crate::queue::{DeliveryHandle, Envelope, MessageQueue, ObjectStoreQueue};
use crate::record::QueueMessage;
use crate::storage::StorageProvider;
use crate::table::StorageTable;

pub use outcome::{BatchStats, MessageOutcome, MessageReport, Reason};
pub use processor::RecordProcessor;

/// Limits applied to each poll iteration.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub batch_size: usize,
    pub max_concurrent_messages: usize,
    pub poll_interval: Duration,
    pub batch_deadline: Duration,
    pub call_timeout: Duration,
}

impl From<&QueueConfig> for ConsumerSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_concurrent_messages: config.max_concurrent_messages,
            poll_interval: config.poll_interval(),
            batch_deadline: config.batch_deadline(),
            call_timeout: config.call_timeout(),
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_concurrent_messages: 4,
            poll_interval: Duration::from_secs(5),
            batch_deadline: Duration::from_secs(60),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of a single poll iteration.
enum IterationResult {
    /// At least one message left the queue.
    ProcessedMessages,
    /// The queue was empty or nothing could be completed.
    NoMessages,
    /// Shutdown was requested.
    Shutdown,
}

/// Keeps the in-flight gauge accurate even when a message future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
        emit!(InFlightMessages { count });
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let count = self.0.fetch_sub(1, Ordering::Relaxed) - 1;
        emit!(InFlightMessages { count });
    }
}

pub struct QueueConsumer {
    queue: Arc<dyn MessageQueue>,
    processor: Arc<RecordProcessor>,
    dlq: Option<Arc<DeadLetterQueue>>,
    settings: ConsumerSettings,
    in_flight: AtomicUsize,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        processor: Arc<RecordProcessor>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            queue,
            processor,
            dlq: None,
            settings,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Record rejected messages in a dead letter log.
    pub fn with_dlq(mut self, dlq: Arc<DeadLetterQueue>) -> Self {
        self.dlq = Some(dlq);
        self
    }

    /// Receive and process one batch.
    ///
    /// Only a failed receive is an error. Unfinished messages are counted as
    /// `abandoned` and left on the queue.
    pub async fn process_batch(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<BatchStats, QueueError> {
        let start = Instant::now();

        let envelopes = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(BatchStats::default()),
            result = self.queue.receive(self.settings.batch_size) => result?,
        };

        let mut stats = BatchStats {
            received: envelopes.len(),
            ..BatchStats::default()
        };
        if envelopes.is_empty() {
            return Ok(stats);
        }
        emit!(MessagesReceived {
            count: envelopes.len()
        });
        debug!(count = envelopes.len(), "Received batch");

        let deadline = tokio::time::sleep(self.settings.batch_deadline);
        tokio::pin!(deadline);

        let mut reports = stream::iter(envelopes)
            .map(|envelope| self.handle_message(envelope))
            .buffer_unordered(self.settings.max_concurrent_messages);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, leaving unfinished messages on the queue");
                    break;
                }

                _ = &mut deadline => {
                    warn!(
                        deadline_secs = self.settings.batch_deadline.as_secs(),
                        "Batch deadline reached, leaving unfinished messages on the queue"
                    );
                    break;
                }

                report = reports.next() => match report {
                    Some(report) => stats.record(&report),
                    None => break,
                },
            }
        }
        drop(reports);

        stats.abandoned = stats.received - stats.completed();

        if let Some(dlq) = &self.dlq
            && let Err(e) = dlq.flush().await
        {
            error!("Failed to flush DLQ: {}", e);
        }

        emit!(BatchCompleted {
            duration: start.elapsed()
        });
        info!(
            received = stats.received,
            persisted = stats.persisted,
            rejected = stats.rejected,
            deferred = stats.deferred,
            ack_failures = stats.ack_failures,
            abandoned = stats.abandoned,
            "Batch complete"
        );

        Ok(stats)
    }

    /// Poll until `shutdown` is cancelled, returning totals over the run.
    ///
    /// Polls again immediately while batches make progress and sleeps for
    /// the poll interval otherwise.
    pub async fn run(&self, shutdown: &CancellationToken) -> BatchStats {
        info!("Starting queue consumer");
        let poll_interval = self.settings.poll_interval;
        let mut totals = BatchStats::default();

        loop {
            let result = match self.process_batch(shutdown).await {
                Ok(stats) => {
                    totals.merge(&stats);
                    if shutdown.is_cancelled() {
                        IterationResult::Shutdown
                    } else if stats.made_progress() {
                        IterationResult::ProcessedMessages
                    } else {
                        IterationResult::NoMessages
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to receive messages");
                    IterationResult::NoMessages
                }
            };

            match result {
                IterationResult::Shutdown => break,
                IterationResult::ProcessedMessages => continue,
                IterationResult::NoMessages => {
                    debug!(
                        "Nothing to do, waiting {}s before next poll",
                        poll_interval.as_secs()
                    );
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested during poll wait");
                    break;
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        info!("Queue consumer stopped: {:?}", totals);
        totals
    }

    async fn handle_message(&self, envelope: Envelope) -> MessageReport {
        let _in_flight = InFlight::enter(&self.in_flight);
        let Envelope {
            message_id,
            body,
            handle,
        } = envelope;

        let outcome = match QueueMessage::decode(&body) {
            Err(e) => MessageOutcome::Rejected {
                reason: Reason::Malformed,
                detail: e.to_string(),
            },
            Ok(message) => {
                let device_id = message.data.device_id.as_str();
                let kind = message.kind.as_str();
                match self.processor.process(kind, &message.data).await {
                    Ok(item) => {
                        debug!(%message_id, device_id, kind, "Message persisted");
                        MessageOutcome::Persisted { kind: item.kind() }
                    }
                    Err(e) => {
                        let outcome = MessageOutcome::from_error(&e);
                        warn!(
                            %message_id,
                            device_id,
                            kind,
                            outcome = outcome.as_str(),
                            reason = outcome.label(),
                            error = %e,
                            "Message not persisted"
                        );
                        outcome
                    }
                }
            }
        };

        if let MessageOutcome::Rejected { reason, detail } = &outcome {
            if *reason == Reason::Malformed {
                warn!(%message_id, reason = reason.as_str(), "Malformed message body: {}", detail);
            }
            if let Some(dlq) = &self.dlq {
                dlq.record(&message_id, reason.as_str(), detail, &body).await;
            }
        }

        emit!(MessageProcessed {
            outcome: outcome.as_str(),
            label: outcome.label(),
        });

        let deleted = if outcome.should_delete() {
            self.acknowledge(&message_id, handle).await
        } else {
            false
        };

        MessageReport {
            message_id,
            outcome,
            deleted,
        }
    }

    /// Delete a delivery. A failure is logged; the message will come back.
    async fn acknowledge(&self, message_id: &str, handle: DeliveryHandle) -> bool {
        let start = Instant::now();
        let timeout = self.settings.call_timeout;
        let result = match tokio::time::timeout(timeout, self.queue.delete(handle)).await {
            Ok(result) => result,
            Err(_) => Err(QueueError::DeleteTimeout { timeout }),
        };

        match result {
            Ok(()) => {
                emit!(StageCompleted {
                    stage: Stage::Ack,
                    duration: start.elapsed(),
                });
                true
            }
            Err(e) => {
                warn!(message_id, error = %e, "Failed to delete message, it will be redelivered");
                emit!(AckFailed);
                false
            }
        }
    }
}

/// Clients built once from configuration and shared by every message.
pub struct Pipeline {
    consumer: QueueConsumer,
    processor: Arc<RecordProcessor>,
    dlq: Option<Arc<DeadLetterQueue>>,
}

impl Pipeline {
    /// Construct every client. Fails only on setup errors.
    pub async fn new(config: &Config) -> Result<Self, PipelineError> {
        let service = &config.service;
        let call_timeout = config.queue.call_timeout();

        let queue =
            ObjectStoreQueue::open(&config.queue.url, service, &config.queue.storage_options)
                .await
                .context(QueueSnafu)?
                .with_visibility_timeout(config.queue.visibility_timeout());
        info!("Queue: {}", queue.storage().canonical_url());

        let table = StorageTable::open(
            &config.table.url,
            &config.table.name,
            service,
            &config.table.storage_options,
        )
        .await
        .context(TableSnafu)?;

        let photos = StorageProvider::for_url_with_options(
            &config.photos.url,
            service,
            &config.photos.storage_options,
        )
        .await
        .context(PipelineStorageSnafu)?;
        info!("Photos: {}", photos.canonical_url());

        let references: Arc<dyn ReferenceImages> = match &config.photos.reference_url {
            Some(url) => {
                let storage = StorageProvider::for_url_with_options(
                    url,
                    service,
                    &config.photos.storage_options,
                )
                .await
                .context(PipelineStorageSnafu)?;
                info!("Reference images: {}", storage.canonical_url());
                Arc::new(StorageReferences::new(storage))
            }
            None => Arc::new(NoReferences),
        };

        let matcher: Arc<dyn FaceMatcher> = match &config.photos.face_match_endpoint {
            Some(endpoint) => {
                info!("Face matching via {}", endpoint);
                let matcher = HttpFaceMatcher::new(endpoint.as_str(), call_timeout)
                    .context(HttpClientSnafu)?;
                Arc::new(matcher)
            }
            None => {
                info!("Face matching disabled, photos are stored unrecognized");
                Arc::new(DisabledFaceMatcher)
            }
        };

        let enricher = PhotoEnricher::new(Arc::new(photos), references, matcher)
            .with_similarity_threshold(config.photos.similarity_threshold)
            .with_call_timeout(call_timeout);
        let processor = Arc::new(
            RecordProcessor::new(Arc::new(table), enricher).with_call_timeout(call_timeout),
        );

        let dlq = DeadLetterQueue::from_config(&config.error_handling, service)
            .await
            .context(DlqSnafu)?
            .map(Arc::new);

        let mut consumer = QueueConsumer::new(
            Arc::new(queue),
            processor.clone(),
            ConsumerSettings::from(&config.queue),
        );
        if let Some(dlq) = &dlq {
            consumer = consumer.with_dlq(dlq.clone());
        }

        Ok(Self {
            consumer,
            processor,
            dlq,
        })
    }

    pub fn consumer(&self) -> &QueueConsumer {
        &self.consumer
    }

    pub fn processor(&self) -> Arc<RecordProcessor> {
        self.processor.clone()
    }
}

/// Spawn the signal handler and return the token it cancels.
pub fn spawn_signal_handler() -> CancellationToken {
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match signal::shutdown_signal().await {
                Ok(()) => shutdown.cancel(),
                Err(e) => error!("Failed to install signal handlers: {}", e),
            }
        }
    });
    shutdown
}

/// Run the pipeline until `shutdown` is cancelled, or for a single batch
/// when `once` is set.
pub async fn run_pipeline(
    config: Config,
    once: bool,
    shutdown: CancellationToken,
) -> Result<BatchStats, PipelineError> {
    let pipeline = Pipeline::new(&config).await?;

    if config.api.enabled {
        let addr: SocketAddr = config.api.address.parse().context(AddressParseSnafu)?;
        crate::api::serve(addr, pipeline.processor(), shutdown.clone()).await?;
    }

    let stats = if once {
        pipeline
            .consumer()
            .process_batch(&shutdown)
            .await
            .context(QueueSnafu)?
    } else {
        pipeline.consumer().run(&shutdown).await
    };

    if let Some(dlq) = &pipeline.dlq
        && let Err(e) = dlq.finalize().await
    {
        error!("Failed to finalize DLQ: {}", e);
    }

    Ok(stats)
}
