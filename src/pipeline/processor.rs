//! Validate, enrich and persist a single record.
//!
//! Shared by the queue consumer and the HTTP endpoint.

use snafu::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::emit;
use crate::enrich::PhotoEnricher;
use crate::error::{EnrichSnafu, PersistSnafu, ProcessError, TableError};
use crate::metrics::events::{Stage, StageCompleted};
use crate::record::{Reading, TelemetryData, TelemetryRecord};
use crate::table::{ItemAttributes, PersistedItem, TelemetryTable};
use crate::validate::validate;

pub struct RecordProcessor {
    table: Arc<dyn TelemetryTable>,
    enricher: PhotoEnricher,
    call_timeout: Duration,
}

impl RecordProcessor {
    pub fn new(table: Arc<dyn TelemetryTable>, enricher: PhotoEnricher) -> Self {
        Self {
            table,
            enricher,
            call_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Run one payload through validation, enrichment and persistence.
    ///
    /// Nothing is written unless validation passes for `declared_kind`.
    pub async fn process(
        &self,
        declared_kind: &str,
        data: &TelemetryData,
    ) -> Result<PersistedItem, ProcessError> {
        let record =
            validate(data, declared_kind).map_err(|rejection| ProcessError::Invalid { rejection })?;

        let item = PersistedItem {
            attributes: self.attributes(&record).await?,
            device_id: record.device_id,
            timestamp: record.timestamp,
        };

        let start = Instant::now();
        match tokio::time::timeout(self.call_timeout, self.table.put_item(&item)).await {
            Ok(result) => result.context(PersistSnafu)?,
            Err(_) => {
                return Err(ProcessError::Persist {
                    source: TableError::TableTimeout {
                        timeout: self.call_timeout,
                    },
                });
            }
        }
        emit!(StageCompleted {
            stage: Stage::Persist,
            duration: start.elapsed(),
        });
        debug!(device_id = %item.device_id, kind = %item.kind(), "Item persisted");

        Ok(item)
    }

    async fn attributes(&self, record: &TelemetryRecord) -> Result<ItemAttributes, ProcessError> {
        Ok(match &record.reading {
            Reading::Gyroscope { x, y, z } => ItemAttributes::Gyroscope {
                x: *x,
                y: *y,
                z: *z,
            },
            Reading::Gps {
                latitude,
                longitude,
            } => ItemAttributes::Gps {
                latitude: *latitude,
                longitude: *longitude,
            },
            Reading::Photo { image } => {
                let start = Instant::now();
                let enrichment = self
                    .enricher
                    .enrich(&record.device_id, &record.timestamp, image)
                    .await
                    .context(EnrichSnafu)?;
                emit!(StageCompleted {
                    stage: Stage::Enrich,
                    duration: start.elapsed(),
                });
                ItemAttributes::Photo {
                    s3_key: enrichment.storage_key,
                    is_recognized: enrichment.is_recognized,
                }
            }
        })
    }
}
