//! Per-kind validation of untrusted telemetry payloads.
//!
//! [`validate`] is pure: no I/O, no clock, no allocation beyond the accepted
//! record. Checks run in a fixed order so the reported reason is stable for
//! payloads with more than one problem.

use std::fmt;

use crate::record::{Reading, TelemetryData, TelemetryKind, TelemetryRecord};

/// Closed set of validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    MissingIdentity,
    UnknownKind,
    InvalidGyroscope,
    InvalidGps,
    InvalidPhoto,
}

impl RejectReason {
    /// Stable code used in logs, metric labels and API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingIdentity => "missing_identity",
            RejectReason::UnknownKind => "unknown_kind",
            RejectReason::InvalidGyroscope => "invalid_gyroscope",
            RejectReason::InvalidGps => "invalid_gps",
            RejectReason::InvalidPhoto => "invalid_photo",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validation failure with a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: &'static str,
}

impl Rejection {
    fn new(reason: RejectReason, message: &'static str) -> Self {
        Self { reason, message }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.reason)
    }
}

/// Validate `data` against the kind it was declared as.
///
/// Absent numeric fields count as zero, so an all-zero gyroscope or GPS
/// reading is rejected the same way as one with missing fields.
pub fn validate(data: &TelemetryData, declared_kind: &str) -> Result<TelemetryRecord, Rejection> {
    if data.device_id.is_empty() {
        return Err(Rejection::new(RejectReason::MissingIdentity, "Missing device_id"));
    }
    if data.timestamp.is_empty() {
        return Err(Rejection::new(RejectReason::MissingIdentity, "Missing timestamp"));
    }

    let kind: TelemetryKind = declared_kind.parse().map_err(|_| {
        Rejection::new(
            RejectReason::UnknownKind,
            "Invalid data type. Use gyroscope, gps, or photo",
        )
    })?;

    let reading = match kind {
        TelemetryKind::Gyroscope => {
            let (x, y, z) = (
                data.x.unwrap_or(0.0),
                data.y.unwrap_or(0.0),
                data.z.unwrap_or(0.0),
            );
            if x == 0.0 && y == 0.0 && z == 0.0 {
                return Err(Rejection::new(
                    RejectReason::InvalidGyroscope,
                    "Missing or invalid gyroscope data (x, y, z)",
                ));
            }
            Reading::Gyroscope { x, y, z }
        }
        TelemetryKind::Gps => {
            let (latitude, longitude) =
                (data.latitude.unwrap_or(0.0), data.longitude.unwrap_or(0.0));
            if latitude == 0.0 && longitude == 0.0 {
                return Err(Rejection::new(
                    RejectReason::InvalidGps,
                    "Missing or invalid GPS data (latitude, longitude)",
                ));
            }
            Reading::Gps {
                latitude,
                longitude,
            }
        }
        TelemetryKind::Photo => match data.image.as_deref() {
            Some(image) if !image.is_empty() => Reading::Photo {
                image: image.to_string(),
            },
            _ => {
                return Err(Rejection::new(
                    RejectReason::InvalidPhoto,
                    "Missing photo data (image)",
                ));
            }
        },
    };

    Ok(TelemetryRecord {
        device_id: data.device_id.clone(),
        timestamp: data.timestamp.clone(),
        reading,
    })
}
