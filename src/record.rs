//! Telemetry data model shared by the queue consumer and the HTTP endpoint.
//!
//! [`QueueMessage`] and [`TelemetryData`] mirror the wire format 1:1 and are
//! untrusted: the declared kind is kept as a raw string and every field is
//! optional. A [`TelemetryRecord`] only exists once the validator accepted the
//! payload, and carries a closed [`Reading`] for its kind.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kinds of telemetry a device can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryKind {
    Gyroscope,
    Gps,
    Photo,
}

impl TelemetryKind {
    pub const ALL: [TelemetryKind; 3] = [
        TelemetryKind::Gyroscope,
        TelemetryKind::Gps,
        TelemetryKind::Photo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryKind::Gyroscope => "gyroscope",
            TelemetryKind::Gps => "gps",
            TelemetryKind::Photo => "photo",
        }
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a declared kind is not one of the known tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown telemetry kind '{}'", self.0)
    }
}

impl std::error::Error for UnknownKind {}

impl FromStr for TelemetryKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TelemetryKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Telemetry payload as published by devices (wire format).
///
/// Absent numeric fields decode to `None`; the validator treats them as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryData {
    /// Hardware address of the device.
    #[serde(default)]
    pub device_id: String,
    /// ISO-8601 capture time.
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Base64-encoded photo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Body of a queue message: `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Declared kind, not yet checked against the known tags.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: TelemetryData,
}

impl QueueMessage {
    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl From<&TelemetryRecord> for QueueMessage {
    fn from(record: &TelemetryRecord) -> Self {
        Self {
            kind: record.kind().as_str().to_string(),
            data: record.to_data(),
        }
    }
}

/// Kind-specific measurements of a validated record.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Gyroscope { x: f64, y: f64, z: f64 },
    Gps { latitude: f64, longitude: f64 },
    /// Still base64-encoded; decoding happens during enrichment.
    Photo { image: String },
}

impl Reading {
    pub fn kind(&self) -> TelemetryKind {
        match self {
            Reading::Gyroscope { .. } => TelemetryKind::Gyroscope,
            Reading::Gps { .. } => TelemetryKind::Gps,
            Reading::Photo { .. } => TelemetryKind::Photo,
        }
    }
}

/// A record that passed validation for its declared kind.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub device_id: String,
    pub timestamp: String,
    pub reading: Reading,
}

impl TelemetryRecord {
    pub fn kind(&self) -> TelemetryKind {
        self.reading.kind()
    }

    /// Convert back to the wire payload.
    pub fn to_data(&self) -> TelemetryData {
        let mut data = TelemetryData {
            device_id: self.device_id.clone(),
            timestamp: self.timestamp.clone(),
            ..TelemetryData::default()
        };
        match &self.reading {
            Reading::Gyroscope { x, y, z } => {
                data.x = Some(*x);
                data.y = Some(*y);
                data.z = Some(*z);
            }
            Reading::Gps {
                latitude,
                longitude,
            } => {
                data.latitude = Some(*latitude);
                data.longitude = Some(*longitude);
            }
            Reading::Photo { image } => data.image = Some(image.clone()),
        }
        data
    }
}
