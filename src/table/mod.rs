//! Persistence of validated telemetry items.
//!
//! Items are keyed by `(device_id, timestamp)` and written as full-item
//! upserts, so writing the same record twice leaves exactly one item.

mod storage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TableError;
use crate::record::TelemetryKind;

pub use storage::StorageTable;

/// Kind-specific attributes of a persisted item, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ItemAttributes {
    Gyroscope {
        x: f64,
        y: f64,
        z: f64,
    },
    Gps {
        latitude: f64,
        longitude: f64,
    },
    Photo {
        /// Object key of the stored image.
        s3_key: String,
        is_recognized: bool,
    },
}

impl ItemAttributes {
    pub fn kind(&self) -> TelemetryKind {
        match self {
            ItemAttributes::Gyroscope { .. } => TelemetryKind::Gyroscope,
            ItemAttributes::Gps { .. } => TelemetryKind::Gps,
            ItemAttributes::Photo { .. } => TelemetryKind::Photo,
        }
    }
}

/// One row of the telemetry table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedItem {
    pub device_id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub attributes: ItemAttributes,
}

impl PersistedItem {
    pub fn kind(&self) -> TelemetryKind {
        self.attributes.kind()
    }
}

#[async_trait]
pub trait TelemetryTable: Send + Sync {
    /// Insert or overwrite the item stored under its `(device_id, timestamp)`.
    async fn put_item(&self, item: &PersistedItem) -> Result<(), TableError>;

    /// Read back an item, `None` if absent.
    async fn get_item(
        &self,
        device_id: &str,
        timestamp: &str,
    ) -> Result<Option<PersistedItem>, TableError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_json_shape() {
        let item = PersistedItem {
            device_id: "mac123".to_string(),
            timestamp: "2025-05-16T12:00:00".to_string(),
            attributes: ItemAttributes::Photo {
                s3_key: "mac123/2025-05-16T12:00:00.jpg".to_string(),
                is_recognized: false,
            },
        };

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "device_id": "mac123",
                "timestamp": "2025-05-16T12:00:00",
                "type": "photo",
                "s3_key": "mac123/2025-05-16T12:00:00.jpg",
                "is_recognized": false,
            })
        );
    }

    #[test]
    fn test_item_decodes_from_flat_json() {
        let json = r#"{"device_id":"mac123","timestamp":"t","type":"gyroscope","x":1.0,"y":2.0,"z":3.0}"#;
        let item: PersistedItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.kind(), TelemetryKind::Gyroscope);
        assert_eq!(
            item.attributes,
            ItemAttributes::Gyroscope {
                x: 1.0,
                y: 2.0,
                z: 3.0
            }
        );
    }
}
