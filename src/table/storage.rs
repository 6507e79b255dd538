//! Table stored as one JSON object per item.
//!
//! Layout: `<table-url>/<name>/<device_id>/<timestamp>.json`. A single PUT
//! is atomic and replaces any earlier version, which gives upsert semantics.

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::path::{Path, PathPart};
use snafu::prelude::*;
use std::collections::HashMap;

use crate::config::ServiceConfig;
use crate::error::{
    TableDecodeSnafu, TableError, TableReadSnafu, TableSerializeSnafu, TableStorageSnafu,
    TableWriteSnafu,
};
use crate::storage::StorageProvider;

use super::{PersistedItem, TelemetryTable};

pub struct StorageTable {
    storage: StorageProvider,
}

impl StorageTable {
    /// Use the `name` directory below `storage`.
    pub fn new(storage: &StorageProvider, name: &str) -> Self {
        Self {
            storage: storage.with_prefix(name),
        }
    }

    /// Open table `name` below the storage URL.
    pub async fn open(
        url: &str,
        name: &str,
        service: &ServiceConfig,
        options: &HashMap<String, String>,
    ) -> Result<Self, TableError> {
        let storage = StorageProvider::for_url_with_options(url, service, options)
            .await
            .context(TableStorageSnafu)?;
        Ok(Self::new(&storage, name))
    }

    /// Object path of an item. Key parts are percent-encoded, so device ids
    /// and timestamps containing `/` or `:` stay a single path segment.
    pub fn item_path(device_id: &str, timestamp: &str) -> Path {
        let file = format!("{timestamp}.json");
        Path::from_iter([PathPart::from(device_id), PathPart::from(file.as_str())])
    }

    /// All items, in key order.
    pub async fn scan(&self) -> Result<Vec<PersistedItem>, TableError> {
        let mut paths: Vec<Path> = self
            .storage
            .list(true)
            .try_collect()
            .await
            .context(TableReadSnafu)?;
        paths.sort();

        let mut items = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = self.storage.get(path.clone()).await.context(TableReadSnafu)?;
            let item = serde_json::from_slice(&bytes).context(TableDecodeSnafu {
                key: path.to_string(),
            })?;
            items.push(item);
        }
        Ok(items)
    }
}

#[async_trait]
impl TelemetryTable for StorageTable {
    async fn put_item(&self, item: &PersistedItem) -> Result<(), TableError> {
        let body = serde_json::to_vec(item).context(TableSerializeSnafu)?;
        self.storage
            .put(Self::item_path(&item.device_id, &item.timestamp), body)
            .await
            .context(TableWriteSnafu)
    }

    async fn get_item(
        &self,
        device_id: &str,
        timestamp: &str,
    ) -> Result<Option<PersistedItem>, TableError> {
        let path = Self::item_path(device_id, timestamp);
        let bytes = match self.storage.get(path.clone()).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(source) => return Err(TableError::TableRead { source }),
        };

        let item = serde_json::from_slice(&bytes).context(TableDecodeSnafu {
            key: path.to_string(),
        })?;
        Ok(Some(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ItemAttributes;
    use tempfile::TempDir;

    fn gyro(x: f64) -> PersistedItem {
        PersistedItem {
            device_id: "aa:bb:cc:dd:ee:ff".to_string(),
            timestamp: "2025-05-16T12:00:00Z".to_string(),
            attributes: ItemAttributes::Gyroscope { x, y: 2.0, z: 3.0 },
        }
    }

    #[tokio::test]
    async fn test_put_is_an_upsert() {
        let table = StorageTable::new(&StorageProvider::in_memory(), "fleet-telemetry");

        table.put_item(&gyro(1.0)).await.unwrap();
        table.put_item(&gyro(1.0)).await.unwrap();
        assert_eq!(table.scan().await.unwrap(), vec![gyro(1.0)]);

        table.put_item(&gyro(4.0)).await.unwrap();
        let items = table.scan().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0], gyro(4.0));
    }

    #[tokio::test]
    async fn test_get_item() {
        let table = StorageTable::new(&StorageProvider::in_memory(), "fleet-telemetry");
        assert!(
            table
                .get_item("aa:bb:cc:dd:ee:ff", "2025-05-16T12:00:00Z")
                .await
                .unwrap()
                .is_none()
        );

        table.put_item(&gyro(1.0)).await.unwrap();
        let item = table
            .get_item("aa:bb:cc:dd:ee:ff", "2025-05-16T12:00:00Z")
            .await
            .unwrap();
        assert_eq!(item, Some(gyro(1.0)));
    }

    #[tokio::test]
    async fn test_slash_in_key_stays_one_segment() {
        let path = StorageTable::item_path("dev/1", "2025/05/16");
        assert_eq!(path.parts().count(), 2);

        let table = StorageTable::new(&StorageProvider::in_memory(), "t");
        let item = PersistedItem {
            device_id: "dev/1".to_string(),
            timestamp: "2025/05/16".to_string(),
            attributes: ItemAttributes::Gps {
                latitude: 1.0,
                longitude: 2.0,
            },
        };
        table.put_item(&item).await.unwrap();
        assert_eq!(table.get_item("dev/1", "2025/05/16").await.unwrap(), Some(item));
    }

    #[tokio::test]
    async fn test_local_layout() {
        let temp_dir = TempDir::new().unwrap();
        let table = StorageTable::open(
            temp_dir.path().to_str().unwrap(),
            "fleet-telemetry",
            &ServiceConfig::default(),
            &HashMap::new(),
        )
        .await
        .unwrap();

        let item = PersistedItem {
            device_id: "mac123".to_string(),
            timestamp: "2025-05-16T12-00-00".to_string(),
            attributes: ItemAttributes::Gps {
                latitude: -23.5,
                longitude: -46.6,
            },
        };
        table.put_item(&item).await.unwrap();

        let file = temp_dir
            .path()
            .join("fleet-telemetry/mac123/2025-05-16T12-00-00.json");
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(file).unwrap()).unwrap();
        assert_eq!(json["type"], "gps");
        assert_eq!(json["latitude"], -23.5);
    }
}
