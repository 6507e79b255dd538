//! Enrolled reference images that photos are matched against.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::{Path, PathPart};

use crate::error::FaceMatchError;
use crate::storage::StorageProvider;

#[async_trait]
pub trait ReferenceImages: Send + Sync {
    /// The reference image for a device, `None` if none is enrolled.
    async fn reference_for(&self, device_id: &str) -> Result<Option<Bytes>, FaceMatchError>;
}

/// No references enrolled; every photo is unrecognized.
#[derive(Debug, Default)]
pub struct NoReferences;

#[async_trait]
impl ReferenceImages for NoReferences {
    async fn reference_for(&self, _device_id: &str) -> Result<Option<Bytes>, FaceMatchError> {
        Ok(None)
    }
}

/// References stored as `{device_id}.jpg` in an object store.
pub struct StorageReferences {
    storage: StorageProvider,
}

impl StorageReferences {
    pub fn new(storage: StorageProvider) -> Self {
        Self { storage }
    }

    fn key(device_id: &str) -> String {
        format!("{device_id}.jpg")
    }
}

#[async_trait]
impl ReferenceImages for StorageReferences {
    async fn reference_for(&self, device_id: &str) -> Result<Option<Bytes>, FaceMatchError> {
        let key = Self::key(device_id);
        let path = Path::from_iter([PathPart::from(key.as_str())]);
        match self.storage.get(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(source) => Err(FaceMatchError::ReferenceLookup { source }),
        }
    }
}
