//! Photo enrichment: store the decoded image and compute a recognition flag.
//!
//! Storing the image is mandatory; a failed or timed-out write fails the
//! record. Recognition is best effort: any lookup or matcher failure, a
//! timeout, or a device without an enrolled reference yields `false` and
//! never fails the record.

mod face;
mod reference;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use object_store::path::Path;
use snafu::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::emit;
use crate::error::{EnrichError, FaceMatchError, ImageDecodeSnafu, PhotoWriteSnafu, StorageError};
use crate::metrics::events::{FaceMatchCompleted, FaceMatchResult, PhotoStored};
use crate::storage::StorageProvider;

pub use face::{DisabledFaceMatcher, FaceMatch, FaceMatcher, HttpFaceMatcher};
pub use reference::{NoReferences, ReferenceImages, StorageReferences};

/// Object key of a photo: `{device_id}/{timestamp}.jpg`.
///
/// Deterministic, so a redelivered message overwrites the same object.
pub fn photo_key(device_id: &str, timestamp: &str) -> String {
    format!("{device_id}/{timestamp}.jpg")
}

/// Destination for decoded photos.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    async fn put_photo(&self, key: &str, bytes: Bytes) -> Result<(), StorageError>;
}

#[async_trait]
impl PhotoStore for StorageProvider {
    async fn put_photo(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        self.put(Path::from(key), bytes).await
    }
}

/// Result of enriching one photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub storage_key: String,
    pub is_recognized: bool,
}

pub struct PhotoEnricher {
    photos: Arc<dyn PhotoStore>,
    references: Arc<dyn ReferenceImages>,
    matcher: Arc<dyn FaceMatcher>,
    similarity_threshold: f32,
    call_timeout: Duration,
}

impl PhotoEnricher {
    pub fn new(
        photos: Arc<dyn PhotoStore>,
        references: Arc<dyn ReferenceImages>,
        matcher: Arc<dyn FaceMatcher>,
    ) -> Self {
        Self {
            photos,
            references,
            matcher,
            similarity_threshold: 70.0,
            call_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Decode `image` (standard base64), store it and compute recognition.
    pub async fn enrich(
        &self,
        device_id: &str,
        timestamp: &str,
        image: &str,
    ) -> Result<Enrichment, EnrichError> {
        let bytes = Bytes::from(STANDARD.decode(image).context(ImageDecodeSnafu)?);
        let storage_key = photo_key(device_id, timestamp);

        match tokio::time::timeout(
            self.call_timeout,
            self.photos.put_photo(&storage_key, bytes.clone()),
        )
        .await
        {
            Ok(result) => result.context(PhotoWriteSnafu {
                key: storage_key.as_str(),
            })?,
            Err(_) => {
                return Err(EnrichError::PhotoTimeout {
                    key: storage_key,
                    timeout: self.call_timeout,
                });
            }
        }
        emit!(PhotoStored { bytes: bytes.len() });
        debug!(device_id, key = %storage_key, "Photo stored");

        let is_recognized = self.recognize(device_id, &bytes).await;

        Ok(Enrichment {
            storage_key,
            is_recognized,
        })
    }

    async fn recognize(&self, device_id: &str, photo: &[u8]) -> bool {
        let start = Instant::now();
        let result = self.try_recognize(device_id, photo).await;
        let (outcome, recognized) = match result {
            Ok(Some(true)) => (FaceMatchResult::Recognized, true),
            Ok(Some(false)) => (FaceMatchResult::Unrecognized, false),
            Ok(None) => (FaceMatchResult::NoReference, false),
            Err(e) => {
                warn!(device_id, error = %e, "Face match failed, marking photo unrecognized");
                (FaceMatchResult::Error, false)
            }
        };
        emit!(FaceMatchCompleted {
            result: outcome,
            duration: start.elapsed(),
        });
        recognized
    }

    /// `Ok(None)` when the device has no reference image.
    async fn try_recognize(
        &self,
        device_id: &str,
        photo: &[u8],
    ) -> Result<Option<bool>, FaceMatchError> {
        let timeout = self.call_timeout;
        let reference = tokio::time::timeout(timeout, self.references.reference_for(device_id))
            .await
            .map_err(|_| FaceMatchError::FaceMatchTimeout { timeout })??;
        let Some(reference) = reference else {
            return Ok(None);
        };

        let matches = tokio::time::timeout(
            timeout,
            self.matcher
                .compare(&reference, photo, self.similarity_threshold),
        )
        .await
        .map_err(|_| FaceMatchError::FaceMatchTimeout { timeout })??;

        Ok(Some(
            matches
                .iter()
                .any(|m| m.similarity >= self.similarity_threshold),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedMatcher {
        similarity: Option<f32>,
        calls: AtomicUsize,
    }

    impl FixedMatcher {
        fn new(similarity: Option<f32>) -> Arc<Self> {
            Arc::new(Self {
                similarity,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FaceMatcher for FixedMatcher {
        async fn compare(
            &self,
            _source: &[u8],
            _target: &[u8],
            _threshold: f32,
        ) -> Result<Vec<FaceMatch>, FaceMatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.similarity {
                Some(similarity) => Ok(vec![FaceMatch { similarity }]),
                None => Err(FaceMatchError::FaceMatchStatus { status: 500 }),
            }
        }
    }

    struct SlowMatcher;

    #[async_trait]
    impl FaceMatcher for SlowMatcher {
        async fn compare(
            &self,
            _source: &[u8],
            _target: &[u8],
            _threshold: f32,
        ) -> Result<Vec<FaceMatch>, FaceMatchError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![FaceMatch { similarity: 100.0 }])
        }
    }

    async fn enricher_with(matcher: Arc<dyn FaceMatcher>) -> (PhotoEnricher, StorageProvider) {
        let root = StorageProvider::in_memory();
        let photos = root.with_prefix("photos");
        let references = root.with_prefix("references");
        references
            .put("mac123.jpg", b"reference".to_vec())
            .await
            .unwrap();

        let enricher = PhotoEnricher::new(
            Arc::new(photos.clone()),
            Arc::new(StorageReferences::new(references)),
            matcher,
        );
        (enricher, photos)
    }

    #[tokio::test]
    async fn test_stores_decoded_photo() {
        let (enricher, photos) = enricher_with(Arc::new(DisabledFaceMatcher)).await;

        let enrichment = enricher
            .enrich("mac123", "2025-05-16T12:00:00", "aGVsbG8=")
            .await
            .unwrap();

        assert_eq!(enrichment.storage_key, "mac123/2025-05-16T12:00:00.jpg");
        assert!(!enrichment.is_recognized);
        let stored = photos.get("mac123/2025-05-16T12:00:00.jpg").await.unwrap();
        assert_eq!(stored.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn test_invalid_base64_is_permanent() {
        let (enricher, photos) = enricher_with(Arc::new(DisabledFaceMatcher)).await;

        let err = enricher
            .enrich("mac123", "t", "not base64!!")
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichError::ImageDecode { .. }));
        assert!(err.is_permanent());
        assert!(photos.get("mac123/t.jpg").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        for (similarity, expected) in [(70.0, true), (69.9, false), (99.0, true)] {
            let (enricher, _) = enricher_with(FixedMatcher::new(Some(similarity))).await;
            let enrichment = enricher.enrich("mac123", "t", "aGVsbG8=").await.unwrap();
            assert_eq!(enrichment.is_recognized, expected, "similarity {similarity}");
        }
    }

    #[tokio::test]
    async fn test_custom_threshold() {
        let (enricher, _) = enricher_with(FixedMatcher::new(Some(80.0))).await;
        let enricher = enricher.with_similarity_threshold(90.0);
        let enrichment = enricher.enrich("mac123", "t", "aGVsbG8=").await.unwrap();
        assert!(!enrichment.is_recognized);
    }

    #[tokio::test]
    async fn test_matcher_error_means_unrecognized() {
        let matcher = FixedMatcher::new(None);
        let (enricher, _) = enricher_with(matcher.clone()).await;

        let enrichment = enricher.enrich("mac123", "t", "aGVsbG8=").await.unwrap();
        assert!(!enrichment.is_recognized);
        assert_eq!(matcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_reference_skips_matcher() {
        let matcher = FixedMatcher::new(Some(100.0));
        let (enricher, _) = enricher_with(matcher.clone()).await;

        let enrichment = enricher.enrich("other-device", "t", "aGVsbG8=").await.unwrap();
        assert!(!enrichment.is_recognized);
        assert_eq!(matcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_matcher_timeout_means_unrecognized() {
        let (enricher, _) = enricher_with(Arc::new(SlowMatcher)).await;
        let enricher = enricher.with_call_timeout(Duration::from_secs(2));

        let enrichment = enricher.enrich("mac123", "t", "aGVsbG8=").await.unwrap();
        assert!(!enrichment.is_recognized);
    }
}
