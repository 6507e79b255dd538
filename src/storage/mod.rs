//! Object storage abstraction.
//!
//! Every external store the pipeline touches (photo bucket, item table,
//! queue prefix, dead letter log) is addressed by a URL and opened through a
//! [`StorageProvider`]. Supported backends are S3 (including S3-compatible
//! endpoints such as LocalStack), the local filesystem and an in-process
//! memory store.

mod local;
mod memory;
mod s3;

use bytes::Bytes;
use futures::{Stream, StreamExt, future::ready};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use regex::Regex;
use snafu::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use crate::config::ServiceConfig;
use crate::emit;
use crate::error::{InvalidUrlSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::{
    RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration,
};

pub use local::LocalConfig;
pub use memory::MemoryConfig;
pub use s3::S3Config;

/// Storage provider that abstracts over the supported backends.
///
/// All paths passed to its methods are relative to the URL's key prefix.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) prefix: Option<Path>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

// URL patterns for the supported backends
const S3_PATH: &str =
    r"^https://s3\.(?P<region>[\w\-]+)\.amazonaws\.com/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_VIRTUAL: &str =
    r"^https://(?P<bucket>[a-z0-9\-\.]+)\.s3\.(?P<region>[\w\-]+)\.amazonaws\.com(/(?P<key>.+))?$";
const S3_URL: &str = r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_ENDPOINT_URL: &str = r"^[sS]3[aA]?::(?<protocol>https?)://(?P<endpoint>[^:/]+):(?<port>\d+)/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";

const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_URL: &str = r"^file:(?P<path>.*)$";
const FILE_PATH: &str = r"^/(?P<path>.*)$";

const MEMORY_URL: &str = r"^memory://(?P<key>.*)$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    S3,
    Local,
    Memory,
}

static MATCHERS: LazyLock<Vec<(Backend, Regex)>> = LazyLock::new(|| {
    let patterns = [
        (Backend::S3, S3_PATH),
        (Backend::S3, S3_VIRTUAL),
        (Backend::S3, S3_ENDPOINT_URL),
        (Backend::S3, S3_URL),
        (Backend::Memory, MEMORY_URL),
        (Backend::Local, FILE_URI),
        (Backend::Local, FILE_URL),
        (Backend::Local, FILE_PATH),
    ];
    patterns
        .into_iter()
        .map(|(backend, pattern)| (backend, Regex::new(pattern).expect("Invalid regex pattern")))
        .collect()
});

/// Backend configuration parsed from a storage URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Local(LocalConfig),
    Memory(MemoryConfig),
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        for (backend, regex) in MATCHERS.iter() {
            if let Some(matches) = regex.captures(url) {
                return Ok(match backend {
                    Backend::S3 => Self::parse_s3(&matches),
                    Backend::Local => Self::parse_local(&matches),
                    Backend::Memory => Self::parse_memory(&matches),
                });
            }
        }

        InvalidUrlSnafu {
            url: url.to_string(),
        }
        .fail()
    }

    fn parse_s3(matches: &regex::Captures) -> Self {
        let bucket = matches["bucket"].to_string();
        let region = matches.name("region").map(|m| m.as_str().to_string());

        let endpoint = matches.name("endpoint").map(|endpoint| {
            let port = matches
                .name("port")
                .and_then(|p| p.as_str().parse::<u16>().ok())
                .unwrap_or(443);
            let protocol = matches
                .name("protocol")
                .map(|p| p.as_str())
                .unwrap_or("https");
            format!("{}://{}:{}", protocol, endpoint.as_str(), port)
        });

        BackendConfig::S3(S3Config {
            endpoint,
            region,
            bucket,
            key: key_path(matches),
        })
    }

    fn parse_local(matches: &regex::Captures) -> Self {
        let path = &matches["path"];
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        BackendConfig::Local(LocalConfig {
            path: path.trim_end_matches('/').to_string(),
        })
    }

    fn parse_memory(matches: &regex::Captures) -> Self {
        BackendConfig::Memory(MemoryConfig {
            key: key_path(matches),
        })
    }

    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(s3) => s3.key.as_ref(),
            BackendConfig::Memory(memory) => memory.key.as_ref(),
            BackendConfig::Local(_) => None,
        }
    }
}

fn key_path(matches: &regex::Captures) -> Option<Path> {
    matches
        .name("key")
        .map(|m| m.as_str().trim_matches('/'))
        .filter(|key| !key.is_empty())
        .map(Path::from)
}

impl StorageProvider {
    /// Open the store at `url`, applying the service region and endpoint.
    pub async fn for_url(url: &str, service: &ServiceConfig) -> Result<Self, StorageError> {
        Self::for_url_with_options(url, service, &HashMap::new()).await
    }

    /// Open the store at `url` with extra backend options (credentials, etc.).
    pub async fn for_url_with_options(
        url: &str,
        service: &ServiceConfig,
        options: &HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        let config = BackendConfig::parse_url(url)?;

        match config {
            BackendConfig::S3(config) => Self::construct_s3(config, service, options),
            BackendConfig::Local(config) => Self::construct_local(config),
            BackendConfig::Memory(config) => Ok(Self::construct_memory(config)),
        }
    }

    /// A fresh, empty in-memory store.
    pub fn in_memory() -> Self {
        Self::construct_memory(MemoryConfig { key: None })
    }

    /// A provider for `sub` below this one, sharing the same underlying store.
    pub fn with_prefix(&self, sub: &str) -> Self {
        let sub = Path::from(sub);
        let prefix: Path = self.qualify_path(&sub).into_owned();
        let separator = if self.canonical_url.ends_with('/') { "" } else { "/" };
        Self {
            config: self.config.clone(),
            object_store: Arc::clone(&self.object_store),
            canonical_url: format!("{}{separator}{sub}", self.canonical_url),
            prefix: Some(prefix),
        }
    }

    /// The URL this provider was opened with, normalized.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Get the backend configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match &self.prefix {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// List objects below the prefix.
    /// Returns paths relative to the configured key prefix.
    pub fn list(
        &self,
        include_subdirectories: bool,
    ) -> impl Stream<Item = Result<Path, StorageError>> + '_ {
        emit!(StorageRequest {
            operation: StorageOperation::List,
            status: RequestStatus::Success,
        });

        let key_part_count = self
            .prefix
            .as_ref()
            .map(|key| key.parts().count())
            .unwrap_or_default();

        self.object_store
            .list(self.prefix.as_ref())
            .filter_map(move |meta| {
                let result = match meta {
                    Ok(metadata) => {
                        let path = metadata.location;
                        if !include_subdirectories && path.parts().count() != key_part_count + 1 {
                            None
                        } else {
                            // Callers get relative paths so get/put/delete can qualify them again
                            let relative_path: Path = path.parts().skip(key_part_count).collect();
                            Some(Ok(relative_path))
                        }
                    }
                    Err(source) => Some(Err(StorageError::ObjectStore { source })),
                };
                ready(result)
            })
    }

    /// Get the contents of an object.
    pub async fn get(&self, path: impl Into<Path>) -> Result<Bytes, StorageError> {
        let path = path.into();
        let start = Instant::now();
        let result = self.object_store.get(&self.qualify_path(&path)).await;

        record_request(StorageOperation::Get, result.is_ok(), start);

        let bytes = result
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)?;
        Ok(bytes)
    }

    /// Write an object, replacing any existing one at the same path.
    pub async fn put(
        &self,
        path: impl Into<Path>,
        bytes: impl Into<Bytes>,
    ) -> Result<(), StorageError> {
        let path = path.into();
        let payload = PutPayload::from(bytes.into());
        let start = Instant::now();
        let result = self.object_store.put(&self.qualify_path(&path), payload).await;

        record_request(StorageOperation::Put, result.is_ok(), start);

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Delete an object.
    pub async fn delete(&self, path: impl Into<Path>) -> Result<(), StorageError> {
        let path = path.into();
        let start = Instant::now();
        let result = self.object_store.delete(&self.qualify_path(&path)).await;

        record_request(StorageOperation::Delete, result.is_ok(), start);

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }
}

fn record_request(operation: StorageOperation, ok: bool, start: Instant) {
    let status = if ok {
        RequestStatus::Success
    } else {
        RequestStatus::Error
    };
    emit!(StorageRequest { operation, status });
    emit!(StorageRequestDuration {
        operation,
        duration: start.elapsed(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    #[test]
    fn test_s3_url_parsing() {
        let config = BackendConfig::parse_url("s3://my-test-bucket/photos").unwrap();
        match config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "my-test-bucket");
                assert_eq!(s3.key, Some(Path::from("photos")));
                assert_eq!(s3.endpoint, None);
            }
            _ => panic!("Expected S3 config"),
        }
    }

    #[test]
    fn test_s3_endpoint_url_parsing() {
        let config =
            BackendConfig::parse_url("s3::http://localstack:4566/my-test-bucket/queue").unwrap();
        match config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "my-test-bucket");
                assert_eq!(s3.endpoint.as_deref(), Some("http://localstack:4566"));
                assert_eq!(s3.key, Some(Path::from("queue")));
            }
            _ => panic!("Expected S3 config"),
        }
    }

    #[test]
    fn test_s3_regional_url_parsing() {
        let config =
            BackendConfig::parse_url("https://s3.us-east-1.amazonaws.com/fleet-data").unwrap();
        match config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.region.as_deref(), Some("us-east-1"));
                assert_eq!(s3.key, None);
            }
            _ => panic!("Expected S3 config"),
        }
    }

    #[test]
    fn test_local_and_memory_url_parsing() {
        let config = BackendConfig::parse_url("/var/lib/fleet/table/").unwrap();
        assert_eq!(
            config,
            BackendConfig::Local(LocalConfig {
                path: "/var/lib/fleet/table".to_string()
            })
        );

        let config = BackendConfig::parse_url("file:///tmp/queue").unwrap();
        assert!(matches!(config, BackendConfig::Local(ref l) if l.path == "/tmp/queue"));

        let config = BackendConfig::parse_url("memory://photos").unwrap();
        assert_eq!(config.key(), Some(&Path::from("photos")));
    }

    #[test]
    fn test_unsupported_url() {
        let err = BackendConfig::parse_url("gs://bucket/data").unwrap_err();
        assert!(matches!(err, StorageError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_local_put_get_delete() {
        let temp_dir = TempDir::new().unwrap();
        let url = format!("{}/table", temp_dir.path().display());
        let storage = StorageProvider::for_url(&url, &ServiceConfig::default())
            .await
            .unwrap();

        storage.put("mac123/ts.json", b"{}".to_vec()).await.unwrap();
        assert!(temp_dir.path().join("table/mac123/ts.json").exists());
        assert_eq!(storage.get("mac123/ts.json").await.unwrap().as_ref(), b"{}");

        storage.delete("mac123/ts.json").await.unwrap();
        let err = storage.get("mac123/ts.json").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_returns_relative_paths() {
        let storage = StorageProvider::in_memory().with_prefix("fleet-telemetry");
        storage.put("mac123/a.json", b"1".to_vec()).await.unwrap();
        storage.put("mac123/b.json", b"2".to_vec()).await.unwrap();
        storage.put("top.json", b"3".to_vec()).await.unwrap();

        let mut all: Vec<String> = storage
            .list(true)
            .map_ok(|p| p.to_string())
            .try_collect()
            .await
            .unwrap();
        all.sort();
        assert_eq!(all, vec!["mac123/a.json", "mac123/b.json", "top.json"]);

        let shallow: Vec<Path> = storage.list(false).try_collect().await.unwrap();
        assert_eq!(shallow, vec![Path::from("top.json")]);

        for path in all {
            assert!(!storage.get(path.as_str()).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_with_prefix_shares_store() {
        let root = StorageProvider::in_memory();
        let photos = root.with_prefix("photos");
        photos.put("mac123/ts.jpg", vec![0xff, 0xd8]).await.unwrap();

        let bytes = root.get("photos/mac123/ts.jpg").await.unwrap();
        assert_eq!(bytes.as_ref(), &[0xff, 0xd8]);
        assert_eq!(photos.canonical_url(), "memory://photos");
    }
}
