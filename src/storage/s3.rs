//! S3 storage backend implementation.

use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use object_store::path::Path;
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::error::{S3ConfigSnafu, StorageError};

use super::{BackendConfig, StorageProvider};

/// S3 storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub bucket: String,
    pub key: Option<Path>,
}

impl S3Config {
    /// Fill in region and endpoint from the service settings where the URL
    /// did not name them.
    fn resolve(mut self, service: &ServiceConfig) -> Self {
        // Empty values come from unset `${VAR:-}` interpolations
        if self.region.is_none() {
            self.region = service.region.clone().filter(|r| !r.is_empty());
        }
        if self.endpoint.is_none() {
            self.endpoint = service.endpoint.clone().filter(|e| !e.is_empty());
        }
        self
    }
}

impl StorageProvider {
    pub(super) fn construct_s3(
        config: S3Config,
        service: &ServiceConfig,
        options: &HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        let config = config.resolve(service);

        // Credentials come from the standard AWS environment variables
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(&config.bucket);

        for (key, value) in options {
            let key: AmazonS3ConfigKey = key.parse().context(S3ConfigSnafu)?;
            builder = builder.with_config(key, value.clone());
        }

        builder = builder
            .with_retry(RetryConfig::default())
            .with_skip_signature(service.skip_signature);

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false)
                .with_allow_http(service.allow_http || endpoint.starts_with("http://"));
        }

        let canonical_url = match (&config.region, &config.endpoint) {
            (_, Some(endpoint)) => format!("s3::{}/{}", endpoint, config.bucket),
            (Some(region), _) => format!("https://s3.{}.amazonaws.com/{}", region, config.bucket),
            _ => format!("https://s3.amazonaws.com/{}", config.bucket),
        };

        let canonical_url = match &config.key {
            Some(key) => format!("{}/{}", canonical_url, key),
            None => canonical_url,
        };

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(builder.build().context(S3ConfigSnafu)?);

        Ok(Self {
            prefix: config.key.clone(),
            config: BackendConfig::S3(config),
            object_store,
            canonical_url,
        })
    }
}
