//! Face-matching capability.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::time::Duration;

use crate::error::{FaceMatchError, FaceMatchRequestSnafu};

/// A face found in both images.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    /// Similarity score in 0..=100.
    pub similarity: f32,
}

#[async_trait]
pub trait FaceMatcher: Send + Sync {
    /// Compare the faces in `source` against those in `target`.
    ///
    /// Implementations may pre-filter by `threshold`; callers still apply it.
    async fn compare(
        &self,
        source: &[u8],
        target: &[u8],
        threshold: f32,
    ) -> Result<Vec<FaceMatch>, FaceMatchError>;
}

/// Matcher used when no face-matching service is configured. Never matches.
#[derive(Debug, Default)]
pub struct DisabledFaceMatcher;

#[async_trait]
impl FaceMatcher for DisabledFaceMatcher {
    async fn compare(
        &self,
        _source: &[u8],
        _target: &[u8],
        _threshold: f32,
    ) -> Result<Vec<FaceMatch>, FaceMatchError> {
        Ok(Vec::new())
    }
}

#[derive(Serialize)]
struct CompareRequest {
    source_image: String,
    target_image: String,
    similarity_threshold: f32,
}

#[derive(Deserialize)]
struct CompareResponse {
    #[serde(default)]
    face_matches: Vec<FaceMatch>,
}

/// Face matching over HTTP.
///
/// Sends `POST <endpoint>` with base64 images and expects
/// `{"face_matches": [{"similarity": <0-100>}, ...]}`.
pub struct HttpFaceMatcher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpFaceMatcher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl FaceMatcher for HttpFaceMatcher {
    async fn compare(
        &self,
        source: &[u8],
        target: &[u8],
        threshold: f32,
    ) -> Result<Vec<FaceMatch>, FaceMatchError> {
        let request = CompareRequest {
            source_image: STANDARD.encode(source),
            target_image: STANDARD.encode(target),
            similarity_threshold: threshold,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .context(FaceMatchRequestSnafu)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FaceMatchError::FaceMatchStatus {
                status: status.as_u16(),
            });
        }

        let body: CompareResponse = response.json().await.context(FaceMatchRequestSnafu)?;
        Ok(body.face_matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use tokio::net::TcpListener;

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/compare")
    }

    #[tokio::test]
    async fn test_http_matcher_parses_matches() {
        let app = Router::new().route(
            "/compare",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["source_image"], "AQI=");
                assert_eq!(body["similarity_threshold"], 70.0);
                Json(serde_json::json!({
                    "face_matches": [{"similarity": 99.5}, {"similarity": 42.0}]
                }))
            }),
        );
        let endpoint = serve(app).await;

        let matcher = HttpFaceMatcher::new(endpoint, Duration::from_secs(5)).unwrap();
        let matches = matcher.compare(&[1, 2], &[3, 4], 70.0).await.unwrap();
        assert_eq!(
            matches,
            vec![
                FaceMatch { similarity: 99.5 },
                FaceMatch { similarity: 42.0 }
            ]
        );
    }

    #[tokio::test]
    async fn test_http_matcher_reports_status() {
        let app = Router::new().route(
            "/compare",
            post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let endpoint = serve(app).await;

        let matcher = HttpFaceMatcher::new(endpoint, Duration::from_secs(5)).unwrap();
        let err = matcher.compare(&[1], &[1], 70.0).await.unwrap_err();
        assert!(matches!(err, FaceMatchError::FaceMatchStatus { status: 503 }));
    }

    #[tokio::test]
    async fn test_disabled_matcher_never_matches() {
        let matches = DisabledFaceMatcher.compare(&[1], &[1], 0.0).await.unwrap();
        assert!(matches.is_empty());
    }
}
