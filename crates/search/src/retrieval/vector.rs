//! Vector similarity search backed by Qdrant
//!
//! Talks to the Qdrant REST API; the store itself is an opaque
//! collaborator reached over HTTP. The client is long-lived and safe
//! to share across concurrent searches.

use super::{StoreHit, VectorStore};
use docfuse_common::config::QdrantConfig;
use docfuse_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

/// Qdrant-backed vector store client
pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection_name: String,
}

#[derive(Serialize)]
struct PointsSearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    score_threshold: f32,
    with_payload: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct PointsSearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f32,
    #[serde(default)]
    payload: serde_json::Value,
}

impl QdrantStore {
    pub fn new(config: &QdrantConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create Qdrant HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection_name: config.collection_name.clone(),
        })
    }

    /// Build a Qdrant `must`/`match` filter from exact-match conditions
    fn build_filter(filter: Option<&BTreeMap<String, String>>) -> Option<serde_json::Value> {
        let filter = filter?;
        if filter.is_empty() {
            return None;
        }

        let must: Vec<serde_json::Value> = filter
            .iter()
            .map(|(key, value)| {
                json!({
                    "key": key,
                    "match": { "value": value }
                })
            })
            .collect();

        Some(json!({ "must": must }))
    }

    fn unavailable(&self, message: impl Into<String>) -> AppError {
        AppError::BackendUnavailable {
            backend: "qdrant".to_string(),
            message: message.into(),
        }
    }
}

#[async_trait::async_trait]
impl VectorStore for QdrantStore {
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
        filter: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<StoreHit>> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection_name
        );

        let request = PointsSearchRequest {
            vector,
            limit,
            score_threshold,
            with_payload: true,
            filter: Self::build_filter(filter),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.unavailable(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(self.unavailable(format!("search returned {}: {}", status, body)));
        }

        let parsed: PointsSearchResponse = response
            .json()
            .await
            .map_err(|e| self.unavailable(format!("malformed search response: {}", e)))?;

        let hits = parsed
            .result
            .into_iter()
            .map(|point| {
                // Point ids may be integers or UUID strings on the wire
                let id = match point.id {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                StoreHit {
                    id,
                    score: point.score,
                    payload: point.payload,
                    highlights: None,
                }
            })
            .collect();

        Ok(hits)
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/collections/{}", self.base_url, self.collection_name);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.unavailable(format!("health check failed: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.unavailable(format!("health check returned {}", response.status())))
        }
    }
}
