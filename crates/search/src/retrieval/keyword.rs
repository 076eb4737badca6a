//! Keyword (lexical) search backed by Elasticsearch
//!
//! Full-text `multi_match` query with term filters and content
//! highlighting. The store is an opaque collaborator reached over
//! HTTP; the client is long-lived and shared across searches.

use super::{KeywordStore, StoreHit};
use docfuse_common::config::ElasticsearchConfig;
use docfuse_common::errors::{AppError, Result};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

/// Elasticsearch-backed keyword store client
pub struct ElasticsearchStore {
    client: reqwest::Client,
    base_url: String,
    index_name: String,
}

#[derive(Deserialize)]
struct EsSearchResponse {
    hits: EsHits,
}

#[derive(Deserialize)]
struct EsHits {
    hits: Vec<EsHit>,
}

#[derive(Deserialize)]
struct EsHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: Option<f32>,
    #[serde(rename = "_source", default)]
    source: serde_json::Value,
    #[serde(default)]
    highlight: Option<EsHighlight>,
}

#[derive(Deserialize)]
struct EsHighlight {
    #[serde(default)]
    content: Vec<String>,
}

impl ElasticsearchStore {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create Elasticsearch HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index_name: config.index_name.clone(),
        })
    }

    /// Build the `_search` body: multi_match over content with term
    /// filters and a highlight block
    fn build_search_body(
        query_text: &str,
        limit: usize,
        filter: Option<&BTreeMap<String, String>>,
    ) -> serde_json::Value {
        let mut body = json!({
            "query": {
                "bool": {
                    "must": [
                        {
                            "multi_match": {
                                "query": query_text,
                                "fields": ["content^2", "content_preview"],
                                "type": "best_fields",
                                "fuzziness": "AUTO"
                            }
                        }
                    ]
                }
            },
            "size": limit,
            "highlight": {
                "fields": {
                    "content": {
                        "fragment_size": 150,
                        "number_of_fragments": 3
                    }
                }
            }
        });

        if let Some(filter) = filter {
            if !filter.is_empty() {
                let clauses: Vec<serde_json::Value> = filter
                    .iter()
                    .map(|(field, value)| json!({ "term": { field: value } }))
                    .collect();
                body["query"]["bool"]["filter"] = json!(clauses);
            }
        }

        body
    }

    fn unavailable(&self, message: impl Into<String>) -> AppError {
        AppError::BackendUnavailable {
            backend: "elasticsearch".to_string(),
            message: message.into(),
        }
    }
}

#[async_trait::async_trait]
impl KeywordStore for ElasticsearchStore {
    async fn search(
        &self,
        query_text: &str,
        limit: usize,
        filter: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<StoreHit>> {
        let url = format!("{}/{}/_search", self.base_url, self.index_name);
        let body = Self::build_search_body(query_text, limit, filter);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unavailable(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(self.unavailable(format!("search returned {}: {}", status, body)));
        }

        let parsed: EsSearchResponse = response
            .json()
            .await
            .map_err(|e| self.unavailable(format!("malformed search response: {}", e)))?;

        let hits = parsed
            .hits
            .hits
            .into_iter()
            .map(|hit| {
                let highlights = hit
                    .highlight
                    .map(|h| h.content)
                    .filter(|fragments| !fragments.is_empty());
                StoreHit {
                    id: hit.id,
                    score: hit.score.unwrap_or(0.0),
                    payload: hit.source,
                    highlights,
                }
            })
            .collect();

        Ok(hits)
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/_cluster/health", self.base_url);

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_body_shape() {
        let body = ElasticsearchStore::build_search_body("safety procedures", 20, None);

        assert_eq!(body["size"], 20);
        assert_eq!(
            body["query"]["bool"]["must"][0]["multi_match"]["query"],
            "safety procedures"
        );
        assert!(body["query"]["bool"].get("filter").is_none());
        assert_eq!(
            body["highlight"]["fields"]["content"]["fragment_size"],
            150
        );
    }

    #[test]
    fn test_search_body_with_filters() {
        let mut filter = BTreeMap::new();
        filter.insert("type".to_string(), "pdf".to_string());

        let body = ElasticsearchStore::build_search_body("safety", 10, Some(&filter));
        let clauses = body["query"]["bool"]["filter"].as_array().unwrap();

        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0]["term"]["type"], "pdf");
    }
}
