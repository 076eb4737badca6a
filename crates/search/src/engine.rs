//! Search engine orchestration
//!
//! Owns the end-to-end search flow: query processing, dispatch to the
//! vector and keyword stores (concurrent fan-out for hybrid mode),
//! fusion, and response assembly.
//!
//! Degradation policy: only malformed caller input surfaces as an
//! error. A backend failure empties that backend's list, a fan-out
//! timeout empties both, and either case produces a well-formed
//! response with the problem noted in `fusion_params`.

use crate::query::QueryProcessor;
use crate::retrieval::{
    FusionEngine, FusionInfo, KeywordStore, SearchMode, SearchQuery, SearchResponse,
    SearchResult, SourceType, StoreHit, VectorStore,
};
use docfuse_common::embeddings::Embedder;
use docfuse_common::errors::Result;
use docfuse_common::{config::RetrievalConfig, metrics};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Health probe outcome for one backend
#[derive(Debug, Clone, serde::Serialize)]
pub struct BackendStatus {
    pub backend: String,
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Coordinates hybrid retrieval across the two stores
///
/// Holds only read-mostly configuration and shared client handles, so
/// any number of searches can run concurrently on one instance.
pub struct SearchEngine {
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    keyword_store: Arc<dyn KeywordStore>,
    query_processor: QueryProcessor,
    fusion_engine: FusionEngine,

    top_k_per_source: usize,
    concurrent_search: bool,
    search_timeout: Duration,
}

impl SearchEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        keyword_store: Arc<dyn KeywordStore>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            keyword_store,
            query_processor: QueryProcessor::new(config),
            fusion_engine: FusionEngine::new(config),
            top_k_per_source: config.top_k_per_source,
            concurrent_search: config.concurrent_search,
            search_timeout: config.search_timeout(),
        }
    }

    /// Perform a search with the specified mode
    ///
    /// The only `Err` is validation of the caller's input; every other
    /// failure degrades to an `Ok` response with diagnostics.
    pub async fn search(
        &self,
        query: &str,
        mode: &str,
        top_k: Option<usize>,
        min_similarity: Option<f32>,
        filters: Option<BTreeMap<String, String>>,
    ) -> Result<SearchResponse> {
        let start = Instant::now();

        let search_query =
            self.query_processor
                .process(query, mode, top_k, min_similarity, filters)?;

        tracing::info!(
            query = %search_query.normalized_text,
            mode = search_query.mode.as_str(),
            top_k = search_query.top_k,
            "Executing search"
        );

        let (results, sources, fusion_info) = match search_query.mode {
            SearchMode::Semantic => self.semantic_search_only(&search_query).await,
            SearchMode::Keyword => self.keyword_search_only(&search_query).await,
            SearchMode::Hybrid => self.hybrid_search(&search_query).await,
        };

        let search_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::record_search(
            start.elapsed().as_secs_f64(),
            search_query.mode.as_str(),
            results.len(),
        );

        tracing::info!(
            results = results.len(),
            latency_ms = search_time_ms as u64,
            "Search completed"
        );

        Ok(SearchResponse {
            query: search_query.raw_text.clone(),
            mode: search_query.mode,
            total_found: results.len(),
            search_time_ms,
            sources_searched: sources,
            fusion_method: fusion_info.as_ref().map(|info| info.method.clone()),
            fusion_params: fusion_info,
            results,
        })
    }

    /// Probe both backends, concurrently
    pub async fn backend_health(&self) -> Vec<BackendStatus> {
        let vector = async {
            let start = Instant::now();
            let outcome = self.vector_store.health_check().await;
            (self.vector_store.name(), start.elapsed(), outcome)
        };
        let keyword = async {
            let start = Instant::now();
            let outcome = self.keyword_store.health_check().await;
            (self.keyword_store.name(), start.elapsed(), outcome)
        };

        let checks = futures::future::join(vector, keyword).await;
        [checks.0, checks.1]
            .into_iter()
            .map(|(backend, latency, outcome)| BackendStatus {
                backend: backend.to_string(),
                healthy: outcome.is_ok(),
                latency_ms: latency.as_millis() as u64,
                error: outcome.err().map(|e| e.to_string()),
            })
            .collect()
    }

    async fn hybrid_search(
        &self,
        query: &SearchQuery,
    ) -> (Vec<SearchResult>, Vec<String>, Option<FusionInfo>) {
        let sources = vec![
            self.vector_store.name().to_string(),
            self.keyword_store.name().to_string(),
        ];

        let (semantic_outcome, keyword_outcome) = if self.concurrent_search {
            let fan_out =
                futures::future::join(self.semantic_results(query), self.keyword_results(query));

            match tokio::time::timeout(self.search_timeout, fan_out).await {
                Ok(outcomes) => outcomes,
                Err(_) => {
                    tracing::error!(
                        timeout_ms = self.search_timeout.as_millis() as u64,
                        "Hybrid search fan-out timed out"
                    );
                    metrics::record_search_timeout();
                    let info = FusionInfo::degraded(
                        "timeout",
                        format!(
                            "hybrid search timed out after {}ms",
                            self.search_timeout.as_millis()
                        ),
                    );
                    return (Vec::new(), sources, Some(info));
                }
            }
        } else {
            (
                self.semantic_results(query).await,
                self.keyword_results(query).await,
            )
        };

        // A failed backend contributes an empty list; the other side's
        // results still go through fusion
        let mut degradations = Vec::new();

        let semantic_results = match semantic_outcome {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(error = %e, "Semantic search failed, continuing with keyword only");
                metrics::record_backend_error(self.vector_store.name());
                degradations.push(format!("semantic search failed: {}", e));
                Vec::new()
            }
        };

        let keyword_results = match keyword_outcome {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(error = %e, "Keyword search failed, continuing with semantic only");
                metrics::record_backend_error(self.keyword_store.name());
                degradations.push(format!("keyword search failed: {}", e));
                Vec::new()
            }
        };

        let (results, mut fusion_info) =
            self.fusion_engine
                .fuse(semantic_results, keyword_results, query.top_k);

        if !degradations.is_empty() && fusion_info.error.is_none() {
            fusion_info.error = Some(degradations.join("; "));
        }

        (results, sources, Some(fusion_info))
    }

    async fn semantic_search_only(
        &self,
        query: &SearchQuery,
    ) -> (Vec<SearchResult>, Vec<String>, Option<FusionInfo>) {
        let sources = vec![self.vector_store.name().to_string()];

        match self.semantic_results(query).await {
            Ok(mut results) => {
                results.truncate(query.top_k);
                (results, sources, None)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Semantic search failed");
                metrics::record_backend_error(self.vector_store.name());
                let info = FusionInfo::degraded("none", format!("semantic search failed: {}", e));
                (Vec::new(), sources, Some(info))
            }
        }
    }

    async fn keyword_search_only(
        &self,
        query: &SearchQuery,
    ) -> (Vec<SearchResult>, Vec<String>, Option<FusionInfo>) {
        let sources = vec![self.keyword_store.name().to_string()];

        match self.keyword_results(query).await {
            Ok(mut results) => {
                results.truncate(query.top_k);
                (results, sources, None)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Keyword search failed");
                metrics::record_backend_error(self.keyword_store.name());
                let info = FusionInfo::degraded("none", format!("keyword search failed: {}", e));
                (Vec::new(), sources, Some(info))
            }
        }
    }

    /// Embed the query and fetch candidates from the vector store
    async fn semantic_results(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let embedding = self.embedder.embed(&query.normalized_text).await?;

        let filters = Self::backend_filters(query.filters.as_ref());
        let hits = self
            .vector_store
            .search(
                &embedding,
                self.top_k_per_source,
                query.min_similarity,
                filters.as_ref(),
            )
            .await?;

        let results: Vec<SearchResult> = hits
            .into_iter()
            .filter_map(|hit| Self::convert_hit(hit, SourceType::Semantic))
            .collect();

        tracing::debug!(count = results.len(), "Semantic candidates fetched");
        Ok(results)
    }

    /// Fetch candidates from the keyword store
    async fn keyword_results(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let filters = Self::backend_filters(query.filters.as_ref());
        let hits = self
            .keyword_store
            .search(&query.normalized_text, self.top_k_per_source, filters.as_ref())
            .await?;

        let results: Vec<SearchResult> = hits
            .into_iter()
            .filter_map(|hit| Self::convert_hit(hit, SourceType::Keyword))
            .collect();

        tracing::debug!(count = results.len(), "Keyword candidates fetched");
        Ok(results)
    }

    /// Map user-facing filter keys to stored payload fields
    ///
    /// `filetype` is stored as `type` in both backends; other keys pass
    /// through unchanged.
    fn backend_filters(
        filters: Option<&BTreeMap<String, String>>,
    ) -> Option<BTreeMap<String, String>> {
        let filters = filters?;
        if filters.is_empty() {
            return None;
        }

        let mapped = filters
            .iter()
            .map(|(key, value)| {
                let key = if key == "filetype" { "type" } else { key.as_str() };
                (key.to_string(), value.clone())
            })
            .collect();
        Some(mapped)
    }

    /// Convert one backend hit into a `SearchResult`
    ///
    /// A malformed hit is logged and skipped, never fatal to the batch.
    fn convert_hit(hit: StoreHit, source_type: SourceType) -> Option<SearchResult> {
        if hit.id.is_empty() {
            tracing::warn!("Skipping hit with empty chunk id");
            return None;
        }

        let payload = match hit.payload.as_object() {
            Some(payload) => payload,
            None => {
                tracing::warn!(chunk_id = %hit.id, "Skipping hit with non-object payload");
                return None;
            }
        };

        let str_field = |key: &str| {
            payload
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };
        let uint_field = |key: &str| payload.get(key).and_then(|v| v.as_u64());

        let content = str_field("content").unwrap_or_default();
        let file_path = str_field("source").unwrap_or_default();
        let file_name = Path::new(&file_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Some(SearchResult {
            chunk_id: hit.id,
            content,
            file_path,
            file_name,
            chunk_index: uint_field("chunk_index").unwrap_or(0) as usize,
            score: hit.score,
            semantic_score: (source_type == SourceType::Semantic).then_some(hit.score),
            keyword_score: (source_type == SourceType::Keyword).then_some(hit.score),
            source_type,
            page_number: uint_field("page_number").map(|n| n as u32),
            highlights: hit.highlights,
            file_type: str_field("type"),
            total_chunks: uint_field("total_chunks").map(|n| n as usize),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docfuse_common::embeddings::MockEmbedder;
    use docfuse_common::errors::AppError;
    use serde_json::json;

    fn hit(id: &str, score: f32) -> StoreHit {
        StoreHit {
            id: id.to_string(),
            score,
            payload: json!({
                "content": format!("content of {}", id),
                "source": format!("/docs/{}.pdf", id),
                "chunk_index": 0,
                "type": "pdf",
            }),
            highlights: None,
        }
    }

    /// Vector store double that enforces the score threshold like the
    /// real backend does
    struct StaticVectorStore {
        hits: Vec<StoreHit>,
    }

    #[async_trait::async_trait]
    impl VectorStore for StaticVectorStore {
        async fn search(
            &self,
            _vector: &[f32],
            limit: usize,
            score_threshold: f32,
            _filter: Option<&BTreeMap<String, String>>,
        ) -> Result<Vec<StoreHit>> {
            let mut hits: Vec<StoreHit> = self
                .hits
                .iter()
                .filter(|h| h.score >= score_threshold)
                .cloned()
                .collect();
            hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
            hits.truncate(limit);
            Ok(hits)
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    struct StaticKeywordStore {
        hits: Vec<StoreHit>,
    }

    #[async_trait::async_trait]
    impl KeywordStore for StaticKeywordStore {
        async fn search(
            &self,
            _query_text: &str,
            limit: usize,
            _filter: Option<&BTreeMap<String, String>>,
        ) -> Result<Vec<StoreHit>> {
            Ok(self.hits.iter().take(limit).cloned().collect())
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    struct FailingVectorStore;

    #[async_trait::async_trait]
    impl VectorStore for FailingVectorStore {
        async fn search(
            &self,
            _vector: &[f32],
            _limit: usize,
            _score_threshold: f32,
            _filter: Option<&BTreeMap<String, String>>,
        ) -> Result<Vec<StoreHit>> {
            Err(AppError::BackendUnavailable {
                backend: "qdrant".to_string(),
                message: "connection refused".to_string(),
            })
        }

        async fn health_check(&self) -> Result<()> {
            Err(AppError::BackendUnavailable {
                backend: "qdrant".to_string(),
                message: "connection refused".to_string(),
            })
        }
    }

    struct SlowKeywordStore {
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl KeywordStore for SlowKeywordStore {
        async fn search(
            &self,
            _query_text: &str,
            _limit: usize,
            _filter: Option<&BTreeMap<String, String>>,
        ) -> Result<Vec<StoreHit>> {
            tokio::time::sleep(self.delay).await;
            Ok(vec![hit("slow", 1.0)])
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    fn engine_with(
        vector: Arc<dyn VectorStore>,
        keyword: Arc<dyn KeywordStore>,
        config: RetrievalConfig,
    ) -> SearchEngine {
        SearchEngine::new(Arc::new(MockEmbedder::new(16)), vector, keyword, &config)
    }

    #[tokio::test]
    async fn test_hybrid_search_fuses_both_backends() {
        let engine = engine_with(
            Arc::new(StaticVectorStore {
                hits: vec![hit("A", 0.9), hit("B", 0.8)],
            }),
            Arc::new(StaticKeywordStore {
                hits: vec![hit("B", 12.0), hit("C", 9.0)],
            }),
            RetrievalConfig::default(),
        );

        let response = engine
            .search("safety procedures", "hybrid", Some(10), None, None)
            .await
            .unwrap();

        assert_eq!(response.mode, SearchMode::Hybrid);
        assert_eq!(response.sources_searched, vec!["qdrant", "elasticsearch"]);
        assert_eq!(response.fusion_method.as_deref(), Some("rrf"));

        // B appears in both lists and must rank first
        assert_eq!(response.results[0].chunk_id, "B");
        assert_eq!(response.results[0].source_type, SourceType::Hybrid);
        assert_eq!(response.total_found, 3);
    }

    #[tokio::test]
    async fn test_partial_backend_failure_keeps_other_results() {
        let engine = engine_with(
            Arc::new(FailingVectorStore),
            Arc::new(StaticKeywordStore {
                hits: vec![hit("K1", 5.0), hit("K2", 4.0)],
            }),
            RetrievalConfig::default(),
        );

        let response = engine
            .search("budget report", "hybrid", Some(10), None, None)
            .await
            .unwrap();

        assert_eq!(response.total_found, 2);
        assert_eq!(response.results[0].chunk_id, "K1");
        assert!(response.results.iter().all(|r| r.source_type == SourceType::Keyword));

        let info = response.fusion_params.unwrap();
        assert!(info.error.unwrap().contains("semantic search failed"));
    }

    #[tokio::test]
    async fn test_fan_out_timeout_returns_empty_degraded_response() {
        let config = RetrievalConfig {
            search_timeout_secs: 0,
            ..RetrievalConfig::default()
        };
        let engine = engine_with(
            Arc::new(StaticVectorStore { hits: vec![hit("A", 0.9)] }),
            Arc::new(SlowKeywordStore {
                delay: Duration::from_millis(500),
            }),
            config,
        );

        let response = engine
            .search("anything", "hybrid", Some(5), None, None)
            .await
            .unwrap();

        assert_eq!(response.total_found, 0);
        assert!(response.results.is_empty());
        let info = response.fusion_params.unwrap();
        assert!(info.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_semantic_only_respects_score_threshold() {
        let engine = engine_with(
            Arc::new(StaticVectorStore {
                hits: vec![hit("A", 0.9), hit("B", 0.4), hit("C", 0.6)],
            }),
            Arc::new(StaticKeywordStore { hits: vec![] }),
            RetrievalConfig::default(),
        );

        let response = engine
            .search("threshold test", "semantic", Some(10), Some(0.5), None)
            .await
            .unwrap();

        assert_eq!(response.sources_searched, vec!["qdrant"]);
        assert!(response.fusion_method.is_none());
        let ids: Vec<&str> = response.results.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C"]);
    }

    #[tokio::test]
    async fn test_keyword_only_truncates_to_top_k() {
        let hits: Vec<StoreHit> = (0..15).map(|i| hit(&format!("k{}", i), 15.0 - i as f32)).collect();
        let engine = engine_with(
            Arc::new(StaticVectorStore { hits: vec![] }),
            Arc::new(StaticKeywordStore { hits }),
            RetrievalConfig::default(),
        );

        let response = engine
            .search("lots of hits", "keyword", Some(3), None, None)
            .await
            .unwrap();

        assert_eq!(response.total_found, 3);
        assert_eq!(response.sources_searched, vec!["elasticsearch"]);
    }

    #[tokio::test]
    async fn test_validation_error_propagates() {
        let engine = engine_with(
            Arc::new(StaticVectorStore { hits: vec![] }),
            Arc::new(StaticKeywordStore { hits: vec![] }),
            RetrievalConfig::default(),
        );

        let outcome = engine.search("   ", "hybrid", None, None, None).await;
        assert!(matches!(outcome, Err(AppError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_malformed_hit_skipped_not_fatal() {
        let malformed = StoreHit {
            id: "bad".to_string(),
            score: 0.9,
            payload: json!("not an object"),
            highlights: None,
        };
        let engine = engine_with(
            Arc::new(StaticVectorStore {
                hits: vec![malformed, hit("good", 0.8)],
            }),
            Arc::new(StaticKeywordStore { hits: vec![] }),
            RetrievalConfig::default(),
        );

        let response = engine
            .search("mixed batch", "semantic", Some(10), None, None)
            .await
            .unwrap();

        assert_eq!(response.total_found, 1);
        assert_eq!(response.results[0].chunk_id, "good");
    }

    #[tokio::test]
    async fn test_sequential_mode_still_fuses() {
        let config = RetrievalConfig {
            concurrent_search: false,
            ..RetrievalConfig::default()
        };
        let engine = engine_with(
            Arc::new(StaticVectorStore { hits: vec![hit("A", 0.9)] }),
            Arc::new(StaticKeywordStore { hits: vec![hit("B", 3.0)] }),
            config,
        );

        let response = engine
            .search("sequential", "hybrid", Some(10), None, None)
            .await
            .unwrap();

        assert_eq!(response.total_found, 2);
    }

    #[tokio::test]
    async fn test_backend_health_reports_failures() {
        let engine = engine_with(
            Arc::new(FailingVectorStore),
            Arc::new(StaticKeywordStore { hits: vec![] }),
            RetrievalConfig::default(),
        );

        let statuses = engine.backend_health().await;
        assert_eq!(statuses.len(), 2);
        assert!(!statuses[0].healthy);
        assert!(statuses[1].healthy);
    }
}
