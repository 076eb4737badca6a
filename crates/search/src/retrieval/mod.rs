//! Hybrid retrieval core
//!
//! Provides three retrieval modes:
//! - Semantic search (vector similarity via embeddings, Qdrant)
//! - Keyword search (lexical matching, Elasticsearch)
//! - Hybrid search (rank fusion of both)

mod fusion;
mod keyword;
mod vector;

pub use fusion::{FusionEngine, FusionMethod};
pub use keyword::ElasticsearchStore;
pub use vector::QdrantStore;

use docfuse_common::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which backends a search consults
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Combined semantic + keyword search with fusion
    Hybrid,
    /// Vector similarity search only
    Semantic,
    /// Lexical keyword search only
    Keyword,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Hybrid => "hybrid",
            SearchMode::Semantic => "semantic",
            SearchMode::Keyword => "keyword",
        }
    }
}

/// Provenance tag: which backend(s) produced a result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Semantic,
    Keyword,
    /// The chunk appeared in both source lists
    Hybrid,
}

/// A validated, immutable search request
///
/// Constructed once per request by the query processor and never
/// mutated afterward. `normalized_text` is guaranteed non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Query as typed by the user
    pub raw_text: String,

    /// Lowercased, whitespace-collapsed, stripped query text
    pub normalized_text: String,

    /// Which backends to query
    pub mode: SearchMode,

    /// Desired result count
    pub top_k: usize,

    /// Score floor applied to vector-store scores only
    pub min_similarity: f32,

    /// Exact-match metadata constraints (e.g. filetype, source)
    pub filters: Option<BTreeMap<String, String>>,
}

/// One retrieved chunk with attribution
///
/// Per-source scores live in dedicated fields and are never
/// overwritten; `score` holds the comparable value for the current
/// stage (raw backend score for single-mode searches, fused score
/// after fusion).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Unique across both stores; the same logical chunk carries the
    /// same id in the vector store and the keyword index
    pub chunk_id: String,

    /// Chunk text
    pub content: String,

    /// Source file path
    pub file_path: String,

    /// Source file name (basename of `file_path`)
    pub file_name: String,

    /// Chunk position within the source file
    pub chunk_index: usize,

    /// Comparable score for the current stage
    pub score: f32,

    /// Raw cosine similarity from the vector store, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f32>,

    /// Raw BM25-like score from the keyword store, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_score: Option<f32>,

    /// Which backend(s) produced this result
    pub source_type: SourceType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,

    /// Matched fragments from the keyword store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlights: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
}

/// Diagnostic information about a fusion run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FusionInfo {
    /// Fusion method that produced the ranking
    pub method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rrf_k: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_weight: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_weight: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_count: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_count: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_unique: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap_count: Option<usize>,

    /// Set when the search degraded (backend failure, timeout,
    /// fusion fallback); lets downstream consumers distinguish
    /// "no results" from "search temporarily degraded"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FusionInfo {
    /// Diagnostic for a degraded search that never ran fusion
    pub fn degraded(method: &str, error: impl Into<String>) -> Self {
        Self {
            method: method.to_string(),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Complete search response with results and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub mode: SearchMode,

    /// Rank order, best first
    pub results: Vec<SearchResult>,

    pub total_found: usize,
    pub search_time_ms: f64,

    /// Which backends were consulted ("qdrant", "elasticsearch")
    pub sources_searched: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fusion_method: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fusion_params: Option<FusionInfo>,
}

impl SearchResponse {
    pub fn has_results(&self) -> bool {
        !self.results.is_empty()
    }
}

/// Raw hit from a backend store, prior to conversion
#[derive(Debug, Clone, Deserialize)]
pub struct StoreHit {
    pub id: String,
    pub score: f32,
    pub payload: serde_json::Value,
    pub highlights: Option<Vec<String>>,
}

/// Vector similarity store (semantic backend)
///
/// Long-lived and shared read-only across concurrent searches.
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    /// Search for the nearest chunks, highest score first
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
        filter: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<StoreHit>>;

    /// Cheap connectivity probe for readiness checks
    async fn health_check(&self) -> Result<()>;

    /// Backend name used in `sources_searched`
    fn name(&self) -> &'static str {
        "qdrant"
    }
}

/// Keyword (lexical) store
///
/// Long-lived and shared read-only across concurrent searches.
#[async_trait::async_trait]
pub trait KeywordStore: Send + Sync {
    /// Full-text search, highest score first
    async fn search(
        &self,
        query_text: &str,
        limit: usize,
        filter: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<StoreHit>>;

    /// Cheap connectivity probe for readiness checks
    async fn health_check(&self) -> Result<()>;

    /// Backend name used in `sources_searched`
    fn name(&self) -> &'static str {
        "elasticsearch"
    }
}
