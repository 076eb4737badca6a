//! Configuration management for DocFuse services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Qdrant (vector store) configuration
    #[serde(default)]
    pub qdrant: QdrantConfig,

    /// Elasticsearch (keyword store) configuration
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,

    /// Retrieval and fusion configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QdrantConfig {
    /// Qdrant REST URL
    #[serde(default = "default_qdrant_url")]
    pub url: String,

    /// Collection holding the chunk vectors
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ElasticsearchConfig {
    /// Elasticsearch REST URL
    #[serde(default = "default_elasticsearch_url")]
    pub url: String,

    /// Index holding the chunk text
    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Fusion method: rrf, weighted
    #[serde(default = "default_fusion_method")]
    pub fusion_method: String,

    /// RRF damping constant k
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,

    /// Weight for semantic scores (weighted fusion)
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,

    /// Weight for keyword scores (weighted fusion)
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,

    /// Candidates fetched from each backend before fusion
    #[serde(default = "default_top_k_per_source")]
    pub top_k_per_source: usize,

    /// Default final result count
    #[serde(default = "default_final_top_k")]
    pub final_top_k: usize,

    /// Default similarity floor for vector search
    #[serde(default = "default_min_similarity")]
    pub min_similarity_threshold: f32,

    /// Maximum accepted query length in characters
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,

    /// Dispatch backend searches concurrently
    #[serde(default = "default_concurrent_search")]
    pub concurrent_search: bool,

    /// Overall timeout for the hybrid fan-out in seconds
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_dimension() -> usize {
    1536
}
fn default_embedding_timeout() -> u64 {
    30
}
fn default_embedding_retries() -> u32 {
    3
}
fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection_name() -> String {
    "docfuse_chunks".to_string()
}
fn default_elasticsearch_url() -> String {
    "http://localhost:9200".to_string()
}
fn default_index_name() -> String {
    "docfuse_chunks".to_string()
}
fn default_store_timeout() -> u64 {
    10
}
fn default_fusion_method() -> String {
    "rrf".to_string()
}
fn default_rrf_k() -> f32 {
    60.0
}
fn default_semantic_weight() -> f32 {
    0.7
}
fn default_keyword_weight() -> f32 {
    0.3
}
fn default_top_k_per_source() -> usize {
    20
}
fn default_final_top_k() -> usize {
    10
}
fn default_min_similarity() -> f32 {
    0.0
}
fn default_max_query_length() -> usize {
    1000
}
fn default_concurrent_search() -> bool {
    true
}
fn default_search_timeout() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_json_logging() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_service_name() -> String {
    "docfuse-search".to_string()
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__QDRANT__URL=http://qdrant:6333
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

impl RetrievalConfig {
    /// Get the overall hybrid fan-out timeout as Duration
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
        }
    }
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            collection_name: default_collection_name(),
            timeout_secs: default_store_timeout(),
        }
    }
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: default_elasticsearch_url(),
            index_name: default_index_name(),
            timeout_secs: default_store_timeout(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fusion_method: default_fusion_method(),
            rrf_k: default_rrf_k(),
            semantic_weight: default_semantic_weight(),
            keyword_weight: default_keyword_weight(),
            top_k_per_source: default_top_k_per_source(),
            final_top_k: default_final_top_k(),
            min_similarity_threshold: default_min_similarity(),
            max_query_length: default_max_query_length(),
            concurrent_search: default_concurrent_search(),
            search_timeout_secs: default_search_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            embedding: EmbeddingConfig::default(),
            qdrant: QdrantConfig::default(),
            elasticsearch: ElasticsearchConfig::default(),
            retrieval: RetrievalConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
