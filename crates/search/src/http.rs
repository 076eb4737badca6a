//! HTTP API surface
//!
//! Thin axum layer over the search engine: request parsing and
//! validation, response shaping, health and readiness probes. All
//! retrieval semantics live in the engine.

use crate::engine::{BackendStatus, SearchEngine};
use crate::retrieval::{FusionInfo, SearchMode, SearchResult};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use docfuse_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use validator::Validate;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SearchEngine>,
}

fn default_mode() -> String {
    "hybrid".to_string()
}

/// Search request body for `POST /search`
#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    #[validate(length(min = 1, max = 1000, message = "query must be 1-1000 characters"))]
    pub query: String,

    #[serde(default = "default_mode")]
    pub mode: String,

    #[validate(range(min = 1, max = 100, message = "top_k must be 1-100"))]
    pub top_k: Option<usize>,

    #[validate(range(min = 0.0, max = 1.0))]
    pub min_similarity: Option<f32>,

    pub filters: Option<BTreeMap<String, String>>,
}

/// Query parameters for `GET /search`
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,

    #[serde(default = "default_mode")]
    pub mode: String,

    pub top_k: Option<usize>,
    pub min_similarity: Option<f32>,

    pub filetype: Option<String>,
    pub source: Option<String>,
}

/// Search metadata returned alongside the result list
#[derive(Debug, Serialize)]
pub struct SearchMetadata {
    pub total_found: usize,
    pub search_time_ms: f64,
    pub sources_searched: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fusion_method: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fusion_params: Option<FusionInfo>,
}

/// API response for both search endpoints
#[derive(Debug, Serialize)]
pub struct ApiSearchResponse {
    pub query: String,
    pub mode: SearchMode,
    pub results: Vec<SearchResult>,
    pub metadata: SearchMetadata,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    status: &'static str,
    backends: Vec<BackendStatus>,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/search", get(search_get).post(search_post))
        .route("/health", get(health))
        .route("/ready", get(readiness))
        .with_state(state)
}

/// POST /search
async fn search_post(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<ApiSearchResponse>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let response = state
        .engine
        .search(
            &request.query,
            &request.mode,
            request.top_k,
            request.min_similarity,
            request.filters,
        )
        .await?;

    Ok(Json(shape_response(response)))
}

/// GET /search
///
/// Convenience form for manual queries; filters are flattened into the
/// `filetype` and `source` parameters.
async fn search_get(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ApiSearchResponse>> {
    let mut filters = BTreeMap::new();
    if let Some(filetype) = params.filetype {
        filters.insert("filetype".to_string(), filetype);
    }
    if let Some(source) = params.source {
        filters.insert("source".to_string(), source);
    }
    let filters = if filters.is_empty() { None } else { Some(filters) };

    let response = state
        .engine
        .search(
            &params.q,
            &params.mode,
            params.top_k,
            params.min_similarity,
            filters,
        )
        .await?;

    Ok(Json(shape_response(response)))
}

fn shape_response(response: crate::retrieval::SearchResponse) -> ApiSearchResponse {
    ApiSearchResponse {
        query: response.query,
        mode: response.mode,
        results: response.results,
        metadata: SearchMetadata {
            total_found: response.total_found,
            search_time_ms: response.search_time_ms,
            sources_searched: response.sources_searched,
            fusion_method: response.fusion_method,
            fusion_params: response.fusion_params,
        },
    }
}

/// GET /health - liveness probe, always succeeds while the process runs
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "docfuse-search",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /ready - readiness probe, checks both backend stores
///
/// Returns 503 when any backend is unreachable so orchestrators stop
/// routing traffic here until the stores recover.
async fn readiness(State(state): State<AppState>) -> Response {
    let backends = state.engine.backend_health().await;
    let all_healthy = backends.iter().all(|b| b.healthy);

    let status = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadinessResponse {
        status: if all_healthy { "ready" } else { "degraded" },
        backends,
    };

    (status, Json(body)).into_response()
}
