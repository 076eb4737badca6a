//! DocFuse Search Service
//!
//! HTTP service for document retrieval over a vector store (Qdrant)
//! and a keyword index (Elasticsearch), with rank fusion for hybrid
//! queries.

mod engine;
mod http;
mod query;
mod retrieval;

use docfuse_common::config::AppConfig;
use docfuse_common::embeddings::create_embedder;
use docfuse_common::metrics;
use engine::SearchEngine;
use http::AppState;
use metrics_exporter_prometheus::PrometheusBuilder;
use retrieval::{ElasticsearchStore, QdrantStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting DocFuse Search Service v{}", docfuse_common::VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    // Initialize metrics
    metrics::register_metrics();
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()?;
    info!("Metrics exporter listening on {}", metrics_addr);

    // Wire up the engine
    let embedder = create_embedder(&config.embedding)?;
    let vector_store = Arc::new(QdrantStore::new(&config.qdrant)?);
    let keyword_store = Arc::new(ElasticsearchStore::new(&config.elasticsearch)?);
    let engine = Arc::new(SearchEngine::new(
        embedder,
        vector_store,
        keyword_store,
        &config.retrieval,
    ));

    let app = create_router(AppState { engine });

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    http::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
