//! Mobility Feeds HTTP service.
//!
//! Serves the GTFS feed catalogue stored through `feeds-db`.

pub mod api_feeds;
pub mod config;
pub mod repository;

use axum::{routing::get, Extension, Json, Router};
use feeds_db::Database;
use repository::FeedRepository;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Feed catalogue access.
    pub feeds: FeedRepository,
}

impl AppState {
    pub fn new(database: Arc<Database>) -> Self {
        Self {
            feeds: FeedRepository::new(database),
        }
    }
}

/// Health check handler.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/gtfs_feeds", get(api_feeds::list_gtfs_feeds_handler))
        .route("/v1/gtfs_feeds/{id}", get(api_feeds::get_gtfs_feed_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
