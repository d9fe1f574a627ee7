//! GTFS feed listing handlers.

use crate::repository::{FeedFilter, DEFAULT_LIMIT, MAX_LIMIT, ORDER_FIELDS};
use crate::AppState;
use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use feeds_db::{DbError, ErrorKind, Feed};
use feeds_types::OrderBy;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// Query parameters for `GET /v1/gtfs_feeds`.
#[derive(Debug, Default, Deserialize)]
pub struct ListFeedsParams {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub country_code: Option<String>,
    pub subdivision_name: Option<String>,
    pub municipality: Option<String>,
    pub provider: Option<String>,
    /// `[+|-]field`, where field is one of `id`, `provider`,
    /// `country_code`, `external_id`.
    pub order_by: Option<String>,
}

impl ListFeedsParams {
    /// Validates the parameters and builds the repository filter.
    ///
    /// # Errors
    ///
    /// `ApiError::BadRequest` for a zero or oversized limit, or a malformed
    /// or unsupported `order_by`.
    pub fn into_filter(self) -> Result<FeedFilter, ApiError> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if limit == 0 || limit > MAX_LIMIT {
            return Err(ApiError::BadRequest(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
        let order = match self.order_by.as_deref() {
            Some(value) => OrderBy::parse_allowed(value, ORDER_FIELDS)
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
            None => OrderBy::ascending("id"),
        };

        Ok(FeedFilter {
            limit,
            offset: self.offset.unwrap_or(0),
            country_code: non_empty(self.country_code),
            subdivision_name: non_empty(self.subdivision_name),
            municipality: non_empty(self.municipality),
            provider: non_empty(self.provider),
            order,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e.kind() {
            ErrorKind::NotFound => ApiError::NotFound(e.to_string()),
            _ => {
                tracing::error!(error = %e, "feed query failed");
                ApiError::InternalServerError("database unavailable".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Handler for `GET /v1/gtfs_feeds`.
pub async fn list_gtfs_feeds_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ListFeedsParams>,
) -> Result<Json<Vec<Feed>>, ApiError> {
    let filter = params.into_filter()?;
    let feeds = state.feeds.clone();

    let result = tokio::task::spawn_blocking(move || feeds.list_gtfs_feeds(&filter))
        .await
        .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))?;

    Ok(Json(result?))
}

/// Handler for `GET /v1/gtfs_feeds/{id}`.
pub async fn get_gtfs_feed_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Feed>, ApiError> {
    let feeds = state.feeds.clone();

    let result = tokio::task::spawn_blocking(move || feeds.get_gtfs_feed(&id))
        .await
        .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))?;

    Ok(Json(result?))
}
