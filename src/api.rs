//! Listing API
//!
//! HTTP surface of the three listings, served with axum:
//!
//! - `GET /api/articles/{articleId}/comments`
//! - `GET /api/articles`
//! - `GET /api/interests`
//!
//! Every route accepts `orderBy`, `direction`, `cursor` and `limit`. The
//! `Monew-Request-User-ID` header names the user flags are rendered for.
//! Errors are JSON `{ "code", "message" }`: 400 for client errors, 503 for
//! retryable ones, 500 otherwise.

use std::sync::Arc;

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::domain::records::{Article, Comment, Filter, Interest};
use crate::error::{Error, Result};
use crate::listing::{ArticleListing, CommentListing, InterestListing, PageRequest};
use crate::pagination::Page;

/// Header carrying the id of the user a page is rendered for.
pub const REQUESTER_HEADER: &str = "Monew-Request-User-ID";

// =============================================================================
// State
// =============================================================================

/// Listings shared by every request.
#[derive(Clone)]
pub struct ApiState {
    comments: Arc<CommentListing>,
    articles: Arc<ArticleListing>,
    interests: Arc<InterestListing>,
}

impl ApiState {
    pub fn new(
        comments: CommentListing,
        articles: ArticleListing,
        interests: InterestListing,
    ) -> Self {
        Self {
            comments: Arc::new(comments),
            articles: Arc::new(articles),
            interests: Arc::new(interests),
        }
    }
}

/// Router for the listing routes.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/articles/{article_id}/comments", get(list_comments))
        .route("/api/articles", get(list_articles))
        .route("/api/interests", get(list_interests))
        .with_state(state)
}

// =============================================================================
// Query Parameters
// =============================================================================

/// Query of `GET /api/articles/{articleId}/comments`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentParams {
    pub order_by: Option<String>,
    pub direction: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

/// Query of `GET /api/articles`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleParams {
    pub keyword: Option<String>,
    /// Comma-separated source names.
    pub source_in: Option<String>,
    pub publish_date_from: Option<DateTime<Utc>>,
    pub publish_date_to: Option<DateTime<Utc>>,
    pub order_by: Option<String>,
    pub direction: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

/// Query of `GET /api/interests`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestParams {
    pub keyword: Option<String>,
    pub order_by: Option<String>,
    pub direction: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

fn page_request(
    filter: Filter,
    order_by: Option<String>,
    direction: Option<String>,
    cursor: Option<String>,
    limit: Option<i64>,
    requester: Option<Uuid>,
) -> PageRequest {
    PageRequest {
        filter,
        order_by,
        direction,
        cursor,
        limit: limit.unwrap_or(0),
        requester,
    }
}

fn requester(headers: &HeaderMap) -> Result<Option<Uuid>> {
    let Some(value) = headers.get(REQUESTER_HEADER) else {
        return Ok(None);
    };
    let invalid = |reason: String| Error::InvalidParameter {
        name: REQUESTER_HEADER.to_string(),
        reason,
    };
    let raw = value.to_str().map_err(|e| invalid(e.to_string()))?;
    Uuid::parse_str(raw.trim())
        .map(Some)
        .map_err(|e| invalid(e.to_string()))
}

fn query_error(rejection: QueryRejection) -> Error {
    Error::InvalidParameter {
        name: "query".to_string(),
        reason: rejection.body_text(),
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn list_comments(
    State(state): State<ApiState>,
    article_id: std::result::Result<Path<Uuid>, PathRejection>,
    params: std::result::Result<Query<CommentParams>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Json<Page<Comment>>> {
    let Path(article_id) = article_id.map_err(|rejection| Error::InvalidParameter {
        name: "articleId".to_string(),
        reason: rejection.body_text(),
    })?;
    let Query(params) = params.map_err(query_error)?;

    let request = page_request(
        Filter::for_resource(article_id),
        params.order_by,
        params.direction,
        params.cursor,
        params.limit,
        requester(&headers)?,
    );
    Ok(Json(state.comments.get_page(&request).await?))
}

async fn list_articles(
    State(state): State<ApiState>,
    params: std::result::Result<Query<ArticleParams>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Json<Page<Article>>> {
    let Query(params) = params.map_err(query_error)?;

    let sources: Vec<String> = params
        .source_in
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let mut filter = Filter::default()
        .with_sources(sources)
        .published_between(params.publish_date_from, params.publish_date_to);
    filter.keyword = params.keyword;

    let request = page_request(
        filter,
        params.order_by,
        params.direction,
        params.cursor,
        params.limit,
        requester(&headers)?,
    );
    Ok(Json(state.articles.get_page(&request).await?))
}

async fn list_interests(
    State(state): State<ApiState>,
    params: std::result::Result<Query<InterestParams>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Json<Page<Interest>>> {
    let Query(params) = params.map_err(query_error)?;

    let mut filter = Filter::default();
    filter.keyword = params.keyword;

    let request = page_request(
        filter,
        params.order_by,
        params.direction,
        params.cursor,
        params.limit,
        requester(&headers)?,
    );
    Ok(Json(state.interests.get_page(&request).await?))
}

// =============================================================================
// Error Responses
// =============================================================================

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl Error {
    /// HTTP status this error is reported with.
    pub fn status(&self) -> StatusCode {
        if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else if self.is_retryable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(code = self.code(), error = %self, "Listing request failed");
        }
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Tests
// =============================================================================
