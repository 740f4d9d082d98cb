// Activity query API
//
// Paginated read over the audit trail: filterable by user, entity, event
// type, and time range, returned newest first.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use tasklane_core::{ActivityFilter, ActivityPage};
use tasklane_store::ActivityStore;

use super::common::ErrorResponse;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 200;

/// App state for activity routes
#[derive(Clone)]
pub struct AppState {
    pub activity: Arc<dyn ActivityStore>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/activity", get(list_activity))
        .with_state(state)
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListActivityQuery {
    /// User whose activity to list (required)
    pub user_id: String,
    /// Filter by entity type (task, reminder)
    pub entity_type: Option<String>,
    /// Filter by a specific entity
    pub entity_id: Option<Uuid>,
    /// Filter by event type (e.g. task.completed)
    pub event_type: Option<String>,
    /// Entries at or after this instant
    pub start: Option<DateTime<Utc>>,
    /// Entries at or before this instant
    pub end: Option<DateTime<Utc>>,
    /// 1-indexed page number
    pub page: Option<u32>,
    /// Page size (max 200)
    pub limit: Option<u32>,
}

/// GET /v1/activity - Paginated activity log query
#[utoipa::path(
    get,
    path = "/v1/activity",
    params(ListActivityQuery),
    responses(
        (status = 200, description = "One page of activity entries", body = ActivityPage),
        (status = 400, description = "Invalid query", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "activity"
)]
pub async fn list_activity(
    State(state): State<AppState>,
    Query(query): Query<ListActivityQuery>,
) -> Result<Json<ActivityPage>, (StatusCode, Json<ErrorResponse>)> {
    if query.user_id.is_empty() {
        return Err(
            ErrorResponse::new("user_id is required").into_response(StatusCode::BAD_REQUEST)
        );
    }

    let filter = ActivityFilter {
        user_id: query.user_id,
        entity_type: query.entity_type,
        entity_id: query.entity_id,
        event_type: query.event_type,
        start: query.start,
        end: query.end,
    };
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let result = state.activity.query(&filter, page, limit).await.map_err(|e| {
        tracing::error!(error = %e, "activity query failed");
        ErrorResponse::new("failed to query activity log")
            .into_response(StatusCode::INTERNAL_SERVER_ERROR)
    })?;

    Ok(Json(result))
}
