use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde_json::{json, Value};
use uuid::Uuid;

use super::AppState;
use crate::auth::Principal;
use crate::error::Result;
use crate::models::{Notification, NotificationQuery};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/read-all", patch(mark_all_read))
        .route("/notifications/stream", get(stream))
        .route("/notifications/{id}/read", patch(mark_read))
}

async fn list_notifications(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<Vec<Notification>>> {
    let notifications = state
        .notifications
        .get_for_recipient(principal.user_id, principal.organization_id, query)
        .await?;
    Ok(Json(notifications))
}

async fn unread_count(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Value>> {
    let count = state
        .notifications
        .get_unread_count(principal.user_id, principal.organization_id)
        .await?;
    Ok(Json(json!({ "unread_count": count })))
}

async fn mark_read(
    State(state): State<AppState>,
    principal: Principal,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<Notification>> {
    let notification = state
        .notifications
        .mark_read(notification_id, principal.user_id, principal.organization_id)
        .await?;
    Ok(Json(notification))
}

async fn mark_all_read(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Value>> {
    let updated = state
        .notifications
        .mark_all_read(principal.user_id, principal.organization_id)
        .await?;
    Ok(Json(json!({ "updated": updated })))
}

async fn stream(State(state): State<AppState>, principal: Principal) -> Result<Response> {
    let session = state.gateway.connect(&principal).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(session.into_stream()),
    )
        .into_response())
}
