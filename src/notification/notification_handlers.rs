use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::{dto::SuccessResponse, error::Result, middleware::AuthUser, state::AppState};
use super::notification_models::{Notification, UnreadCountResponse};

/// Get all notifications for the authenticated user, newest first
pub async fn get_notifications(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<Notification>>> {
    let notifications = state.notification_service.list(user_id).await?;

    Ok(Json(notifications))
}

/// Mark one notification as read
pub async fn mark_notification_read(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<SuccessResponse>> {
    state.notification_service.mark_read(user_id, notification_id).await?;

    Ok(Json(SuccessResponse::ok()))
}

/// Mark every notification of the user as read
pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<SuccessResponse>> {
    let updated = state.notification_service.mark_all_read(user_id).await?;
    tracing::debug!("Marked {} notifications read for user {}", updated, user_id);

    Ok(Json(SuccessResponse::ok()))
}

pub async fn get_unread_count(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UnreadCountResponse>> {
    let count = state.notification_service.unread_count(user_id).await?;

    Ok(Json(UnreadCountResponse { count }))
}
