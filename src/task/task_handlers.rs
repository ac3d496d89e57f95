use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::{dto::MessageResponse, error::Result, middleware::AuthUser, state::AppState};
use super::{
    task_dto::{CreateTaskRequest, UpdateTaskRequest, UserTasksResponse},
    task_models::Task,
};

/// Create a new task
pub async fn create_task(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse> {
    let task = state.task_service.create_task(user_id, payload).await?;

    Ok((StatusCode::CREATED, Json(task)))
}

/// Tasks of the authenticated user grouped as assigned, created and overdue
pub async fn get_my_tasks(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UserTasksResponse>> {
    let tasks = state.task_service.list_for_user(user_id).await?;

    Ok(Json(tasks))
}

/// Partially update a task; creator or assignee only
pub async fn update_task(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(task_id): Path<Uuid>,
    Json(payload): Json<UpdateTaskRequest>,
) -> Result<Json<Task>> {
    let task = state.task_service.update_task(user_id, task_id, payload).await?;

    Ok(Json(task))
}

/// Delete a task; creator only
pub async fn delete_task(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<MessageResponse>> {
    state.task_service.delete_task(user_id, task_id).await?;

    Ok(Json(MessageResponse::new("Task deleted successfully")))
}
