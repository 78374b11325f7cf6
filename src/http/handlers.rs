use super::AppState;
use crate::errors::{AppError, AppResult};
use crate::models::{
    ActivityView, AuthResponse, ChangePasswordPayload, CreateProjectPayload, CreateTaskPayload, ListActivitiesFilters,
    ListNotificationsFilters, ListTasksFilters, LoginPayload, MessageResponse, NotificationView, ProjectView,
    RegisterPayload, TaskView, UnreadCountResponse, UpdateProfilePayload, UpdateProjectPayload, UpdateTaskPayload,
    UserProfile, UserSummary,
};
use crate::policy::Actor;
use crate::tracker::TrackerCore;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};

const ENDPOINTS: &[&str] = &[
    "/auth", "/projects", "/tasks", "/activities", "/notifications",
];

/// Runs a store-backed core call on the blocking pool.
async fn run_blocking<T, F>(state: &AppState, op: F) -> AppResult<T>
where
    F: FnOnce(&TrackerCore) -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    let core = state.core.clone();
    match tokio::task::spawn_blocking(move || op(&core)).await {
        Ok(result) => result,
        Err(error) => Err(AppError::Internal(format!("blocking task failed: {}", error))),
    }
}

pub(super) async fn landing() -> Json<Value> {
    Json(json!({
        "message": "Team task tracker API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ENDPOINTS,
    }))
}

pub(super) async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub(super) async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterPayload>, JsonRejection>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let Json(payload) = payload?;
    let created = state.core.register(payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(super) async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginPayload>, JsonRejection>,
) -> AppResult<Json<AuthResponse>> {
    let Json(payload) = payload?;
    Ok(Json(state.core.login(payload).await?))
}

pub(super) async fn logout(
    State(state): State<AppState>,
    _actor: Actor,
    headers: HeaderMap,
) -> AppResult<Json<MessageResponse>> {
    let authorization = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    let token = state.core.guard.bearer_token(authorization)?;
    Ok(Json(state.core.logout(token).await))
}

pub(super) async fn me(State(state): State<AppState>, actor: Actor) -> AppResult<Json<UserProfile>> {
    Ok(Json(run_blocking(&state, move |core| core.current_user(&actor)).await?))
}

pub(super) async fn users(State(state): State<AppState>, _actor: Actor) -> AppResult<Json<Vec<UserSummary>>> {
    Ok(Json(run_blocking(&state, |core| core.list_users()).await?))
}

pub(super) async fn update_profile(
    State(state): State<AppState>,
    actor: Actor,
    payload: Result<Json<UpdateProfilePayload>, JsonRejection>,
) -> AppResult<Json<UserProfile>> {
    let Json(payload) = payload?;
    Ok(Json(
        run_blocking(&state, move |core| core.update_profile(&actor, payload)).await?,
    ))
}

pub(super) async fn change_password(
    State(state): State<AppState>,
    actor: Actor,
    payload: Result<Json<ChangePasswordPayload>, JsonRejection>,
) -> AppResult<Json<MessageResponse>> {
    let Json(payload) = payload?;
    Ok(Json(
        run_blocking(&state, move |core| core.change_password(&actor, payload)).await?,
    ))
}

pub(super) async fn list_projects(State(state): State<AppState>, _actor: Actor) -> AppResult<Json<Vec<ProjectView>>> {
    Ok(Json(run_blocking(&state, |core| core.list_projects()).await?))
}

pub(super) async fn create_project(
    State(state): State<AppState>,
    actor: Actor,
    payload: Result<Json<CreateProjectPayload>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ProjectView>)> {
    let Json(payload) = payload?;
    let created = run_blocking(&state, move |core| core.create_project(&actor, payload)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(super) async fn get_project(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<String>,
) -> AppResult<Json<ProjectView>> {
    Ok(Json(run_blocking(&state, move |core| core.get_project(&id)).await?))
}

pub(super) async fn update_project(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    payload: Result<Json<UpdateProjectPayload>, JsonRejection>,
) -> AppResult<Json<ProjectView>> {
    let Json(payload) = payload?;
    Ok(Json(
        run_blocking(&state, move |core| core.update_project(&actor, &id, payload)).await?,
    ))
}

pub(super) async fn delete_project(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    Ok(Json(
        run_blocking(&state, move |core| core.delete_project(&actor, &id)).await?,
    ))
}

pub(super) async fn list_tasks(
    State(state): State<AppState>,
    _actor: Actor,
    filters: Result<Query<ListTasksFilters>, QueryRejection>,
) -> AppResult<Json<Vec<TaskView>>> {
    let Query(filters) = filters?;
    Ok(Json(run_blocking(&state, move |core| core.list_tasks(&filters)).await?))
}

pub(super) async fn create_task(
    State(state): State<AppState>,
    actor: Actor,
    payload: Result<Json<CreateTaskPayload>, JsonRejection>,
) -> AppResult<(StatusCode, Json<TaskView>)> {
    let Json(payload) = payload?;
    let created = run_blocking(&state, move |core| core.create_task(&actor, payload)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(super) async fn get_task(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<String>,
) -> AppResult<Json<TaskView>> {
    Ok(Json(run_blocking(&state, move |core| core.get_task(&id)).await?))
}

pub(super) async fn update_task(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    payload: Result<Json<UpdateTaskPayload>, JsonRejection>,
) -> AppResult<Json<TaskView>> {
    let Json(payload) = payload?;
    Ok(Json(
        run_blocking(&state, move |core| core.update_task(&actor, &id, payload)).await?,
    ))
}

pub(super) async fn delete_task(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    Ok(Json(run_blocking(&state, move |core| core.delete_task(&actor, &id)).await?))
}

pub(super) async fn list_activities(
    State(state): State<AppState>,
    _actor: Actor,
    filters: Result<Query<ListActivitiesFilters>, QueryRejection>,
) -> AppResult<Json<Vec<ActivityView>>> {
    let Query(filters) = filters?;
    Ok(Json(
        run_blocking(&state, move |core| core.list_activities(&filters)).await?,
    ))
}

pub(super) async fn list_notifications(
    State(state): State<AppState>,
    actor: Actor,
    filters: Result<Query<ListNotificationsFilters>, QueryRejection>,
) -> AppResult<Json<Vec<NotificationView>>> {
    let Query(filters) = filters?;
    Ok(Json(
        run_blocking(&state, move |core| core.list_notifications(&actor, &filters)).await?,
    ))
}

pub(super) async fn unread_count(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<UnreadCountResponse>> {
    Ok(Json(
        run_blocking(&state, move |core| core.unread_notification_count(&actor)).await?,
    ))
}

pub(super) async fn mark_read(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> AppResult<Json<NotificationView>> {
    Ok(Json(
        run_blocking(&state, move |core| core.mark_notification_read(&actor, &id)).await?,
    ))
}

pub(super) async fn mark_all_read(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<MessageResponse>> {
    Ok(Json(
        run_blocking(&state, move |core| core.mark_all_notifications_read(&actor)).await?,
    ))
}

pub(super) async fn delete_notification(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    Ok(Json(
        run_blocking(&state, move |core| core.delete_notification(&actor, &id)).await?,
    ))
}
