use crate::dtos::{OverdueParams, RequestListParams, UserListParams};
use crate::middleware::PrincipalId;
use crate::startup::AppState;
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

pub async fn summary(
    State(state): State<AppState>,
    PrincipalId(caller): PrincipalId,
) -> Result<impl IntoResponse, AppError> {
    let summary = state.oversight.summary(caller).await?;
    Ok(Json(summary))
}

pub async fn list_requests(
    State(state): State<AppState>,
    PrincipalId(caller): PrincipalId,
    Query(params): Query<RequestListParams>,
) -> Result<impl IntoResponse, AppError> {
    let views = state
        .oversight
        .list_requests(caller, params.into())
        .await?;
    Ok(Json(views))
}

pub async fn list_users(
    State(state): State<AppState>,
    PrincipalId(caller): PrincipalId,
    Query(params): Query<UserListParams>,
) -> Result<impl IntoResponse, AppError> {
    let users = state.oversight.list_users(caller, params.role).await?;
    Ok(Json(users))
}

pub async fn overdue(
    State(state): State<AppState>,
    PrincipalId(caller): PrincipalId,
    Query(params): Query<OverdueParams>,
) -> Result<impl IntoResponse, AppError> {
    let views = state.oversight.overdue(caller, params.as_of).await?;
    Ok(Json(views))
}
