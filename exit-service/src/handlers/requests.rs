use crate::dtos::{ReviewRequest, StatusParams};
use crate::middleware::PrincipalId;
use crate::models::ExitRequestDraft;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

pub async fn submit_request(
    State(state): State<AppState>,
    PrincipalId(caller): PrincipalId,
    Json(draft): Json<ExitRequestDraft>,
) -> Result<impl IntoResponse, AppError> {
    let request = state.engine.submit(caller, draft).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn my_requests(
    State(state): State<AppState>,
    PrincipalId(caller): PrincipalId,
) -> Result<impl IntoResponse, AppError> {
    let requests = state.engine.my_requests(caller).await?;
    Ok(Json(requests))
}

pub async fn get_request(
    State(state): State<AppState>,
    PrincipalId(caller): PrincipalId,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let view = state.engine.request_detail(caller, request_id).await?;
    Ok(Json(view))
}

pub async fn edit_request(
    State(state): State<AppState>,
    PrincipalId(caller): PrincipalId,
    Path(request_id): Path<Uuid>,
    Json(draft): Json<ExitRequestDraft>,
) -> Result<impl IntoResponse, AppError> {
    let request = state.engine.edit(caller, request_id, draft).await?;
    Ok(Json(request))
}

pub async fn withdraw_request(
    State(state): State<AppState>,
    PrincipalId(caller): PrincipalId,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.engine.withdraw(caller, request_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn review_request(
    State(state): State<AppState>,
    PrincipalId(caller): PrincipalId,
    Path(request_id): Path<Uuid>,
    Json(body): Json<ReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request = state
        .engine
        .review(caller, request_id, body.decision)
        .await?;
    Ok(Json(request))
}

pub async fn review_queue(
    State(state): State<AppState>,
    PrincipalId(caller): PrincipalId,
    Query(params): Query<StatusParams>,
) -> Result<impl IntoResponse, AppError> {
    let views = state
        .engine
        .review_queue(caller, params.status, params.limit)
        .await?;
    Ok(Json(views))
}
