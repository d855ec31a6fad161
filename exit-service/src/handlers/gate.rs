use crate::dtos::LimitParams;
use crate::middleware::PrincipalId;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

pub async fn lookup_pass(
    State(state): State<AppState>,
    PrincipalId(caller): PrincipalId,
    Path(credential): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let lookup = state
        .verifier
        .lookup_by_credential(caller, &credential)
        .await?;
    Ok(Json(lookup))
}

pub async fn mark_exited(
    State(state): State<AppState>,
    PrincipalId(caller): PrincipalId,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let request = state.verifier.mark_exited(caller, request_id).await?;
    Ok(Json(request))
}

pub async fn mark_returned(
    State(state): State<AppState>,
    PrincipalId(caller): PrincipalId,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let request = state.verifier.mark_returned(caller, request_id).await?;
    Ok(Json(request))
}

pub async fn recent_activity(
    State(state): State<AppState>,
    PrincipalId(caller): PrincipalId,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, AppError> {
    let views = state
        .verifier
        .recent_gate_activity(caller, params.limit)
        .await?;
    Ok(Json(views))
}
