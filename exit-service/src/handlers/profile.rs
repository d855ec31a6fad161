use crate::middleware::PrincipalId;
use crate::models::ProfileUpdate;
use crate::startup::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

pub async fn me(
    State(state): State<AppState>,
    PrincipalId(caller): PrincipalId,
) -> Result<impl IntoResponse, AppError> {
    let identity = state.identity.identity(caller).await?;
    Ok(Json(identity))
}

pub async fn update_profile(
    State(state): State<AppState>,
    PrincipalId(caller): PrincipalId,
    Json(update): Json<ProfileUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let profile = state.identity.update_profile(caller, update).await?;
    Ok(Json(profile))
}

pub async fn list_halls(
    State(state): State<AppState>,
    _caller: PrincipalId,
) -> Result<impl IntoResponse, AppError> {
    let halls = state.identity.list_halls().await?;
    Ok(Json(halls))
}
