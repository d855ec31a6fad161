use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use crate::services::LifecycleError;
use service_core::error::AppError;
use uuid::Uuid;

pub const PRINCIPAL_HEADER: &str = "X-User-ID";

/// Authenticated principal taken from the `X-User-ID` header.
///
/// The header is set by the trusted front end after it authenticates the
/// user; a missing or malformed value is rejected with 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrincipalId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for PrincipalId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(PRINCIPAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                LifecycleError::Unauthenticated(
                    "Missing X-User-ID header (required from BFF)".to_string(),
                )
            })?;

        let principal_id = Uuid::parse_str(raw.trim()).map_err(|_| {
            LifecycleError::Unauthenticated("X-User-ID header is not a valid UUID".to_string())
        })?;

        tracing::Span::current().record("user_id", raw);

        Ok(PrincipalId(principal_id))
    }
}
