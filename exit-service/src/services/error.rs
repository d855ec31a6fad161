//! Errors raised by the exit pass engine.

use crate::models::RequestStatus;
use crate::services::store::StoreError;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Invalid field '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("Requester already has an active exit request")]
    ActiveRequestExists,

    #[error("Requester has no hall affiliation")]
    HallNotSet,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Exit request is {actual}, expected {expected}")]
    InvalidState {
        expected: RequestStatus,
        actual: RequestStatus,
    },

    #[error("Profile not found for principal {0}")]
    ProfileNotFound(Uuid),

    #[error("No authenticated principal: {0}")]
    Unauthenticated(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl LifecycleError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        LifecycleError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn request_not_found(request_id: Uuid) -> Self {
        LifecycleError::NotFound(format!("Exit request {}", request_id))
    }

    /// Map a failed conditional write on `request_id` into engine terms.
    pub fn from_conditional(err: StoreError, request_id: Uuid, expected: RequestStatus) -> Self {
        match err {
            StoreError::NotFound => Self::request_not_found(request_id),
            StoreError::PreconditionFailed { actual } => {
                LifecycleError::InvalidState { expected, actual }
            }
            other => LifecycleError::Store(other),
        }
    }

    /// Label used for the error counter.
    pub fn error_type(&self) -> &'static str {
        match self {
            LifecycleError::Validation { .. } => "validation",
            LifecycleError::ActiveRequestExists => "active_request_exists",
            LifecycleError::HallNotSet => "hall_not_set",
            LifecycleError::NotFound(_) => "not_found",
            LifecycleError::Forbidden(_) => "forbidden",
            LifecycleError::InvalidState { .. } => "invalid_state",
            LifecycleError::ProfileNotFound(_) => "profile_not_found",
            LifecycleError::Unauthenticated(_) => "unauthenticated",
            LifecycleError::Store(_) => "store",
        }
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Validation { field, message } => {
                AppError::InvalidField { field, message }
            }
            LifecycleError::Forbidden(_) => AppError::Forbidden(anyhow::anyhow!(err.to_string())),
            LifecycleError::Unauthenticated(_) => {
                AppError::Unauthorized(anyhow::anyhow!(err.to_string()))
            }
            LifecycleError::NotFound(_) | LifecycleError::ProfileNotFound(_) => {
                AppError::NotFound(anyhow::anyhow!(err.to_string()))
            }
            LifecycleError::InvalidState { .. } | LifecycleError::ActiveRequestExists => {
                AppError::Conflict(anyhow::anyhow!(err.to_string()))
            }
            LifecycleError::HallNotSet => AppError::BadRequest(anyhow::anyhow!(err.to_string())),
            LifecycleError::Store(e) => AppError::DatabaseError(anyhow::anyhow!(e.to_string())),
        }
    }
}
