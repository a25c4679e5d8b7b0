//! Error types for Rackmend server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::models::enums::DefectStatus;

/// Stable numeric error codes exposed to API consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Success = 0,
    Failure = 1,
    DbFailure = 2,
    NotFound = 3,
    BadValue = 4,
    InvalidTransition = 5,
    InventoryConflict = 6,
    SubstituteUnavailable = 7,
    Conflict = 8,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation {operation} is not allowed from status {from}")]
    InvalidTransition {
        operation: &'static str,
        from: DefectStatus,
    },

    #[error("Inventory conflict: {0}")]
    InventoryConflict(String),

    #[error("Substitute server unavailable: {0}")]
    SubstituteUnavailable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transient persistence failures eligible for a bounded internal retry.
    /// Guard failures and caller errors are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(sqlx::Error::Io(_))
                | AppError::Database(sqlx::Error::PoolTimedOut)
                | AppError::Database(sqlx::Error::PoolClosed)
        )
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorCode::NotFound, msg.clone()),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::InvalidTransition { .. } => (
                StatusCode::CONFLICT,
                ErrorCode::InvalidTransition,
                self.to_string(),
            ),
            AppError::InventoryConflict(msg) => (
                StatusCode::CONFLICT,
                ErrorCode::InventoryConflict,
                msg.clone(),
            ),
            AppError::SubstituteUnavailable(msg) => (
                StatusCode::CONFLICT,
                ErrorCode::SubstituteUnavailable,
                msg.clone(),
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorCode::Conflict,
                msg.clone(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DbFailure,
                    "Database error".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
