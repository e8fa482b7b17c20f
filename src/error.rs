use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::auth::password::PolicyViolations;

pub const NICKNAME_TAKEN: &str = "Nickname already exists";
pub const EMAIL_TAKEN: &str = "Email already exists";

/// Every failure a request can end with.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("User not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid or expired verification token")]
    InvalidOrExpiredToken,

    #[error("Insufficient permissions")]
    PermissionDenied,

    #[error("Account locked until {0}")]
    AccountLocked(time::OffsetDateTime),

    #[error("Incorrect email or password")]
    InvalidCredentials,

    #[error("Email address has not been verified")]
    EmailNotVerified,

    #[error("{0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_nickname_conflict(&self) -> bool {
        matches!(self, AppError::Conflict(msg) if msg == NICKNAME_TAKEN)
    }

    fn kind(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::InvalidOrExpiredToken => (StatusCode::BAD_REQUEST, "invalid_token"),
            AppError::PermissionDenied => (StatusCode::FORBIDDEN, "permission_denied"),
            AppError::AccountLocked(_) => (StatusCode::LOCKED, "account_locked"),
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            AppError::EmailNotVerified => (StatusCode::UNAUTHORIZED, "email_not_verified"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.kind();
        let message = match &self {
            AppError::Internal(msg) => {
                error!(error = %msg, "internal error");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        (
            status,
            Json(json!({
                "error": {
                    "type": error_type,
                    "message": message
                }
            })),
        )
            .into_response()
    }
}

impl From<PolicyViolations> for AppError {
    fn from(violations: PolicyViolations) -> Self {
        AppError::Validation(violations.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", e))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            // 23505: unique_violation
            if db_err.code().as_deref() == Some("23505") {
                let msg = match db_err.constraint() {
                    Some(c) if c.contains("nickname") => NICKNAME_TAKEN,
                    _ => EMAIL_TAKEN,
                };
                return AppError::Conflict(msg.into());
            }
        }
        AppError::Internal(e.to_string())
    }
}
