use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::response::ErrorBody;

/// Every failure a flow or handler can surface to a client.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("User is already verified")]
    AlreadyVerified,

    #[error("Invalid or expired OTP")]
    InvalidOtp,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Refresh token has been revoked")]
    RevokedToken,

    #[error("token issuance failed: {0}")]
    TokenIssuance(anyhow::Error),

    #[error("dependency failure: {0}")]
    Dependency(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::AlreadyVerified | AppError::InvalidOtp => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized(_)
            | AppError::InvalidCredentials
            | AppError::InvalidToken
            | AppError::RevokedToken => StatusCode::UNAUTHORIZED,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::TokenIssuance(_) | AppError::Dependency(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to return to a client.
    pub fn public_message(&self) -> String {
        match self {
            AppError::TokenIssuance(_) => "Failed to generate tokens".to_string(),
            AppError::Dependency(_) => "Internal Server Error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge("Upload exceeds the allowed size".into())
        } else {
            AppError::Validation(format!("invalid multipart body: {e}"))
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = ?self, "request failed");
        }

        let message = self.public_message();
        let errors = match &self {
            AppError::Validation(detail) => vec![detail.clone()],
            _ => Vec::new(),
        };
        let body = ErrorBody {
            status_code: status.as_u16(),
            success: false,
            message,
            errors,
            data: None,
        };
        (status, Json(body)).into_response()
    }
}
