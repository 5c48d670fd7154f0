use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Uniform success envelope returned by every handler.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub status_code: u16,
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::OK, Some(data), message)
    }

    pub fn created(data: T, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::CREATED, Some(data), message)
    }

    fn with_status(status: StatusCode, data: Option<T>, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            success: true,
            message: message.into(),
            data,
        }
    }
}

impl ApiResponse<()> {
    pub fn empty(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::OK, None, message)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

/// Error envelope; same shape as [`ApiResponse`] with `errors` populated.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub success: bool,
    pub message: String,
    pub errors: Vec<String>,
    pub data: Option<()>,
}
