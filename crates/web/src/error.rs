//! Error responses for the hunt API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("No auth or invalid bearer token provided")]
    MissingBearer,

    #[error("Puzzlehunt not found: no matching guild")]
    UnknownGuild,

    #[error("Puzzlehunt not found: no puzzlehunt created on that server.")]
    NoHunt,

    #[error("User does not have access to this resource.")]
    Unauthorized,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingBearer => StatusCode::BAD_REQUEST,
            AppError::UnknownGuild | AppError::NoHunt => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<belle_reconciler::Error> for AppError {
    fn from(err: belle_reconciler::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<belle_runtime::Error> for AppError {
    fn from(err: belle_runtime::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Body of every error response: `{"body": "<message>"}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    body: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let AppError::Internal(reason) = &self {
            tracing::error!(reason = %reason, "Request failed");
            return status.into_response();
        }
        let response = ErrorResponse {
            body: self.to_string(),
        };
        (status, Json(response)).into_response()
    }
}
