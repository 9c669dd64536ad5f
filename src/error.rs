use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum PortalError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("missing caller identity")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl PortalError {
    pub fn validation(message: impl Into<String>) -> Self {
        PortalError::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        PortalError::NotFound(what.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PortalError::Validation(_) => StatusCode::BAD_REQUEST,
            PortalError::NotFound(_) => StatusCode::NOT_FOUND,
            PortalError::Unauthorized => StatusCode::UNAUTHORIZED,
            PortalError::Forbidden(_) => StatusCode::FORBIDDEN,
            PortalError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            PortalError::Storage(err) => {
                error!(error = %format!("{err:#}"), "storage failure");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type PortalResult<T> = Result<T, PortalError>;
