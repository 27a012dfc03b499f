use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::core::cache::CacheError;
use crate::core::documents::DocumentError;
use crate::core::scheduler::SchedulerError;
use crate::core::synthesis::SynthesisError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) | AppError::Document(DocumentError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            AppError::BadRequest(_)
            | AppError::Document(DocumentError::Invalid(_))
            | AppError::Scheduler(SchedulerError::InvalidRequest(_))
            | AppError::Scheduler(SchedulerError::NoRoute(_)) => StatusCode::BAD_REQUEST,
            AppError::Document(DocumentError::Unavailable(_)) | AppError::Synthesis(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Config(_)
            | AppError::Internal(_)
            | AppError::Cache(_)
            | AppError::Scheduler(SchedulerError::Cache(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Config(_) => "config_error",
            AppError::Internal(_) => "internal_error",
            AppError::Scheduler(e) => e.code(),
            AppError::Cache(_) => "cache_error",
            AppError::Document(DocumentError::NotFound(_)) => "document_not_found",
            AppError::Document(_) => "document_error",
            AppError::Synthesis(_) => "synthesis_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
