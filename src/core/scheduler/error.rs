use thiserror::Error;

use crate::core::cache::CacheError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("No backend routed for model '{0}'")]
    NoRoute(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl SchedulerError {
    /// Stable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::NoRoute(_) => "unknown_model",
            SchedulerError::InvalidRequest(_) => "invalid_request",
            SchedulerError::Cache(_) => "cache_error",
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
