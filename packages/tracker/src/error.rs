use bulk_core::ValueError;
use thiserror::Error;

use crate::Task;

/// Errors from the tracker API, already classified for retry decisions.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("rate limited by tracker API")]
    RateLimited,
    #[error("unauthorized: check the API token")]
    Unauthorized,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("transient error: {0}")]
    Transient(String),
    #[error("invalid value: {0}")]
    Validation(String),
}

impl ApiError {
    /// Map a non-2xx HTTP status onto the taxonomy.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => ApiError::Unauthorized,
            404 => ApiError::NotFound(body.to_string()),
            429 => ApiError::RateLimited,
            _ => ApiError::Transient(format!("HTTP {status}: {body}")),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => ApiError::from_status(status.as_u16(), &e.to_string()),
            None => ApiError::Transient(e.to_string()),
        }
    }
}

impl From<ValueError> for ApiError {
    fn from(e: ValueError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

/// A paginated fetch that failed after collecting some items.
#[derive(Debug, Clone, Error)]
#[error("list fetch failed after collecting {} items: {source}", items.len())]
pub struct PartialList {
    pub items: Vec<Task>,
    pub source: ApiError,
}
