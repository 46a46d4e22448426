use db::DbError;
use thiserror::Error;
use tracker::ApiError;

use crate::CollaboratorError;

/// Job-level failures. Row failures never surface here; they are counted.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The job cannot start: bad mapping, missing columns, row count mismatch.
    #[error("{0}")]
    Validation(String),

    #[error("job cancelled after {processed} rows")]
    Cancelled { processed: u64 },

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("tracker client error: {0}")]
    Api(#[from] ApiError),
}

impl EngineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled { .. })
    }
}
