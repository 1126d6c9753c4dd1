use thiserror::Error;

use crate::scheduler::InvalidConfidence;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("invalid input: {0}")]
    Invalid(&'static str),
    #[error(transparent)]
    InvalidConfidence(#[from] InvalidConfidence),
    #[error("conflict: {0}")]
    Conflict(&'static str),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),
    #[error("storage error: {0}")]
    Storage(&'static str),
}

impl CoreError {
    /// Storage failures are the only ones worth retrying unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Storage(_))
    }
}
