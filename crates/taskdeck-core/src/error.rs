//! Task-level errors
//!
//! Every failure the repository or store reports falls into one of three
//! kinds: bad input caught before any remote call, a failed read or
//! subscription, or a failed write.

use thiserror::Error;

use crate::remote::RemoteError;

/// Errors surfaced by the repository and the store
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// Input rejected before any remote call was made
    #[error("Invalid task: {0}")]
    Validation(String),

    /// Query or live subscription failed
    #[error("Failed to read tasks: {0}")]
    RemoteRead(#[source] RemoteError),

    /// Create, update or delete failed
    #[error("Failed to write task: {0}")]
    RemoteWrite(#[source] RemoteError),
}

impl TaskError {
    pub fn is_validation(&self) -> bool {
        matches!(self, TaskError::Validation(_))
    }

    /// The underlying remote failure, if any
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            TaskError::Validation(_) => None,
            TaskError::RemoteRead(e) | TaskError::RemoteWrite(e) => Some(e),
        }
    }

    /// True if the write targeted a document that does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self.remote(), Some(RemoteError::NotFound { .. }))
    }
}

/// Result type for task operations
pub type TaskResult<T> = Result<T, TaskError>;
