//! Collection client errors
//!
//! Typed errors for document operations, with enough structure for callers
//! to tell a missing document apart from a dropped connection.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by a [`CollectionClient`](super::CollectionClient)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The addressed document does not exist
    #[error("Document '{id}' not found in collection '{collection}'")]
    NotFound { collection: String, id: String },

    /// The request was malformed (empty collection name, bad field, ...)
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// The server reported a failure it could not classify
    #[error("Server error: {0}")]
    Server(String),

    /// Could not reach the collection or the connection broke mid-request
    #[error("Transport error: {0}")]
    Transport(String),

    /// The client has shut down
    #[error("Collection client is closed")]
    Closed,

    /// A frame could not be encoded or decoded
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Another process holds the collection file
    #[error("Collection file '{path}' is already open in another process")]
    InUse { path: PathBuf },

    /// Persisting the collection to disk failed
    #[error("Failed to persist collection to '{path}': {details}")]
    Storage { path: PathBuf, details: String },
}

impl RemoteError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        RemoteError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    /// Create a storage error from an I/O error with path context
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        RemoteError::Storage {
            path,
            details: error.to_string(),
        }
    }

    /// Check whether retrying the same call later could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transport(_) | RemoteError::Server(_))
    }
}

/// Result type for collection operations
pub type RemoteResult<T> = Result<T, RemoteError>;
