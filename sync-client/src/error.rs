//! Error types for sync-client.

use chatsync_core::{FailureClass, GapError, OrderingError};
use chatsync_types::{SyncError, Version};

/// Main error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Remote log error.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The replica could not be brought from one version to another.
    #[error("consistency violation: cannot advance {from} to {to}")]
    Consistency {
        /// Cursor before the attempt.
        from: Version,
        /// Version that could not be reached.
        to: Version,
    },

    /// A malformed event or request.
    #[error("validation failed: {0}")]
    Validation(#[from] SyncError),

    /// The session is not running.
    #[error("session not running")]
    NotRunning,
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] SyncError),

    /// A row that does not describe a valid value.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// A confirmed event does not directly follow the cursor.
    #[error("version {version} does not follow cursor {cursor}")]
    NotContiguous {
        /// Cursor at the time of the write.
        cursor: Version,
        /// Version of the rejected event.
        version: Version,
    },

    /// Ordering chain is damaged.
    #[error("ordering error: {0}")]
    Ordering(#[from] OrderingError),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: std::path::PathBuf,
    },
}

impl From<GapError> for StorageError {
    fn from(err: GapError) -> Self {
        match err {
            GapError::NotContiguous { cursor, version } => {
                StorageError::NotContiguous { cursor, version }
            }
            other => StorageError::Corrupt(other.to_string()),
        }
    }
}

/// Remote event log errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    /// Connection, I/O or timeout failure.
    #[error("network error: {0}")]
    Network(String),

    /// Credentials rejected (401/403).
    #[error("unauthorized (HTTP {status})")]
    Unauthorized {
        /// HTTP status.
        status: u16,
    },

    /// Any other unsuccessful status.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// Response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The remote returned data that contradicts the request.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A local input needed by the request is unavailable.
    #[error("media error: {0}")]
    Media(String),
}

impl RemoteError {
    /// Map an HTTP status to the matching error.
    pub fn from_status(status: u16, body: String) -> Self {
        match FailureClass::from_status(status) {
            FailureClass::Unauthorized(status) => RemoteError::Unauthorized { status },
            _ => RemoteError::Status { status, body },
        }
    }

    /// How the upload pipeline should treat this error.
    pub fn class(&self) -> FailureClass {
        match self {
            RemoteError::Network(_) => FailureClass::Transient,
            RemoteError::Unauthorized { status } => FailureClass::Unauthorized(*status),
            RemoteError::Status { status, .. } => FailureClass::from_status(*status),
            RemoteError::Decode(_) | RemoteError::Protocol(_) | RemoteError::Media(_) => {
                FailureClass::Fatal
            }
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
