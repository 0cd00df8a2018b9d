//! Error types for chatsync.

use thiserror::Error;

/// Errors raised while building or decoding chatsync values.
#[derive(Debug, Error)]
pub enum SyncError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// An identifier could not be parsed
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Unknown event kind discriminator
    #[error("unknown event kind: {0}")]
    UnknownKind(String),

    /// Event or conversation violates a structural rule
    #[error("validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::UnknownKind("WELCOME".into());
        assert_eq!(err.to_string(), "unknown event kind: WELCOME");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncError>();
    }
}
