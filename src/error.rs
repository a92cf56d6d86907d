//! Error taxonomy for configuration propagation
//!
//! None of these are fatal. Each has a fallback (next source in priority
//! order, or keep the current record) and is only ever logged.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Malformed or absent snapshot token
    #[error("snapshot decode failed: {0}")]
    Decode(String),

    /// Malformed, absent or inaccessible persisted value
    #[error("store access failed: {0}")]
    Store(String),

    /// Broadcast or storage message with an unexpected shape
    #[error("unexpected message: {0}")]
    Delivery(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_failure_class() {
        assert_eq!(
            SyncError::Decode("bad base64".into()).to_string(),
            "snapshot decode failed: bad base64"
        );
        assert!(SyncError::Delivery("kind=PING".into()).to_string().contains("PING"));
    }
}
