//! Error types for the query client.
//!
//! [`ClientError`] is deliberately small: fragment-level problems are logged
//! and skipped rather than surfaced (one malformed fragment must not corrupt
//! unrelated sessions), so the only errors callers ever see are channel-level.
//! The type is `Clone` because a single channel failure rejects every
//! outstanding session.

use thiserror::Error;

/// Errors surfaced by the query client.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The transport channel failed. Broadcast to all outstanding sessions.
    #[error("channel error: {0}")]
    Channel(String),

    /// A message could not be handed to the transport.
    #[error("send failed: {0}")]
    Send(String),
}

/// Convenience type alias for client results.
pub type Result<T> = std::result::Result<T, ClientError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_error_display() {
        let err = ClientError::Channel("connection reset".into());
        assert_eq!(err.to_string(), "channel error: connection reset");
    }

    #[test]
    fn send_error_display() {
        let err = ClientError::Send("handle dropped".into());
        assert_eq!(err.to_string(), "send failed: handle dropped");
    }

    #[test]
    fn clone_preserves_reason() {
        let err = ClientError::Channel("boom".into());
        assert_eq!(err.clone(), err);
    }
}
