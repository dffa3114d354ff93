//! Error types for session orchestration.
//!
//! Errors are split by layer: [`TransportError`] is what the room transport
//! reports, [`TokenError`] covers participant token decoding, and
//! [`SessionError`] is what callers of the session API observe.
//!
//! Timeout and unexpected-disconnect failures are deliberately absent here.
//! They are not errors of any single call; they surface as
//! [`AgentState::Failed`](crate::AgentState::Failed) with a list of
//! [`FailureReason`](crate::FailureReason)s.

use thiserror::Error;

use crate::participant::TrackSource;

/// Errors reported by the room transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connecting to the room failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Disconnecting from the room failed.
    #[error("disconnect failed: {0}")]
    Disconnect(String),

    /// Enabling or publishing a local track failed.
    #[error("failed to enable {track:?}: {reason}")]
    Publish {
        /// Track that could not be enabled
        track: TrackSource,
        /// Transport-provided reason
        reason: String,
    },

    /// Sending a chat message failed.
    #[error("failed to send chat message: {0}")]
    Chat(String),
}

/// Errors decoding a participant token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Token is not a three-segment JWT.
    #[error("malformed token: expected 3 segments, found {0}")]
    Malformed(usize),

    /// Payload segment is not valid base64url.
    #[error("token payload is not valid base64url: {0}")]
    Encoding(String),

    /// Payload segment is not valid JSON claims.
    #[error("token payload is not valid JSON: {0}")]
    Json(String),
}

/// Errors returned by session and agent operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// connect/disconnect was called with no connection handle bound.
    #[error("called {operation}(), but no connection handle is bound")]
    NoHandle {
        /// Operation that was attempted
        operation: &'static str,
    },

    /// A wait or operation was cancelled through its cancellation token.
    #[error("{operation} - signal aborted")]
    Cancelled {
        /// Operation that was cancelled
        operation: &'static str,
    },

    /// The transport rejected an operation.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The token source failed to produce credentials.
    #[error("credential fetch failed: {0}")]
    Credentials(String),

    /// The participant token could not be decoded.
    #[error("invalid participant token: {0}")]
    InvalidToken(#[from] TokenError),

    /// A queued connect/disconnect was discarded before it ran, either
    /// because the connection handle changed or the serializer shut down.
    #[error("pending {operation}() was dropped before it ran")]
    OperationDropped {
        /// Operation that was dropped
        operation: &'static str,
    },
}

impl SessionError {
    /// Returns true if this error represents cancellation rather than failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns true if this error is a programming mistake by the caller.
    ///
    /// Usage errors are never transient and must not be retried.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::NoHandle { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_distinguishable_from_failure() {
        let cancelled = SessionError::Cancelled { operation: "Session::wait_until_connected" };
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_usage());
        assert_eq!(cancelled.to_string(), "Session::wait_until_connected - signal aborted");

        let failed = SessionError::Transport(TransportError::Connection("refused".into()));
        assert!(!failed.is_cancelled());
    }

    #[test]
    fn missing_handle_is_a_usage_error() {
        let err = SessionError::NoHandle { operation: "connect" };
        assert!(err.is_usage());
        assert_eq!(err.to_string(), "called connect(), but no connection handle is bound");
    }

    #[test]
    fn transport_errors_convert() {
        let err: SessionError =
            TransportError::Publish { track: TrackSource::Camera, reason: "denied".into() }.into();
        assert!(matches!(err, SessionError::Transport(TransportError::Publish { .. })));
    }
}
