//! Session error types.

use tandem_protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced by [`Session::call`](crate::Session::call) and the other
/// session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The session was closed locally before the call was issued.
    #[error("session closed")]
    Closed,

    /// The connection died while the call was in flight.
    #[error("disconnected before response")]
    Disconnected,

    /// The peer has no handler registered for the method.
    #[error("method not found")]
    MethodNotFound,

    /// The peer's handler failed; the string is the remote handler's text.
    #[error("remote handler error: {0}")]
    Handler(String),

    /// The peer reported an error outside the reserved handler codes.
    #[error("remote error {code}: {message}")]
    Remote { code: u32, message: String },
}

impl SessionError {
    /// Returns whether the error means the session is unusable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionError::Io(_) | SessionError::Closed | SessionError::Disconnected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(SessionError::Closed.is_terminal());
        assert!(SessionError::Disconnected.is_terminal());
        assert!(!SessionError::MethodNotFound.is_terminal());
        assert!(!SessionError::Handler("x".into()).is_terminal());
        assert!(!SessionError::Remote {
            code: 9,
            message: "y".into()
        }
        .is_terminal());
    }
}
