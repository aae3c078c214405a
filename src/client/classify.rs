//! Maps failures onto the recovery the session manager performs.

use crate::error::ClientError;
use crate::protocol::ServerErrorCode;

/// Recovery class of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The session is unusable: tear down and report the connection lost.
    ConnectionFatal,
    /// The server wants credentials: ask the listener, retry once.
    Permission,
    /// A single command failed; the session stays up if the error state
    /// can be cleared.
    Operation,
}

/// Classifies `err`.
pub fn classify(err: &ClientError) -> ErrorClass {
    match err {
        ClientError::Transport(_) | ClientError::Connect { .. } | ClientError::Timeout => {
            ErrorClass::ConnectionFatal
        }
        ClientError::Server(server) if server.code == ServerErrorCode::Permission => {
            ErrorClass::Permission
        }
        ClientError::Server(_)
        | ClientError::Protocol(_)
        | ClientError::NotConnected
        | ClientError::OutOfRange { .. }
        | ClientError::Cancelled
        | ClientError::Stopped => ErrorClass::Operation,
    }
}

/// Whether the session is still in sync with the server after `err`.
///
/// An `ACK` terminates the reply cleanly. A malformed reply leaves unread
/// bytes of unknown length on the stream, so the session cannot continue.
pub fn can_clear(err: &ClientError) -> bool {
    !matches!(classify(err), ErrorClass::ConnectionFatal) && !matches!(err, ClientError::Protocol(_))
}
