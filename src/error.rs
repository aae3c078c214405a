//! Error types for session operations.

use thiserror::Error;

use crate::protocol::{ServerError, ServerErrorCode};

/// Errors that can occur while talking to the server.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The socket failed: refused, reset, closed by the peer.
    #[error("Connection failed: {0}")]
    Transport(#[from] std::io::Error),

    /// Neither connect candidate could be reached.
    #[error("Failed to connect to {target}")]
    Connect {
        /// Human-readable name of the last target tried.
        target: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A connect, read or write did not finish within the configured timeout.
    #[error("Timeout")]
    Timeout,

    /// The server rejected a command with an `ACK` line.
    #[error("{0}")]
    Server(ServerError),

    /// The server sent something that is not valid protocol.
    #[error("Malformed server response: {0}")]
    Protocol(String),

    /// No session exists.
    #[error("Not connected")]
    NotConnected,

    /// A queue position outside the local mirror.
    #[error("Position {pos} is outside the queue (length {len})")]
    OutOfRange {
        /// Requested position.
        pos: usize,
        /// Current mirror length.
        len: usize,
    },

    /// A connect attempt was superseded by a disconnect or a newer connect.
    #[error("Connect attempt cancelled")]
    Cancelled,

    /// The task driving the client has exited.
    #[error("Client event loop has stopped")]
    Stopped,
}

impl ClientError {
    /// Returns the server error if this is one.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            ClientError::Server(err) => Some(err),
            _ => None,
        }
    }

    /// Returns `true` for `ACK [4@...]` permission failures.
    pub fn is_permission_denied(&self) -> bool {
        self.server_error()
            .is_some_and(|err| err.code == ServerErrorCode::Permission)
    }
}

impl From<ServerError> for ClientError {
    fn from(err: ServerError) -> Self {
        ClientError::Server(err)
    }
}

/// Result type alias for session operations.
pub type ClientResult<T> = Result<T, ClientError>;
