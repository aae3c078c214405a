//! Callbacks through which the session manager reports to its owner.
//!
//! Every callback is invoked on the task that drives the [`MpdClient`]
//! (see [`crate::client::event_loop`]), never concurrently.
//!
//! [`MpdClient`]: crate::client::MpdClient

use tokio::sync::mpsc;

use crate::protocol::IdleEvents;

/// Receiver of session lifecycle notifications.
///
/// All methods default to doing nothing.
pub trait ClientListener: Send {
    /// A session was established and the post-connect handshake finished.
    fn connected(&mut self, _server_version: &str) {}

    /// A connect attempt failed; the client stays disconnected.
    fn connect_failed(&mut self, _message: &str) {}

    /// An established session was torn down after a fatal error.
    ///
    /// Called exactly once per teardown.
    fn connection_lost(&mut self, _message: &str) {}

    /// Accumulated change categories since the last delivery.
    fn updated(&mut self, _events: IdleEvents) {}

    /// A recoverable error the user should see.
    fn error(&mut self, _message: &str) {}

    /// The server denied a command for lack of permission.
    ///
    /// Return a password to send before retrying the command once.
    fn auth_challenge(&mut self) -> Option<String> {
        None
    }
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl ClientListener for NullListener {}

/// Listener callbacks as values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected { server_version: String },
    ConnectFailed(String),
    ConnectionLost(String),
    Updated(IdleEvents),
    Error(String),
    AuthChallenge,
}

/// Forwards every callback into an unbounded channel.
///
/// Auth challenges are answered with the stored password, if any.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<ClientEvent>,
    password: Option<String>,
}

impl ChannelListener {
    /// Creates a listener and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, password: None }, rx)
    }

    /// Answers auth challenges with `password`.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    fn emit(&self, event: ClientEvent) {
        // A dropped receiver only means nobody is interested any more.
        let _ = self.tx.send(event);
    }
}

impl ClientListener for ChannelListener {
    fn connected(&mut self, server_version: &str) {
        self.emit(ClientEvent::Connected {
            server_version: server_version.to_string(),
        });
    }

    fn connect_failed(&mut self, message: &str) {
        self.emit(ClientEvent::ConnectFailed(message.to_string()));
    }

    fn connection_lost(&mut self, message: &str) {
        self.emit(ClientEvent::ConnectionLost(message.to_string()));
    }

    fn updated(&mut self, events: IdleEvents) {
        self.emit(ClientEvent::Updated(events));
    }

    fn error(&mut self, message: &str) {
        self.emit(ClientEvent::Error(message.to_string()));
    }

    fn auth_challenge(&mut self) -> Option<String> {
        self.emit(ClientEvent::AuthChallenge);
        self.password.clone()
    }
}

/// Listener that writes every callback to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogListener;

impl ClientListener for LogListener {
    fn connected(&mut self, server_version: &str) {
        tracing::info!("Connected, server protocol {}", server_version);
    }

    fn connect_failed(&mut self, message: &str) {
        tracing::warn!("Connect failed: {}", message);
    }

    fn connection_lost(&mut self, message: &str) {
        tracing::warn!("Connection lost: {}", message);
    }

    fn updated(&mut self, events: IdleEvents) {
        tracing::debug!("Changed: {}", events);
    }

    fn error(&mut self, message: &str) {
        tracing::error!("{}", message);
    }
}
