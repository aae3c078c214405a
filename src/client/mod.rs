//! The session manager.
//!
//! [`MpdClient`] owns at most one [`Session`] and keeps a mirror of the
//! server's status and queue. It is a plain state machine: nothing happens
//! unless one of its async methods is awaited. [`event_loop`] drives it from
//! a single task and multiplexes caller requests with server notifications.
//!
//! # Connection lifecycle
//!
//! ```text
//! Disconnected --start_connect--> Connecting --on_transport_result--> Idle
//!      ^                              |                                |
//!      +----------- failure ----------+                                |
//!      +---------------------- fatal error / disconnect ---------------+
//! ```
//!
//! Every time a session or a connect attempt is destroyed the connection
//! epoch is incremented. A connect result tagged with an older epoch is
//! discarded, so a late completion can never resurrect a torn-down
//! connection.
//!
//! # Error recovery
//!
//! Failures are sorted by [`classify`]: fatal ones tear the session down and
//! report [`ClientListener::connection_lost`]; permission errors ask
//! [`ClientListener::auth_challenge`] for a password and retry once; other
//! server errors are reported through [`ClientListener::error`] and the
//! session stays up.

use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::{ClientError, ClientResult};
use crate::protocol::{Command, IdleEvents, Song, Status, TagMask};

/// Runs an operation, recovering from its failure once.
///
/// `$op` is re-evaluated on retry, so it must build a fresh future each time.
macro_rules! with_recovery {
    ($client:expr, $op:expr) => {{
        let mut retried = false;
        loop {
            match $op.await {
                Ok(value) => {
                    $client.command_finished();
                    break Ok(value);
                }
                Err(err) => {
                    if let Err(err) = $client.recover(err, &mut retried).await {
                        break Err(err);
                    }
                }
            }
        }
    }};
}

pub mod classify;
mod commands;
pub mod event_loop;
mod idle;
pub mod listener;
pub mod queue;
pub mod resolver;
pub mod session;

pub use classify::{can_clear, classify, ErrorClass};
pub use event_loop::{ClientHandle, ServerEvent};
pub use listener::{ChannelListener, ClientEvent, ClientListener, LogListener, NullListener};
pub use queue::{QueueMirror, SyncAction};
pub use resolver::{ConnectPlan, Endpoint};
pub use session::Session;

use idle::IdleState;

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub plan: ConnectPlan,
    /// Applies to connecting and to every read and write.
    pub timeout: Duration,
    /// Sent right after connecting.
    pub password: Option<String>,
    /// When set, the server is asked to report only these tags.
    pub tag_whitelist: Option<TagMask>,
}

impl ClientSettings {
    pub fn new(plan: ConnectPlan) -> Self {
        Self {
            plan,
            timeout: Duration::from_secs(5),
            password: None,
            tag_whitelist: None,
        }
    }

    /// Settings for an `MPD_HOST`-style host and a port (`0` for default).
    pub fn from_host(host: Option<&str>, port: u16) -> Self {
        let (password, host) = match host {
            Some(spec) => {
                let (password, host) = resolver::split_password(spec);
                (password.map(str::to_string), Some(host))
            }
            None => (None, None),
        };
        let mut settings = Self::new(ConnectPlan::from_host(host, port));
        settings.password = password;
        settings
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_tag_whitelist(mut self, tags: TagMask) -> Self {
        self.tag_whitelist = Some(tags);
        self
    }
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Connected, no command or push wait in progress.
    Idle,
    /// Connected and waiting for a push notification.
    Listening,
    /// Connected and running a command.
    Busy,
}

/// Point-in-time copy of everything the client mirrors.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    pub state: ConnectionState,
    pub epoch: u64,
    pub server: Option<String>,
    pub status: Option<Status>,
    pub queue_version: Option<u32>,
    pub queue_dirty: bool,
    pub queue: Vec<Song>,
    pub current: Option<Song>,
}

type ConnectResult = ClientResult<(Session, Endpoint)>;

/// Session manager for one server.
pub struct MpdClient {
    settings: ClientSettings,
    listener: Box<dyn ClientListener>,
    session: Option<Session>,
    endpoint: Option<Endpoint>,
    /// In-flight connect attempt and the epoch it belongs to.
    connect_task: Option<(u64, JoinHandle<ConnectResult>)>,
    epoch: u64,
    status: Option<Status>,
    queue: QueueMirror,
    /// Locally tracked volume, so repeated steps do not depend on a refresh.
    volume: Option<u8>,
    /// Change categories not yet delivered to the listener.
    events: IdleEvents,
    idle: IdleState,
    busy: bool,
    /// Set when leaving push mode reported changes.
    refresh_needed: bool,
}

impl std::fmt::Debug for MpdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpdClient")
            .field("state", &self.state())
            .field("epoch", &self.epoch)
            .field("endpoint", &self.endpoint)
            .field("queue_len", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl MpdClient {
    pub fn new(settings: ClientSettings, listener: Box<dyn ClientListener>) -> Self {
        Self {
            settings,
            listener,
            session: None,
            endpoint: None,
            connect_task: None,
            epoch: 0,
            status: None,
            queue: QueueMirror::new(),
            volume: None,
            events: IdleEvents::ALL,
            idle: IdleState::default(),
            busy: false,
            refresh_needed: false,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn state(&self) -> ConnectionState {
        if self.connect_task.is_some() {
            ConnectionState::Connecting
        } else if self.session.is_none() {
            ConnectionState::Disconnected
        } else if self.idle.is_listening() {
            ConnectionState::Listening
        } else if self.busy {
            ConnectionState::Busy
        } else {
            ConnectionState::Idle
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_connecting(&self) -> bool {
        self.connect_task.is_some()
    }

    /// Counter identifying the current connection.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The endpoint the current session is connected to.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Name of the configured server for display.
    pub fn settings_name(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.to_string(),
            None => self.settings.plan.display_name(),
        }
    }

    pub fn server_version(&self) -> Option<&str> {
        self.session.as_ref().map(Session::server_version)
    }

    /// The latest status snapshot.
    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn queue(&self) -> &QueueMirror {
        &self.queue
    }

    pub fn current_song(&self) -> Option<&Song> {
        self.queue.current_song()
    }

    /// Change categories accumulated since the last delivery.
    pub fn pending_events(&self) -> IdleEvents {
        self.events
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            state: self.state(),
            epoch: self.epoch,
            server: self.endpoint.as_ref().map(ToString::to_string),
            status: self.status.clone(),
            queue_version: self.queue.version(),
            queue_dirty: self.queue.is_dirty(),
            queue: self.queue.songs().to_vec(),
            current: self.queue.current_song().cloned(),
        }
    }

    /// Starts a connect attempt in the background, dropping any current
    /// session first.
    ///
    /// The outcome is picked up by [`MpdClient::wait_for_server`].
    pub fn start_connect(&mut self) {
        self.disconnect();

        let plan = self.settings.plan.clone();
        let timeout = self.settings.timeout;
        tracing::debug!("Connecting to {} (epoch {})", plan.display_name(), self.epoch);
        let task = tokio::spawn(async move {
            let (stream, endpoint) = resolver::connect(&plan, timeout).await?;
            let session = Session::handshake(stream, timeout).await?;
            Ok((session, endpoint))
        });
        self.connect_task = Some((self.epoch, task));
    }

    /// Connects and waits for the outcome.
    pub async fn connect(&mut self) -> ClientResult<()> {
        self.start_connect();
        match self.wait_for_server().await {
            ServerEvent::TransportReady { epoch, result } => {
                self.on_transport_result(epoch, result).await
            }
            ServerEvent::Notification(_) => Err(ClientError::NotConnected),
        }
    }

    /// Handles the outcome of a connect attempt started under `epoch`.
    ///
    /// Results from an older epoch are dropped without any effect. On
    /// success the post-connect handshake runs (password, tag whitelist),
    /// push mode is scheduled, every change category is marked pending and
    /// [`ClientListener::connected`] fires.
    pub async fn on_transport_result(&mut self, epoch: u64, result: ConnectResult) -> ClientResult<()> {
        if epoch != self.epoch {
            tracing::debug!(
                "Discarding connect result of epoch {} (current {})",
                epoch,
                self.epoch
            );
            return Ok(());
        }
        self.connect_task = None;

        let (session, endpoint) = match result {
            Ok(connected) => connected,
            Err(err) => {
                let message = err.to_string();
                tracing::warn!("Connecting to {} failed: {}", self.settings.plan.display_name(), message);
                self.listener.error(&message);
                self.listener.connect_failed(&message);
                return Err(err);
            }
        };

        tracing::info!("Connected to {}", endpoint);
        self.session = Some(session);
        self.endpoint = Some(endpoint);

        if let Err(err) = self.post_connect().await {
            let message = err.to_string();
            tracing::warn!("Post-connect handshake failed: {}", message);
            self.listener.error(&message);
            self.disconnect();
            self.listener.connect_failed(&message);
            return Err(err);
        }

        self.events = IdleEvents::ALL;
        self.idle.schedule();
        let version = self.server_version().unwrap_or_default().to_string();
        self.listener.connected(&version);
        Ok(())
    }

    async fn post_connect(&mut self) -> ClientResult<()> {
        let password = self.settings.password.clone();
        let whitelist = self.settings.tag_whitelist;
        let session = self.session.as_mut().ok_or(ClientError::NotConnected)?;

        if let Some(password) = password {
            session.run(&Command::Password(password)).await?;
        }

        if let Some(tags) = whitelist {
            if supports_tag_types_clear(session.server_version()) {
                let mut batch = vec![Command::TagTypesClear];
                if !tags.is_empty() {
                    batch.push(Command::TagTypesEnable(tags.iter().collect()));
                }
                session.run_batch(&batch).await?.into_result()?;
            } else {
                tracing::debug!("Server too old for tag whitelists, receiving every tag");
            }
        }
        Ok(())
    }

    /// Drops the session or connect attempt and every mirrored value.
    ///
    /// Idempotent. The epoch only moves when something was destroyed.
    pub fn disconnect(&mut self) {
        let mut destroyed = false;
        if let Some((_, task)) = self.connect_task.take() {
            task.abort();
            destroyed = true;
        }
        if self.session.take().is_some() {
            destroyed = true;
        }
        if destroyed {
            self.epoch += 1;
            tracing::debug!("Connection torn down, epoch now {}", self.epoch);
        }

        self.endpoint = None;
        self.idle = IdleState::default();
        self.busy = false;
        self.refresh_needed = false;
        self.status = None;
        self.volume = None;
        self.queue.reset();
        self.events = IdleEvents::ALL;
    }

    /// Returns the session ready for a command, leaving push mode first.
    async fn session_for_command(&mut self) -> ClientResult<&mut Session> {
        if self.session.is_none() {
            return Err(ClientError::NotConnected);
        }
        if self.idle.is_listening() {
            self.leave_idle().await?;
        }
        self.busy = true;
        self.session.as_mut().ok_or(ClientError::NotConnected)
    }

    /// Bookkeeping after a command succeeded.
    fn command_finished(&mut self) {
        self.busy = false;
        if self.session.is_some() {
            self.idle.schedule();
        }
    }

    /// Applies the recovery for `err`.
    ///
    /// `Ok(())` means the operation should be retried; this happens at most
    /// once, after the listener supplied a password the server accepted.
    async fn recover(&mut self, err: ClientError, retried: &mut bool) -> ClientResult<()> {
        self.busy = false;
        match classify(&err) {
            ErrorClass::ConnectionFatal => Err(self.fail_connection(err)),
            ErrorClass::Permission if !*retried => match self.answer_auth_challenge().await {
                Ok(true) => {
                    *retried = true;
                    Ok(())
                }
                Ok(false) => self.report(err),
                Err(fatal) => Err(self.fail_connection(fatal)),
            },
            ErrorClass::Permission | ErrorClass::Operation => self.report(err),
        }
    }

    /// Reports a failed operation, tearing the session down if the error
    /// state cannot be cleared.
    fn report(&mut self, err: ClientError) -> ClientResult<()> {
        if !can_clear(&err) {
            return Err(self.fail_connection(err));
        }
        let message = err.to_string();
        tracing::debug!("Command failed: {}", message);
        self.listener.error(&message);
        if self.session.is_some() {
            self.idle.schedule();
        }
        Err(err)
    }

    /// Tears the session down and reports it lost.
    fn fail_connection(&mut self, err: ClientError) -> ClientError {
        let message = err.to_string();
        tracing::warn!("Lost connection to {}: {}", self.settings_name(), message);
        self.disconnect();
        self.listener.connection_lost(&message);
        err
    }

    /// Asks the listener for a password and sends it.
    ///
    /// `Ok(false)` when there is no password or the server rejected it.
    async fn answer_auth_challenge(&mut self) -> ClientResult<bool> {
        let Some(password) = self.listener.auth_challenge() else {
            return Ok(false);
        };
        let Some(session) = self.session.as_mut() else {
            return Ok(false);
        };
        match session.run(&Command::Password(password.clone())).await {
            Ok(_) => {
                tracing::debug!("Password accepted, retrying");
                self.settings.password = Some(password);
                Ok(true)
            }
            Err(ClientError::Server(err)) => {
                tracing::warn!("Password rejected: {}", err);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Hands accumulated change categories to the listener.
    pub fn deliver_events(&mut self) {
        if !self.events.is_empty() {
            let events = std::mem::replace(&mut self.events, IdleEvents::NONE);
            self.listener.updated(events);
        }
    }

    /// Whether [`MpdClient::update`] has something to reconcile.
    pub fn needs_refresh(&self) -> bool {
        self.session.is_some() && (self.refresh_needed || self.queue.is_dirty())
    }
}

/// `tagtypes clear` exists since protocol 0.21.
fn supports_tag_types_clear(version: &str) -> bool {
    let mut parts = version.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    (major, minor) >= (0, 21)
}
