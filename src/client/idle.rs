//! Push-notification multiplexing.
//!
//! While nothing else uses the session it sits in `idle` mode, and the server
//! answers only when something changed. Before any command the session
//! leaves push mode with `noidle`; afterwards re-entry is scheduled. At most
//! one re-entry is ever pending, however many commands ran in between.

use crate::client::{MpdClient, ServerEvent};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{Command, IdleEvents};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IdleState {
    pending: bool,
    listening: bool,
}

impl IdleState {
    /// Requests re-entry into push mode. Repeated calls coalesce.
    pub(crate) fn schedule(&mut self) {
        self.pending = true;
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending
    }

    /// Consumes the pending request.
    pub(crate) fn take_due(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn is_listening(&self) -> bool {
        self.listening
    }

    pub(crate) fn set_listening(&mut self, listening: bool) {
        self.listening = listening;
    }
}

fn changed_events(pairs: &[(String, String)]) -> IdleEvents {
    IdleEvents::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
}

impl MpdClient {
    /// Whether push mode should be entered now.
    pub fn idle_due(&self) -> bool {
        self.idle.is_pending() && self.session.is_some() && !self.idle.is_listening()
    }

    pub fn is_listening(&self) -> bool {
        self.idle.is_listening()
    }

    /// Sends `idle` if re-entry is pending.
    pub async fn enter_idle(&mut self) -> ClientResult<()> {
        if !self.idle.take_due() || self.idle.is_listening() {
            return Ok(());
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        match session.send(&Command::Idle(IdleEvents::ALL)).await {
            Ok(()) => {
                self.idle.set_listening(true);
                Ok(())
            }
            Err(err) => Err(self.fail_connection(err)),
        }
    }

    /// Leaves push mode and waits for the acknowledgement.
    ///
    /// Changes reported in the acknowledgement are accumulated and mark the
    /// mirror for refresh. Re-entry is scheduled again.
    pub(crate) async fn leave_idle(&mut self) -> ClientResult<()> {
        self.idle.set_listening(false);
        let session = self.session.as_mut().ok_or(ClientError::NotConnected)?;
        session.send(&Command::NoIdle).await?;
        let pairs = session.recv_pairs().await?;

        let changed = changed_events(&pairs);
        if !changed.is_empty() {
            tracing::debug!("Leaving idle reported: {}", changed);
            self.events |= changed;
            self.refresh_needed = true;
        }
        self.idle.schedule();
        Ok(())
    }

    /// Waits for the next thing the server side has to say.
    ///
    /// Completes when a connect attempt finishes or, in push mode, when the
    /// server sent data. Never completes otherwise. Cancel-safe.
    pub async fn wait_for_server(&mut self) -> ServerEvent {
        if let Some((epoch, task)) = self.connect_task.as_mut() {
            let epoch = *epoch;
            let result = match task.await {
                Ok(result) => result,
                Err(join_err) => Err(ClientError::Transport(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    join_err.to_string(),
                ))),
            };
            self.connect_task = None;
            return ServerEvent::TransportReady { epoch, result };
        }

        match self.session.as_mut() {
            Some(session) if self.idle.is_listening() => {
                ServerEvent::Notification(session.wait_readable().await)
            }
            _ => std::future::pending().await,
        }
    }

    /// Handles the outcome of [`MpdClient::wait_for_server`].
    ///
    /// A successful connect is followed by a full refresh. Returns the
    /// connect outcome or the notification outcome.
    pub async fn handle_server_event(&mut self, event: ServerEvent) -> ClientResult<()> {
        match event {
            ServerEvent::TransportReady { epoch, result } => {
                let connected = self.on_transport_result(epoch, result).await;
                if connected.is_ok() && self.is_connected() {
                    let _ = self.update().await;
                    self.deliver_events();
                }
                connected
            }
            ServerEvent::Notification(readable) => self.on_notification(readable).await,
        }
    }

    /// Reads a push notification, refreshes, and delivers the changes.
    ///
    /// Transport failures are fatal. An `ACK` in place of the notification
    /// goes through the usual recovery; the session survives it unless the
    /// error state cannot be cleared.
    pub async fn on_notification(&mut self, readable: ClientResult<()>) -> ClientResult<()> {
        self.idle.set_listening(false);
        if let Err(err) = readable {
            return Err(self.fail_connection(err));
        }

        let pairs = match self.session.as_mut() {
            Some(session) => session.recv_pairs().await,
            None => return Err(ClientError::NotConnected),
        };
        let pairs = match pairs {
            Ok(pairs) => pairs,
            Err(err @ ClientError::Server(_)) => return self.on_refused_idle(err).await,
            Err(err) => return Err(self.fail_connection(err)),
        };

        let changed = changed_events(&pairs);
        tracing::debug!("Idle reported: {}", changed);
        self.events |= changed;

        let refreshed = self.update().await;
        if self.session.is_some() {
            self.deliver_events();
            self.idle.schedule();
        }
        refreshed
    }

    /// The server answered `idle` with an `ACK`.
    async fn on_refused_idle(&mut self, err: ClientError) -> ClientResult<()> {
        let denied = err.is_permission_denied();
        let mut retried = false;
        match self.recover(err, &mut retried).await {
            Ok(()) => {
                self.idle.schedule();
                Ok(())
            }
            Err(err) => {
                if denied && self.session.is_some() {
                    // Re-entering without credentials would be refused
                    // again; the next command schedules push mode.
                    self.idle.take_due();
                }
                Err(err)
            }
        }
    }
}
