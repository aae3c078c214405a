//! Single-task driver for [`MpdClient`].
//!
//! The loop owns the client and multiplexes, in priority order:
//!
//! 1. requests from [`ClientHandle`]s,
//! 2. completion of a connect attempt or a push notification,
//! 3. a pending re-entry into push mode.
//!
//! Requests win over everything else so a caller never waits behind a
//! notification; re-entry into push mode happens only once no request is
//! queued. After each request the mirror is refreshed if needed and
//! accumulated change categories are delivered to the listener.
//!
//! A connect request only starts the attempt. Its reply is parked until the
//! attempt completes, so the loop keeps serving requests meanwhile. A
//! disconnect or a newer connect cancels the attempt and answers the parked
//! reply with [`ClientError::Cancelled`].

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::client::{ClientSnapshot, Endpoint, MpdClient, Session};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{Command, Pair};

/// Something the server side has to say.
#[derive(Debug)]
pub enum ServerEvent {
    /// A connect attempt started under `epoch` finished.
    TransportReady {
        epoch: u64,
        result: ClientResult<(Session, Endpoint)>,
    },
    /// Data arrived while in push mode, or the stream failed.
    Notification(ClientResult<()>),
}

type Reply<T> = oneshot::Sender<ClientResult<T>>;

/// A request for the driver task.
#[derive(Debug)]
pub enum Request {
    Connect(Reply<()>),
    Disconnect(oneshot::Sender<()>),
    Update(Reply<()>),
    Command(Command, Reply<Vec<Pair>>),
    Add(String, Reply<()>),
    Delete(usize, Reply<()>),
    DeleteRange { start: usize, end: usize, reply: Reply<()> },
    Move { dest: usize, src: usize, reply: Reply<()> },
    Clear(Reply<()>),
    Crop(Reply<bool>),
    Volume(u8, Reply<()>),
    VolumeUp(Reply<bool>),
    VolumeDown(Reply<bool>),
    Snapshot(oneshot::Sender<ClientSnapshot>),
}

/// Cloneable handle to a running driver.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::Sender<Request>,
}

/// A connect request waiting for its attempt.
#[derive(Debug)]
struct PendingConnect {
    epoch: u64,
    reply: Reply<()>,
}

impl PendingConnect {
    fn cancel(self) {
        let _ = self.reply.send(Err(ClientError::Cancelled));
    }
}

/// Spawns the driver for `client` on the current runtime.
///
/// The task ends, returning the client, when every handle was dropped.
pub fn spawn(client: MpdClient) -> (ClientHandle, JoinHandle<MpdClient>) {
    let (tx, rx) = mpsc::channel(32);
    let task = tokio::spawn(run(client, rx));
    (ClientHandle { tx }, task)
}

/// Drives `client` until the request channel closes.
pub async fn run(mut client: MpdClient, mut requests: mpsc::Receiver<Request>) -> MpdClient {
    let mut pending: Option<PendingConnect> = None;

    loop {
        tokio::select! {
            biased;

            request = requests.recv() => match request {
                Some(request) => dispatch(&mut client, &mut pending, request).await,
                None => break,
            },
            event = client.wait_for_server() => {
                let attempt = match &event {
                    ServerEvent::TransportReady { epoch, .. } => Some(*epoch),
                    ServerEvent::Notification(_) => None,
                };
                let result = client.handle_server_event(event).await;
                if attempt.is_some() && pending.as_ref().map(|p| p.epoch) == attempt {
                    if let Some(waiting) = pending.take() {
                        let _ = waiting.reply.send(result);
                    }
                }
            }
            _ = std::future::ready(()), if client.idle_due() => {
                // Failure already tore the session down.
                let _ = client.enter_idle().await;
            }
        }
    }

    tracing::debug!("All handles dropped, stopping client driver");
    client.disconnect();
    client
}

async fn dispatch(
    client: &mut MpdClient,
    pending: &mut Option<PendingConnect>,
    request: Request,
) {
    match request {
        Request::Snapshot(reply) => {
            let _ = reply.send(client.snapshot());
            return;
        }
        Request::Connect(reply) => {
            if let Some(superseded) = pending.take() {
                superseded.cancel();
            }
            client.start_connect();
            *pending = Some(PendingConnect {
                epoch: client.epoch(),
                reply,
            });
            return;
        }
        Request::Disconnect(reply) => {
            client.disconnect();
            if let Some(cancelled) = pending.take() {
                cancelled.cancel();
            }
            let _ = reply.send(());
            return;
        }
        Request::Update(reply) => {
            let _ = reply.send(client.update().await);
        }
        Request::Command(command, reply) => {
            let _ = reply.send(client.run_command(command).await);
        }
        Request::Add(uri, reply) => {
            let _ = reply.send(client.run_add(&uri).await);
        }
        Request::Delete(pos, reply) => {
            let _ = reply.send(client.run_delete(pos).await);
        }
        Request::DeleteRange { start, end, reply } => {
            let _ = reply.send(client.run_delete_range(start, end).await);
        }
        Request::Move { dest, src, reply } => {
            let _ = reply.send(client.run_move(dest, src).await);
        }
        Request::Clear(reply) => {
            let _ = reply.send(client.run_clear_queue().await);
        }
        Request::Crop(reply) => {
            let _ = reply.send(client.run_crop().await);
        }
        Request::Volume(volume, reply) => {
            let _ = reply.send(client.run_volume(volume).await);
        }
        Request::VolumeUp(reply) => {
            let _ = reply.send(client.run_volume_up().await);
        }
        Request::VolumeDown(reply) => {
            let _ = reply.send(client.run_volume_down().await);
        }
    }

    if client.is_connected() {
        let _ = client.refresh_if_needed().await;
        client.deliver_events();
    }
}

impl ClientHandle {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> ClientResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ClientError::Stopped)?;
        rx.await.map_err(|_| ClientError::Stopped)?
    }

    pub async fn connect(&self) -> ClientResult<()> {
        self.call(Request::Connect).await
    }

    pub async fn disconnect(&self) -> ClientResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Disconnect(reply))
            .await
            .map_err(|_| ClientError::Stopped)?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    pub async fn update(&self) -> ClientResult<()> {
        self.call(Request::Update).await
    }

    pub async fn command(&self, command: Command) -> ClientResult<Vec<Pair>> {
        self.call(|reply| Request::Command(command, reply)).await
    }

    pub async fn add(&self, uri: impl Into<String>) -> ClientResult<()> {
        let uri = uri.into();
        self.call(|reply| Request::Add(uri, reply)).await
    }

    pub async fn delete(&self, pos: usize) -> ClientResult<()> {
        self.call(|reply| Request::Delete(pos, reply)).await
    }

    pub async fn delete_range(&self, start: usize, end: usize) -> ClientResult<()> {
        self.call(|reply| Request::DeleteRange { start, end, reply })
            .await
    }

    pub async fn move_song(&self, dest: usize, src: usize) -> ClientResult<()> {
        self.call(|reply| Request::Move { dest, src, reply }).await
    }

    pub async fn clear(&self) -> ClientResult<()> {
        self.call(Request::Clear).await
    }

    pub async fn crop(&self) -> ClientResult<bool> {
        self.call(Request::Crop).await
    }

    pub async fn set_volume(&self, volume: u8) -> ClientResult<()> {
        self.call(|reply| Request::Volume(volume, reply)).await
    }

    pub async fn volume_up(&self) -> ClientResult<bool> {
        self.call(Request::VolumeUp).await
    }

    pub async fn volume_down(&self) -> ClientResult<bool> {
        self.call(Request::VolumeDown).await
    }

    /// Copy of the client's mirrored state.
    pub async fn snapshot(&self) -> ClientResult<ClientSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Snapshot(reply))
            .await
            .map_err(|_| ClientError::Stopped)?;
        rx.await.map_err(|_| ClientError::Stopped)
    }
}
