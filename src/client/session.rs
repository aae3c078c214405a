//! The transport-level session: a buffered byte stream speaking the MPD
//! line protocol.
//!
//! `Session` is the request/response primitive the rest of the client is
//! built on. It knows how to frame commands and batches and how to read
//! replies, and applies the configured timeout to every read and write. It
//! holds no knowledge of queues or status.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};

use crate::error::{ClientError, ClientResult};
use crate::protocol::command::encode_batch;
use crate::protocol::{parse_line, Command, Line, Pair, ServerError};

/// Any bidirectional byte stream the session can run on.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type-erased stream so TCP and Unix sockets share one session type.
pub type BoxedStream = Box<dyn Stream>;

/// Replies of one `command_list_ok_begin` batch.
#[derive(Debug, Default)]
pub struct BatchReply {
    /// One entry per command that completed, in order.
    pub replies: Vec<Vec<Pair>>,
    /// Set when the server aborted the batch; the failing command is
    /// `replies.len()`.
    pub error: Option<ServerError>,
}

impl BatchReply {
    /// Returns the replies, or the server error if the batch was aborted.
    pub fn into_result(self) -> ClientResult<Vec<Vec<Pair>>> {
        match self.error {
            Some(err) => Err(ClientError::Server(err)),
            None => Ok(self.replies),
        }
    }
}

/// A connected, greeted protocol session.
pub struct Session {
    stream: BufStream<BoxedStream>,
    line: String,
    server_version: String,
    timeout: Duration,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("server_version", &self.server_version)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Reads the `OK MPD <version>` greeting from a freshly connected stream.
    pub async fn handshake(stream: BoxedStream, timeout: Duration) -> ClientResult<Self> {
        let mut session = Self {
            stream: BufStream::new(stream),
            line: String::new(),
            server_version: String::new(),
            timeout,
        };

        let greeting = session.read_line().await?;
        let version = greeting
            .strip_prefix("OK MPD ")
            .ok_or_else(|| ClientError::Protocol(format!("unexpected greeting: {}", greeting)))?;
        session.server_version = version.to_string();
        tracing::debug!("Server speaks protocol {}", session.server_version);
        Ok(session)
    }

    /// Protocol version announced in the greeting, e.g. `0.23.5`.
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Sends one command without waiting for the reply.
    pub async fn send(&mut self, command: &Command) -> ClientResult<()> {
        tracing::trace!("-> {}", command);
        self.write_raw(&format!("{}\n", command)).await
    }

    /// Sends a batch without waiting for the replies.
    pub async fn send_batch(&mut self, commands: &[Command]) -> ClientResult<()> {
        tracing::trace!("-> batch of {} commands", commands.len());
        self.write_raw(&encode_batch(commands)).await
    }

    /// Sends one command and reads its reply.
    pub async fn run(&mut self, command: &Command) -> ClientResult<Vec<Pair>> {
        self.send(command).await?;
        self.recv_pairs().await
    }

    /// Sends a batch and reads every reply.
    ///
    /// A server error aborts the batch; the replies received before it are
    /// kept in the returned [`BatchReply`]. Transport and protocol failures
    /// are returned as `Err`.
    pub async fn run_batch(&mut self, commands: &[Command]) -> ClientResult<BatchReply> {
        self.send_batch(commands).await?;

        let mut reply = BatchReply::default();
        for _ in commands {
            match self.read_reply().await {
                Ok((pairs, true)) => reply.replies.push(pairs),
                Ok((_, false)) => {
                    return Err(ClientError::Protocol(
                        "batch finished before every command replied".to_string(),
                    ))
                }
                Err(ClientError::Server(err)) => {
                    reply.error = Some(err);
                    return Ok(reply);
                }
                Err(err) => return Err(err),
            }
        }

        match self.read_reply().await? {
            (pairs, false) if pairs.is_empty() => Ok(reply),
            _ => Err(ClientError::Protocol(
                "batch reply not closed by OK".to_string(),
            )),
        }
    }

    /// Reads one reply closed by `OK` or `list_OK`.
    pub async fn recv_pairs(&mut self) -> ClientResult<Vec<Pair>> {
        self.read_reply().await.map(|(pairs, _)| pairs)
    }

    /// Waits until the server has sent something.
    ///
    /// Used while in push-notification mode, where the server answers only
    /// when a change occurs, so no timeout applies. Cancel-safe: data read
    /// here stays buffered for the next [`Session::recv_pairs`].
    pub async fn wait_readable(&mut self) -> ClientResult<()> {
        let buffered = self.stream.fill_buf().await?;
        if buffered.is_empty() {
            return Err(closed_by_peer());
        }
        Ok(())
    }

    /// Returns the pairs and whether the terminator was `list_OK`.
    async fn read_reply(&mut self) -> ClientResult<(Vec<Pair>, bool)> {
        let mut pairs = Vec::new();
        loop {
            let line = self.read_line().await?;
            match parse_line(&line) {
                Some(Line::Ok) => return Ok((pairs, false)),
                Some(Line::ListOk) => return Ok((pairs, true)),
                Some(Line::Ack(err)) => {
                    tracing::debug!("<- ACK {}", err);
                    return Err(ClientError::Server(err));
                }
                Some(Line::Pair(key, value)) => pairs.push((key.to_string(), value.to_string())),
                None => return Err(ClientError::Protocol(format!("unexpected line: {}", line))),
            }
        }
    }

    async fn read_line(&mut self) -> ClientResult<String> {
        self.line.clear();
        let read = deadline(self.timeout, self.stream.read_line(&mut self.line)).await?;
        if read == 0 {
            return Err(closed_by_peer());
        }
        Ok(self.line.trim_end_matches(['\n', '\r']).to_string())
    }

    async fn write_raw(&mut self, data: &str) -> ClientResult<()> {
        let stream = &mut self.stream;
        deadline(self.timeout, async move {
            stream.write_all(data.as_bytes()).await?;
            stream.flush().await
        })
        .await
    }
}

/// Runs `fut`, mapping expiry of `timeout` to [`ClientError::Timeout`].
pub(crate) async fn deadline<T, F>(timeout: Duration, fut: F) -> ClientResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(ClientError::from),
        Err(_) => Err(ClientError::Timeout),
    }
}

fn closed_by_peer() -> ClientError {
    ClientError::Transport(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "connection closed by server",
    ))
}
