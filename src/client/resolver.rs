//! Host specification parsing and connection establishment.
//!
//! A host is given the way `MPD_HOST` spells it: `[password@]host` where
//! `host` is empty (use the default), an absolute socket path, `@name` for a
//! Linux abstract socket, `~/path` for a socket below the home directory, or
//! a hostname / IP literal used with a TCP port.
//!
//! When nothing was specified and the default is a local socket, a secondary
//! TCP candidate on the loopback address is prepared. It is tried only after
//! the primary failed, and at most once per connect attempt.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream, UnixStream};

use crate::client::session::{deadline, BoxedStream};
use crate::config::xdg;
use crate::error::{ClientError, ClientResult};
use crate::protocol::DEFAULT_PORT;

/// System-wide socket used when no runtime-dir socket exists.
pub const SYSTEM_SOCKET: &str = "/run/mpd/socket";

/// One concrete place to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A socket file.
    Local(PathBuf),
    /// A Linux abstract socket, without the leading `@`.
    Abstract(String),
    /// A hostname or IP literal plus port, resolved at connect time.
    Tcp { host: String, port: u16 },
}

impl Endpoint {
    pub fn is_local(&self) -> bool {
        !matches!(self, Endpoint::Tcp { .. })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Local(path) => write!(f, "{}", path.display()),
            Endpoint::Abstract(name) => write!(f, "@{}", name),
            Endpoint::Tcp { host, port } if *port == DEFAULT_PORT => write!(f, "{}", host),
            Endpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

/// The ordered candidates of one connection cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPlan {
    primary: Endpoint,
    secondary: Option<Endpoint>,
}

impl ConnectPlan {
    /// A plan with a single candidate.
    pub fn new(primary: Endpoint) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    /// A plan that falls back to `secondary` when `primary` fails.
    pub fn with_fallback(primary: Endpoint, secondary: Endpoint) -> Self {
        Self {
            primary,
            secondary: Some(secondary),
        }
    }

    /// Builds the plan for a host specification and port.
    ///
    /// `host` must already be stripped of any `password@` prefix (see
    /// [`split_password`]). Port `0` selects the default port.
    pub fn from_host(host: Option<&str>, port: u16) -> Self {
        let host = host.filter(|h| !h.is_empty());
        match host {
            Some(host) => Self::new(parse_endpoint(host, port)),
            None if port != 0 => Self::new(Endpoint::Tcp {
                host: "localhost".to_string(),
                port,
            }),
            None => {
                let primary = default_endpoint();
                if primary.is_local() {
                    Self::with_fallback(
                        primary,
                        Endpoint::Tcp {
                            host: "127.0.0.1".to_string(),
                            port: DEFAULT_PORT,
                        },
                    )
                } else {
                    Self::new(primary)
                }
            }
        }
    }

    pub fn primary(&self) -> &Endpoint {
        &self.primary
    }

    pub fn secondary(&self) -> Option<&Endpoint> {
        self.secondary.as_ref()
    }

    /// The name shown to users for this plan.
    pub fn display_name(&self) -> String {
        self.primary.to_string()
    }
}

/// Splits `password@host` into its parts.
///
/// An `@` in first position denotes an abstract socket, not a password.
pub fn split_password(spec: &str) -> (Option<&str>, &str) {
    match spec.find('@') {
        Some(0) | None => (None, spec),
        Some(at) => (Some(&spec[..at]), &spec[at + 1..]),
    }
}

fn parse_endpoint(host: &str, port: u16) -> Endpoint {
    if let Some(name) = host.strip_prefix('@') {
        return Endpoint::Abstract(name.to_string());
    }
    if host.starts_with('/') {
        return Endpoint::Local(PathBuf::from(host));
    }
    if host.starts_with("~/") {
        return Endpoint::Local(xdg::expand_tilde(host));
    }
    Endpoint::Tcp {
        host: host.to_string(),
        port: if port == 0 { DEFAULT_PORT } else { port },
    }
}

/// The socket a local server listens on by default.
fn default_endpoint() -> Endpoint {
    match xdg::runtime_dir().map(|dir| dir.join("mpd").join("socket")) {
        Some(socket) if socket.exists() => Endpoint::Local(socket),
        _ => Endpoint::Local(PathBuf::from(SYSTEM_SOCKET)),
    }
}

/// Connects according to `plan`.
///
/// The primary candidate is tried first; the secondary only after the
/// primary failed. Each candidate gets the full `timeout`. Dropping the
/// returned future cancels the attempt.
pub async fn connect(plan: &ConnectPlan, timeout: Duration) -> ClientResult<(BoxedStream, Endpoint)> {
    match connect_endpoint(&plan.primary, timeout).await {
        Ok(stream) => Ok((stream, plan.primary.clone())),
        Err(err) => match &plan.secondary {
            Some(secondary) => {
                tracing::info!(
                    "Connecting to {} failed ({}), trying {}",
                    plan.primary,
                    err,
                    secondary
                );
                let stream = connect_endpoint(secondary, timeout).await?;
                Ok((stream, secondary.clone()))
            }
            None => Err(err),
        },
    }
}

async fn connect_endpoint(endpoint: &Endpoint, timeout: Duration) -> ClientResult<BoxedStream> {
    tracing::debug!("Connecting to {}", endpoint);
    let result = match endpoint {
        Endpoint::Local(path) => connect_local(path, timeout).await,
        Endpoint::Abstract(name) => connect_abstract(name),
        Endpoint::Tcp { host, port } => connect_tcp(host, *port, timeout).await,
    };
    result.map_err(|err| match err {
        ClientError::Transport(source) => ClientError::Connect {
            target: endpoint.to_string(),
            source,
        },
        other => other,
    })
}

async fn connect_local(path: &Path, timeout: Duration) -> ClientResult<BoxedStream> {
    let stream = deadline(timeout, UnixStream::connect(path)).await?;
    Ok(Box::new(stream))
}

#[cfg(target_os = "linux")]
fn connect_abstract(name: &str) -> ClientResult<BoxedStream> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::{SocketAddr, UnixStream as StdUnixStream};

    let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
    let stream = StdUnixStream::connect_addr(&addr)?;
    stream.set_nonblocking(true)?;
    Ok(Box::new(UnixStream::from_std(stream)?))
}

#[cfg(not(target_os = "linux"))]
fn connect_abstract(_name: &str) -> ClientResult<BoxedStream> {
    Err(ClientError::Transport(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "abstract sockets are only available on Linux",
    )))
}

/// Resolves `host` and tries each address in turn, all within `timeout`.
async fn connect_tcp(host: &str, port: u16, timeout: Duration) -> ClientResult<BoxedStream> {
    let stream = deadline(timeout, try_addresses(host, port)).await?;
    stream.set_nodelay(true)?;
    Ok(Box::new(stream))
}

async fn try_addresses(host: &str, port: u16) -> std::io::Result<TcpStream> {
    let mut last_error = None;
    for addr in lookup_host((host, port)).await? {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!("Connecting to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} did not resolve to any address", host),
        )
    }))
}
