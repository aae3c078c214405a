//! TOML configuration schema types.
//!
//! All structs derive `Deserialize` and `Serialize` with defaults via
//! `#[serde(default)]`, so a partial (or empty) file is valid.
//!
//! Durations use human-readable strings (e.g. `"5s"`, `"1500ms"`) parsed by
//! the `humantime` crate when settings are built.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::client::{ClientSettings, ConnectPlan};
use crate::config::error::ConfigError;
use crate::protocol::{TagMask, TagType};

/// Environment variable overriding `connection.host`.
pub const ENV_HOST: &str = "MPD_HOST";
/// Environment variable overriding `connection.port`.
pub const ENV_PORT: &str = "MPD_PORT";
/// Environment variable overriding `connection.timeout`.
pub const ENV_TIMEOUT: &str = "MPD_TIMEOUT";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
///
/// ```toml
/// [connection]
/// [tags]
/// [log]
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub tags: TagsConfig,
    pub log: LogConfig,
}

/// Where and how to connect.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// `[password@]host`: hostname, socket path, `@abstract` or `~/path`.
    /// Unset means the local default socket with a loopback TCP fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// TCP port; `0` selects the default (6600).
    pub port: u16,
    /// Applies to connecting and to every command.
    pub timeout: String,
    /// Sent after connecting. A password in `host` takes precedence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 0,
            timeout: "5s".to_string(),
            password: None,
        }
    }
}

/// Which tags the server should report for songs.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TagsConfig {
    /// Tag names, e.g. `["Artist", "Title"]`. Unset means every tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<Vec<String>>,
}

/// Log output.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `MPDS_LOG` is unset.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Config {
    /// Applies `MPD_HOST`, `MPD_PORT` and `MPD_TIMEOUT` from the process
    /// environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies environment overrides read through `get`.
    pub fn apply_env_from<F>(&mut self, get: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = get(ENV_HOST).filter(|h| !h.is_empty()) {
            self.connection.host = Some(host);
        }
        if let Some(port) = get(ENV_PORT).filter(|p| !p.is_empty()) {
            self.connection.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                field: ENV_PORT.to_string(),
                message: format!("'{}' is not a port number", port),
            })?;
        }
        if let Some(timeout) = get(ENV_TIMEOUT).filter(|t| !t.is_empty()) {
            // Bare numbers are seconds, as the C client library reads them.
            self.connection.timeout = if timeout.bytes().all(|b| b.is_ascii_digit()) {
                format!("{}s", timeout)
            } else {
                timeout
            };
        }
        Ok(())
    }

    /// Parsed `connection.timeout`.
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        let timeout = humantime::parse_duration(&self.connection.timeout).map_err(|e| {
            ConfigError::InvalidValue {
                field: "connection.timeout".to_string(),
                message: e.to_string(),
            }
        })?;
        if timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "connection.timeout".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(timeout)
    }

    /// Parsed `tags.whitelist`.
    pub fn tag_whitelist(&self) -> Result<Option<TagMask>, ConfigError> {
        let Some(names) = &self.tags.whitelist else {
            return Ok(None);
        };
        names
            .iter()
            .map(|name| {
                name.parse::<TagType>().map_err(|e| ConfigError::InvalidValue {
                    field: "tags.whitelist".to_string(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<TagMask, _>>()
            .map(Some)
    }

    /// Builds the client settings this configuration describes.
    pub fn client_settings(&self) -> Result<ClientSettings, ConfigError> {
        let mut settings =
            ClientSettings::from_host(self.connection.host.as_deref(), self.connection.port);
        if settings.password.is_none() {
            settings.password = self.connection.password.clone();
        }
        settings.timeout = self.timeout()?;
        settings.tag_whitelist = self.tag_whitelist()?;
        Ok(settings)
    }

    /// The connect plan alone, for display.
    pub fn connect_plan(&self) -> ConnectPlan {
        ClientSettings::from_host(self.connection.host.as_deref(), self.connection.port).plan
    }

    /// Checks every value that is only interpreted at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.client_settings()?;
        EnvFilter::try_new(&self.log.level).map_err(|e| ConfigError::InvalidValue {
            field: "log.level".to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}
