//! Client-side session manager for Music Player Daemon servers.
//!
//! The crate keeps one connection to a server alive, mirrors the server's
//! status and play queue locally, and multiplexes the protocol's push
//! notifications (`idle`) with commands issued by the application.
//!
//! - [`protocol`]: the line protocol, wire types and reply parsing
//! - [`client`]: transport resolution, the connection state machine, the
//!   idle multiplexer and the queue mirror
//! - [`config`]: TOML configuration and XDG paths
//!
//! # Platform Support
//!
//! Unix-like systems only: local servers are reached through Unix domain
//! sockets (and Linux abstract sockets where available).

/// Serialization of `Duration` values as milliseconds.
///
/// Used for JSON output of status and song data.
mod serde_duration {
    /// `Option<Duration>` as optional milliseconds.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            duration
                .map(|d| d.as_millis() as u64)
                .serialize(serializer)
        }

        #[allow(dead_code)]
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let millis = Option::<u64>::deserialize(deserializer)?;
            Ok(millis.map(Duration::from_millis))
        }
    }
}

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;

pub use client::{ClientSettings, ConnectionState, MpdClient};
pub use error::{ClientError, ClientResult};
