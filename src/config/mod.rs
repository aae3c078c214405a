//! Configuration: TOML file, environment overrides and XDG paths.
//!
//! Precedence, lowest to highest: built-in defaults, the config file,
//! `MPD_HOST` / `MPD_PORT` / `MPD_TIMEOUT`, command-line flags.

/// Default configuration template and file creation.
pub mod default;

/// Configuration error types.
pub mod error;

/// Configuration file loader.
pub mod loader;

/// TOML configuration schema types.
pub mod schema;

/// XDG Base Directory path resolution utilities.
pub mod xdg;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{Config, ConnectionConfig, LogConfig, TagsConfig};
