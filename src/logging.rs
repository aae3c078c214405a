//! Logging initialization.
//!
//! Configures the `tracing` subscriber with level filtering via the
//! `MPDS_LOG` environment variable. When the variable is unset the level
//! from the configuration file is used, and `warn` without one.
//!
//! ```bash
//! MPDS_LOG=debug mpds watch
//! MPDS_LOG=mpd_session::client=trace,warn mpds queue
//! ```

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "MPDS_LOG";

/// Builds the filter: `MPDS_LOG` first, then `fallback`.
pub fn filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Initialize the tracing subscriber, writing to stderr.
///
/// Does nothing if a global subscriber is already installed.
pub fn init(fallback: &str) {
    let _ = fmt()
        .with_env_filter(filter(fallback))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
