//! Default configuration template and file creation utilities.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::error::ConfigError;
use crate::config::xdg;

/// A commented TOML template with all default values.
///
/// Every active value here must match `Config::default()` from `schema.rs`.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# mpd-session configuration
#
# All values shown below are the built-in defaults.
# MPD_HOST, MPD_PORT and MPD_TIMEOUT override this file.

[connection]

# Server to connect to: a hostname, an IP address, an absolute socket
# path, "~/path" below the home directory or "@name" for an abstract
# socket. Prefix "password@" to authenticate right after connecting.
# When unset, $XDG_RUNTIME_DIR/mpd/socket or /run/mpd/socket is tried
# first, then 127.0.0.1:6600.
# host = "localhost"

# TCP port. 0 selects the default port 6600.
port = 0

# Time allowed for connecting and for every command.
# Examples: "500ms", "5s", "1m"
timeout = "5s"

# Password sent after connecting, when host does not carry one.
# password = "secret"

[tags]

# Only request these tags from the server. Unset requests every tag.
# whitelist = ["Artist", "Album", "Title", "Track"]

[log]

# Filter used when MPDS_LOG is unset.
# Examples: "warn", "info", "mpd_session::client=debug,warn"
level = "warn"
"#;

/// Writes the default template to the XDG config path.
///
/// If a file already exists it is kept and `AlreadyExists` is returned,
/// unless `force` is set, in which case it is renamed to
/// `config.toml.backup` first.
pub fn create_default_config(force: bool) -> Result<PathBuf, ConfigError> {
    create_default_config_at(&xdg::config_path(), force)?;
    Ok(xdg::config_path())
}

/// Like [`create_default_config`] for an explicit path.
pub fn create_default_config_at(path: &Path, force: bool) -> Result<(), ConfigError> {
    if path.exists() {
        if !force {
            return Err(ConfigError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        let backup_path = path.with_extension("toml.backup");
        fs::rename(path, &backup_path).map_err(|e| ConfigError::WriteError {
            path: backup_path.clone(),
            source: e,
        })?;
        tracing::info!("Backed up existing config to {}", backup_path.display());
    }

    write_default_config(path)
}

fn write_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        xdg::ensure_dir(parent).map_err(|e| ConfigError::WriteError {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(path, DEFAULT_CONFIG_TEMPLATE).map_err(|e| ConfigError::WriteError {
        path: path.to_path_buf(),
        source: e,
    })?;

    // The file may hold a password.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| {
            ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
    }

    tracing::info!("Created default configuration at {}", path.display());
    Ok(())
}
