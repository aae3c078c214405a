//! mpds - command-line front end for the MPD session manager.
//!
//! One-shot commands connect, refresh the mirror, perform their action and
//! exit. `watch` keeps the session open and prints every change the server
//! pushes until interrupted.

use clap::{Parser, Subcommand};
use mpd_session::client::{event_loop, ChannelListener, ClientEvent, LogListener};
use mpd_session::config::{default, xdg, Config, ConfigLoader};
use mpd_session::protocol::{Song, Status};
use mpd_session::{logging, ClientError, ClientSettings, MpdClient};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

/// MPD session manager
#[derive(Parser)]
#[command(name = "mpds")]
#[command(version, about = "Music Player Daemon session client")]
struct Cli {
    /// Server as [password@]host, socket path or @abstract (overrides MPD_HOST)
    #[arg(long, global = true)]
    host: Option<String>,

    /// TCP port (overrides MPD_PORT)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Connect and command timeout, e.g. "5s" (overrides MPD_TIMEOUT)
    #[arg(long, global = true)]
    timeout: Option<String>,

    /// Configuration file instead of the XDG default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for mpds
#[derive(Subcommand)]
enum Commands {
    /// Show player status and the current song
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List the queue
    Queue {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Append a song to the queue
    Add {
        /// Song URI relative to the music directory
        uri: String,
    },

    /// Remove the queue entry at a position
    Delete {
        /// Zero-based queue position
        pos: usize,
    },

    /// Remove the queue entries in START..END
    DeleteRange {
        /// First position removed
        start: usize,
        /// First position kept
        end: usize,
    },

    /// Move a queue entry
    Move {
        /// Current position
        from: usize,
        /// New position
        to: usize,
    },

    /// Empty the queue
    Clear,

    /// Remove everything but the current song
    Crop,

    /// Set the volume: 0-100, "+" or "-"
    Volume {
        #[arg(allow_hyphen_values = true)]
        value: VolumeArg,
    },

    /// Print changes as the server reports them, until interrupted
    Watch,

    /// Manage configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Actions for the `config` subcommand.
#[derive(Subcommand)]
enum ConfigAction {
    /// Create default configuration file
    Init {
        /// Overwrite existing configuration (creates backup)
        #[arg(long)]
        force: bool,
    },
    /// Show configuration file path
    Path,
    /// Validate configuration file
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VolumeArg {
    Set(u8),
    Up,
    Down,
}

impl FromStr for VolumeArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(VolumeArg::Up),
            "-" => Ok(VolumeArg::Down),
            _ => match s.parse::<u8>() {
                Ok(v) if v <= 100 => Ok(VolumeArg::Set(v)),
                _ => Err(format!("'{}' is not 0-100, '+' or '-'", s)),
            },
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Config { action } = &cli.command {
        return run_config_command(action, cli.config.as_deref());
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.log.level);

    let settings = match config.client_settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Config error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Watch => runtime.block_on(watch(settings)),
        command => runtime.block_on(run_once(settings, command)),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Config file, then environment, then flags.
fn load_config(cli: &Cli) -> Result<Config, mpd_session::config::ConfigError> {
    let mut config = ConfigLoader::load(cli.config.as_deref())?;
    if let Some(host) = &cli.host {
        config.connection.host = Some(host.clone());
    }
    if let Some(port) = cli.port {
        config.connection.port = port;
    }
    if let Some(timeout) = &cli.timeout {
        config.connection.timeout = timeout.clone();
    }
    Ok(config)
}

fn run_config_command(action: &ConfigAction, path: Option<&std::path::Path>) -> ExitCode {
    let result = match action {
        ConfigAction::Init { force } => {
            let created = match path {
                Some(path) => {
                    default::create_default_config_at(path, *force).map(|()| path.to_path_buf())
                }
                None => default::create_default_config(*force),
            };
            created.map(|path| println!("Created configuration at {}", path.display()))
        }
        ConfigAction::Path => {
            let path = path.map_or_else(xdg::config_path, std::path::Path::to_path_buf);
            println!("{}", path.display());
            Ok(())
        }
        ConfigAction::Validate => ConfigLoader::load(path).and_then(|config| {
            config.validate()?;
            println!("Configuration is valid");
            println!("Server: {}", config.connect_plan().display_name());
            println!("{config:#?}");
            Ok(())
        }),
    };
    if let Err(e) = result {
        eprintln!("Config error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run_once(settings: ClientSettings, command: Commands) -> Result<(), ClientError> {
    let mut client = MpdClient::new(settings, Box::new(LogListener));
    client.connect().await?;
    client.update().await?;

    match command {
        Commands::Status { json } => print_status(&client, json),
        Commands::Queue { json } => print_queue(&client, json),
        Commands::Add { uri } => client.run_add(&uri).await?,
        Commands::Delete { pos } => client.run_delete(pos).await?,
        Commands::DeleteRange { start, end } => client.run_delete_range(start, end).await?,
        Commands::Move { from, to } => client.run_move(to, from).await?,
        Commands::Clear => client.run_clear_queue().await?,
        Commands::Crop => {
            if !client.run_crop().await? {
                eprintln!("Nothing is playing");
            }
        }
        Commands::Volume { value } => {
            let changed = match value {
                VolumeArg::Set(volume) => client.run_volume(volume).await.map(|()| true)?,
                VolumeArg::Up => client.run_volume_up().await?,
                VolumeArg::Down => client.run_volume_down().await?,
            };
            if !changed {
                eprintln!("Volume unchanged");
            }
        }
        Commands::Watch | Commands::Config { .. } => {}
    }

    client.disconnect();
    Ok(())
}

async fn watch(settings: ClientSettings) -> Result<(), ClientError> {
    let (listener, mut events) = ChannelListener::new();
    let listener = match &settings.password {
        Some(password) => listener.with_password(password.clone()),
        None => listener,
    };
    let client = MpdClient::new(settings, Box::new(listener));
    let (handle, _driver) = event_loop::spawn(client);
    handle.connect().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(ClientEvent::Connected { server_version }) => {
                    println!("connected (protocol {})", server_version);
                }
                Some(ClientEvent::Updated(changed)) => {
                    let snapshot = handle.snapshot().await?;
                    let current = snapshot
                        .current
                        .as_ref()
                        .map(Song::display_name)
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{}: queue {} entries, current {}",
                        changed,
                        snapshot.queue.len(),
                        current
                    );
                }
                Some(ClientEvent::Error(message)) => eprintln!("error: {}", message),
                Some(ClientEvent::ConnectionLost(message)) => {
                    return Err(ClientError::Protocol(format!("connection lost: {}", message)));
                }
                Some(ClientEvent::ConnectFailed(_)) | Some(ClientEvent::AuthChallenge) => {}
                None => break,
            }
        }
    }

    handle.disconnect().await
}

#[derive(Serialize)]
struct StatusReport<'a> {
    server: Option<String>,
    status: Option<&'a Status>,
    current: Option<&'a Song>,
}

fn print_status(client: &MpdClient, json: bool) {
    if json {
        let report = StatusReport {
            server: client.endpoint().map(ToString::to_string),
            status: client.status(),
            current: client.current_song(),
        };
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error: {}", e),
        }
        return;
    }

    let Some(status) = client.status() else {
        println!("no status");
        return;
    };
    println!("state: {}", status.state);
    match status.volume {
        Some(volume) => println!("volume: {}%", volume),
        None => println!("volume: n/a"),
    }
    if let Some(song) = client.current_song() {
        println!(
            "song: {} ({}/{})",
            song.display_name(),
            song.pos + 1,
            status.queue_length
        );
    }
    if let Some(elapsed) = status.elapsed {
        let total = status.total.map(Clock).map(|t| t.to_string());
        println!(
            "time: {} / {}",
            Clock(elapsed),
            total.as_deref().unwrap_or("-")
        );
    }
    println!(
        "repeat: {} random: {} single: {} consume: {}",
        on_off(status.repeat),
        on_off(status.random),
        on_off(status.single),
        on_off(status.consume)
    );
    println!(
        "queue: version {}, length {}",
        status.queue_version, status.queue_length
    );
    if let Some(error) = &status.error {
        println!("error: {}", error);
    }
}

fn print_queue(client: &MpdClient, json: bool) {
    if json {
        match serde_json::to_string_pretty(client.queue().songs()) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error: {}", e),
        }
        return;
    }

    let current = client.current_song().map(|song| song.id);
    for song in client.queue().iter() {
        let marker = if Some(song.id) == current { '>' } else { ' ' };
        println!("{}{:>4} {}", marker, song.pos, song.display_name());
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

/// `m:ss` rendering of a duration.
struct Clock(Duration);

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        write!(f, "{}:{:02}", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["mpds", "queue", "--host", "/tmp/mpd.sock", "--port", "6601"])
            .expect("parse");
        assert_eq!(cli.host.as_deref(), Some("/tmp/mpd.sock"));
        assert_eq!(cli.port, Some(6601));
        assert!(matches!(cli.command, Commands::Queue { json: false }));
    }

    #[test]
    fn volume_argument_forms() {
        assert_eq!("+".parse::<VolumeArg>(), Ok(VolumeArg::Up));
        assert_eq!("-".parse::<VolumeArg>(), Ok(VolumeArg::Down));
        assert_eq!("42".parse::<VolumeArg>(), Ok(VolumeArg::Set(42)));
        assert!("101".parse::<VolumeArg>().is_err());
        assert!("loud".parse::<VolumeArg>().is_err());
    }

    #[test]
    fn volume_minus_is_not_a_flag() {
        let cli = Cli::try_parse_from(["mpds", "volume", "-"]).expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Volume {
                value: VolumeArg::Down
            }
        ));
    }

    #[test]
    fn move_takes_two_positions() {
        let cli = Cli::try_parse_from(["mpds", "move", "2", "0"]).expect("parse");
        assert!(matches!(cli.command, Commands::Move { from: 2, to: 0 }));
    }

    #[test]
    fn config_init_force_flag() {
        let cli = Cli::try_parse_from(["mpds", "config", "init", "--force"]).expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Init { force: true }
            }
        ));
    }

    #[test]
    fn clock_formats_minutes() {
        assert_eq!(Clock(Duration::from_secs(83)).to_string(), "1:23");
        assert_eq!(Clock(Duration::from_secs(5)).to_string(), "0:05");
    }
}
