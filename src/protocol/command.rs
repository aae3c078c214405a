//! Requests the session manager sends to the server.

use std::fmt;

use super::{quote, IdleEvents, TagType};

/// A single protocol command.
///
/// `Display` renders the wire form without the trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Password(String),
    Ping,
    Status,
    /// The whole queue, or the entry at one position.
    PlaylistInfo(Option<u32>),
    /// Queue entries changed since the given version.
    PlChanges(u32),
    Add(String),
    DeleteId(u32),
    /// Half-open position range `start..end`.
    DeleteRange { start: u32, end: u32 },
    Move { from: u32, to: u32 },
    Clear,
    SetVolume(u8),
    Play(Option<u32>),
    Pause(bool),
    Stop,
    Next,
    Previous,
    /// Enter push-notification mode, optionally restricted to some categories.
    Idle(IdleEvents),
    NoIdle,
    TagTypesClear,
    TagTypesEnable(Vec<TagType>),
    Subscribe(String),
    Unsubscribe(String),
    SendMessage { channel: String, text: String },
}

impl Command {
    /// Returns `true` for commands that change the queue.
    pub fn mutates_queue(&self) -> bool {
        matches!(
            self,
            Command::Add(_)
                | Command::DeleteId(_)
                | Command::DeleteRange { .. }
                | Command::Move { .. }
                | Command::Clear
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Password(password) => write!(f, "password {}", quote(password)),
            Command::Ping => f.write_str("ping"),
            Command::Status => f.write_str("status"),
            Command::PlaylistInfo(None) => f.write_str("playlistinfo"),
            Command::PlaylistInfo(Some(pos)) => write!(f, "playlistinfo {}", pos),
            Command::PlChanges(version) => write!(f, "plchanges {}", version),
            Command::Add(uri) => write!(f, "add {}", quote(uri)),
            Command::DeleteId(id) => write!(f, "deleteid {}", id),
            Command::DeleteRange { start, end } => write!(f, "delete {}:{}", start, end),
            Command::Move { from, to } => write!(f, "move {} {}", from, to),
            Command::Clear => f.write_str("clear"),
            Command::SetVolume(volume) => write!(f, "setvol {}", volume),
            Command::Play(None) => f.write_str("play"),
            Command::Play(Some(pos)) => write!(f, "play {}", pos),
            Command::Pause(pause) => write!(f, "pause {}", u8::from(*pause)),
            Command::Stop => f.write_str("stop"),
            Command::Next => f.write_str("next"),
            Command::Previous => f.write_str("previous"),
            Command::Idle(events) => {
                f.write_str("idle")?;
                if *events != IdleEvents::ALL {
                    for name in events.names() {
                        write!(f, " {}", name)?;
                    }
                }
                Ok(())
            }
            Command::NoIdle => f.write_str("noidle"),
            Command::TagTypesClear => f.write_str("tagtypes clear"),
            Command::TagTypesEnable(tags) => {
                f.write_str("tagtypes enable")?;
                for tag in tags {
                    write!(f, " {}", tag)?;
                }
                Ok(())
            }
            Command::Subscribe(channel) => write!(f, "subscribe {}", quote(channel)),
            Command::Unsubscribe(channel) => write!(f, "unsubscribe {}", quote(channel)),
            Command::SendMessage { channel, text } => {
                write!(f, "sendmessage {} {}", quote(channel), quote(text))
            }
        }
    }
}

/// Renders a batch whose replies are delimited by `list_OK`.
pub fn encode_batch(commands: &[Command]) -> String {
    let mut out = String::from("command_list_ok_begin\n");
    for command in commands {
        out.push_str(&command.to_string());
        out.push('\n');
    }
    out.push_str("command_list_end\n");
    out
}
