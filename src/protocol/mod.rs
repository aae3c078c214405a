//! Typed view of the MPD line protocol.
//!
//! Every reply from the server is a sequence of `key: value` lines closed by a
//! terminator line:
//!
//! ```text
//! volume: 42
//! playlist: 17
//! OK
//! ```
//!
//! Inside a `command_list_ok_begin` batch each command's reply is closed by
//! `list_OK` and the whole batch by a final `OK`. A failed command produces a
//! single `ACK [code@index] {command} message` line which also ends the batch.

pub mod command;
pub mod idle;
pub mod song;
pub mod status;
pub mod tags;

pub use command::Command;
pub use idle::IdleEvents;
pub use song::Song;
pub use status::{PlayerState, Status};
pub use tags::{TagMask, TagType};

use std::fmt;

/// One `key: value` line of a reply.
pub type Pair = (String, String);

/// Default TCP port of an MPD server.
pub const DEFAULT_PORT: u16 = 6600;

/// Error codes carried by `ACK` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorCode {
    NotList,
    Arg,
    Password,
    Permission,
    Unknown,
    NoExist,
    PlaylistMax,
    System,
    PlaylistLoad,
    UpdateAlready,
    PlayerSync,
    Exist,
    Other(u32),
}

impl From<u32> for ServerErrorCode {
    fn from(code: u32) -> Self {
        match code {
            1 => Self::NotList,
            2 => Self::Arg,
            3 => Self::Password,
            4 => Self::Permission,
            5 => Self::Unknown,
            50 => Self::NoExist,
            51 => Self::PlaylistMax,
            52 => Self::System,
            53 => Self::PlaylistLoad,
            54 => Self::UpdateAlready,
            55 => Self::PlayerSync,
            56 => Self::Exist,
            other => Self::Other(other),
        }
    }
}

/// A structured failure reported by the server in an `ACK` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Error category.
    pub code: ServerErrorCode,
    /// Index of the failing command inside a batch (0 outside batches).
    pub command_index: u32,
    /// Name of the failing command as echoed by the server.
    pub command: String,
    /// Human-readable message, UTF-8 as sent by the server.
    pub message: String,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.command.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.command, self.message)
        }
    }
}

impl std::error::Error for ServerError {}

/// A single parsed reply line.
#[derive(Debug, PartialEq, Eq)]
pub enum Line<'a> {
    /// `OK`, end of a reply or of a whole batch.
    Ok,
    /// `list_OK`, end of one command's reply inside a batch.
    ListOk,
    /// `ACK ...`, the command failed.
    Ack(ServerError),
    /// `key: value`
    Pair(&'a str, &'a str),
}

/// Parses one reply line (without its trailing newline).
///
/// Returns `None` for lines that match none of the protocol forms.
pub fn parse_line(line: &str) -> Option<Line<'_>> {
    match line {
        "OK" => return Some(Line::Ok),
        "list_OK" => return Some(Line::ListOk),
        _ => {}
    }
    if let Some(rest) = line.strip_prefix("ACK ") {
        return parse_ack(rest).map(Line::Ack);
    }
    let (key, value) = line.split_once(": ")?;
    if key.is_empty() {
        return None;
    }
    Some(Line::Pair(key, value))
}

/// Parses the part of an `ACK` line after the `ACK ` prefix:
/// `[code@index] {command} message`.
fn parse_ack(rest: &str) -> Option<ServerError> {
    let rest = rest.strip_prefix('[')?;
    let (numbers, rest) = rest.split_once(']')?;
    let (code, index) = numbers.split_once('@')?;
    let code: u32 = code.parse().ok()?;
    let command_index: u32 = index.parse().ok()?;

    let rest = rest.trim_start().strip_prefix('{')?;
    let (command, message) = rest.split_once('}')?;

    Some(ServerError {
        code: code.into(),
        command_index,
        command: command.to_string(),
        message: message.trim_start().to_string(),
    })
}

/// Quotes a command argument, escaping `"` and `\`.
pub fn quote(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
