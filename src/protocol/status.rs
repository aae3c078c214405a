//! Point-in-time server status as reported by the `status` command.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::Pair;

/// Playback state of the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    #[default]
    Unknown,
    Stop,
    Play,
    Pause,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlayerState::Unknown => "unknown",
            PlayerState::Stop => "stop",
            PlayerState::Play => "play",
            PlayerState::Pause => "pause",
        };
        write!(f, "{}", s)
    }
}

/// Immutable status snapshot.
///
/// A new snapshot replaces the previous one wholesale on every fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Status {
    pub state: PlayerState,
    /// Mixer volume in percent; `None` when the server has no mixer.
    pub volume: Option<u8>,
    pub repeat: bool,
    pub random: bool,
    pub single: bool,
    pub consume: bool,
    /// Queue version; incremented by the server on every queue mutation.
    pub queue_version: u32,
    pub queue_length: u32,
    /// Position of the current song.
    pub song_pos: Option<u32>,
    /// Queue id of the current song.
    pub song_id: Option<u32>,
    pub next_song_pos: Option<u32>,
    pub next_song_id: Option<u32>,
    #[serde(with = "crate::serde_duration::option")]
    pub elapsed: Option<Duration>,
    #[serde(with = "crate::serde_duration::option")]
    pub total: Option<Duration>,
    /// Bit rate in kbit/s.
    pub bitrate: Option<u32>,
    /// Crossfade in seconds.
    pub crossfade: u32,
    /// Id of a running database update job.
    pub updating_db: Option<u32>,
    /// Last player error, if any.
    pub error: Option<String>,
}

impl Status {
    /// Builds a snapshot from the pairs of a `status` reply.
    ///
    /// Unknown keys are ignored; `playlist` and `playlistlength` are required
    /// because the queue mirror cannot be reconciled without them.
    pub fn from_pairs(pairs: &[Pair]) -> Result<Status, String> {
        let mut status = Status::default();
        let mut have_version = false;
        let mut have_length = false;

        for (key, value) in pairs {
            match key.as_str() {
                "state" => {
                    status.state = match value.as_str() {
                        "play" => PlayerState::Play,
                        "pause" => PlayerState::Pause,
                        "stop" => PlayerState::Stop,
                        _ => PlayerState::Unknown,
                    }
                }
                "volume" => {
                    status.volume = value
                        .parse::<i32>()
                        .ok()
                        .filter(|v| (0..=100).contains(v))
                        .map(|v| v as u8)
                }
                "repeat" => status.repeat = value == "1",
                "random" => status.random = value == "1",
                "single" => status.single = value == "1",
                "consume" => status.consume = value == "1",
                "playlist" => {
                    status.queue_version = parse_field(key, value)?;
                    have_version = true;
                }
                "playlistlength" => {
                    status.queue_length = parse_field(key, value)?;
                    have_length = true;
                }
                "song" => status.song_pos = value.parse().ok(),
                "songid" => status.song_id = value.parse().ok(),
                "nextsong" => status.next_song_pos = value.parse().ok(),
                "nextsongid" => status.next_song_id = value.parse().ok(),
                "elapsed" => status.elapsed = parse_seconds(value),
                "duration" => status.total = parse_seconds(value),
                "time" => {
                    // Legacy "elapsed:total" in whole seconds.
                    if let Some((elapsed, total)) = value.split_once(':') {
                        if status.elapsed.is_none() {
                            status.elapsed = parse_seconds(elapsed);
                        }
                        if status.total.is_none() {
                            status.total = parse_seconds(total);
                        }
                    }
                }
                "bitrate" => status.bitrate = value.parse().ok(),
                "xfade" => status.crossfade = value.parse().unwrap_or(0),
                "updating_db" => status.updating_db = value.parse().ok(),
                "error" => status.error = Some(value.clone()),
                _ => {}
            }
        }

        if !have_version || !have_length {
            return Err("status reply lacks queue version or length".to_string());
        }
        Ok(status)
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayerState::Play
    }

    pub fn is_playing_or_paused(&self) -> bool {
        matches!(self.state, PlayerState::Play | PlayerState::Pause)
    }
}

fn parse_field(key: &str, value: &str) -> Result<u32, String> {
    value
        .parse()
        .map_err(|_| format!("invalid value for {}: {}", key, value))
}

fn parse_seconds(value: &str) -> Option<Duration> {
    value
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}
