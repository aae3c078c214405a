//! Queue entries as reported by `playlistinfo` and `plchanges`.

use std::time::Duration;

use serde::Serialize;

use super::{Pair, TagType};

/// One entry of the server queue.
///
/// Identity is the server-assigned [`Song::id`]; the position is a snapshot
/// that the queue mirror keeps current while it reorders entries locally.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Song {
    /// URI relative to the music directory, or an absolute URL for streams.
    pub uri: String,
    /// Queue id, stable while the entry stays in the queue.
    pub id: u32,
    /// Zero-based queue position.
    pub pos: u32,
    #[serde(with = "crate::serde_duration::option")]
    pub duration: Option<Duration>,
    pub last_modified: Option<String>,
    pub tags: Vec<(TagType, String)>,
}

impl Song {
    /// Creates an untagged entry.
    pub fn new(uri: impl Into<String>, id: u32, pos: u32) -> Self {
        Self {
            uri: uri.into(),
            id,
            pos,
            duration: None,
            last_modified: None,
            tags: Vec::new(),
        }
    }

    /// Returns the first value of `tag`.
    pub fn tag(&self, tag: TagType) -> Option<&str> {
        self.tags
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.as_str())
    }

    /// A short label: `Artist - Title`, the title alone, or the file name.
    pub fn display_name(&self) -> String {
        match (self.tag(TagType::Artist), self.tag(TagType::Title)) {
            (Some(artist), Some(title)) => format!("{} - {}", artist, title),
            (None, Some(title)) => title.to_string(),
            _ => self
                .uri
                .rsplit('/')
                .next()
                .unwrap_or(&self.uri)
                .to_string(),
        }
    }

    /// Parses every song in a reply.
    ///
    /// A new song starts at each `file` key; pairs before the first one and
    /// non-song entities (`directory`, `playlist`) are skipped.
    pub fn parse_list(pairs: &[Pair]) -> Result<Vec<Song>, String> {
        let mut songs = Vec::new();
        let mut current: Option<SongBuilder> = None;

        for (key, value) in pairs {
            match key.as_str() {
                "file" => {
                    if let Some(builder) = current.take() {
                        songs.push(builder.build()?);
                    }
                    current = Some(SongBuilder::new(value));
                }
                "directory" | "playlist" => {
                    if let Some(builder) = current.take() {
                        songs.push(builder.build()?);
                    }
                }
                _ => {
                    if let Some(builder) = current.as_mut() {
                        builder.feed(key, value);
                    }
                }
            }
        }
        if let Some(builder) = current {
            songs.push(builder.build()?);
        }
        Ok(songs)
    }
}

struct SongBuilder {
    uri: String,
    id: Option<u32>,
    pos: Option<u32>,
    duration: Option<Duration>,
    time: Option<Duration>,
    last_modified: Option<String>,
    tags: Vec<(TagType, String)>,
}

impl SongBuilder {
    fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            id: None,
            pos: None,
            duration: None,
            time: None,
            last_modified: None,
            tags: Vec::new(),
        }
    }

    fn feed(&mut self, key: &str, value: &str) {
        match key {
            "Id" => self.id = value.parse().ok(),
            "Pos" => self.pos = value.parse().ok(),
            "duration" => {
                self.duration = value
                    .parse::<f64>()
                    .ok()
                    .filter(|secs| secs.is_finite() && *secs >= 0.0)
                    .map(Duration::from_secs_f64)
            }
            "Time" => self.time = value.parse().ok().map(Duration::from_secs),
            "Last-Modified" => self.last_modified = Some(value.to_string()),
            _ => {
                if let Ok(tag) = key.parse::<TagType>() {
                    self.tags.push((tag, value.to_string()));
                }
            }
        }
    }

    fn build(self) -> Result<Song, String> {
        let id = self
            .id
            .ok_or_else(|| format!("queue entry {} has no Id", self.uri))?;
        let pos = self
            .pos
            .ok_or_else(|| format!("queue entry {} has no Pos", self.uri))?;
        Ok(Song {
            uri: self.uri,
            id,
            pos,
            duration: self.duration.or(self.time),
            last_modified: self.last_modified,
            tags: self.tags,
        })
    }
}
