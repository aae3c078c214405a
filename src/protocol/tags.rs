//! Song metadata tag names and tag sets.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use serde::Serialize;

/// Metadata tags understood by the server.
///
/// The discriminant is the bit position inside a [`TagMask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TagType {
    Artist = 0,
    ArtistSort,
    Album,
    AlbumSort,
    AlbumArtist,
    AlbumArtistSort,
    Title,
    Track,
    Name,
    Genre,
    Date,
    OriginalDate,
    Composer,
    Performer,
    Conductor,
    Work,
    Grouping,
    Comment,
    Disc,
    Label,
    MusicBrainzArtistId,
    MusicBrainzAlbumId,
    MusicBrainzAlbumArtistId,
    MusicBrainzTrackId,
    MusicBrainzReleaseTrackId,
}

impl TagType {
    /// All tag types in bit order.
    pub const ALL: [TagType; 25] = [
        TagType::Artist,
        TagType::ArtistSort,
        TagType::Album,
        TagType::AlbumSort,
        TagType::AlbumArtist,
        TagType::AlbumArtistSort,
        TagType::Title,
        TagType::Track,
        TagType::Name,
        TagType::Genre,
        TagType::Date,
        TagType::OriginalDate,
        TagType::Composer,
        TagType::Performer,
        TagType::Conductor,
        TagType::Work,
        TagType::Grouping,
        TagType::Comment,
        TagType::Disc,
        TagType::Label,
        TagType::MusicBrainzArtistId,
        TagType::MusicBrainzAlbumId,
        TagType::MusicBrainzAlbumArtistId,
        TagType::MusicBrainzTrackId,
        TagType::MusicBrainzReleaseTrackId,
    ];

    /// The name used on the wire, e.g. `AlbumArtist`.
    pub fn as_str(self) -> &'static str {
        match self {
            TagType::Artist => "Artist",
            TagType::ArtistSort => "ArtistSort",
            TagType::Album => "Album",
            TagType::AlbumSort => "AlbumSort",
            TagType::AlbumArtist => "AlbumArtist",
            TagType::AlbumArtistSort => "AlbumArtistSort",
            TagType::Title => "Title",
            TagType::Track => "Track",
            TagType::Name => "Name",
            TagType::Genre => "Genre",
            TagType::Date => "Date",
            TagType::OriginalDate => "OriginalDate",
            TagType::Composer => "Composer",
            TagType::Performer => "Performer",
            TagType::Conductor => "Conductor",
            TagType::Work => "Work",
            TagType::Grouping => "Grouping",
            TagType::Comment => "Comment",
            TagType::Disc => "Disc",
            TagType::Label => "Label",
            TagType::MusicBrainzArtistId => "MUSICBRAINZ_ARTISTID",
            TagType::MusicBrainzAlbumId => "MUSICBRAINZ_ALBUMID",
            TagType::MusicBrainzAlbumArtistId => "MUSICBRAINZ_ALBUMARTISTID",
            TagType::MusicBrainzTrackId => "MUSICBRAINZ_TRACKID",
            TagType::MusicBrainzReleaseTrackId => "MUSICBRAINZ_RELEASETRACKID",
        }
    }

    fn bit(self) -> u64 {
        1 << (self as u64)
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for parsing a [`TagType`] from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTagError(pub String);

impl fmt::Display for ParseTagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown tag: {}", self.0)
    }
}

impl std::error::Error for ParseTagError {}

impl FromStr for TagType {
    type Err = ParseTagError;

    /// Tag names are matched case-insensitively, as the server does.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TagType::ALL
            .iter()
            .copied()
            .find(|tag| tag.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseTagError(s.to_string()))
    }
}

/// A set of [`TagType`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TagMask(u64);

impl TagMask {
    /// The empty set.
    pub const fn none() -> Self {
        Self(0)
    }

    /// Every known tag.
    pub fn all() -> Self {
        TagType::ALL.iter().copied().collect()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, tag: TagType) -> bool {
        self.0 & tag.bit() != 0
    }

    pub fn insert(&mut self, tag: TagType) {
        self.0 |= tag.bit();
    }

    pub fn remove(&mut self, tag: TagType) {
        self.0 &= !tag.bit();
    }

    /// Iterates the members in bit order.
    pub fn iter(self) -> impl Iterator<Item = TagType> {
        TagType::ALL.into_iter().filter(move |tag| self.contains(*tag))
    }
}

impl From<TagType> for TagMask {
    fn from(tag: TagType) -> Self {
        Self(tag.bit())
    }
}

impl FromIterator<TagType> for TagMask {
    fn from_iter<I: IntoIterator<Item = TagType>>(iter: I) -> Self {
        let mut mask = TagMask::none();
        for tag in iter {
            mask.insert(tag);
        }
        mask
    }
}

impl BitOr for TagMask {
    type Output = TagMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        TagMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for TagMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}
