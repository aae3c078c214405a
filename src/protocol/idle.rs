//! Change categories reported by the server in push-notification mode.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A set of server subsystems that changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct IdleEvents(u32);

const NAMES: [(&str, IdleEvents); 14] = [
    ("database", IdleEvents::DATABASE),
    ("stored_playlist", IdleEvents::STORED_PLAYLIST),
    ("playlist", IdleEvents::QUEUE),
    ("player", IdleEvents::PLAYER),
    ("mixer", IdleEvents::MIXER),
    ("output", IdleEvents::OUTPUT),
    ("options", IdleEvents::OPTIONS),
    ("update", IdleEvents::UPDATE),
    ("sticker", IdleEvents::STICKER),
    ("subscription", IdleEvents::SUBSCRIPTION),
    ("message", IdleEvents::MESSAGE),
    ("partition", IdleEvents::PARTITION),
    ("neighbor", IdleEvents::NEIGHBOR),
    ("mount", IdleEvents::MOUNT),
];

impl IdleEvents {
    pub const NONE: IdleEvents = IdleEvents(0);
    pub const DATABASE: IdleEvents = IdleEvents(1 << 0);
    pub const STORED_PLAYLIST: IdleEvents = IdleEvents(1 << 1);
    /// The queue; called `playlist` on the wire.
    pub const QUEUE: IdleEvents = IdleEvents(1 << 2);
    pub const PLAYER: IdleEvents = IdleEvents(1 << 3);
    pub const MIXER: IdleEvents = IdleEvents(1 << 4);
    pub const OUTPUT: IdleEvents = IdleEvents(1 << 5);
    pub const OPTIONS: IdleEvents = IdleEvents(1 << 6);
    pub const UPDATE: IdleEvents = IdleEvents(1 << 7);
    pub const STICKER: IdleEvents = IdleEvents(1 << 8);
    pub const SUBSCRIPTION: IdleEvents = IdleEvents(1 << 9);
    pub const MESSAGE: IdleEvents = IdleEvents(1 << 10);
    pub const PARTITION: IdleEvents = IdleEvents(1 << 11);
    pub const NEIGHBOR: IdleEvents = IdleEvents(1 << 12);
    pub const MOUNT: IdleEvents = IdleEvents(1 << 13);
    /// Every category; used after connect and disconnect.
    pub const ALL: IdleEvents = IdleEvents((1 << 14) - 1);

    /// Looks up a category by its wire name.
    pub fn from_name(name: &str) -> Option<IdleEvents> {
        NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, event)| *event)
    }

    /// Builds a set from the `changed:` pairs of an idle reply.
    ///
    /// Unknown names are ignored so newer servers do not break the client.
    pub fn from_pairs<'a, I>(pairs: I) -> IdleEvents
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        pairs
            .into_iter()
            .filter(|(key, _)| *key == "changed")
            .filter_map(|(_, value)| IdleEvents::from_name(value))
            .fold(IdleEvents::NONE, |acc, event| acc | event)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if any category of `other` is in `self`.
    pub fn intersects(self, other: IdleEvents) -> bool {
        self.0 & other.0 != 0
    }

    pub fn contains(self, other: IdleEvents) -> bool {
        self.0 & other.0 == other.0
    }

    /// Wire names of the members.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        NAMES
            .into_iter()
            .filter(move |(_, event)| self.intersects(*event))
            .map(|(name, _)| name)
    }
}

impl BitOr for IdleEvents {
    type Output = IdleEvents;

    fn bitor(self, rhs: Self) -> Self::Output {
        IdleEvents(self.0 | rhs.0)
    }
}

impl BitOrAssign for IdleEvents {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for IdleEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.names().collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join(","))
        }
    }
}
