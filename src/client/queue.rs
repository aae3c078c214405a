//! Local mirror of the server queue.
//!
//! The mirror is trusted while `dirty` is false: its version then equals the
//! queue version of the latest status snapshot. Mutating commands update it
//! optimistically through [`QueueMirror::reconcile`]; when the server's
//! version or length disagree with the local guess the mirror is marked dirty
//! and the next status refresh resynchronizes it.
//!
//! The current song is stored as a queue id and resolved against the live
//! entries on every read, so removing an entry can never leave a dangling
//! reference.

use crate::protocol::{Song, Status};

/// How the mirror must be brought up to date for a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// The mirror matches the status.
    None,
    /// Replace everything (`playlistinfo`).
    Full,
    /// Apply changes since the contained version (`plchanges`).
    ChangesSince(u32),
}

/// Ordered replica of the server queue.
#[derive(Debug, Clone, Default)]
pub struct QueueMirror {
    songs: Vec<Song>,
    /// `None` until the first full fetch.
    version: Option<u32>,
    dirty: bool,
    current_id: Option<u32>,
}

impl QueueMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn get(&self, pos: usize) -> Option<&Song> {
        self.songs.get(pos)
    }

    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    pub fn iter(&self) -> impl Iterator<Item = &Song> {
        self.songs.iter()
    }

    /// Version of the server queue this mirror reflects.
    pub fn version(&self) -> Option<u32> {
        self.version
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Forces a resynchronization on the next status refresh.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Position of the entry with queue id `id`.
    pub fn find_id(&self, id: u32) -> Option<usize> {
        self.songs.iter().position(|song| song.id == id)
    }

    /// The current song, if it is still in the mirror.
    pub fn current_song(&self) -> Option<&Song> {
        let id = self.current_id?;
        self.songs.iter().find(|song| song.id == id)
    }

    /// Points the current song at the entry at `pos`, or clears it.
    pub fn set_current_pos(&mut self, pos: Option<u32>) {
        self.current_id = pos
            .and_then(|p| self.songs.get(p as usize))
            .map(|song| song.id);
    }

    pub fn clear_current(&mut self) {
        self.current_id = None;
    }

    /// Drops every entry and forgets the version.
    pub fn reset(&mut self) {
        self.songs.clear();
        self.version = None;
        self.dirty = false;
        self.current_id = None;
    }

    /// Decides how to bring the mirror in line with `status`.
    ///
    /// An empty or never-fetched mirror always takes the full path.
    pub fn sync_action(&self, status: &Status) -> SyncAction {
        match self.version {
            Some(version) if !self.dirty && version == status.queue_version => SyncAction::None,
            Some(version) if !self.songs.is_empty() => SyncAction::ChangesSince(version),
            _ => SyncAction::Full,
        }
    }

    /// Replaces the mirror with a complete listing in server order.
    pub fn replace_all(&mut self, songs: Vec<Song>, version: u32) {
        self.songs = songs;
        self.renumber(0);
        self.version = Some(version);
        self.dirty = false;
        self.current_id = None;
    }

    /// Applies a `plchanges` reply.
    ///
    /// Entries whose position is inside the mirror replace the entry there,
    /// all others are appended; entries beyond `length` are then trimmed.
    pub fn apply_changes(&mut self, changes: Vec<Song>, length: u32, version: u32) {
        for song in changes {
            let pos = song.pos as usize;
            if pos < self.songs.len() {
                self.songs[pos] = song;
            } else {
                self.songs.push(song);
            }
        }
        self.songs.truncate(length as usize);
        self.renumber(0);
        self.version = Some(version);
        self.dirty = false;
        self.current_id = None;
    }

    /// Validates an optimistic update against the status that was batched
    /// with the command.
    ///
    /// If the server reports exactly one new version and the expected length,
    /// `apply` is run and the mirror adopts the new version. Otherwise another
    /// client interfered; the mirror is marked dirty and left untouched.
    /// Returns whether the update was applied.
    pub fn reconcile<F>(&mut self, status: &Status, expected_len: usize, apply: F) -> bool
    where
        F: FnOnce(&mut Self),
    {
        let expected_version = self.version.map(|v| v.wrapping_add(1));
        if !self.dirty
            && expected_version == Some(status.queue_version)
            && status.queue_length as usize == expected_len
        {
            apply(self);
            self.version = Some(status.queue_version);
            true
        } else {
            tracing::debug!(
                "Queue moved to version {} length {} instead of {:?}/{}, resync needed",
                status.queue_version,
                status.queue_length,
                expected_version,
                expected_len
            );
            self.dirty = true;
            false
        }
    }

    pub fn push(&mut self, mut song: Song) {
        song.pos = self.songs.len() as u32;
        self.songs.push(song);
    }

    /// Removes the entry at `pos`, clearing the current song if it was this.
    pub fn remove(&mut self, pos: usize) -> Song {
        let song = self.songs.remove(pos);
        if self.current_id == Some(song.id) {
            self.current_id = None;
        }
        self.renumber(pos);
        song
    }

    /// Moves the entry at `src` so it ends up at `dest`.
    pub fn move_song(&mut self, dest: usize, src: usize) {
        if dest == src {
            return;
        }
        let song = self.songs.remove(src);
        self.songs.insert(dest, song);
        self.renumber(dest.min(src));
    }

    fn renumber(&mut self, from: usize) {
        for (pos, song) in self.songs.iter_mut().enumerate().skip(from) {
            song.pos = pos as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(id: u32, pos: u32) -> Song {
        Song::new(format!("song{}.flac", id), id, pos)
    }

    fn status(version: u32, length: u32) -> Status {
        Status {
            queue_version: version,
            queue_length: length,
            ..Status::default()
        }
    }

    /// [A(1), B(2), C(3)] at version 10.
    fn abc() -> QueueMirror {
        let mut mirror = QueueMirror::new();
        mirror.replace_all(vec![song(1, 0), song(2, 1), song(3, 2)], 10);
        mirror
    }

    fn ids(mirror: &QueueMirror) -> Vec<u32> {
        mirror.iter().map(|s| s.id).collect()
    }

    #[test]
    fn empty_mirror_always_needs_full_fetch() {
        let mirror = QueueMirror::new();
        assert_eq!(mirror.sync_action(&status(0, 0)), SyncAction::Full);
        assert_eq!(mirror.sync_action(&status(7, 3)), SyncAction::Full);
    }

    #[test]
    fn matching_version_needs_nothing() {
        let mirror = abc();
        assert_eq!(mirror.sync_action(&status(10, 3)), SyncAction::None);
        assert_eq!(mirror.sync_action(&status(12, 3)), SyncAction::ChangesSince(10));
    }

    #[test]
    fn dirty_mirror_resyncs_even_at_same_version() {
        let mut mirror = abc();
        mirror.mark_dirty();
        assert_eq!(mirror.sync_action(&status(10, 3)), SyncAction::ChangesSince(10));
    }

    #[test]
    fn optimistic_delete() {
        let mut mirror = abc();
        let applied = mirror.reconcile(&status(11, 2), 2, |m| {
            m.remove(1);
        });
        assert!(applied);
        assert_eq!(ids(&mirror), vec![1, 3]);
        assert_eq!(mirror.get(1).map(|s| s.pos), Some(1));
        assert_eq!(mirror.version(), Some(11));
        assert!(!mirror.is_dirty());
    }

    #[test]
    fn concurrent_mutation_marks_dirty() {
        let mut mirror = abc();
        let applied = mirror.reconcile(&status(12, 2), 2, |m| {
            m.remove(1);
        });
        assert!(!applied);
        assert_eq!(ids(&mirror), vec![1, 2, 3]);
        assert_eq!(mirror.version(), Some(10));
        assert!(mirror.is_dirty());
        assert_eq!(mirror.sync_action(&status(12, 2)), SyncAction::ChangesSince(10));
    }

    #[test]
    fn length_mismatch_marks_dirty() {
        let mut mirror = abc();
        assert!(!mirror.reconcile(&status(11, 3), 2, |m| {
            m.remove(0);
        }));
        assert!(mirror.is_dirty());
    }

    #[test]
    fn optimistic_move() {
        let mut mirror = abc();
        assert!(mirror.reconcile(&status(11, 3), 3, |m| m.move_song(0, 2)));
        assert_eq!(ids(&mirror), vec![3, 1, 2]);
        let positions: Vec<u32> = mirror.iter().map(|s| s.pos).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn move_forward() {
        let mut mirror = abc();
        mirror.move_song(2, 0);
        assert_eq!(ids(&mirror), vec![2, 3, 1]);
    }

    #[test]
    fn removing_current_song_clears_reference() {
        let mut mirror = abc();
        mirror.set_current_pos(Some(1));
        assert_eq!(mirror.current_song().map(|s| s.id), Some(2));

        mirror.remove(0);
        assert_eq!(mirror.current_song().map(|s| s.id), Some(2));

        mirror.remove(0);
        assert!(mirror.current_song().is_none());
    }

    #[test]
    fn resync_clears_current_song() {
        let mut mirror = abc();
        mirror.set_current_pos(Some(0));
        mirror.apply_changes(vec![song(9, 1)], 3, 11);
        assert!(mirror.current_song().is_none());

        mirror.set_current_pos(Some(0));
        mirror.replace_all(vec![song(4, 0)], 12);
        assert!(mirror.current_song().is_none());
    }

    #[test]
    fn current_pos_outside_mirror_is_none() {
        let mut mirror = abc();
        mirror.set_current_pos(Some(7));
        assert!(mirror.current_song().is_none());
        mirror.set_current_pos(None);
        assert!(mirror.current_song().is_none());
    }

    #[test]
    fn changes_replace_append_and_trim() {
        let mut mirror = abc();
        // Server queue is now [A, X, C, Y] at version 13.
        mirror.apply_changes(vec![song(7, 1), song(8, 3)], 4, 13);
        assert_eq!(ids(&mirror), vec![1, 7, 3, 8]);
        assert_eq!(mirror.version(), Some(13));

        // Server queue shrank to [A, X].
        mirror.apply_changes(Vec::new(), 2, 14);
        assert_eq!(ids(&mirror), vec![1, 7]);
        assert!(!mirror.is_dirty());
    }

    #[test]
    fn reset_forgets_everything() {
        let mut mirror = abc();
        mirror.mark_dirty();
        mirror.reset();
        assert!(mirror.is_empty());
        assert_eq!(mirror.version(), None);
        assert!(!mirror.is_dirty());
    }

    #[test]
    fn push_assigns_position() {
        let mut mirror = abc();
        mirror.push(song(4, 99));
        assert_eq!(mirror.get(3).map(|s| s.pos), Some(3));
        assert_eq!(mirror.find_id(4), Some(3));
    }
}
