//! Commands run through the session manager.
//!
//! Queue mutations are batched with a `status` request so the reply tells
//! whether the mirror can be patched locally (see
//! [`QueueMirror::reconcile`](crate::client::QueueMirror::reconcile)).

use crate::client::session::BatchReply;
use crate::client::{MpdClient, SyncAction};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{Command, IdleEvents, Pair, Song, Status};

fn nth_reply(replies: &[Vec<Pair>], index: usize) -> ClientResult<&[Pair]> {
    replies
        .get(index)
        .map(Vec::as_slice)
        .ok_or_else(|| ClientError::Protocol(format!("missing reply {} of batch", index)))
}

fn to_u32(pos: usize) -> ClientResult<u32> {
    u32::try_from(pos).map_err(|_| ClientError::OutOfRange { pos, len: u32::MAX as usize })
}

impl MpdClient {
    fn ensure_connected(&self) -> ClientResult<()> {
        if self.session.is_some() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    /// Parses and stores a status reply.
    fn adopt_status(&mut self, pairs: &[Pair]) -> ClientResult<Status> {
        let status = Status::from_pairs(pairs).map_err(ClientError::Protocol)?;
        self.volume = status.volume;
        self.status = Some(status.clone());
        Ok(status)
    }

    /// Refreshes the status and brings the queue mirror up to date.
    ///
    /// A never-fetched or empty mirror is fetched in full; a mirror behind
    /// the server (or marked dirty) fetches only the changes since its
    /// version. The current song is then re-resolved.
    pub async fn update(&mut self) -> ClientResult<()> {
        with_recovery!(self, self.try_update())
    }

    async fn try_update(&mut self) -> ClientResult<()> {
        let pairs = self.session_for_command().await?.run(&Command::Status).await?;
        let status = self.adopt_status(&pairs)?;

        match self.queue.sync_action(&status) {
            SyncAction::None => {}
            SyncAction::Full => self.fetch_all(status.queue_version).await?,
            SyncAction::ChangesSince(since) => {
                self.fetch_changes_since(since, status.queue_length, status.queue_version)
                    .await?
            }
        }
        self.refresh_needed = false;

        if self.queue.current_song().is_none() || status.song_id.is_some() {
            self.queue.set_current_pos(status.song_pos);
        }
        Ok(())
    }

    /// Replaces the mirror with the complete queue.
    pub(crate) async fn fetch_all(&mut self, version: u32) -> ClientResult<()> {
        let pairs = self
            .session_for_command()
            .await?
            .run(&Command::PlaylistInfo(None))
            .await?;
        let songs = Song::parse_list(&pairs).map_err(ClientError::Protocol)?;
        tracing::debug!("Fetched {} queue entries at version {}", songs.len(), version);
        self.queue.replace_all(songs, version);
        Ok(())
    }

    /// Applies the entries changed since `since`.
    pub(crate) async fn fetch_changes_since(
        &mut self,
        since: u32,
        length: u32,
        version: u32,
    ) -> ClientResult<()> {
        let pairs = self
            .session_for_command()
            .await?
            .run(&Command::PlChanges(since))
            .await?;
        let changes = Song::parse_list(&pairs).map_err(ClientError::Protocol)?;
        tracing::debug!(
            "{} queue entries changed between versions {} and {}",
            changes.len(),
            since,
            version
        );
        self.queue.apply_changes(changes, length, version);
        Ok(())
    }

    /// Refreshes only when leaving push mode reported changes or the
    /// mirror is known to be stale.
    pub async fn refresh_if_needed(&mut self) -> ClientResult<()> {
        if self.needs_refresh() {
            self.update().await
        } else {
            Ok(())
        }
    }

    /// Runs an arbitrary command and returns its reply pairs.
    pub async fn run_command(&mut self, command: Command) -> ClientResult<Vec<Pair>> {
        with_recovery!(self, self.try_command(&command))
    }

    async fn try_command(&mut self, command: &Command) -> ClientResult<Vec<Pair>> {
        let pairs = self.session_for_command().await?.run(command).await?;
        if command.mutates_queue() {
            self.events |= IdleEvents::QUEUE;
            self.queue.mark_dirty();
        }
        Ok(pairs)
    }

    /// Appends `uri` to the queue.
    ///
    /// The new entry is fetched in the same batch and appended locally when
    /// nobody else touched the queue meanwhile.
    pub async fn run_add(&mut self, uri: &str) -> ClientResult<()> {
        with_recovery!(self, self.try_add(uri))
    }

    async fn try_add(&mut self, uri: &str) -> ClientResult<()> {
        self.ensure_connected()?;
        let old_len = self.queue.len();
        let batch = [
            Command::Add(uri.to_string()),
            Command::Status,
            Command::PlaylistInfo(Some(to_u32(old_len)?)),
        ];
        let BatchReply { replies, error } =
            self.session_for_command().await?.run_batch(&batch).await?;
        if replies.len() < 2 {
            return Err(error.map_or_else(
                || ClientError::Protocol("add batch ended early".to_string()),
                ClientError::Server,
            ));
        }

        self.events |= IdleEvents::QUEUE;
        let status = self.adopt_status(nth_reply(&replies, 1)?)?;
        let added = match replies.get(2) {
            Some(pairs) => Song::parse_list(pairs)
                .map_err(ClientError::Protocol)?
                .into_iter()
                .next(),
            None => None,
        };

        match added {
            Some(song) => {
                self.queue.reconcile(&status, old_len + 1, |queue| queue.push(song));
            }
            None => {
                if let Some(err) = error {
                    tracing::debug!("New entry not found after add: {}", err);
                }
                self.queue.mark_dirty();
            }
        }
        Ok(())
    }

    /// Appends every song below `uri` (a file or a directory) without
    /// tracking the result locally.
    pub async fn add_path(&mut self, uri: &str) -> ClientResult<()> {
        self.run_command(Command::Add(uri.to_string())).await.map(|_| ())
    }

    /// Removes the entry at `pos`.
    pub async fn run_delete(&mut self, pos: usize) -> ClientResult<()> {
        with_recovery!(self, self.try_delete(pos))
    }

    async fn try_delete(&mut self, pos: usize) -> ClientResult<()> {
        self.ensure_connected()?;
        let len = self.queue.len();
        let id = self
            .queue
            .get(pos)
            .map(|song| song.id)
            .ok_or(ClientError::OutOfRange { pos, len })?;

        let replies = self
            .session_for_command()
            .await?
            .run_batch(&[Command::DeleteId(id), Command::Status])
            .await?
            .into_result()?;
        self.events |= IdleEvents::QUEUE;
        let status = self.adopt_status(nth_reply(&replies, 1)?)?;
        self.queue.reconcile(&status, len - 1, |queue| {
            queue.remove(pos);
        });
        Ok(())
    }

    /// Removes the entries in `start..end`.
    ///
    /// A single-entry range is delegated to [`MpdClient::run_delete`]; an
    /// empty range does nothing.
    pub async fn run_delete_range(&mut self, start: usize, end: usize) -> ClientResult<()> {
        if end <= start {
            return Ok(());
        }
        if end == start + 1 {
            return self.run_delete(start).await;
        }
        with_recovery!(self, self.try_delete_range(start, end))
    }

    async fn try_delete_range(&mut self, start: usize, end: usize) -> ClientResult<()> {
        self.ensure_connected()?;
        let len = self.queue.len();
        if end > len {
            return Err(ClientError::OutOfRange { pos: end - 1, len });
        }

        let command = Command::DeleteRange {
            start: to_u32(start)?,
            end: to_u32(end)?,
        };
        let replies = self
            .session_for_command()
            .await?
            .run_batch(&[command, Command::Status])
            .await?
            .into_result()?;
        self.events |= IdleEvents::QUEUE;
        let status = self.adopt_status(nth_reply(&replies, 1)?)?;
        self.queue.reconcile(&status, len - (end - start), |queue| {
            for pos in (start..end).rev() {
                queue.remove(pos);
            }
        });
        Ok(())
    }

    /// Moves the entry at `src` to `dest`.
    pub async fn run_move(&mut self, dest: usize, src: usize) -> ClientResult<()> {
        if dest == src {
            return Ok(());
        }
        with_recovery!(self, self.try_move(dest, src))
    }

    async fn try_move(&mut self, dest: usize, src: usize) -> ClientResult<()> {
        self.ensure_connected()?;
        let len = self.queue.len();
        for pos in [src, dest] {
            if pos >= len {
                return Err(ClientError::OutOfRange { pos, len });
            }
        }

        let command = Command::Move {
            from: to_u32(src)?,
            to: to_u32(dest)?,
        };
        let replies = self
            .session_for_command()
            .await?
            .run_batch(&[command, Command::Status])
            .await?
            .into_result()?;
        self.events |= IdleEvents::QUEUE;
        let status = self.adopt_status(nth_reply(&replies, 1)?)?;
        self.queue
            .reconcile(&status, len, |queue| queue.move_song(dest, src));
        Ok(())
    }

    /// Empties the queue.
    pub async fn run_clear_queue(&mut self) -> ClientResult<()> {
        with_recovery!(self, self.try_clear_queue())
    }

    async fn try_clear_queue(&mut self) -> ClientResult<()> {
        let replies = self
            .session_for_command()
            .await?
            .run_batch(&[Command::Clear, Command::Status])
            .await?
            .into_result()?;
        self.events |= IdleEvents::QUEUE;
        let status = self.adopt_status(nth_reply(&replies, 1)?)?;
        if status.queue_length == 0 {
            self.queue.replace_all(Vec::new(), status.queue_version);
        } else {
            self.queue.mark_dirty();
        }
        Ok(())
    }

    /// Removes everything but the current song.
    ///
    /// Returns `false` when nothing is playing or paused.
    pub async fn run_crop(&mut self) -> ClientResult<bool> {
        with_recovery!(self, self.try_crop())
    }

    async fn try_crop(&mut self) -> ClientResult<bool> {
        let (current, length) = match &self.status {
            Some(status) if status.is_playing_or_paused() => (status.song_pos, status.queue_length),
            _ => return Ok(false),
        };
        let Some(current) = current else {
            return Ok(true);
        };
        if length < 2 {
            return Ok(true);
        }

        let mut batch = Vec::new();
        if current + 1 < length {
            batch.push(Command::DeleteRange {
                start: current + 1,
                end: length,
            });
        }
        if current > 0 {
            batch.push(Command::DeleteRange {
                start: 0,
                end: current,
            });
        }
        batch.push(Command::Status);

        let replies = self
            .session_for_command()
            .await?
            .run_batch(&batch)
            .await?
            .into_result()?;
        self.events |= IdleEvents::QUEUE;
        self.adopt_status(nth_reply(&replies, batch.len() - 1)?)?;
        self.queue.mark_dirty();
        Ok(true)
    }

    /// Sets the volume, clamped to 100.
    pub async fn run_volume(&mut self, volume: u8) -> ClientResult<()> {
        let volume = volume.min(100);
        with_recovery!(self, self.try_volume(volume))
    }

    async fn try_volume(&mut self, volume: u8) -> ClientResult<()> {
        self.session_for_command()
            .await?
            .run(&Command::SetVolume(volume))
            .await?;
        self.volume = Some(volume);
        Ok(())
    }

    /// Raises the volume by one step.
    ///
    /// Returns `false` without contacting the server when the volume is
    /// unknown or already at 100.
    pub async fn run_volume_up(&mut self) -> ClientResult<bool> {
        match self.volume {
            Some(volume) if volume < 100 => self.run_volume(volume + 1).await.map(|_| true),
            _ => Ok(false),
        }
    }

    /// Lowers the volume by one step; `false` if unknown or already 0.
    pub async fn run_volume_down(&mut self) -> ClientResult<bool> {
        match self.volume {
            Some(volume) if volume > 0 => self.run_volume(volume - 1).await.map(|_| true),
            _ => Ok(false),
        }
    }

    pub async fn subscribe(&mut self, channel: &str) -> ClientResult<()> {
        self.run_command(Command::Subscribe(channel.to_string()))
            .await
            .map(|_| ())
    }

    pub async fn unsubscribe(&mut self, channel: &str) -> ClientResult<()> {
        self.run_command(Command::Unsubscribe(channel.to_string()))
            .await
            .map(|_| ())
    }

    pub async fn send_message(&mut self, channel: &str, text: &str) -> ClientResult<()> {
        self.run_command(Command::SendMessage {
            channel: channel.to_string(),
            text: text.to_string(),
        })
        .await
        .map(|_| ())
    }
}
