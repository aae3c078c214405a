//! A scripted in-process MPD server for integration tests.
//!
//! Speaks enough of the protocol for the session manager: greeting,
//! `command_list_ok_begin` batches, `idle`/`noidle`, queue commands with
//! per-entry change versions for `plchanges`, and password permissions.
//! Every received line is logged so tests can assert on the wire traffic.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mpd_session::client::{ConnectPlan, Endpoint};
use mpd_session::ClientSettings;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

static TEST_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Generates a unique socket path inside `dir`.
pub fn unique_socket_path(dir: &TempDir, prefix: &str) -> PathBuf {
    let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    dir.path().join(format!("{}-{}-{}.sock", prefix, std::process::id(), n))
}

/// Waits up to two seconds for `check` to hold.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[derive(Debug, Clone)]
struct Entry {
    id: u32,
    uri: String,
    /// Queue version at which this position last changed.
    changed: u32,
}

#[derive(Debug)]
struct State {
    queue: Vec<Entry>,
    version: u32,
    next_id: u32,
    volume: i32,
    playing: bool,
    current_id: Option<u32>,
    password: Option<String>,
    log: Vec<String>,
    subscribers: Vec<Arc<Mutex<BTreeSet<String>>>>,
}

impl State {
    fn bump(&mut self, from_pos: usize) {
        self.version += 1;
        let version = self.version;
        for entry in self.queue.iter_mut().skip(from_pos) {
            entry.changed = version;
        }
    }

    fn emit(&self, event: &str) {
        for subscriber in &self.subscribers {
            lock(subscriber).insert(event.to_string());
        }
    }

    fn add(&mut self, uri: &str) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        let pos = self.queue.len();
        self.queue.push(Entry {
            id,
            uri: uri.to_string(),
            changed: 0,
        });
        self.bump(pos);
        self.emit("playlist");
        id
    }

    fn delete_range(&mut self, start: usize, end: usize) -> bool {
        if start >= end || end > self.queue.len() {
            return false;
        }
        let removed: Vec<u32> = self.queue.drain(start..end).map(|e| e.id).collect();
        if self.current_id.is_some_and(|id| removed.contains(&id)) {
            self.current_id = None;
            self.playing = false;
        }
        self.bump(start);
        self.emit("playlist");
        true
    }

    fn move_entry(&mut self, from: usize, to: usize) -> bool {
        if from >= self.queue.len() || to >= self.queue.len() {
            return false;
        }
        let entry = self.queue.remove(from);
        self.queue.insert(to, entry);
        self.bump(from.min(to));
        self.emit("playlist");
        true
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.current_id = None;
        self.playing = false;
        self.bump(0);
        self.emit("playlist");
    }

    fn current_pos(&self) -> Option<usize> {
        let id = self.current_id?;
        self.queue.iter().position(|e| e.id == id)
    }

    fn song_lines(&self, pos: usize, out: &mut String) {
        let entry = &self.queue[pos];
        out.push_str(&format!("file: {}\n", entry.uri));
        let title = entry.uri.trim_end_matches(".flac");
        out.push_str(&format!("Title: {}\n", title));
        out.push_str(&format!("Pos: {}\nId: {}\n", pos, entry.id));
    }

    fn status_lines(&self) -> String {
        let mut out = format!(
            "volume: {}\nrepeat: 0\nrandom: 0\nsingle: 0\nconsume: 0\nplaylist: {}\nplaylistlength: {}\nstate: {}\n",
            self.volume,
            self.version,
            self.queue.len(),
            if self.playing { "play" } else { "stop" }
        );
        if let (Some(pos), Some(id)) = (self.current_pos(), self.current_id) {
            out.push_str(&format!("song: {}\nsongid: {}\n", pos, id));
        }
        out
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct Shared {
    state: Mutex<State>,
    events: watch::Sender<u64>,
    shutdown: watch::Sender<bool>,
    /// Connections accepted so far.
    accepted: AtomicUsize,
    /// Connections still to be held open without a greeting.
    stalled: AtomicUsize,
}

impl Shared {
    fn notify(&self) {
        self.events.send_modify(|n| *n += 1);
    }
}

/// A running fake server bound to a Unix socket in a temp dir.
pub struct FakeMpd {
    _dir: TempDir,
    path: PathBuf,
    shared: Arc<Shared>,
    accept: JoinHandle<()>,
}

impl Drop for FakeMpd {
    fn drop(&mut self) {
        self.accept.abort();
        let _ = self.shared.shutdown.send(true);
    }
}

impl FakeMpd {
    /// Starts a server whose queue holds `uris`, at queue version 10.
    pub async fn start(uris: &[&str]) -> FakeMpd {
        Self::start_with(uris, None).await
    }

    /// Like [`FakeMpd::start`], requiring `password` for every command.
    pub async fn with_password(uris: &[&str], password: &str) -> FakeMpd {
        Self::start_with(uris, Some(password.to_string())).await
    }

    async fn start_with(uris: &[&str], password: Option<String>) -> FakeMpd {
        let dir = TempDir::new().expect("temp dir");
        let path = unique_socket_path(&dir, "mpd");
        let listener = UnixListener::bind(&path).expect("bind fake server");

        let queue = uris
            .iter()
            .enumerate()
            .map(|(i, uri)| Entry {
                id: i as u32 + 1,
                uri: uri.to_string(),
                changed: 1,
            })
            .collect();
        let state = State {
            queue,
            version: 10,
            next_id: uris.len() as u32 + 1,
            volume: 50,
            playing: false,
            current_id: None,
            password,
            log: Vec::new(),
            subscribers: Vec::new(),
        };
        let (events, _) = watch::channel(0);
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            events,
            shutdown,
            accepted: AtomicUsize::new(0),
            stalled: AtomicUsize::new(0),
        });

        let accept_shared = shared.clone();
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_shared.accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, accept_shared.clone()));
            }
        });

        FakeMpd {
            _dir: dir,
            path,
            shared,
            accept,
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::Local(self.path.clone())
    }

    /// Client settings pointing at this server.
    pub fn settings(&self) -> ClientSettings {
        ClientSettings::new(ConnectPlan::new(self.endpoint())).with_timeout(Duration::from_secs(2))
    }

    /// Every line received so far, across connections.
    pub fn log(&self) -> Vec<String> {
        lock(&self.shared.state).log.clone()
    }

    pub fn clear_log(&self) {
        lock(&self.shared.state).log.clear();
    }

    pub fn count(&self, line: &str) -> usize {
        self.log().iter().filter(|l| *l == line).count()
    }

    pub fn version(&self) -> u32 {
        lock(&self.shared.state).version
    }

    /// Queue ids in server order.
    pub fn ids(&self) -> Vec<u32> {
        lock(&self.shared.state).queue.iter().map(|e| e.id).collect()
    }

    pub fn uris(&self) -> Vec<String> {
        lock(&self.shared.state)
            .queue
            .iter()
            .map(|e| e.uri.clone())
            .collect()
    }

    /// Another client appends a song.
    pub fn external_add(&self, uri: &str) -> u32 {
        let id = lock(&self.shared.state).add(uri);
        self.shared.notify();
        id
    }

    /// Another client deletes the entry at `pos`.
    pub fn external_delete(&self, pos: usize) {
        lock(&self.shared.state).delete_range(pos, pos + 1);
        self.shared.notify();
    }

    /// Another client changes the volume.
    pub fn external_volume(&self, volume: i32) {
        {
            let mut state = lock(&self.shared.state);
            state.volume = volume;
            state.emit("mixer");
        }
        self.shared.notify();
    }

    /// Starts playing the entry at `pos`.
    pub fn play(&self, pos: usize) {
        {
            let mut state = lock(&self.shared.state);
            state.current_id = state.queue.get(pos).map(|e| e.id);
            state.playing = state.current_id.is_some();
            state.emit("player");
        }
        self.shared.notify();
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// The next `n` connections are accepted but never greeted.
    pub fn stall_next(&self, n: usize) {
        self.shared.stalled.store(n, Ordering::SeqCst);
    }

    /// Closes every client connection; the socket keeps accepting.
    pub fn drop_connections(&self) {
        let _ = self.shared.shutdown.send(true);
    }
}

type Reply = Result<String, String>;

fn ack(code: u32, index: usize, command: &str, message: &str) -> String {
    format!("ACK [{}@{}] {{{}}} {}\n", code, index, command, message)
}

/// Splits a command line into words, honoring double quotes.
fn tokenize(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c == ' ' {
            chars.next();
            continue;
        }
        let mut word = String::new();
        if c == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            word.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => word.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ' ' {
                    break;
                }
                word.push(c);
                chars.next();
            }
        }
        words.push(word);
    }
    words
}

struct Connection {
    shared: Arc<Shared>,
    authorized: bool,
    pending: Arc<Mutex<BTreeSet<String>>>,
}

impl Connection {
    /// Runs one command; `index` is its position within a batch.
    fn execute(&mut self, line: &str, index: usize) -> Reply {
        let words = tokenize(line);
        let Some(name) = words.first().map(String::as_str) else {
            return Err(ack(5, index, "", "No command given"));
        };
        let arg = |n: usize| words.get(n).map(String::as_str).unwrap_or("");
        let number = |n: usize| arg(n).parse::<usize>();

        let mut state = lock(&self.shared.state);

        if name == "password" {
            return if state.password.as_deref() == Some(arg(1)) {
                self.authorized = true;
                Ok(String::new())
            } else {
                Err(ack(3, index, "password", "incorrect password"))
            };
        }
        if !self.authorized && !matches!(name, "ping" | "tagtypes") {
            return Err(ack(
                4,
                index,
                name,
                &format!("you don't have permission for \"{}\"", name),
            ));
        }

        let mut out = String::new();
        match name {
            "ping" | "subscribe" | "unsubscribe" | "sendmessage" | "tagtypes" => {}
            "status" => out = state.status_lines(),
            "playlistinfo" => {
                if words.len() > 1 {
                    match number(1) {
                        Ok(pos) if pos < state.queue.len() => state.song_lines(pos, &mut out),
                        _ => return Err(ack(2, index, name, "Bad song index")),
                    }
                } else {
                    for pos in 0..state.queue.len() {
                        state.song_lines(pos, &mut out);
                    }
                }
            }
            "plchanges" => {
                let since: u32 = arg(1).parse().map_err(|_| ack(2, index, name, "need version"))?;
                for pos in 0..state.queue.len() {
                    if state.queue[pos].changed > since {
                        state.song_lines(pos, &mut out);
                    }
                }
            }
            "add" => {
                if arg(1).starts_with("missing") {
                    return Err(ack(50, index, name, "No such directory"));
                }
                state.add(arg(1));
            }
            "deleteid" => {
                let id: u32 = arg(1).parse().map_err(|_| ack(2, index, name, "need id"))?;
                match state.queue.iter().position(|e| e.id == id) {
                    Some(pos) => {
                        state.delete_range(pos, pos + 1);
                    }
                    None => return Err(ack(50, index, name, "No such song")),
                }
            }
            "delete" => {
                let (start, end) = match arg(1).split_once(':') {
                    Some((a, b)) => (a.parse::<usize>(), b.parse::<usize>()),
                    None => (number(1), number(1).map(|p| p + 1)),
                };
                match (start, end) {
                    (Ok(start), Ok(end)) if state.delete_range(start, end) => {}
                    _ => return Err(ack(2, index, name, "Bad song index")),
                }
            }
            "move" => match (number(1), number(2)) {
                (Ok(from), Ok(to)) if state.move_entry(from, to) => {}
                _ => return Err(ack(2, index, name, "Bad song index")),
            },
            "clear" => state.clear(),
            "setvol" => {
                state.volume = arg(1).parse().map_err(|_| ack(2, index, name, "need volume"))?;
                state.emit("mixer");
            }
            _ => {
                return Err(ack(
                    5,
                    index,
                    "",
                    &format!("unknown command \"{}\"", name),
                ))
            }
        }
        drop(state);
        self.shared.notify();
        Ok(out)
    }

    fn take_pending(&self) -> String {
        let events = std::mem::take(&mut *lock(&self.pending));
        events
            .into_iter()
            .map(|event| format!("changed: {}\n", event))
            .collect()
    }
}

fn log_line(shared: &Shared, line: &str) {
    lock(&shared.state).log.push(line.to_string());
}

async fn write(writer: &mut OwnedWriteHalf, data: &str) -> bool {
    writer.write_all(data.as_bytes()).await.is_ok()
}

async fn serve(stream: UnixStream, shared: Arc<Shared>) {
    let stall = shared
        .stalled
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if stall {
        let mut shutdown = shared.shutdown.subscribe();
        let _ = shutdown.changed().await;
        drop(stream);
        return;
    }

    let pending = Arc::new(Mutex::new(BTreeSet::new()));
    let authorized = {
        let mut state = lock(&shared.state);
        state.subscribers.push(pending.clone());
        state.password.is_none()
    };
    let mut events = shared.events.subscribe();
    let mut shutdown = shared.shutdown.subscribe();
    let mut conn = Connection {
        shared: shared.clone(),
        authorized,
        pending,
    };

    let (read, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    if !write(&mut writer, "OK MPD 0.23.5\n").await {
        return;
    }

    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                _ => return,
            },
            _ = shutdown.changed() => return,
        };
        log_line(&shared, &line);

        // Outside idle mode the server ignores noidle silently.
        if line == "noidle" {
            continue;
        }

        if line == "command_list_ok_begin" {
            let mut batch = Vec::new();
            loop {
                match lines.next_line().await {
                    Ok(Some(l)) if l == "command_list_end" => {
                        log_line(&shared, &l);
                        break;
                    }
                    Ok(Some(l)) => {
                        log_line(&shared, &l);
                        batch.push(l);
                    }
                    _ => return,
                }
            }
            let mut out = String::new();
            let mut failed = false;
            for (index, command) in batch.iter().enumerate() {
                match conn.execute(command, index) {
                    Ok(reply) => {
                        out.push_str(&reply);
                        out.push_str("list_OK\n");
                    }
                    Err(ack) => {
                        out.push_str(&ack);
                        failed = true;
                        break;
                    }
                }
            }
            if !failed {
                out.push_str("OK\n");
            }
            if !write(&mut writer, &out).await {
                return;
            }
            continue;
        }

        if line == "idle" || line.starts_with("idle ") {
            loop {
                events.borrow_and_update();
                let changed = conn.take_pending();
                if !changed.is_empty() {
                    if !write(&mut writer, &format!("{}OK\n", changed)).await {
                        return;
                    }
                    break;
                }
                tokio::select! {
                    result = events.changed() => {
                        if result.is_err() {
                            return;
                        }
                    }
                    next = lines.next_line() => match next {
                        Ok(Some(l)) if l == "noidle" => {
                            log_line(&shared, &l);
                            let changed = conn.take_pending();
                            if !write(&mut writer, &format!("{}OK\n", changed)).await {
                                return;
                            }
                            break;
                        }
                        _ => return,
                    },
                    _ = shutdown.changed() => return,
                }
            }
            continue;
        }

        let out = match conn.execute(&line, 0) {
            Ok(reply) => format!("{}OK\n", reply),
            Err(ack) => ack,
        };
        if !write(&mut writer, &out).await {
            return;
        }
    }
}
