//! Session controller - drives MPV from keystrokes, IPC events and a periodic position sampler.
//!
//! Three tasks share one `Session`:
//! - the foreground key loop (`run`), the only one that ends the session;
//! - the event consumer, reacting to playlist moves, end-file and file-loaded;
//! - the sampler, recording the playback position every second.
//!
//! MPV is the source of truth for the playlist index, so both the key loop and the event
//! consumer only ever overwrite it with a freshly queried value. The last sampled position is
//! the one piece of state behind its own lock.

mod commands;
mod keys;

pub use commands::{parse_command, split_command, CommandLine, CommandParseError, JumpTarget};
pub use keys::{action_for, Key, KeyAction, KeySource};
#[cfg(test)]
pub(crate) use keys::ScriptedKeys;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

use crate::mpv::{IpcError, MpvClient, MpvCommand, MpvEvent};
use crate::resume::TimestampStore;
use crate::terminal;

/// Observer ID for `playlist-pos`.
const OBS_PLAYLIST_POS: i64 = 1;

/// Stored offsets at or below this count as "at the start" and are not resumed.
pub const RESUME_THRESHOLD_SECS: f64 = 0.5;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
const SAVE_INTERVAL: Duration = Duration::from_secs(3);

const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);
const QUERY_TIMEOUT: Duration = Duration::from_millis(300);
const SYNC_TIMEOUT: Duration = Duration::from_millis(250);
const SAMPLE_TIMEOUT: Duration = Duration::from_millis(200);
const OSD_TIMEOUT: Duration = Duration::from_millis(200);
const OSD_DURATION_MS: u64 = 1500;

/// Sleep between key polls when nothing is pending.
const KEY_IDLE: Duration = Duration::from_millis(10);

const MIN_SPEED: f64 = 0.1;
const MAX_SPEED: f64 = 3.0;

const HELP_TEXT: &str = "\
pp controls:
  Space  play/pause
  ←/→    seek ±short (also a/d)
  ↑/↓    seek ±long (also w/s)
  1-9    jump 10%-90%
  j/k    prev/next video (also e/r, Enter)
  m      mute
  [/ ]   speed -/+ 0.1x
  :      command mode (ls/open/seek/jump)
  q/Esc  quit
";

#[derive(Debug, Error)]
pub enum SessionError {
  #[error("index out of range: {index} (playlist has {len})")]
  IndexOutOfRange { index: i64, len: usize },

  #[error(transparent)]
  Ipc(#[from] IpcError),

  #[error("Key input failed: {0}")]
  Io(#[from] std::io::Error),
}

/// Playback behaviour flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
  pub seek_short: f64,
  pub seek_long: f64,
  /// Let MPV roll into the next file at end-of-file.
  pub continuous: bool,
  /// Force playback after every file load.
  pub autoplay: bool,
  /// Next/prev wrap around the playlist ends.
  pub wrap: bool,
  /// Track and restore resume positions.
  pub resume: bool,
}

impl Default for SessionOptions {
  fn default() -> Self {
    Self {
      seek_short: 10.0,
      seek_long: 60.0,
      continuous: false,
      autoplay: true,
      wrap: true,
      resume: true,
    }
  }
}

/// Whether the foreground loop keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
  Continue,
  Quit,
}

#[derive(Debug, Default)]
struct LastSample {
  path: String,
  position: f64,
  saved_at: Option<Instant>,
}

pub struct Session {
  mpv: MpvClient,
  playlist: Vec<PathBuf>,
  index: AtomicUsize,
  opts: SessionOptions,
  pause_after_load: AtomicBool,
  help_shown: AtomicBool,
  timestamps: Arc<Mutex<TimestampStore>>,
  last_sample: Mutex<LastSample>,
}

fn basename(path: &Path) -> String {
  path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn save_store(store: &TimestampStore) {
  if let Err(e) = store.save() {
    log::warn!("Failed to save resume timestamps: {}", e);
  }
}

impl Session {
  pub fn new(
    mpv: MpvClient,
    playlist: Vec<PathBuf>,
    start_index: usize,
    opts: SessionOptions,
    timestamps: Arc<Mutex<TimestampStore>>,
  ) -> Arc<Self> {
    let start_index = if start_index < playlist.len() { start_index } else { 0 };
    Arc::new(Self {
      mpv,
      playlist,
      index: AtomicUsize::new(start_index),
      opts,
      pause_after_load: AtomicBool::new(false),
      help_shown: AtomicBool::new(false),
      timestamps,
      last_sample: Mutex::new(LastSample::default()),
    })
  }

  /// Current playlist index (0-based).
  pub fn index(&self) -> usize {
    self.index.load(Ordering::SeqCst)
  }

  pub fn playlist(&self) -> &[PathBuf] {
    &self.playlist
  }

  pub fn pause_after_load_armed(&self) -> bool {
    self.pause_after_load.load(Ordering::SeqCst)
  }

  fn set_index(&self, index: i64) {
    if index >= 0 && (index as usize) < self.playlist.len() {
      self.index.store(index as usize, Ordering::SeqCst);
    }
  }

  fn disarm_pause_after_load(&self) {
    if !self.opts.continuous {
      self.pause_after_load.store(false, Ordering::SeqCst);
    }
  }

  // ==========================================================================
  // Foreground loop
  // ==========================================================================

  /// Run until a quit key/command or until the IPC connection closes.
  pub async fn run<K: KeySource>(self: &Arc<Self>, keys: &mut K) -> Result<(), SessionError> {
    if let Err(e) = self
      .mpv
      .observe_property(OBS_PLAYLIST_POS, "playlist-pos", COMMAND_TIMEOUT)
      .await
    {
      log::warn!("Failed to observe playlist-pos: {}", e);
    }

    let events = tokio::spawn(self.clone().event_loop());
    let sampler = tokio::spawn(self.clone().sampler_loop());

    let result = self.key_loop(keys).await;

    events.abort();
    sampler.abort();
    result
  }

  async fn key_loop<K: KeySource>(&self, keys: &mut K) -> Result<(), SessionError> {
    loop {
      if self.mpv.is_closed() {
        log::info!("MPV connection closed, leaving session");
        return Ok(());
      }

      let Some(key) = keys.poll_key(Duration::ZERO)? else {
        tokio::select! {
          _ = tokio::time::sleep(KEY_IDLE) => {}
          _ = self.mpv.closed() => {}
        }
        continue;
      };

      if self.handle_key(key, keys).await? == Flow::Quit {
        return Ok(());
      }
    }
  }

  async fn handle_key<K: KeySource>(&self, key: Key, keys: &mut K) -> Result<Flow, SessionError> {
    let Some(action) = action_for(key) else {
      return Ok(Flow::Continue);
    };
    log::debug!("Key {:?} -> {:?}", key, action);

    let result = match action {
      KeyAction::Quit => {
        self.quit().await;
        return Ok(Flow::Quit);
      }
      KeyAction::CommandMode => {
        return match keys.read_line(":")? {
          Some(line) => Ok(self.dispatch_line(&line).await),
          None => {
            self.osd("Canceled").await;
            Ok(Flow::Continue)
          }
        };
      }
      KeyAction::TogglePause => self.simple(MpvCommand::cycle("pause"), "Toggle pause").await,
      KeyAction::ToggleMute => self.simple(MpvCommand::cycle("mute"), "Toggle mute").await,
      KeyAction::SeekShort(sign) => self.seek_step(sign * self.opts.seek_short).await,
      KeyAction::SeekLong(sign) => self.seek_step(sign * self.opts.seek_long).await,
      KeyAction::Next => self.next().await,
      KeyAction::Prev => self.prev().await,
      KeyAction::Speed(delta) => self.bump_speed(delta).await,
      KeyAction::JumpPercent(pct) => {
        self
          .simple(MpvCommand::seek_percent(pct as f64), &format!("Jump {}%", pct))
          .await
      }
      KeyAction::Help => {
        self.show_help().await;
        Ok(())
      }
    };
    self.report(result).await;
    Ok(Flow::Continue)
  }

  /// Execute one command-mode line.
  pub async fn dispatch_line(&self, line: &str) -> Flow {
    let command = match parse_command(line) {
      Ok(command) => command,
      Err(e) => {
        self.osd(&e.to_string()).await;
        return Flow::Continue;
      }
    };

    let result = match command {
      CommandLine::Empty => Ok(()),
      CommandLine::Quit => {
        self.quit().await;
        return Flow::Quit;
      }
      CommandLine::Help => {
        self.show_help().await;
        self.osd(":ls, :open, :seek, :jump, :n, :p, :q").await;
        Ok(())
      }
      CommandLine::Next => self.next().await,
      CommandLine::Prev => self.prev().await,
      CommandLine::List => {
        terminal::print_block(&self.format_playlist());
        self.osd(&format!("{} files", self.playlist.len())).await;
        Ok(())
      }
      CommandLine::OpenIndex(index) => self.load(index).await,
      CommandLine::OpenMatch(query) => match self.find_by_substring(&query) {
        Some(index) => self.load(index as i64).await,
        None => {
          self.osd("not found").await;
          Ok(())
        }
      },
      CommandLine::Seek(seconds) => {
        self
          .simple(MpvCommand::seek_relative(seconds), &format!("Seek {:+.0}s", seconds))
          .await
      }
      CommandLine::Jump(JumpTarget::Percent(pct)) => {
        self
          .simple(MpvCommand::seek_percent(pct), &format!("Jump {:.0}%", pct))
          .await
      }
      CommandLine::Jump(JumpTarget::Seconds(seconds)) => {
        self
          .simple(MpvCommand::seek_absolute(seconds), &format!("Jump {:.0}s", seconds))
          .await
      }
    };
    self.report(result).await;
    Flow::Continue
  }

  /// Surface a failed operation on the OSD. Never fatal.
  async fn report(&self, result: Result<(), SessionError>) {
    match result {
      Ok(()) => {}
      Err(SessionError::Ipc(IpcError::Closed)) => log::debug!("Command skipped: MPV IPC closed"),
      Err(e) => {
        log::warn!("{}", e);
        self.osd(&e.to_string()).await;
      }
    }
  }

  async fn simple(&self, cmd: MpvCommand, message: &str) -> Result<(), SessionError> {
    self.mpv.command(cmd, COMMAND_TIMEOUT).await?;
    self.osd(message).await;
    Ok(())
  }

  async fn seek_step(&self, seconds: f64) -> Result<(), SessionError> {
    let arrow = if seconds < 0.0 { "◀" } else { "▶" };
    self
      .simple(MpvCommand::seek_relative(seconds), &format!("{} {:.0}s", arrow, seconds.abs()))
      .await
  }

  async fn bump_speed(&self, delta: f64) -> Result<(), SessionError> {
    let current = match self.mpv.get_float("speed", SYNC_TIMEOUT).await {
      Ok(speed) if speed > 0.0 => speed,
      _ => 1.0,
    };
    let speed = (current + delta).clamp(MIN_SPEED, MAX_SPEED);
    self.mpv.set_property("speed", speed, COMMAND_TIMEOUT).await?;
    self.osd(&format!("Speed {:.1}x", speed)).await;
    Ok(())
  }

  /// Persist the position and ask MPV to quit. Both are best effort.
  async fn quit(&self) {
    self.persist_position().await;
    if let Err(e) = self.mpv.command(MpvCommand::quit(), QUERY_TIMEOUT).await {
      log::debug!("quit command failed: {}", e);
    }
  }

  /// Show a message on MPV's OSD. Failures are ignored.
  async fn osd(&self, message: &str) {
    let _ = self
      .mpv
      .command(MpvCommand::show_text(message, OSD_DURATION_MS), OSD_TIMEOUT)
      .await;
  }

  /// Full key table the first time, a one-line reminder afterwards.
  pub async fn show_help(&self) {
    if self.help_shown.swap(true, Ordering::SeqCst) {
      self
        .osd("Keys: space pause, arrows/WASD seek, j/k prev/next, : commands, q quit")
        .await;
      return;
    }
    terminal::print_block(HELP_TEXT);
    self.osd("Ready. Press : for commands, h for help.").await;
  }

  pub fn format_playlist(&self) -> String {
    let current = self.index();
    let mut out = String::from("Playlist:\n");
    for (i, path) in self.playlist.iter().enumerate() {
      let marker = if i == current { "→ " } else { "  " };
      out.push_str(&format!("{}{:3}  {}\n", marker, i + 1, basename(path)));
    }
    out
  }

  /// First entry whose file name contains `query`, case-insensitively.
  pub fn find_by_substring(&self, query: &str) -> Option<usize> {
    let query = query.to_lowercase();
    self
      .playlist
      .iter()
      .position(|p| basename(p).to_lowercase().contains(&query))
  }

  // ==========================================================================
  // Navigation
  // ==========================================================================

  /// Move to the next entry, wrapping to the first one when enabled.
  pub async fn next(&self) -> Result<(), SessionError> {
    self.persist_position().await;
    self.sync_index().await;
    let len = self.playlist.len();
    if len == 0 {
      return Ok(());
    }

    if self.opts.wrap && self.index() >= len - 1 {
      self
        .mpv
        .command(MpvCommand::playlist_play_index(0), COMMAND_TIMEOUT)
        .await?;
      self.sync_index_or(0).await;
      self.osd("Loop → start").await;
    } else {
      self
        .mpv
        .command(MpvCommand::playlist_next_weak(), COMMAND_TIMEOUT)
        .await?;
      self.sync_index().await;
      self.osd("Next").await;
    }
    self.disarm_pause_after_load();
    Ok(())
  }

  /// Move to the previous entry, wrapping to the last one when enabled.
  pub async fn prev(&self) -> Result<(), SessionError> {
    self.persist_position().await;
    self.sync_index().await;
    let len = self.playlist.len();
    if len == 0 {
      return Ok(());
    }

    if self.opts.wrap && self.index() == 0 {
      let last = len - 1;
      self
        .mpv
        .command(MpvCommand::playlist_play_index(last), COMMAND_TIMEOUT)
        .await?;
      self.sync_index_or(last).await;
      self.osd("Loop → end").await;
    } else {
      self
        .mpv
        .command(MpvCommand::playlist_prev_weak(), COMMAND_TIMEOUT)
        .await?;
      self.sync_index().await;
      self.osd("Prev").await;
    }
    self.disarm_pause_after_load();
    Ok(())
  }

  /// Jump to a 0-based playlist index.
  pub async fn load(&self, index: i64) -> Result<(), SessionError> {
    let len = self.playlist.len();
    if index < 0 || index as usize >= len {
      return Err(SessionError::IndexOutOfRange { index, len });
    }
    let index = index as usize;

    self.persist_position().await;
    self
      .mpv
      .command(MpvCommand::playlist_play_index(index), COMMAND_TIMEOUT)
      .await?;
    self.index.store(index, Ordering::SeqCst);

    let name = basename(&self.playlist[index]);
    self
      .osd(&format!("Open {} ({}/{})", name, index + 1, len))
      .await;
    self.disarm_pause_after_load();
    Ok(())
  }

  /// Re-read `playlist-pos`; keep the current index when the query fails.
  async fn sync_index(&self) {
    match self.mpv.get_int("playlist-pos", SYNC_TIMEOUT).await {
      Ok(n) => self.set_index(n),
      Err(e) => log::debug!("playlist-pos query failed: {}", e),
    }
  }

  /// Re-read `playlist-pos`, using `fallback` when the query fails.
  async fn sync_index_or(&self, fallback: usize) {
    match self.mpv.get_int("playlist-pos", SYNC_TIMEOUT).await {
      Ok(n) if n >= 0 => self.set_index(n),
      _ => self.index.store(fallback, Ordering::SeqCst),
    }
  }

  // ==========================================================================
  // Resume positions
  // ==========================================================================

  /// Path MPV is playing, or the playlist entry for the current index when MPV has none yet.
  async fn current_path(&self, timeout: Duration) -> String {
    match self.mpv.get_string("path", timeout).await {
      Ok(path) if !path.is_empty() => path,
      _ => self
        .playlist
        .get(self.index())
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default(),
    }
  }

  /// Seek to the stored offset of the current file, if it is past the resume threshold.
  pub async fn restore_position(&self) -> Result<(), SessionError> {
    if !self.opts.resume {
      return Ok(());
    }
    let path = self.current_path(QUERY_TIMEOUT).await;
    let stored = self.timestamps.lock().get(&path);
    let Some(seconds) = stored.filter(|s| *s > RESUME_THRESHOLD_SECS) else {
      return Ok(());
    };

    self
      .mpv
      .command(MpvCommand::seek_absolute(seconds), COMMAND_TIMEOUT)
      .await?;
    self.osd(&format!("Resume {:.0}s", seconds)).await;
    Ok(())
  }

  /// Query the live position and write it to the store. Best effort.
  pub async fn persist_position(&self) {
    if !self.opts.resume {
      return;
    }
    let position = match self.mpv.get_float("time-pos", QUERY_TIMEOUT).await {
      Ok(p) if p >= 0.0 => p,
      _ => return,
    };
    let path = self.current_path(QUERY_TIMEOUT).await;
    if path.is_empty() {
      return;
    }

    let mut store = self.timestamps.lock();
    store.set(path, position);
    save_store(&store);
  }

  /// Write the last sampled position to the store right away.
  fn flush_last_sample(&self) {
    if !self.opts.resume {
      return;
    }
    let (path, position) = {
      let sample = self.last_sample.lock();
      (sample.path.clone(), sample.position)
    };
    if path.is_empty() || position < 0.0 {
      return;
    }

    let mut store = self.timestamps.lock();
    store.set(path, position);
    save_store(&store);
  }

  /// Record the current position; write the store to disk at most every `SAVE_INTERVAL`.
  async fn sample_and_maybe_save(&self) {
    let path = match self.mpv.get_string("path", SAMPLE_TIMEOUT).await {
      Ok(path) if !path.is_empty() => path,
      _ => return,
    };
    let position = match self.mpv.get_float("time-pos", SAMPLE_TIMEOUT).await {
      Ok(p) if p >= 0.0 => p,
      _ => return,
    };

    let should_save = {
      let mut sample = self.last_sample.lock();
      sample.path = path.clone();
      sample.position = position;
      let due = sample
        .saved_at
        .map_or(true, |at| at.elapsed() >= SAVE_INTERVAL);
      if due {
        sample.saved_at = Some(Instant::now());
      }
      due
    };

    let mut store = self.timestamps.lock();
    store.set(path, position);
    if should_save {
      save_store(&store);
    }
  }

  async fn sampler_loop(self: Arc<Self>) {
    if !self.opts.resume {
      return;
    }
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
      tokio::select! {
        _ = ticker.tick() => self.sample_and_maybe_save().await,
        _ = self.mpv.closed() => break,
      }
    }
    log::debug!("Position sampler stopped");
  }

  // ==========================================================================
  // MPV events
  // ==========================================================================

  async fn event_loop(self: Arc<Self>) {
    let events = self.mpv.events();
    while let Ok(event) = events.recv().await {
      self.handle_event(&event).await;
    }
    log::debug!("MPV event stream ended");
  }

  pub async fn handle_event(&self, event: &MpvEvent) {
    if event.is_property_change("playlist-pos") {
      // The move may come from MPV's own bindings; keep the outgoing file's position.
      self.flush_last_sample();
      if let Some(n) = event.data.as_ref().and_then(Value::as_i64) {
        self.set_index(n);
      }
      return;
    }

    match event.event.as_str() {
      "end-file" => {
        self.persist_position().await;
        if !self.opts.continuous && !self.opts.autoplay {
          self.pause_after_load.store(true, Ordering::SeqCst);
        }
      }
      "file-loaded" => {
        self.sync_index().await;
        if let Err(e) = self.restore_position().await {
          log::warn!("Resume failed: {}", e);
        }
        if self.opts.autoplay {
          if let Err(e) = self.mpv.set_property("pause", false, COMMAND_TIMEOUT).await {
            log::warn!("Failed to start playback: {}", e);
          }
        } else if self.pause_after_load.swap(false, Ordering::SeqCst) {
          if let Err(e) = self.mpv.set_property("pause", true, COMMAND_TIMEOUT).await {
            log::warn!("Failed to pause after load: {}", e);
          }
          self.osd("Paused (space to play)").await;
        }
      }
      _ => {}
    }
  }
}
