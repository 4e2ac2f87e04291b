//! Resume timestamps: last playback offset per media path, optionally persisted as JSON.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

const DEFAULT_FILE_NAME: &str = ".pp_timestamps.json";

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("JSON serialization error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("Failed to replace timestamps file: {0}")]
  Persist(#[from] tempfile::PersistError),
}

/// Map from absolute media path to seconds. Without a backing path it lives only in memory.
#[derive(Debug, Default)]
pub struct TimestampStore {
  path: Option<PathBuf>,
  entries: BTreeMap<String, f64>,
}

impl TimestampStore {
  /// Store persisted at `path`. Nothing is read until `load`.
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: Some(path.into()),
      entries: BTreeMap::new(),
    }
  }

  /// Store that never touches disk.
  pub fn in_memory() -> Self {
    Self::default()
  }

  pub fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }

  /// Best-effort load. A missing or unreadable file leaves the store empty.
  pub fn load(&mut self) {
    let Some(path) = &self.path else {
      return;
    };
    let bytes = match fs::read(path) {
      Ok(bytes) => bytes,
      Err(e) => {
        log::debug!("No timestamps loaded from {}: {}", path.display(), e);
        return;
      }
    };
    match serde_json::from_slice::<BTreeMap<String, f64>>(&bytes) {
      Ok(entries) => {
        log::info!("Loaded {} resume timestamps from {}", entries.len(), path.display());
        self.entries = entries;
      }
      Err(e) => log::warn!("Ignoring unreadable timestamps file {}: {}", path.display(), e),
    }
  }

  /// Write the whole map to a sibling temp file and rename it over the target.
  pub fn save(&self) -> Result<(), StoreError> {
    let Some(path) = &self.path else {
      return Ok(());
    };
    let dir = match path.parent() {
      Some(dir) if !dir.as_os_str().is_empty() => dir,
      _ => Path::new("."),
    };

    let json = serde_json::to_vec_pretty(&self.entries)?;
    let mut tmp = tempfile::Builder::new()
      .prefix(".pp_timestamps")
      .suffix(".tmp")
      .tempfile_in(dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
  }

  pub fn get(&self, media: &str) -> Option<f64> {
    self.entries.get(media).copied()
  }

  pub fn set(&mut self, media: impl Into<String>, seconds: f64) {
    self.entries.insert(media.into(), seconds);
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// `~/.pp_timestamps.json`, or the working directory when there is no home.
pub fn default_timestamps_path() -> PathBuf {
  dirs::home_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join(DEFAULT_FILE_NAME)
}
