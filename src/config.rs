//! Application configuration with optional on-disk defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
  /// Custom MPV executable (None = auto-detect).
  #[serde(default)]
  pub mpv_path: Option<String>,

  /// Short seek step in seconds (left/right, a/d).
  #[serde(default = "default_seek_short")]
  pub seek_short: f64,

  /// Long seek step in seconds (up/down, w/s).
  #[serde(default = "default_seek_long")]
  pub seek_long: f64,

  /// Keep playing into the next file when one ends.
  #[serde(default)]
  pub continuous: bool,

  /// Force playback to resume after every file load.
  #[serde(default = "default_true")]
  pub autoplay: bool,

  /// Next/prev wrap around the playlist ends.
  #[serde(default = "default_true")]
  pub wrap: bool,

  /// Start muted.
  #[serde(default)]
  pub mute: bool,

  /// Resume files from their last position.
  #[serde(default = "default_true")]
  pub resume: bool,

  /// Keep resume positions across runs.
  #[serde(default)]
  pub persist_resume: bool,

  /// Order the playlist newest first.
  #[serde(default)]
  pub latest: bool,

  /// Override for the resume timestamps file.
  #[serde(default)]
  pub timestamps_path: Option<PathBuf>,
}

fn default_seek_short() -> f64 {
  10.0
}

fn default_seek_long() -> f64 {
  60.0
}

fn default_true() -> bool {
  true
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      mpv_path: None,
      seek_short: default_seek_short(),
      seek_long: default_seek_long(),
      continuous: false,
      autoplay: true,
      wrap: true,
      mute: false,
      resume: true,
      persist_resume: false,
      latest: false,
      timestamps_path: None,
    }
  }
}

impl AppConfig {
  /// `<config dir>/pp/config.json`.
  pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("pp").join("config.json"))
  }

  /// Load configuration from `path`, falling back to defaults when it is missing or invalid.
  pub fn load_or_default(path: &Path) -> Self {
    let text = match fs::read_to_string(path) {
      Ok(text) => text,
      Err(_) => return Self::default(),
    };
    match serde_json::from_str(&text) {
      Ok(config) => {
        log::info!("Loaded config from {}", path.display());
        config
      }
      Err(e) => {
        log::warn!("Ignoring invalid config {}: {}", path.display(), e);
        Self::default()
      }
    }
  }

  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), String> {
    if !self.seek_short.is_finite() || self.seek_short <= 0.0 {
      return Err("Short seek must be a positive number of seconds".to_string());
    }
    if !self.seek_long.is_finite() || self.seek_long <= 0.0 {
      return Err("Long seek must be a positive number of seconds".to_string());
    }
    if let Some(path) = &self.mpv_path {
      if path.trim().is_empty() {
        return Err("MPV path cannot be empty".to_string());
      }
    }
    Ok(())
  }
}
