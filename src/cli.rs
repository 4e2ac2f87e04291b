//! Command-line interface definitions.
//!
//! Flags override values from the config file; unset flags leave them alone.

use std::path::PathBuf;

use clap::Parser;

use crate::config::AppConfig;

/// pp - keyboard-first video playlist controller for mpv
#[derive(Parser, Debug)]
#[command(
  name = "pp",
  after_help = "Command mode (press ':'):\n  ls | open 3 | open substring | seek +30 | jump 50% | jump 120 | n | p | q"
)]
pub struct Args {
  /// Video file or directory
  #[arg(default_value = ".")]
  pub path: PathBuf,

  /// Short seek in seconds (left/right, a/d)
  #[arg(long)]
  pub seek_short: Option<f64>,

  /// Long seek in seconds (up/down, w/s)
  #[arg(long)]
  pub seek_long: Option<f64>,

  /// Auto-advance to the next video on end
  #[arg(long)]
  pub continuous: bool,

  /// Force playback on every file load (default)
  #[arg(long, conflicts_with = "no_autoplay")]
  pub autoplay: bool,

  /// Do not force playback on file load
  #[arg(long)]
  pub no_autoplay: bool,

  /// Stop at the playlist ends instead of wrapping around
  #[arg(long)]
  pub no_wrap: bool,

  /// Start muted
  #[arg(long)]
  pub mute: bool,

  /// Disable resume, even within this session
  #[arg(long)]
  pub no_resume: bool,

  /// Persist resume timestamps across runs
  #[arg(long)]
  pub persist_resume: bool,

  /// MPV executable name or path
  #[arg(long)]
  pub mpv: Option<String>,

  /// Order videos newest first
  #[arg(long)]
  pub latest: bool,

  /// Config file (default: <config dir>/pp/config.json)
  #[arg(long)]
  pub config: Option<PathBuf>,
}

impl Args {
  /// Apply flags on top of `base`.
  pub fn apply(&self, mut base: AppConfig) -> AppConfig {
    if let Some(s) = self.seek_short {
      base.seek_short = s;
    }
    if let Some(s) = self.seek_long {
      base.seek_long = s;
    }
    if self.continuous {
      base.continuous = true;
    }
    if self.autoplay {
      base.autoplay = true;
    }
    if self.no_autoplay {
      base.autoplay = false;
    }
    if self.no_wrap {
      base.wrap = false;
    }
    if self.mute {
      base.mute = true;
    }
    if self.no_resume {
      base.resume = false;
    }
    if self.persist_resume {
      base.persist_resume = true;
    }
    if let Some(mpv) = &self.mpv {
      base.mpv_path = Some(mpv.clone());
    }
    if self.latest {
      base.latest = true;
    }
    base
  }
}
