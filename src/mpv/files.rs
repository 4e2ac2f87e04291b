//! Files staged for MPV: IPC socket path, playlist, input bindings and the navigation script.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Seek increments baked into the generated input.conf.
#[derive(Debug, Clone, Copy)]
pub struct KeybindOptions {
  pub seek_short: f64,
  pub seek_long: f64,
}

/// Private scratch directory holding everything MPV is pointed at. Removed on drop.
pub struct StagedFiles {
  dir: TempDir,
  socket_path: PathBuf,
}

impl StagedFiles {
  pub fn new() -> io::Result<Self> {
    let dir = tempfile::Builder::new().prefix("pp-mpv-").tempdir()?;
    let socket_path = socket_path_in(dir.path());
    Ok(Self { dir, socket_path })
  }

  /// Path MPV should serve IPC on.
  pub fn socket_path(&self) -> &Path {
    &self.socket_path
  }

  /// Write an m3u playlist, one path per line.
  pub fn write_playlist(&self, files: &[PathBuf]) -> io::Result<PathBuf> {
    let path = self.dir.path().join("playlist.m3u");
    let mut content = String::new();
    for file in files {
      content.push_str(&file.to_string_lossy());
      content.push('\n');
    }
    fs::write(&path, content)?;
    Ok(path)
  }

  pub fn write_input_conf(&self, opts: KeybindOptions) -> io::Result<PathBuf> {
    let path = self.dir.path().join("input.conf");
    fs::write(&path, input_conf(opts))?;
    Ok(path)
  }

  pub fn write_nav_script(&self) -> io::Result<PathBuf> {
    let path = self.dir.path().join("pp-nav.lua");
    fs::write(&path, NAV_SCRIPT)?;
    Ok(path)
  }
}

#[cfg(windows)]
fn socket_path_in(dir: &Path) -> PathBuf {
  let tag = dir
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| std::process::id().to_string());
  PathBuf::from(format!(r"\\.\pipe\{}", tag))
}

#[cfg(not(windows))]
fn socket_path_in(dir: &Path) -> PathBuf {
  dir.join("mpv.sock")
}

/// Bindings that work while the MPV window has focus. Navigation goes through the script so
/// it wraps at both ends.
fn input_conf(opts: KeybindOptions) -> String {
  let short = opts.seek_short;
  let long = opts.seek_long;
  let mut conf = format!(
    "SPACE cycle pause\n\
     LEFT  seek -{short:.0} relative\n\
     RIGHT seek +{short:.0} relative\n\
     UP    seek +{long:.0} relative\n\
     DOWN  seek -{long:.0} relative\n\
     a     seek -{short:.0} relative\n\
     d     seek +{short:.0} relative\n\
     w     seek +{long:.0} relative\n\
     s     seek -{long:.0} relative\n\
     j     script-message pp_prev_wrap\n\
     k     script-message pp_next_wrap\n\
     e     script-message pp_prev_wrap\n\
     r     script-message pp_next_wrap\n\
     ENTER script-message pp_next_wrap\n\
     m     cycle mute\n\
     [     add speed -0.1\n\
     ]     add speed 0.1\n\
     f     cycle fullscreen\n"
  );
  for digit in 1..=9 {
    conf.push_str(&format!("{digit}     seek {} absolute-percent\n", digit * 10));
  }
  conf.push_str("q     quit\nESC   quit\n");
  conf
}

const NAV_SCRIPT: &str = r#"local mp = require 'mp'

local function play_wrapped(step)
  local count = mp.get_property_number('playlist-count', 0)
  if count <= 0 then return end
  local pos = mp.get_property_number('playlist-pos', 0)
  mp.commandv('playlist-play-index', (pos + step) % count)
end

mp.register_script_message('pp_next_wrap', function() play_wrapped(1) end)
mp.register_script_message('pp_prev_wrap', function() play_wrapped(-1) end)
"#;
