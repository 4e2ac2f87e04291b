//! Playlist discovery: video files next to (or inside) the given path.

use std::cmp::{Ordering, Reverse};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v"];

#[derive(Debug, Error)]
pub enum PlaylistError {
  #[error("{path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("no video files found in {0}")]
  Empty(PathBuf),
}

/// Sort order for discovered files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
  #[default]
  Name,
  /// Most recently modified first.
  Latest,
}

#[derive(Debug, Clone)]
pub struct Playlist {
  pub files: Vec<PathBuf>,
  pub start: usize,
}

fn is_video(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
    .unwrap_or(false)
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PlaylistError + '_ {
  move |source| PlaylistError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Newest first; files without a modification time go last, by name.
fn latest_first(
  (ta, a): &(Option<SystemTime>, PathBuf),
  (tb, b): &(Option<SystemTime>, PathBuf),
) -> Ordering {
  (ta.is_none(), Reverse(ta), a).cmp(&(tb.is_none(), Reverse(tb), b))
}

/// Build the playlist for `path`: a directory starts at its first entry, a file starts at itself.
pub fn build_playlist(path: &Path, order: Order) -> Result<Playlist, PlaylistError> {
  let path = std::path::absolute(path).map_err(io_err(path))?;
  let meta = fs::metadata(&path).map_err(io_err(&path))?;

  let (dir, start_file) = if meta.is_dir() {
    (path.clone(), None)
  } else {
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("/"));
    (dir, Some(path.clone()))
  };

  let mut files = Vec::new();
  for entry in fs::read_dir(&dir).map_err(io_err(&dir))? {
    let entry = entry.map_err(io_err(&dir))?;
    let file_path = entry.path();
    if file_path.is_dir() || !is_video(&file_path) {
      continue;
    }
    files.push(file_path);
  }

  match order {
    Order::Name => files.sort(),
    Order::Latest => {
      let mut stamped: Vec<(Option<SystemTime>, PathBuf)> = files
        .into_iter()
        .map(|f| (fs::metadata(&f).and_then(|m| m.modified()).ok(), f))
        .collect();
      stamped.sort_by(latest_first);
      files = stamped.into_iter().map(|(_, f)| f).collect();
    }
  }

  if files.is_empty() {
    return Err(PlaylistError::Empty(dir));
  }

  let start = start_file
    .and_then(|s| files.iter().position(|f| *f == s))
    .unwrap_or(0);
  Ok(Playlist { files, start })
}
