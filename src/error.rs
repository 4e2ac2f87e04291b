//! Top-level error type for startup and shutdown.

use thiserror::Error;

use crate::mpv::{IpcError, ProcessError};
use crate::playlist::PlaylistError;
use crate::session::SessionError;

/// Errors that end the program with a non-zero exit code.
#[derive(Debug, Error)]
pub enum AppError {
  #[error("Invalid configuration: {0}")]
  Config(String),

  #[error(transparent)]
  Process(#[from] ProcessError),

  #[error("MPV IPC error: {0}")]
  Ipc(#[from] IpcError),

  #[error(transparent)]
  Playlist(#[from] PlaylistError),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Session(#[from] SessionError),
}
