//! MPV IPC module - spawns and controls external MPV player via JSON IPC.
//!
//! Architecture:
//! - `process.rs` - MPV binary detection, process spawning and shutdown
//! - `files.rs` - Socket path, playlist, input.conf and script staged for MPV
//! - `ipc.rs` - Async IPC connection (Named Pipes on Windows, Unix Sockets on Linux/macOS)
//! - `protocol.rs` - JSON command/response types and serialization
//! - `client.rs` - High-level MPV client with typed getters

mod client;
mod files;
mod ipc;
mod process;
mod protocol;
#[cfg(all(test, unix))]
pub(crate) mod testing;

pub use client::MpvClient;
pub use files::{KeybindOptions, StagedFiles};
pub use ipc::{IpcError, MpvIpc, EVENT_CAPACITY};
pub use process::{find_mpv, resolve_mpv, MpvProcess, ProcessError, StartOptions};
pub use protocol::{MpvCommand, MpvEvent, MpvResponse};
