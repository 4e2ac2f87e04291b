//! MPV JSON IPC protocol types.
//!
//! Reference: https://mpv.io/manual/master/#json-ipc

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Command arguments sent to MPV. The request ID is assigned by the connection that sends it.
#[derive(Debug, Clone, PartialEq)]
pub struct MpvCommand {
  pub args: Vec<Value>,
}

impl MpvCommand {
  /// Create a command from raw arguments (`[name, args...]`).
  pub fn new(args: Vec<Value>) -> Self {
    Self { args }
  }

  /// Command name (first argument).
  pub fn name(&self) -> &str {
    self.args.first().and_then(Value::as_str).unwrap_or("")
  }

  /// Get a property value.
  pub fn get_property(name: &str) -> Self {
    Self::new(vec!["get_property".into(), name.into()])
  }

  /// Set a property to any JSON value.
  pub fn set_property(name: &str, value: impl Into<Value>) -> Self {
    Self::new(vec!["set_property".into(), name.into(), value.into()])
  }

  /// Observe a property for changes.
  pub fn observe_property(id: i64, name: &str) -> Self {
    Self::new(vec!["observe_property".into(), id.into(), name.into()])
  }

  /// Seek relative to the current position.
  pub fn seek_relative(seconds: f64) -> Self {
    Self::new(vec!["seek".into(), seconds.into(), "relative".into()])
  }

  /// Seek to absolute position in seconds.
  pub fn seek_absolute(seconds: f64) -> Self {
    Self::new(vec!["seek".into(), seconds.into(), "absolute".into()])
  }

  /// Seek to a percentage of the file duration.
  pub fn seek_percent(percent: f64) -> Self {
    Self::new(vec!["seek".into(), percent.into(), "absolute-percent".into()])
  }

  /// Jump to a playlist entry (0-based).
  pub fn playlist_play_index(index: usize) -> Self {
    Self::new(vec!["playlist-play-index".into(), index.into()])
  }

  /// Move to the next entry; no error when there is none.
  pub fn playlist_next_weak() -> Self {
    Self::new(vec!["playlist-next".into(), "weak".into()])
  }

  /// Move to the previous entry; no error when there is none.
  pub fn playlist_prev_weak() -> Self {
    Self::new(vec!["playlist-prev".into(), "weak".into()])
  }

  /// Cycle (toggle) a property.
  pub fn cycle(property: &str) -> Self {
    Self::new(vec!["cycle".into(), property.into()])
  }

  /// Show an OSD message for `duration_ms`.
  pub fn show_text(text: &str, duration_ms: u64) -> Self {
    Self::new(vec!["show-text".into(), text.into(), duration_ms.into()])
  }

  /// Quit MPV.
  pub fn quit() -> Self {
    Self::new(vec!["quit".into()])
  }
}

/// Wire form of a command: `{"command": [...], "request_id": N}`.
#[derive(Debug, Serialize)]
pub(crate) struct MpvRequest<'a> {
  pub command: &'a [Value],
  pub request_id: i64,
}

/// Response from MPV for a command.
#[derive(Debug, Clone, Deserialize)]
pub struct MpvResponse {
  /// "success" or error message. Missing is treated as success.
  #[serde(default)]
  pub error: String,
  /// Response data (command-specific).
  #[serde(default)]
  pub data: Option<Value>,
  /// Matching request ID.
  pub request_id: i64,
}

impl MpvResponse {
  /// Check if the command succeeded.
  pub fn is_success(&self) -> bool {
    self.error.is_empty() || self.error == "success"
  }
}

/// Event sent by MPV (property changes, playback events, etc.).
#[derive(Debug, Clone, Deserialize)]
pub struct MpvEvent {
  /// Event type (e.g., "property-change", "end-file", "file-loaded").
  pub event: String,
  /// Observer ID for property-change events.
  #[serde(default)]
  pub id: Option<i64>,
  /// Property name for property-change events.
  #[serde(default)]
  pub name: Option<String>,
  /// Event data.
  #[serde(default)]
  pub data: Option<Value>,
  /// Reason for end-file events (e.g., "eof", "stop", "quit", "error").
  #[serde(default)]
  pub reason: Option<String>,
  /// Any other fields carried by the event.
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl MpvEvent {
  /// Property name if this is a `property-change` event for `name`.
  pub fn is_property_change(&self, name: &str) -> bool {
    self.event == "property-change" && self.name.as_deref() == Some(name)
  }
}

/// Message received from MPV IPC.
#[derive(Debug, Clone)]
pub enum MpvMessage {
  Response(MpvResponse),
  Event(MpvEvent),
  /// Well-formed JSON that is neither a reply nor an event.
  Other,
}

impl MpvMessage {
  /// Parse one JSON line from MPV.
  ///
  /// A record with `request_id` is a reply; otherwise a record with `event` is an event.
  pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    let is_response = value.get("request_id").is_some_and(|id| !id.is_null());
    if is_response {
      return serde_json::from_value(value).map(MpvMessage::Response);
    }
    if value.get("event").is_some() {
      return serde_json::from_value(value).map(MpvMessage::Event);
    }
    Ok(MpvMessage::Other)
  }
}
