//! In-process stand-in for mpv's JSON IPC server, used by tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixListener;

#[derive(Default)]
struct FakeState {
  playlist: Vec<String>,
  pos: i64,
  time_pos: f64,
  path_unavailable: bool,
  commands: Vec<Vec<Value>>,
  held_names: HashSet<String>,
  held_replies: Vec<Value>,
}

/// Scripted mpv: answers `get_property`, tracks playlist position and records every command.
pub(crate) struct FakeMpv {
  _dir: TempDir,
  socket_path: PathBuf,
  state: Arc<Mutex<FakeState>>,
  writer: Arc<tokio::sync::Mutex<Option<OwnedWriteHalf>>>,
}

impl FakeMpv {
  pub async fn start(playlist: &[&str]) -> Self {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("mpv.sock");
    let listener = UnixListener::bind(&socket_path).unwrap();

    let state = Arc::new(Mutex::new(FakeState {
      playlist: playlist.iter().map(|s| s.to_string()).collect(),
      ..Default::default()
    }));
    let writer = Arc::new(tokio::sync::Mutex::new(None));

    let task_state = state.clone();
    let task_writer = writer.clone();
    tokio::spawn(async move {
      let Ok((stream, _)) = listener.accept().await else {
        return;
      };
      let (read, write) = stream.into_split();
      *task_writer.lock().await = Some(write);

      let mut lines = BufReader::new(read).lines();
      while let Ok(Some(line)) = lines.next_line().await {
        let Ok(request) = serde_json::from_str::<Value>(&line) else {
          continue;
        };
        let (reply, quit) = Self::answer(&task_state, &request);
        if let Some(reply) = reply {
          Self::write_line(&task_writer, &reply.to_string()).await;
        }
        if quit {
          if let Some(mut w) = task_writer.lock().await.take() {
            let _ = w.shutdown().await;
          }
          break;
        }
      }
    });

    Self {
      _dir: dir,
      socket_path,
      state,
      writer,
    }
  }

  fn answer(state: &Mutex<FakeState>, request: &Value) -> (Option<Value>, bool) {
    let id = request["request_id"].clone();
    let args = request["command"].as_array().cloned().unwrap_or_default();
    let name = args.first().and_then(Value::as_str).unwrap_or("").to_string();

    let mut s = state.lock();
    s.commands.push(args.clone());
    let len = s.playlist.len() as i64;

    let result: Result<Value, &str> = match name.as_str() {
      "get_property" => match args.get(1).and_then(Value::as_str).unwrap_or("") {
        "playlist-pos" => Ok(json!(s.pos)),
        "playlist-count" => Ok(json!(len)),
        "time-pos" => Ok(json!(s.time_pos)),
        "speed" => Ok(json!(1.0)),
        "pause" => Ok(json!(false)),
        "path" if s.path_unavailable => Err("property unavailable"),
        "path" => Ok(json!(s.playlist.get(s.pos as usize).cloned().unwrap_or_default())),
        _ => Err("property not found"),
      },
      "playlist-play-index" => match args.get(1).and_then(Value::as_i64) {
        Some(n) if n >= 0 && n < len => {
          s.pos = n;
          Ok(Value::Null)
        }
        _ => Err("invalid parameter"),
      },
      "playlist-next" => {
        if s.pos + 1 < len {
          s.pos += 1;
        }
        Ok(Value::Null)
      }
      "playlist-prev" => {
        if s.pos > 0 {
          s.pos -= 1;
        }
        Ok(Value::Null)
      }
      _ => Ok(Value::Null),
    };

    let reply = match result {
      Ok(data) => json!({"request_id": id, "error": "success", "data": data}),
      Err(e) => json!({"request_id": id, "error": e}),
    };
    if s.held_names.contains(&name) {
      s.held_replies.push(reply);
      return (None, false);
    }
    (Some(reply), name == "quit")
  }

  async fn write_line(writer: &tokio::sync::Mutex<Option<OwnedWriteHalf>>, line: &str) {
    if let Some(w) = writer.lock().await.as_mut() {
      let _ = w.write_all(format!("{}\n", line).as_bytes()).await;
    }
  }

  pub fn socket_path(&self) -> &Path {
    &self.socket_path
  }

  pub fn set_playlist_pos(&self, pos: i64) {
    self.state.lock().pos = pos;
  }

  pub fn set_time_pos(&self, seconds: f64) {
    self.state.lock().time_pos = seconds;
  }

  pub fn set_path_unavailable(&self, unavailable: bool) {
    self.state.lock().path_unavailable = unavailable;
  }

  /// Stop answering commands named `name` until `release_held_replies`.
  pub fn hold_replies_for(&self, name: &str) {
    self.state.lock().held_names.insert(name.to_string());
  }

  pub async fn release_held_replies(&self) {
    let replies = {
      let mut s = self.state.lock();
      s.held_names.clear();
      std::mem::take(&mut s.held_replies)
    };
    for reply in replies {
      Self::write_line(&self.writer, &reply.to_string()).await;
    }
  }

  /// Send an unsolicited event.
  pub async fn emit(&self, event: Value) {
    self.wait_for_connection().await;
    Self::write_line(&self.writer, &event.to_string()).await;
  }

  pub async fn send_raw(&self, line: &str) {
    self.wait_for_connection().await;
    Self::write_line(&self.writer, line).await;
  }

  /// Close the server side of the connection.
  pub async fn disconnect(&self) {
    self.wait_for_connection().await;
    if let Some(mut w) = self.writer.lock().await.take() {
      let _ = w.shutdown().await;
    }
  }

  async fn wait_for_connection(&self) {
    for _ in 0..200 {
      if self.writer.lock().await.is_some() {
        return;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("client never connected to fake mpv");
  }

  /// Every command received so far, as `[name, args...]`.
  pub fn commands(&self) -> Vec<Vec<Value>> {
    self.state.lock().commands.clone()
  }

  /// Received commands named `name`.
  pub fn commands_named(&self, name: &str) -> Vec<Vec<Value>> {
    self
      .commands()
      .into_iter()
      .filter(|c| c.first().and_then(Value::as_str) == Some(name))
      .collect()
  }

  pub fn clear_commands(&self) {
    self.state.lock().commands.clear();
  }

  /// Wait until a command named `name` has been received.
  pub async fn wait_for_command(&self, name: &str) -> Vec<Value> {
    for _ in 0..200 {
      if let Some(cmd) = self.commands_named(name).pop() {
        return cmd;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("fake mpv never received {}", name);
  }
}
