//! Async IPC connection to MPV.
//!
//! One reader task owns the read side for the life of the connection. Replies are matched
//! to waiting callers by request ID; everything else carrying an `event` field goes to a
//! bounded event channel that drops new events when full.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::protocol::{MpvCommand, MpvEvent, MpvMessage, MpvRequest, MpvResponse};

/// Capacity of the event channel.
pub const EVENT_CAPACITY: usize = 128;

const DIAL_RETRY_INTERVAL: Duration = Duration::from_millis(50);
const DIAL_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("Timed out connecting to {path}: {reason}")]
  DialTimeout { path: String, reason: String },
  #[error("Command timeout")]
  DeadlineExceeded,
  #[error("MPV error: {0}")]
  MpvError(String),
  #[error("MPV IPC closed")]
  Closed,
  #[error("Unexpected reply: {0}")]
  Decode(String),
}

/// Pending request waiting for response.
type PendingRequest = oneshot::Sender<Result<MpvResponse, IpcError>>;

/// Request table shared between callers and the reader task.
struct IpcState {
  next_id: i64,
  pending: HashMap<i64, PendingRequest>,
}

/// Writer channel message.
enum WriteMessage {
  Command(Vec<u8>),
}

/// State shared with the background tasks.
struct Shared {
  state: Mutex<IpcState>,
  write_tx: Sender<WriteMessage>,
  closed: CancellationToken,
  close_started: AtomicBool,
}

impl Shared {
  fn close(&self) {
    if self.close_started.swap(true, Ordering::SeqCst) {
      return;
    }
    log::info!("Closing MPV IPC connection");
    // Cancel before draining so a concurrent registration either sees the token or is drained.
    self.closed.cancel();
    let pending: Vec<PendingRequest> = {
      let mut state = self.state.lock();
      state.pending.drain().map(|(_, tx)| tx).collect()
    };
    for tx in pending {
      let _ = tx.send(Err(IpcError::Closed));
    }
    self.write_tx.close();
  }
}

/// Time allowed for one connect attempt, never past the overall deadline.
fn attempt_budget(give_up: Instant) -> Duration {
  DIAL_ATTEMPT_TIMEOUT.min(give_up.saturating_duration_since(Instant::now()))
}

/// MPV IPC connection.
pub struct MpvIpc {
  shared: Arc<Shared>,
  event_rx: Receiver<MpvEvent>,
}

impl MpvIpc {
  /// Connect to the MPV socket/pipe, retrying at a fixed interval until `deadline` elapses.
  pub async fn dial(path: impl AsRef<Path>, deadline: Duration) -> Result<Self, IpcError> {
    let path = path.as_ref();
    let give_up = Instant::now() + deadline;
    let mut attempt: u32 = 0;

    loop {
      attempt += 1;
      let budget = attempt_budget(give_up);
      let last_error = match tokio::time::timeout(budget, Self::try_connect(path)).await {
        Ok(Ok(ipc)) => {
          log::info!("Connected to MPV IPC at {} (attempt {})", path.display(), attempt);
          return Ok(ipc);
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => "connect attempt timed out".to_string(),
      };
      log::debug!("IPC connect attempt {} failed: {}", attempt, last_error);

      if Instant::now() + DIAL_RETRY_INTERVAL >= give_up {
        return Err(IpcError::DialTimeout {
          path: path.display().to_string(),
          reason: last_error,
        });
      }
      tokio::time::sleep(DIAL_RETRY_INTERVAL).await;
    }
  }

  #[cfg(windows)]
  async fn try_connect(path: &Path) -> std::io::Result<Self> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let client = ClientOptions::new().open(path)?;
    let (reader, writer) = tokio::io::split(client);
    Ok(Self::setup(reader, writer))
  }

  #[cfg(not(windows))]
  async fn try_connect(path: &Path) -> std::io::Result<Self> {
    use tokio::net::UnixStream;

    let stream = UnixStream::connect(path).await?;
    let (reader, writer) = tokio::io::split(stream);
    Ok(Self::setup(reader, writer))
  }

  fn setup<R, W>(reader: R, writer: W) -> Self
  where
    R: tokio::io::AsyncRead + Send + Unpin + 'static,
    W: tokio::io::AsyncWrite + Send + Unpin + 'static,
  {
    let (event_tx, event_rx) = async_channel::bounded(EVENT_CAPACITY);
    let (write_tx, write_rx) = async_channel::unbounded::<WriteMessage>();

    let shared = Arc::new(Shared {
      state: Mutex::new(IpcState {
        next_id: 1,
        pending: HashMap::new(),
      }),
      write_tx,
      closed: CancellationToken::new(),
      close_started: AtomicBool::new(false),
    });

    let reader_shared = shared.clone();
    tokio::spawn(async move {
      Self::reader_loop(reader, &reader_shared, event_tx).await;
      // Any way out of the reader ends the connection.
      reader_shared.close();
    });

    let writer_shared = shared.clone();
    tokio::spawn(async move {
      Self::writer_loop(writer, write_rx, &writer_shared).await;
    });

    Self { shared, event_rx }
  }

  async fn reader_loop<R: tokio::io::AsyncRead + Unpin>(
    reader: R,
    shared: &Shared,
    event_tx: Sender<MpvEvent>,
  ) {
    log::debug!("MPV IPC reader loop started");
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
      line.clear();
      let read = tokio::select! {
        _ = shared.closed.cancelled() => break,
        read = buf_reader.read_line(&mut line) => read,
      };

      match read {
        Ok(0) => {
          log::info!("MPV IPC connection closed by peer");
          break;
        }
        Ok(_) => {
          let trimmed = line.trim();
          if trimmed.is_empty() {
            continue;
          }

          match MpvMessage::parse(trimmed) {
            Ok(MpvMessage::Response(response)) => {
              log::debug!("MPV reader: response for request_id={}", response.request_id);
              let waiter = shared.state.lock().pending.remove(&response.request_id);
              match waiter {
                Some(tx) => {
                  let _ = tx.send(Ok(response));
                }
                None => log::debug!("Dropping reply for unknown request_id={}", response.request_id),
              }
            }
            Ok(MpvMessage::Event(event)) => {
              log::debug!("MPV reader: event {}", event.event);
              match event_tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                  log::warn!("MPV event channel full, dropping {}", event.event);
                }
                Err(TrySendError::Closed(_)) => {}
              }
            }
            Ok(MpvMessage::Other) => log::debug!("Ignoring MPV message: {}", trimmed),
            Err(e) => {
              log::warn!("Failed to parse MPV message: {} - {}", e, trimmed);
            }
          }
        }
        Err(e) => {
          log::error!("MPV IPC read error: {}", e);
          break;
        }
      }
    }
    // event_tx drops here, which closes the event stream after the last event was pushed.
  }

  async fn writer_loop<W: tokio::io::AsyncWrite + Unpin>(
    mut writer: W,
    write_rx: Receiver<WriteMessage>,
    shared: &Shared,
  ) {
    log::debug!("MPV IPC writer loop started");

    while let Ok(WriteMessage::Command(mut data)) = write_rx.recv().await {
      data.push(b'\n');
      let written = async {
        writer.write_all(&data).await?;
        writer.flush().await
      };
      if let Err(e) = written.await {
        log::error!("MPV IPC write error: {}", e);
        shared.close();
        break;
      }
    }

    let _ = writer.shutdown().await;
    log::debug!("MPV IPC writer closed");
  }

  /// Send a command and wait up to `timeout` for its reply.
  ///
  /// Returns the reply's `data` on success.
  pub async fn send_command(
    &self,
    cmd: &MpvCommand,
    timeout: Duration,
  ) -> Result<Option<Value>, IpcError> {
    let shared = &self.shared;
    let (tx, rx) = oneshot::channel();

    let request_id = {
      let mut state = shared.state.lock();
      if shared.closed.is_cancelled() {
        return Err(IpcError::Closed);
      }
      let id = state.next_id;
      state.next_id += 1;
      state.pending.insert(id, tx);
      id
    };

    let request = MpvRequest {
      command: &cmd.args,
      request_id,
    };
    let json = match serde_json::to_vec(&request) {
      Ok(json) => json,
      Err(e) => {
        shared.state.lock().pending.remove(&request_id);
        return Err(IpcError::Decode(e.to_string()));
      }
    };
    log::debug!("Sending MPV command {} (request_id={})", cmd.name(), request_id);

    if shared.write_tx.send(WriteMessage::Command(json)).await.is_err() {
      shared.state.lock().pending.remove(&request_id);
      return Err(IpcError::Closed);
    }

    tokio::select! {
      result = rx => match result {
        Ok(Ok(response)) if response.is_success() => Ok(response.data),
        Ok(Ok(response)) => Err(IpcError::MpvError(response.error)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(IpcError::Closed),
      },
      _ = tokio::time::sleep(timeout) => {
        // A late reply finds no waiter and is dropped by the reader.
        shared.state.lock().pending.remove(&request_id);
        log::debug!("MPV command {} timed out (request_id={})", cmd.name(), request_id);
        Err(IpcError::DeadlineExceeded)
      }
      _ = shared.closed.cancelled() => {
        shared.state.lock().pending.remove(&request_id);
        Err(IpcError::Closed)
      }
    }
  }

  /// Get the event receiver for property changes and other events.
  pub fn events(&self) -> Receiver<MpvEvent> {
    self.event_rx.clone()
  }

  /// Number of requests still waiting for a reply.
  pub fn pending_count(&self) -> usize {
    self.shared.state.lock().pending.len()
  }

  pub fn is_closed(&self) -> bool {
    self.shared.closed.is_cancelled()
  }

  /// Resolves once the connection is closed, locally or by the peer.
  pub async fn closed(&self) {
    self.shared.closed.cancelled().await
  }

  /// Close the connection. Safe to call any number of times.
  pub fn close(&self) {
    self.shared.close();
  }
}

impl Drop for MpvIpc {
  fn drop(&mut self) {
    self.shared.close();
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::mpv::testing::FakeMpv;
  use serde_json::json;
  use tokio::io::AsyncWriteExt;
  use tokio::net::UnixListener;

  const TIMEOUT: Duration = Duration::from_secs(2);

  async fn connect(fake: &FakeMpv) -> MpvIpc {
    MpvIpc::dial(fake.socket_path(), Duration::from_secs(2)).await.unwrap()
  }

  #[tokio::test]
  async fn test_command_returns_reply_data() {
    let fake = FakeMpv::start(&["/v/a.mp4", "/v/b.mp4"]).await;
    fake.set_playlist_pos(1);
    let ipc = connect(&fake).await;

    let data = ipc
      .send_command(&MpvCommand::get_property("playlist-pos"), TIMEOUT)
      .await
      .unwrap();
    assert_eq!(data, Some(json!(1)));
    assert_eq!(ipc.pending_count(), 0);
  }

  #[tokio::test]
  async fn test_error_reply_maps_to_mpv_error() {
    let fake = FakeMpv::start(&["/v/a.mp4"]).await;
    let ipc = connect(&fake).await;

    let err = ipc
      .send_command(&MpvCommand::get_property("no-such-property"), TIMEOUT)
      .await
      .unwrap_err();
    assert!(matches!(err, IpcError::MpvError(ref msg) if msg == "property not found"));
  }

  #[tokio::test]
  async fn test_concurrent_commands_get_their_own_replies() {
    let fake = FakeMpv::start(&["/v/a.mp4", "/v/b.mp4", "/v/c.mp4"]).await;
    fake.set_playlist_pos(2);
    fake.set_time_pos(42.5);
    let ipc = connect(&fake).await;

    let pos_cmd = MpvCommand::get_property("playlist-pos");
    let time_cmd = MpvCommand::get_property("time-pos");
    let path_cmd = MpvCommand::get_property("path");
    let (pos, time, path) = tokio::join!(
      ipc.send_command(&pos_cmd, TIMEOUT),
      ipc.send_command(&time_cmd, TIMEOUT),
      ipc.send_command(&path_cmd, TIMEOUT),
    );
    assert_eq!(pos.unwrap(), Some(json!(2)));
    assert_eq!(time.unwrap(), Some(json!(42.5)));
    assert_eq!(path.unwrap(), Some(json!("/v/c.mp4")));
  }

  #[tokio::test]
  async fn test_out_of_order_replies_are_correlated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mpv.sock");
    let listener = UnixListener::bind(&path).unwrap();

    // Read two requests, answer the second one first.
    tokio::spawn(async move {
      let (stream, _) = listener.accept().await.unwrap();
      let (read, mut write) = stream.into_split();
      let mut lines = BufReader::new(read).lines();
      let mut ids = Vec::new();
      for _ in 0..2 {
        let line = lines.next_line().await.unwrap().unwrap();
        let req: Value = serde_json::from_str(&line).unwrap();
        ids.push(req["request_id"].as_i64().unwrap());
      }
      for id in ids.iter().rev() {
        let reply = json!({"request_id": id, "error": "success", "data": id * 100});
        write.write_all(format!("{}\n", reply).as_bytes()).await.unwrap();
      }
      // Keep the connection open until the client is done.
      let _ = lines.next_line().await;
    });

    let ipc = MpvIpc::dial(&path, Duration::from_secs(2)).await.unwrap();
    let first = MpvCommand::get_property("a");
    let second = MpvCommand::get_property("b");
    let (a, b) = tokio::join!(ipc.send_command(&first, TIMEOUT), async {
      // Make sure "a" is written first so it takes request_id 1.
      tokio::time::sleep(Duration::from_millis(20)).await;
      ipc.send_command(&second, TIMEOUT).await
    });
    assert_eq!(a.unwrap(), Some(json!(100)));
    assert_eq!(b.unwrap(), Some(json!(200)));
  }

  #[tokio::test]
  async fn test_deadline_exceeded_and_late_reply_is_dropped() {
    let fake = FakeMpv::start(&["/v/a.mp4"]).await;
    fake.hold_replies_for("get_property");
    let ipc = connect(&fake).await;

    let err = ipc
      .send_command(&MpvCommand::get_property("time-pos"), Duration::from_millis(100))
      .await
      .unwrap_err();
    assert!(matches!(err, IpcError::DeadlineExceeded));
    assert_eq!(ipc.pending_count(), 0);

    // The held reply arrives after its waiter gave up; later commands are unaffected.
    fake.release_held_replies().await;
    let data = ipc
      .send_command(&MpvCommand::cycle("pause"), TIMEOUT)
      .await
      .unwrap();
    assert_eq!(data, None);
    assert!(!ipc.is_closed());
  }

  #[tokio::test]
  async fn test_close_is_idempotent_and_rejects_new_commands() {
    let fake = FakeMpv::start(&["/v/a.mp4"]).await;
    let ipc = connect(&fake).await;

    ipc.close();
    ipc.close();
    assert!(ipc.is_closed());

    let err = ipc
      .send_command(&MpvCommand::cycle("pause"), TIMEOUT)
      .await
      .unwrap_err();
    assert!(matches!(err, IpcError::Closed));
    ipc.close();
  }

  #[tokio::test]
  async fn test_close_unblocks_pending_waiters() {
    let fake = FakeMpv::start(&["/v/a.mp4"]).await;
    fake.hold_replies_for("get_property");
    let ipc = Arc::new(connect(&fake).await);

    let waiter = {
      let ipc = ipc.clone();
      tokio::spawn(async move {
        ipc
          .send_command(&MpvCommand::get_property("path"), Duration::from_secs(10))
          .await
      })
    };
    fake.wait_for_command("get_property").await;

    let closers: Vec<_> = (0..4)
      .map(|_| {
        let ipc = ipc.clone();
        tokio::spawn(async move { ipc.close() })
      })
      .collect();
    for closer in closers {
      closer.await.unwrap();
    }

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
      .await
      .expect("waiter should be released by close")
      .unwrap();
    assert!(matches!(result, Err(IpcError::Closed)));
    assert_eq!(ipc.pending_count(), 0);
  }

  #[tokio::test]
  async fn test_full_event_channel_does_not_stall_commands() {
    let fake = FakeMpv::start(&["/v/a.mp4"]).await;
    let ipc = connect(&fake).await;

    for i in 0..(EVENT_CAPACITY * 3) {
      fake.emit(json!({"event": "property-change", "name": "time-pos", "data": i})).await;
    }
    let data = ipc
      .send_command(&MpvCommand::get_property("playlist-pos"), TIMEOUT)
      .await
      .unwrap();
    assert_eq!(data, Some(json!(0)));

    let events = ipc.events();
    assert_eq!(events.len(), EVENT_CAPACITY);
    // Oldest events are kept, newest dropped.
    let first = events.recv().await.unwrap();
    assert_eq!(first.data, Some(json!(0)));
  }

  #[tokio::test]
  async fn test_malformed_lines_are_skipped() {
    let fake = FakeMpv::start(&["/v/a.mp4"]).await;
    let ipc = connect(&fake).await;
    let events = ipc.events();

    fake.send_raw("this is not json").await;
    fake.send_raw(r#"{"request_id":"bogus"}"#).await;
    fake.emit(json!({"event": "file-loaded"})).await;

    let event = tokio::time::timeout(TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event.event, "file-loaded");
    assert!(!ipc.is_closed());
  }

  #[tokio::test]
  async fn test_peer_close_closes_transport_and_event_stream() {
    let fake = FakeMpv::start(&["/v/a.mp4"]).await;
    let ipc = connect(&fake).await;
    let events = ipc.events();

    fake.emit(json!({"event": "end-file", "reason": "quit"})).await;
    fake.disconnect().await;

    tokio::time::timeout(TIMEOUT, ipc.closed()).await.unwrap();
    // Events pushed before the close are still drained, then the stream ends.
    let event = events.recv().await.unwrap();
    assert_eq!(event.event, "end-file");
    assert!(events.recv().await.is_err());

    let err = ipc
      .send_command(&MpvCommand::quit(), TIMEOUT)
      .await
      .unwrap_err();
    assert!(matches!(err, IpcError::Closed));
  }

  #[tokio::test]
  async fn test_dial_times_out_without_listener() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.sock");

    let started = Instant::now();
    let err = MpvIpc::dial(&path, Duration::from_millis(200)).await.err().unwrap();
    assert!(matches!(err, IpcError::DialTimeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
  }

  #[tokio::test]
  async fn test_connect_attempt_is_capped_by_deadline() {
    let now = Instant::now();
    assert_eq!(attempt_budget(now + Duration::from_secs(10)), DIAL_ATTEMPT_TIMEOUT);
    assert!(attempt_budget(now + Duration::from_millis(100)) <= Duration::from_millis(100));
    assert_eq!(attempt_budget(now - Duration::from_millis(1)), Duration::ZERO);
  }

  #[tokio::test]
  async fn test_dial_retries_until_socket_appears() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("late.sock");

    let bind_path = path.clone();
    let server = tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(150)).await;
      let listener = UnixListener::bind(&bind_path).unwrap();
      let (stream, _) = listener.accept().await.unwrap();
      stream
    });

    let ipc = MpvIpc::dial(&path, Duration::from_secs(2)).await.unwrap();
    let _stream = server.await.unwrap();
    assert!(!ipc.is_closed());
  }
}
