//! High-level MPV client with typed property access and command helpers.

use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::ipc::{IpcError, MpvIpc};
use super::protocol::{MpvCommand, MpvEvent};

/// Cheaply cloneable handle to one MPV IPC connection.
#[derive(Clone)]
pub struct MpvClient {
  ipc: Arc<MpvIpc>,
}

impl MpvClient {
  pub fn new(ipc: MpvIpc) -> Self {
    Self { ipc: Arc::new(ipc) }
  }

  /// Send a command and return the reply data.
  pub async fn command_data(
    &self,
    cmd: MpvCommand,
    timeout: Duration,
  ) -> Result<Option<Value>, IpcError> {
    self.ipc.send_command(&cmd, timeout).await
  }

  /// Send a command, discarding the reply data.
  pub async fn command(&self, cmd: MpvCommand, timeout: Duration) -> Result<(), IpcError> {
    self.ipc.send_command(&cmd, timeout).await.map(|_| ())
  }

  async fn get_typed<T: DeserializeOwned>(&self, name: &str, timeout: Duration) -> Result<T, IpcError> {
    let data = self
      .command_data(MpvCommand::get_property(name), timeout)
      .await?
      .unwrap_or(Value::Null);
    serde_json::from_value(data.clone())
      .map_err(|e| IpcError::Decode(format!("{}: {} ({})", name, e, data)))
  }

  /// Get a numeric property.
  pub async fn get_float(&self, name: &str, timeout: Duration) -> Result<f64, IpcError> {
    self.get_typed(name, timeout).await
  }

  /// Get an integer property.
  pub async fn get_int(&self, name: &str, timeout: Duration) -> Result<i64, IpcError> {
    self.get_typed(name, timeout).await
  }

  /// Get a boolean property.
  pub async fn get_bool(&self, name: &str, timeout: Duration) -> Result<bool, IpcError> {
    self.get_typed(name, timeout).await
  }

  /// Get a string property.
  pub async fn get_string(&self, name: &str, timeout: Duration) -> Result<String, IpcError> {
    self.get_typed(name, timeout).await
  }

  /// Set a property.
  pub async fn set_property(
    &self,
    name: &str,
    value: impl Into<Value>,
    timeout: Duration,
  ) -> Result<(), IpcError> {
    self.command(MpvCommand::set_property(name, value), timeout).await
  }

  /// Observe a property for changes.
  /// Changes arrive on `events()` with event="property-change".
  pub async fn observe_property(&self, observer_id: i64, property: &str, timeout: Duration) -> Result<(), IpcError> {
    self
      .command(MpvCommand::observe_property(observer_id, property), timeout)
      .await
  }

  /// Get event receiver for property changes and other events.
  pub fn events(&self) -> Receiver<MpvEvent> {
    self.ipc.events()
  }

  pub fn is_closed(&self) -> bool {
    self.ipc.is_closed()
  }

  /// Resolves once the connection is closed.
  pub async fn closed(&self) {
    self.ipc.closed().await
  }

  pub fn close(&self) {
    self.ipc.close();
  }
}
