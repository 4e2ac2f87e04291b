//! Keys read from the terminal and what they do.

#[cfg(test)]
use std::collections::VecDeque;
use std::io;
use std::time::Duration;

/// A decoded keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
  Char(char),
  Left,
  Right,
  Up,
  Down,
  Space,
  Enter,
  /// Esc or Ctrl-C.
  Quit,
}

/// Source of keystrokes for the foreground loop.
pub trait KeySource {
  /// Wait up to `timeout` for a key. `Ok(None)` means none was ready.
  fn poll_key(&mut self, timeout: Duration) -> io::Result<Option<Key>>;

  /// Read a line for command mode after showing `prompt`. `Ok(None)` means cancelled.
  fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>>;
}

/// What a key asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyAction {
  TogglePause,
  /// Relative seek by the short step, signed.
  SeekShort(f64),
  /// Relative seek by the long step, signed.
  SeekLong(f64),
  Next,
  Prev,
  ToggleMute,
  Speed(f64),
  JumpPercent(u8),
  Help,
  CommandMode,
  Quit,
}

pub fn action_for(key: Key) -> Option<KeyAction> {
  let action = match key {
    Key::Quit => KeyAction::Quit,
    Key::Space => KeyAction::TogglePause,
    Key::Left => KeyAction::SeekShort(-1.0),
    Key::Right => KeyAction::SeekShort(1.0),
    Key::Up => KeyAction::SeekLong(1.0),
    Key::Down => KeyAction::SeekLong(-1.0),
    Key::Enter => KeyAction::Next,
    Key::Char(c) => match c {
      'q' => KeyAction::Quit,
      'j' | 'e' => KeyAction::Prev,
      'k' | 'r' => KeyAction::Next,
      'a' => KeyAction::SeekShort(-1.0),
      'd' => KeyAction::SeekShort(1.0),
      'w' => KeyAction::SeekLong(1.0),
      's' => KeyAction::SeekLong(-1.0),
      'm' => KeyAction::ToggleMute,
      '[' => KeyAction::Speed(-0.1),
      ']' => KeyAction::Speed(0.1),
      'h' | '?' => KeyAction::Help,
      ':' => KeyAction::CommandMode,
      '1'..='9' => KeyAction::JumpPercent((c as u8 - b'0') * 10),
      _ => return None,
    },
  };
  Some(action)
}

/// Replays a fixed list of keys and command lines; reports Quit once exhausted.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ScriptedKeys {
  keys: VecDeque<Key>,
  lines: VecDeque<Option<String>>,
}

#[cfg(test)]
impl ScriptedKeys {
  pub fn new(keys: impl IntoIterator<Item = Key>) -> Self {
    Self {
      keys: keys.into_iter().collect(),
      lines: VecDeque::new(),
    }
  }

  /// Queue a command-mode answer (`None` = cancelled).
  pub fn with_line(mut self, line: Option<&str>) -> Self {
    self.lines.push_back(line.map(str::to_string));
    self
  }
}

#[cfg(test)]
impl KeySource for ScriptedKeys {
  fn poll_key(&mut self, _timeout: Duration) -> io::Result<Option<Key>> {
    Ok(Some(self.keys.pop_front().unwrap_or(Key::Quit)))
  }

  fn read_line(&mut self, _prompt: &str) -> io::Result<Option<String>> {
    Ok(self.lines.pop_front().flatten())
  }
}
