//! Raw-mode terminal input via crossterm.

use std::io::{self, Write};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tokio_util::sync::CancellationToken;

use crate::session::{Key, KeySource};

/// Longest command line accepted in command mode.
const MAX_LINE: usize = 4096;

/// How often command-mode input checks for shutdown.
const LINE_POLL: Duration = Duration::from_millis(100);

/// Puts the terminal in raw mode; restores it on drop.
pub struct RawModeGuard(());

impl RawModeGuard {
  pub fn enable() -> io::Result<Self> {
    terminal::enable_raw_mode()?;
    Ok(Self(()))
  }
}

impl Drop for RawModeGuard {
  fn drop(&mut self) {
    if let Err(e) = terminal::disable_raw_mode() {
      log::warn!("Failed to restore terminal mode: {}", e);
    }
  }
}

/// Raw mode does not translate `\n`; emit `\r\n` so lines start at column 0.
fn raw_newlines(text: &str) -> String {
  text.replace("\r\n", "\n").replace('\n', "\r\n")
}

/// Print multi-line text while the terminal is in raw mode.
pub fn print_block(text: &str) {
  let mut out = io::stdout().lock();
  let _ = out.write_all(raw_newlines(text).as_bytes());
  let _ = out.flush();
}

fn translate(key: KeyEvent) -> Option<Key> {
  if key.kind != KeyEventKind::Press {
    return None;
  }
  if key.modifiers.contains(KeyModifiers::CONTROL) {
    return match key.code {
      KeyCode::Char('c') => Some(Key::Quit),
      _ => None,
    };
  }
  match key.code {
    KeyCode::Esc => Some(Key::Quit),
    KeyCode::Left => Some(Key::Left),
    KeyCode::Right => Some(Key::Right),
    KeyCode::Up => Some(Key::Up),
    KeyCode::Down => Some(Key::Down),
    KeyCode::Enter => Some(Key::Enter),
    KeyCode::Char(' ') => Some(Key::Space),
    KeyCode::Char(c) => Some(Key::Char(c)),
    _ => None,
  }
}

/// Keys from the controlling terminal. Expects raw mode to be on.
///
/// Command-mode input gives up once `shutdown` is cancelled.
#[derive(Debug, Default)]
pub struct TerminalKeys {
  shutdown: CancellationToken,
}

impl TerminalKeys {
  pub fn new(shutdown: CancellationToken) -> Self {
    Self { shutdown }
  }
}

impl KeySource for TerminalKeys {
  fn poll_key(&mut self, timeout: Duration) -> io::Result<Option<Key>> {
    while event::poll(timeout)? {
      if let Event::Key(key) = event::read()? {
        if let Some(key) = translate(key) {
          return Ok(Some(key));
        }
      }
      if timeout.is_zero() {
        continue;
      }
      break;
    }
    Ok(None)
  }

  fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
    let mut out = io::stdout();
    write!(out, "\r\n{}", prompt)?;
    out.flush()?;

    let mut line = String::new();
    loop {
      if self.shutdown.is_cancelled() {
        write!(out, "\r\n")?;
        out.flush()?;
        return Ok(None);
      }
      if !event::poll(LINE_POLL)? {
        continue;
      }
      let Event::Key(key) = event::read()? else {
        continue;
      };
      if key.kind != KeyEventKind::Press {
        continue;
      }
      match key.code {
        KeyCode::Enter => {
          write!(out, "\r\n")?;
          out.flush()?;
          return Ok(Some(line));
        }
        KeyCode::Esc => {
          write!(out, "\r\n")?;
          out.flush()?;
          return Ok(None);
        }
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
          write!(out, "\r\n")?;
          out.flush()?;
          return Ok(None);
        }
        KeyCode::Backspace => {
          if line.pop().is_some() {
            write!(out, "\u{8} \u{8}")?;
          }
        }
        KeyCode::Char(c) if line.len() < MAX_LINE => {
          line.push(c);
          write!(out, "{}", c)?;
        }
        _ => continue,
      }
      out.flush()?;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossterm::event::KeyEventState;

  fn press(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
    KeyEvent {
      code,
      modifiers,
      kind: KeyEventKind::Press,
      state: KeyEventState::NONE,
    }
  }

  #[test]
  fn test_translate_keys() {
    assert_eq!(translate(press(KeyCode::Char(' '), KeyModifiers::NONE)), Some(Key::Space));
    assert_eq!(translate(press(KeyCode::Char('k'), KeyModifiers::NONE)), Some(Key::Char('k')));
    assert_eq!(translate(press(KeyCode::Esc, KeyModifiers::NONE)), Some(Key::Quit));
    assert_eq!(translate(press(KeyCode::Char('c'), KeyModifiers::CONTROL)), Some(Key::Quit));
    assert_eq!(translate(press(KeyCode::Char('x'), KeyModifiers::CONTROL)), None);
    assert_eq!(translate(press(KeyCode::F(1), KeyModifiers::NONE)), None);
  }

  #[test]
  fn test_releases_are_ignored() {
    let mut key = press(KeyCode::Char('q'), KeyModifiers::NONE);
    key.kind = KeyEventKind::Release;
    assert_eq!(translate(key), None);
  }

  #[test]
  fn test_read_line_gives_up_after_shutdown() {
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let mut keys = TerminalKeys::new(shutdown);
    assert_eq!(keys.read_line(":").unwrap(), None);
  }

  #[test]
  fn test_raw_newlines() {
    assert_eq!(raw_newlines("a\nb\r\nc"), "a\r\nb\r\nc");
  }
}
