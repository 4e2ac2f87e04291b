//! Command-mode language: `:ls`, `:open 3`, `:seek +30`, `:jump 50%`, ...

use thiserror::Error;

/// Where `jump` goes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JumpTarget {
  /// Percent of the duration, clamped to [0, 100].
  Percent(f64),
  Seconds(f64),
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandLine {
  Empty,
  Help,
  Quit,
  Next,
  Prev,
  List,
  /// 0-based playlist index (input is 1-based).
  OpenIndex(i64),
  OpenMatch(String),
  Seek(f64),
  Jump(JumpTarget),
}

/// Input rejected before anything is sent to MPV. The message is shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CommandParseError(pub String);

fn reject(msg: &str) -> Result<CommandLine, CommandParseError> {
  Err(CommandParseError(msg.to_string()))
}

/// Split on unquoted spaces/tabs. Single or double quotes group their content.
pub fn split_command(line: &str) -> Vec<String> {
  let mut out = Vec::new();
  let mut cur = String::new();
  let mut quote: Option<char> = None;

  for c in line.chars() {
    match quote {
      Some(q) if c == q => quote = None,
      Some(_) => cur.push(c),
      None if c == '"' || c == '\'' => quote = Some(c),
      None if c == ' ' || c == '\t' => {
        if !cur.is_empty() {
          out.push(std::mem::take(&mut cur));
        }
      }
      None => cur.push(c),
    }
  }
  if !cur.is_empty() {
    out.push(cur);
  }
  out
}

/// Parse a finite number. Rejects `inf`/`nan` spellings.
fn parse_number(s: &str) -> Option<f64> {
  s.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_command(line: &str) -> Result<CommandLine, CommandParseError> {
  let fields = split_command(line.trim());
  let Some((cmd, args)) = fields.split_first() else {
    return Ok(CommandLine::Empty);
  };

  match cmd.to_lowercase().as_str() {
    "h" | "help" | "?" => Ok(CommandLine::Help),
    "q" | "quit" | "exit" => Ok(CommandLine::Quit),
    "n" | "next" => Ok(CommandLine::Next),
    "p" | "prev" => Ok(CommandLine::Prev),
    "ls" | "list" => Ok(CommandLine::List),
    "open" | "o" => {
      if args.is_empty() {
        return reject("open: need index or substring");
      }
      let target = args.join(" ");
      match target.parse::<i64>() {
        Ok(n) => match n.checked_sub(1) {
          Some(index) => Ok(CommandLine::OpenIndex(index)),
          None => reject("open: index out of range"),
        },
        Err(_) => Ok(CommandLine::OpenMatch(target)),
      }
    }
    "seek" => {
      let [arg] = args else {
        return reject("seek: usage seek +10 | -10");
      };
      match parse_number(arg) {
        Some(sec) => Ok(CommandLine::Seek(sec)),
        None => reject("seek: invalid seconds"),
      }
    }
    "jump" => {
      let [arg] = args else {
        return reject("jump: usage jump 50% | 120");
      };
      if let Some(pct) = arg.strip_suffix('%') {
        return match parse_number(pct) {
          Some(pct) => Ok(CommandLine::Jump(JumpTarget::Percent(pct.clamp(0.0, 100.0)))),
          None => reject("jump: invalid percent"),
        };
      }
      match parse_number(arg) {
        Some(sec) => Ok(CommandLine::Jump(JumpTarget::Seconds(sec))),
        None => reject("jump: invalid seconds"),
      }
    }
    _ => reject("unknown command (try :help)"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_split_respects_quotes() {
    assert_eq!(split_command("open 'my file'"), vec!["open", "my file"]);
    assert_eq!(split_command("  open\t\"a  b\"c  "), vec!["open", "a  bc"]);
    assert_eq!(split_command("o \"it's\""), vec!["o", "it's"]);
    assert!(split_command("   ").is_empty());
  }

  #[test]
  fn test_seek_accepts_signed_numbers() {
    assert_eq!(parse_command("seek +30"), Ok(CommandLine::Seek(30.0)));
    assert_eq!(parse_command("seek -2.5"), Ok(CommandLine::Seek(-2.5)));
  }

  #[test]
  fn test_seek_rejects_malformed_input() {
    assert!(parse_command("seek").is_err());
    assert!(parse_command("seek 1 2").is_err());
    assert!(parse_command("seek abc").is_err());
    assert!(parse_command("seek inf").is_err());
  }

  #[test]
  fn test_jump_clamps_percent() {
    assert_eq!(parse_command("jump 150%"), Ok(CommandLine::Jump(JumpTarget::Percent(100.0))));
    assert_eq!(parse_command("jump -5%"), Ok(CommandLine::Jump(JumpTarget::Percent(0.0))));
    assert_eq!(parse_command("jump 50%"), Ok(CommandLine::Jump(JumpTarget::Percent(50.0))));
    assert_eq!(parse_command("jump 120"), Ok(CommandLine::Jump(JumpTarget::Seconds(120.0))));
    assert!(parse_command("jump x%").is_err());
    assert!(parse_command("jump %").is_err());
  }

  #[test]
  fn test_open_is_one_based_or_substring() {
    assert_eq!(parse_command("open 2"), Ok(CommandLine::OpenIndex(1)));
    assert_eq!(parse_command("o 0"), Ok(CommandLine::OpenIndex(-1)));
    assert_eq!(parse_command("open abc"), Ok(CommandLine::OpenMatch("abc".into())));
    assert_eq!(parse_command("open part 2"), Ok(CommandLine::OpenMatch("part 2".into())));
    assert!(parse_command("open").is_err());
  }

  #[test]
  fn test_aliases_and_unknown() {
    assert_eq!(parse_command("LS"), Ok(CommandLine::List));
    assert_eq!(parse_command("exit"), Ok(CommandLine::Quit));
    assert_eq!(parse_command("n"), Ok(CommandLine::Next));
    assert_eq!(parse_command("?"), Ok(CommandLine::Help));
    assert_eq!(parse_command(""), Ok(CommandLine::Empty));
    assert_eq!(
      parse_command("frobnicate"),
      Err(CommandParseError("unknown command (try :help)".into()))
    );
  }

  #[test]
  fn test_open_rejects_index_below_range() {
    assert_eq!(
      parse_command("open -9223372036854775808"),
      Err(CommandParseError("open: index out of range".into()))
    );
    assert_eq!(parse_command("open -9223372036854775807"), Ok(CommandLine::OpenIndex(i64::MIN)));
  }

  #[test]
  fn test_parse_error_displays_message() {
    let err = parse_command("seek").unwrap_err();
    assert_eq!(err.to_string(), "seek: usage seek +10 | -10");
  }
}
