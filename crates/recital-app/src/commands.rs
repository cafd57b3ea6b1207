//! Line commands typed at the prompt.

use recital_core::{Phase, SessionSnapshot};

/// One parsed prompt command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    TogglePlayPause,
    Next,
    Prev,
    /// Zero-based chunk index.
    Seek(usize),
    Voice(String),
    Reread,
    Edit,
    Status,
    ListVoices,
    Help,
    Quit,
}

pub const HELP: &str = "\
  p        play / pause
  n        next chunk
  b        previous chunk
  g N      go to chunk N (1-based)
  v NAME   change voice
  r        read the same text again
  e        enter new text
  s        status
  l        list voices
  q        quit";

impl Command {
    /// Parse a prompt line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        let Some((head, rest)) = split_head(line) else {
            return Ok(None);
        };

        let command = match head {
            "p" | "play" | "pause" => Self::TogglePlayPause,
            "n" | "next" => Self::Next,
            "b" | "back" | "prev" => Self::Prev,
            "g" | "go" => {
                let n: usize = rest
                    .parse()
                    .map_err(|_| format!("expected a chunk number, got {rest:?}"))?;
                if n == 0 {
                    return Err("chunks are numbered from 1".to_string());
                }
                Self::Seek(n - 1)
            }
            "v" | "voice" => {
                if rest.is_empty() {
                    return Err("expected a voice name".to_string());
                }
                Self::Voice(rest.to_string())
            }
            "r" | "reread" => Self::Reread,
            "e" | "edit" => Self::Edit,
            "s" | "status" => Self::Status,
            "l" | "voices" => Self::ListVoices,
            "h" | "?" | "help" => Self::Help,
            "q" | "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command {other:?}, try 'h'")),
        };
        Ok(Some(command))
    }
}

fn split_head(line: &str) -> Option<(&str, &str)> {
    if line.is_empty() {
        return None;
    }
    Some(match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    })
}

/// One-line rendering of a snapshot.
pub fn describe(snapshot: &SessionSnapshot) -> String {
    let position = match snapshot.active_index {
        Some(i) => format!("chunk {}/{}", i + 1, snapshot.chunk_count),
        None => "no text".to_string(),
    };
    let phase = match snapshot.phase {
        Phase::Idle => "editing",
        Phase::Ready => "ready",
        Phase::Loading => "loading",
        Phase::Sounding => "playing",
        Phase::Error => "error",
    };
    match &snapshot.last_error {
        Some(err) => format!("[{phase}] {position}: {err}"),
        None => format!("[{phase}] {position}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use recital_core::{ErrorInfo, ErrorKind, Mode};

    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(Command::parse("p").unwrap(), Some(Command::TogglePlayPause));
        assert_eq!(Command::parse("  next ").unwrap(), Some(Command::Next));
        assert_eq!(Command::parse("b").unwrap(), Some(Command::Prev));
        assert_eq!(Command::parse("q").unwrap(), Some(Command::Quit));
        assert_eq!(Command::parse("").unwrap(), None);
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(Command::parse("g 3").unwrap(), Some(Command::Seek(2)));
        assert_eq!(
            Command::parse("v  Puck").unwrap(),
            Some(Command::Voice("Puck".into()))
        );
        assert!(Command::parse("g 0").is_err());
        assert!(Command::parse("g x").is_err());
        assert!(Command::parse("v").is_err());
        assert!(Command::parse("zz").is_err());
    }

    #[test]
    fn test_describe() {
        let mut snapshot = SessionSnapshot::default();
        assert_eq!(describe(&snapshot), "[editing] no text");

        snapshot.mode = Mode::Reading;
        snapshot.phase = Phase::Error;
        snapshot.active_index = Some(1);
        snapshot.chunk_count = 4;
        snapshot.last_error = Some(ErrorInfo {
            kind: ErrorKind::Synthesis,
            message: "quota".into(),
        });
        let line = describe(&snapshot);
        assert!(line.starts_with("[error] chunk 2/4: "));
        assert!(line.contains("quota"));
    }
}
