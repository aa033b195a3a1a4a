//! Chat command parsing.

use tunebot_core::{Error, Result};

/// A parsed chat command with validated arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Link, video ID or search query.
    Play(String),
    Skip,
    Queue,
    Search(String),
    Pause,
    Resume,
    Stop,
    Current,
    /// 0-based index into the pending queue.
    Remove(usize),
    Clear,
    /// `None` asks for the current volume.
    Volume(Option<u8>),
    Help,
}

impl Command {
    /// Parse a chat message.
    ///
    /// Returns `None` when the message lacks `prefix` or names an unknown
    /// command; such messages are ignored. Returns `Some(Err(_))` with a
    /// ready-to-send validation message when the arguments are unusable.
    pub fn parse(message: &str, prefix: &str) -> Option<Result<Self>> {
        let rest = message.trim().strip_prefix(prefix)?;
        let mut words = rest.split_whitespace();
        let name = words.next()?.to_lowercase();
        let args: Vec<&str> = words.collect();

        let command = match name.as_str() {
            "play" => Self::query(&args, || {
                format!("Usage: {prefix}play <YouTube URL or search query>")
            })
            .map(Self::Play),
            "search" => Self::query(&args, || format!("Usage: {prefix}search <query>")).map(Self::Search),
            "skip" => Ok(Self::Skip),
            "queue" => Ok(Self::Queue),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "stop" => Ok(Self::Stop),
            "current" => Ok(Self::Current),
            "remove" => Self::position(&args, prefix).map(Self::Remove),
            "clear" => Ok(Self::Clear),
            "volume" => Self::volume(&args).map(Self::Volume),
            "help" => Ok(Self::Help),
            _ => return None,
        };
        Some(command)
    }

    fn query(args: &[&str], usage: impl FnOnce() -> String) -> Result<String> {
        if args.is_empty() {
            return Err(Error::Validation(usage()));
        }
        Ok(args.join(" "))
    }

    /// 1-based position from the user, 0-based index out.
    fn position(args: &[&str], prefix: &str) -> Result<usize> {
        let Some(raw) = args.first() else {
            return Err(Error::Validation(format!(
                "Usage: {prefix}remove <queue position>"
            )));
        };
        match raw.parse::<usize>() {
            Ok(position) if position >= 1 => Ok(position - 1),
            _ => Err(Error::Validation("Invalid queue position.".into())),
        }
    }

    fn volume(args: &[&str]) -> Result<Option<u8>> {
        let Some(raw) = args.first() else {
            return Ok(None);
        };
        match raw.parse::<i64>() {
            Ok(volume @ 0..=100) => Ok(Some(volume as u8)),
            _ => Err(Error::Validation("Volume must be between 0 and 100.".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;

    fn parse(message: &str) -> Option<Result<Command>> {
        Command::parse(message, "!")
    }

    fn validation_message(message: &str) -> String {
        match parse(message) {
            Some(Err(Error::Validation(text))) => text,
            other => panic!("expected validation error for {message:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_non_commands_are_ignored() {
        assert!(parse("hello").is_none());
        assert!(parse("!").is_none());
        assert!(parse("!dance").is_none());
        assert!(Command::parse("!play x", "?").is_none());
    }

    #[test]
    fn test_names_are_case_insensitive() {
        assert_eq!(parse("!SKIP").unwrap().unwrap(), Command::Skip);
        assert_eq!(parse("  !Queue  ").unwrap().unwrap(), Command::Queue);
    }

    #[test]
    fn test_play_joins_query() {
        assert_eq!(
            parse("!play  never   gonna give").unwrap().unwrap(),
            Command::Play("never gonna give".into())
        );
        assert_eq!(
            validation_message("!play"),
            "Usage: !play <YouTube URL or search query>"
        );
        assert_eq!(validation_message("!search"), "Usage: !search <query>");
    }

    #[test]
    fn test_remove_positions() {
        assert_eq!(parse("!remove 1").unwrap().unwrap(), Command::Remove(0));
        assert_eq!(parse("!remove 12").unwrap().unwrap(), Command::Remove(11));
        assert_eq!(validation_message("!remove"), "Usage: !remove <queue position>");
        assert_eq!(validation_message("!remove 0"), "Invalid queue position.");
        assert_eq!(validation_message("!remove -3"), "Invalid queue position.");
        assert_eq!(validation_message("!remove two"), "Invalid queue position.");
    }

    #[test]
    fn test_volume_bounds() {
        assert_eq!(parse("!volume").unwrap().unwrap(), Command::Volume(None));
        assert_eq!(parse("!volume 0").unwrap().unwrap(), Command::Volume(Some(0)));
        assert_eq!(parse("!volume 100").unwrap().unwrap(), Command::Volume(Some(100)));
        for bad in ["!volume 101", "!volume -1", "!volume loud"] {
            assert_eq!(validation_message(bad), "Volume must be between 0 and 100.");
        }
    }

    #[test]
    fn test_custom_prefix_in_usage() {
        match Command::parse("?remove", "?") {
            Some(Err(Error::Validation(text))) => {
                assert_eq!(text, "Usage: ?remove <queue position>");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
