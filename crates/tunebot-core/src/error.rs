//! Error types for Tunebot.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using Tunebot's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Tunebot.
#[derive(Error, Debug)]
pub enum Error {
    // Command errors
    #[error("{0}")]
    Validation(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Queue is full (max {max} songs)")]
    QueueFull { max: usize },

    #[error("Invalid queue position {index} (queue has {len} songs)")]
    InvalidIndex { index: usize, len: usize },

    // Resolution and fetch errors
    #[error("Failed to resolve track: {0}")]
    Resolution(String),

    #[error("No results found")]
    NoResults,

    #[error("Failed to download audio: {0}")]
    Fetch(String),

    // Playback errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    #[error("Voice transport error: {0}")]
    Transport(String),

    // Identity errors
    #[error("Identity lookup failed: {0}")]
    IdentityLookup(String),

    // Cache errors
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if this error means the track itself could not be played.
    ///
    /// The engine drops such a track and advances to the next one.
    pub const fn is_track_failure(&self) -> bool {
        matches!(
            self,
            Self::Resolution(_)
                | Self::NoResults
                | Self::Fetch(_)
                | Self::Decode(_)
                | Self::Transport(_)
                | Self::Timeout(_)
                | Self::Io(_)
        )
    }

    /// Returns true if this error is a user mistake that leaves state untouched.
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::PermissionDenied
                | Self::QueueFull { .. }
                | Self::InvalidIndex { .. }
        )
    }

    /// Text suitable for a chat reply.
    pub fn user_message(&self) -> String {
        match self {
            Self::Internal(_) | Self::Json(_) | Self::Cache(_) => {
                "Something went wrong, please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_track_failure() {
        assert!(Error::Fetch("test".into()).is_track_failure());
        assert!(Error::Transport("sink closed".into()).is_track_failure());
        assert!(!Error::QueueFull { max: 5 }.is_track_failure());
        assert!(!Error::Cancelled.is_track_failure());
    }

    #[test]
    fn test_error_display() {
        let err = Error::QueueFull { max: 50 };
        assert_eq!(err.to_string(), "Queue is full (max 50 songs)");
        assert!(err.is_user_error());
    }

    #[test]
    fn test_user_message_hides_internals() {
        let err = Error::Internal("mutex poisoned".into());
        assert!(!err.user_message().contains("mutex"));
        assert_eq!(Error::NoResults.user_message(), "No results found");
    }
}
