//! Track types: the resolver's descriptor and the queued, attributed track.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Duration;

/// Playable media item as returned by a resolver, before anyone requested it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackInfo {
    /// Stable key used for caching and de-duplication (e.g. a video ID).
    pub source_id: String,
    /// Track title.
    pub title: String,
    /// Track duration.
    pub duration: Duration,
    /// Opaque locator the resolver uses to fetch encoded bytes.
    pub source_ref: String,
    /// Uploader or channel name, if known.
    pub author: Option<String>,
}

impl TrackInfo {
    pub fn new(source_id: impl Into<String>, title: impl Into<String>) -> Self {
        let source_id = source_id.into();
        Self {
            source_ref: source_id.clone(),
            source_id,
            title: title.into(),
            duration: Duration::default(),
            author: None,
        }
    }

    #[must_use]
    pub const fn with_duration(mut self, seconds: u64) -> Self {
        self.duration = Duration::from_seconds(seconds);
        self
    }

    #[must_use]
    pub fn with_source_ref(mut self, source_ref: impl Into<String>) -> Self {
        self.source_ref = source_ref.into();
        self
    }

    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Display name of the author, or `Unknown`.
    pub fn author_display(&self) -> &str {
        self.author.as_deref().unwrap_or("Unknown")
    }
}

/// A track someone asked for. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Track {
    info: TrackInfo,
    requested_by: String,
    added_at: DateTime<Utc>,
}

impl Track {
    /// Attribute a resolved track to its requester, stamped with the current time.
    pub fn from_info(info: TrackInfo, requested_by: impl Into<String>) -> Self {
        Self {
            info,
            requested_by: requested_by.into(),
            added_at: Utc::now(),
        }
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    pub fn source_id(&self) -> &str {
        &self.info.source_id
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }

    pub const fn duration(&self) -> Duration {
        self.info.duration
    }

    pub fn source_ref(&self) -> &str {
        &self.info.source_ref
    }

    pub fn requested_by(&self) -> &str {
        &self.requested_by
    }

    pub const fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }

    /// `Title [m:ss]`, the form used in chat replies.
    pub fn display_line(&self) -> String {
        format!("{} [{}]", self.info.title, self.info.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_creation() {
        let info = TrackInfo::new("dQw4w9WgXcQ", "Test Song").with_duration(213);
        let track = Track::from_info(info, "alice");
        assert_eq!(track.source_id(), "dQw4w9WgXcQ");
        assert_eq!(track.source_ref(), "dQw4w9WgXcQ");
        assert_eq!(track.requested_by(), "alice");
        assert_eq!(track.display_line(), "Test Song [3:33]");
    }

    #[test]
    fn test_author_display() {
        let info = TrackInfo::new("id", "Title");
        assert_eq!(info.author_display(), "Unknown");
        assert_eq!(info.with_author("Artist").author_display(), "Artist");
    }
}
