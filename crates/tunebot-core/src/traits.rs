//! Seams to the external collaborators: chat transport, media resolution,
//! decoding, voice output and identity lookup.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::permission::Invoker;
use crate::types::{Frame, TrackInfo};

/// Turns free text or a link into tracks and fetches their encoded audio.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Resolve a URL, ID or search query to a single track.
    async fn resolve(&self, input: &str) -> Result<TrackInfo>;

    /// Return up to `limit` candidates for a query without resolving them fully.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackInfo>>;

    /// Make the encoded audio for a track available on local storage.
    ///
    /// Implementations cache by `source_id`, so repeated fetches are cheap.
    async fn fetch(&self, track: &TrackInfo) -> Result<PathBuf>;
}

/// Starts a streaming decode of an encoded file into PCM frames.
#[async_trait]
pub trait DecodePort: Send + Sync {
    async fn start(&self, source: &Path) -> Result<Box<dyn FrameStream>>;
}

/// A running decode pipeline.
#[async_trait]
pub trait FrameStream: Send {
    /// Next frame, `Ok(None)` at natural end of stream.
    async fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Terminate the pipeline and release its resources. Must return promptly.
    async fn cancel(&mut self);
}

/// Accepts the outgoing frame stream. No backpressure beyond the await.
#[async_trait]
pub trait VoiceSink: Send + Sync {
    async fn send_frame(&self, frame: &Frame) -> Result<()>;
}

/// Looks up server group membership for an invoker.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn groups(&self, invoker: &Invoker) -> Result<Vec<u32>>;
}

/// Delivers text replies back to the chat.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, to: &Invoker, text: &str) -> Result<()>;
}
