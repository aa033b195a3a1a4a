//! In-memory doubles of the external collaborators, for tests.

#![allow(clippy::unwrap_used, clippy::missing_const_for_fn)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::permission::Invoker;
use crate::traits::{ChatTransport, DecodePort, FrameStream, IdentityLookup, MediaResolver, VoiceSink};
use crate::types::{Frame, TrackInfo, FRAME_SAMPLES};

/// Sample value every fake frame is filled with.
pub const FAKE_SAMPLE: i16 = 1000;

/// Group memberships keyed by UID.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentities {
    groups: HashMap<String, Vec<u32>>,
    failing: bool,
}

impl StaticIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_groups(mut self, uid: &str, groups: impl IntoIterator<Item = u32>) -> Self {
        self.groups.insert(uid.to_string(), groups.into_iter().collect());
        self
    }

    /// Make every lookup fail.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }
}

#[async_trait]
impl IdentityLookup for StaticIdentities {
    async fn groups(&self, invoker: &Invoker) -> Result<Vec<u32>> {
        if self.failing {
            return Err(Error::IdentityLookup("lookup unavailable".into()));
        }
        Ok(self.groups.get(&invoker.uid).cloned().unwrap_or_default())
    }
}

/// Resolves any input `x` to a 60 second track with source id `x`.
#[derive(Default)]
pub struct FakeResolver {
    unresolvable: Mutex<HashSet<String>>,
    failing_fetch: Mutex<HashSet<String>>,
    search_results: Mutex<Vec<TrackInfo>>,
    fetched: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
    slow_fetch: Mutex<HashMap<String, Duration>>,
    resolve_delay: Option<Duration>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every resolve, to widen race windows.
    #[must_use]
    pub fn with_resolve_delay(mut self, delay: Duration) -> Self {
        self.resolve_delay = Some(delay);
        self
    }

    pub fn fail_resolve(&self, input: &str) {
        self.unresolvable.lock().insert(input.to_string());
    }

    pub fn fail_fetch(&self, source_id: &str) {
        self.failing_fetch.lock().insert(source_id.to_string());
    }

    /// Hold `fetch` of `source_id` for `delay` before it returns.
    pub fn slow_fetch(&self, source_id: &str, delay: Duration) {
        self.slow_fetch.lock().insert(source_id.to_string(), delay);
    }

    pub fn set_search_results(&self, results: Vec<TrackInfo>) {
        *self.search_results.lock() = results;
    }

    /// Source IDs passed to `fetch`, in call order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }

    /// Source IDs whose `fetch` ran to completion.
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }

    pub fn info_for(input: &str) -> TrackInfo {
        TrackInfo::new(input, format!("Song {input}"))
            .with_duration(60)
            .with_source_ref(format!("https://example.com/{input}"))
    }
}

#[async_trait]
impl MediaResolver for FakeResolver {
    async fn resolve(&self, input: &str) -> Result<TrackInfo> {
        if let Some(delay) = self.resolve_delay {
            tokio::time::sleep(delay).await;
        }
        if self.unresolvable.lock().contains(input) {
            return Err(Error::NoResults);
        }
        Ok(Self::info_for(input))
    }

    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<TrackInfo>> {
        Ok(self.search_results.lock().iter().take(limit).cloned().collect())
    }

    async fn fetch(&self, track: &TrackInfo) -> Result<PathBuf> {
        self.fetched.lock().push(track.source_id.clone());
        let delay = self.slow_fetch.lock().get(&track.source_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.completed.lock().push(track.source_id.clone());
        if self.failing_fetch.lock().contains(&track.source_id) {
            return Err(Error::Fetch(format!("{} unavailable", track.source_id)));
        }
        Ok(PathBuf::from(format!("/fake/{}.audio", track.source_id)))
    }
}

/// Decodes fake files into frames of [`FAKE_SAMPLE`].
///
/// Streams are endless unless a frame count was set for the source id.
pub struct FakeDecoder {
    frame_interval: Duration,
    frame_counts: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
}

impl Default for FakeDecoder {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(2),
            frame_counts: Mutex::default(),
            failing: Mutex::default(),
            active: Arc::default(),
            max_active: Arc::default(),
            cancelled: Arc::default(),
        }
    }
}

impl FakeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// End the stream for `source_id` after `frames` frames.
    pub fn set_frame_count(&self, source_id: &str, frames: usize) {
        self.frame_counts.lock().insert(source_id.to_string(), frames);
    }

    pub fn fail_decode(&self, source_id: &str) {
        self.failing.lock().insert(source_id.to_string());
    }

    /// Pipelines currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously running pipelines seen.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Pipelines terminated through `cancel`.
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

fn source_id_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl DecodePort for FakeDecoder {
    async fn start(&self, source: &Path) -> Result<Box<dyn FrameStream>> {
        let id = source_id_of(source);
        if self.failing.lock().contains(&id) {
            return Err(Error::Decode(format!("cannot decode {id}")));
        }

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        Ok(Box::new(FakeStream {
            remaining: self.frame_counts.lock().get(&id).copied(),
            interval: self.frame_interval,
            active: self.active.clone(),
            cancelled: self.cancelled.clone(),
            finished: false,
        }))
    }
}

struct FakeStream {
    remaining: Option<usize>,
    interval: Duration,
    active: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
    finished: bool,
}

impl FakeStream {
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl FrameStream for FakeStream {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                self.finish();
                return Ok(None);
            }
            *remaining -= 1;
        }
        tokio::time::sleep(self.interval).await;
        Ok(Some(Frame::from_samples(vec![FAKE_SAMPLE; FRAME_SAMPLES])))
    }

    async fn cancel(&mut self) {
        if !self.finished {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
        self.finish();
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Counts delivered frames and keeps the most recent one.
#[derive(Default)]
pub struct RecordingSink {
    count: AtomicUsize,
    last: Mutex<Option<Frame>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn last_frame(&self) -> Option<Frame> {
        self.last.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl VoiceSink for RecordingSink {
    async fn send_frame(&self, frame: &Frame) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Transport("sink closed".into()));
        }
        self.count.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some(frame.clone());
        Ok(())
    }
}

/// Records every reply sent.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Texts sent so far, in order.
    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, text)| text.clone()).collect()
    }

    /// Most recent text, if any.
    pub fn last(&self) -> Option<String> {
        self.sent.lock().last().map(|(_, text)| text.clone())
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(&self, to: &Invoker, text: &str) -> Result<()> {
        self.sent.lock().push((to.client_id.clone(), text.to_string()));
        Ok(())
    }
}
