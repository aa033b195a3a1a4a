//! Playback engine coordinating queue, fetch, decode and voice output.
//!
//! All queue and playback state lives behind one mutex. Resolution, fetching
//! and streaming happen outside it; the lock is re-taken only to commit a
//! track or change state. A single driver task runs at most one pipeline at a
//! time, and every pipeline carries a cancellation token plus the generation
//! number it was started for, so a skipped or stopped pipeline can never
//! advance the queue a second time.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tunebot_core::{
    DecodePort, Error, FrameStream, MediaResolver, PlaybackQueue, Result, Track, TrackInfo,
    VoiceSink, Volume,
};

use crate::gain;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Engine tuning that comes from configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of pending tracks.
    pub max_queue_size: usize,
    /// Volume at startup.
    pub default_volume: Volume,
    /// Upper bound on resolving and fetching a track. `None` waits forever.
    pub fetch_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 50,
            default_volume: Volume::DEFAULT,
            fetch_timeout: None,
        }
    }
}

/// Playback state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Nothing current.
    #[default]
    Idle,
    /// Fetching and starting the decoder for the current track.
    Loading,
    Playing,
    /// Decoding continues but frames are discarded.
    Paused,
}

/// Consistent view of the engine at one instant.
#[derive(Debug, Clone)]
pub struct PlaybackState {
    pub state: EngineState,
    pub current: Option<Track>,
    pub queue: Vec<Track>,
    pub volume: Volume,
}

impl PlaybackState {
    /// True while a track is current, whether loading, playing or paused.
    pub fn is_playing(&self) -> bool {
        self.state != EngineState::Idle
    }

    pub fn is_paused(&self) -> bool {
        self.state == EngineState::Paused
    }
}

/// Events emitted by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Playback state changed.
    StateChanged(EngineState),
    /// First frame of a track is about to be delivered.
    TrackStarted(Track),
    /// Track reached its natural end.
    TrackFinished(Track),
    /// Track was dropped because it could not be fetched, decoded or sent.
    TrackFailed { track: Track, reason: String },
    /// Pending tracks were discarded.
    QueueCleared(usize),
}

/// Result of a successful enqueue.
#[derive(Debug, Clone)]
pub struct Enqueued {
    pub track: Track,
    /// 1-based distance from now-playing; 1 means it plays immediately.
    pub position: usize,
}

/// Result of an explicit pause or resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    Changed,
    AlreadyInState,
    NotPlaying,
}

/// State guarded by the engine mutex.
struct Inner {
    queue: PlaybackQueue,
    state: EngineState,
    volume: Volume,
    /// Bumped whenever the current track changes.
    generation: u64,
    /// Cancels the pipeline of the current track.
    pipeline: Option<CancellationToken>,
}

struct Shared {
    inner: Mutex<Inner>,
    wake: Notify,
    events: broadcast::Sender<EngineEvent>,
    shutdown: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
    resolver: Arc<dyn MediaResolver>,
    decoder: Arc<dyn DecodePort>,
    sink: Arc<dyn VoiceSink>,
    fetch_timeout: Option<Duration>,
}

/// A track the driver should start.
struct Job {
    generation: u64,
    track: Track,
    token: CancellationToken,
}

/// How a pipeline ended without error.
enum Finish {
    Ended,
    Cancelled,
}

/// Queue-driven playback engine. Cheap to clone; clones share one engine.
#[derive(Clone)]
pub struct PlaybackEngine {
    shared: Arc<Shared>,
}

impl PlaybackEngine {
    /// Create the engine and spawn its driver task on the current runtime.
    pub fn start(
        config: EngineConfig,
        resolver: Arc<dyn MediaResolver>,
        decoder: Arc<dyn DecodePort>,
        sink: Arc<dyn VoiceSink>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                queue: PlaybackQueue::new(config.max_queue_size),
                state: EngineState::Idle,
                volume: config.default_volume,
                generation: 0,
                pipeline: None,
            }),
            wake: Notify::new(),
            events,
            shutdown: CancellationToken::new(),
            driver: Mutex::new(None),
            resolver,
            decoder,
            sink,
            fetch_timeout: config.fetch_timeout,
        });

        let handle = tokio::spawn(shared.clone().run());
        *shared.driver.lock() = Some(handle);

        info!(
            "Playback engine started (max queue {}, volume {})",
            config.max_queue_size, config.default_volume
        );
        Self { shared }
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    /// Take a consistent snapshot of the engine.
    pub fn snapshot(&self) -> PlaybackState {
        let inner = self.shared.inner.lock();
        PlaybackState {
            state: inner.state,
            current: inner.queue.current().cloned(),
            queue: inner.queue.snapshot(),
            volume: inner.volume,
        }
    }

    /// Get the current playback state.
    pub fn state(&self) -> EngineState {
        self.shared.inner.lock().state
    }

    /// Get the current volume.
    pub fn volume(&self) -> Volume {
        self.shared.inner.lock().volume
    }

    /// Resolve `input` and append it to the queue, starting playback if idle.
    ///
    /// Fails with [`Error::Cancelled`] once the engine has been shut down.
    pub async fn enqueue(&self, input: &str, requested_by: &str) -> Result<Enqueued> {
        if self.shared.shutdown.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let info = with_timeout(
            self.shared.fetch_timeout,
            self.shared.resolver.resolve(input),
        )
        .await?;
        let track = Track::from_info(info, requested_by);

        let mut inner = self.shared.inner.lock();
        // Shutdown may have started while resolving.
        if self.shared.shutdown.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let position = inner.queue.enqueue(track.clone())?;
        debug!("Queued {} at position {position}", track.title());

        if inner.state == EngineState::Idle {
            self.shared.advance_locked(&mut inner);
        }
        Ok(Enqueued { track, position })
    }

    /// Search without queueing anything.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackInfo>> {
        with_timeout(
            self.shared.fetch_timeout,
            self.shared.resolver.search(query, limit),
        )
        .await
    }

    /// Terminate the current track and move on. Returns the skipped track,
    /// or `None` if nothing was current.
    pub fn skip(&self) -> Option<Track> {
        let mut inner = self.shared.inner.lock();
        if inner.state == EngineState::Idle {
            return None;
        }

        let skipped = inner.queue.current().cloned();
        if let Some(track) = &skipped {
            info!("Skipping {}", track.title());
        }
        self.shared.advance_locked(&mut inner);
        skipped
    }

    /// Flip between playing and paused. Returns whether playback is now paused.
    pub fn toggle_pause(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            EngineState::Playing => {
                self.shared.set_state(&mut inner, EngineState::Paused);
                true
            }
            EngineState::Paused => {
                self.shared.set_state(&mut inner, EngineState::Playing);
                false
            }
            EngineState::Idle | EngineState::Loading => false,
        }
    }

    /// Pause if playing.
    pub fn pause(&self) -> PauseOutcome {
        self.set_paused(true)
    }

    /// Resume if paused.
    pub fn resume(&self) -> PauseOutcome {
        self.set_paused(false)
    }

    fn set_paused(&self, paused: bool) -> PauseOutcome {
        let mut inner = self.shared.inner.lock();
        let (from, to) = if paused {
            (EngineState::Playing, EngineState::Paused)
        } else {
            (EngineState::Paused, EngineState::Playing)
        };

        match inner.state {
            state if state == to => PauseOutcome::AlreadyInState,
            state if state == from => {
                self.shared.set_state(&mut inner, to);
                PauseOutcome::Changed
            }
            // Idle, or Loading with nothing streaming yet.
            _ => PauseOutcome::NotPlaying,
        }
    }

    /// Terminate any active pipeline, clear the queue and go idle.
    pub fn stop(&self) {
        let mut inner = self.shared.inner.lock();
        if let Some(token) = inner.pipeline.take() {
            token.cancel();
        }
        let cleared = inner.queue.clear();
        if let Some(track) = inner.queue.clear_current() {
            info!("Stopped {}", track.title());
        }
        inner.generation += 1;
        self.shared.set_state(&mut inner, EngineState::Idle);
        self.shared.emit(EngineEvent::QueueCleared(cleared));
    }

    /// Clamp and apply a new volume. Takes effect on the next frame.
    pub fn set_volume(&self, volume: i64) -> Volume {
        let volume = Volume::clamped(volume);
        self.shared.inner.lock().volume = volume;
        debug!("Volume set to {volume}");
        volume
    }

    /// Remove the pending track at a 0-based index.
    pub fn remove(&self, index: usize) -> Result<Track> {
        self.shared.inner.lock().queue.remove_at(index)
    }

    /// Drop all pending tracks, leaving the current one playing.
    pub fn clear(&self) -> usize {
        let cleared = self.shared.inner.lock().queue.clear();
        self.shared.emit(EngineEvent::QueueCleared(cleared));
        cleared
    }

    /// Stop playback and wait for the driver task to exit.
    pub async fn shutdown(&self) {
        // Cancel first so no enqueue lands after the queue is cleared.
        self.shared.shutdown.cancel();
        self.stop();
        let handle = self.shared.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Playback driver ended abnormally: {e}");
            }
        }
        info!("Playback engine shut down");
    }
}

impl Shared {
    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&self, inner: &mut Inner, new_state: EngineState) {
        let old_state = std::mem::replace(&mut inner.state, new_state);
        if old_state != new_state {
            debug!("State changed: {old_state:?} -> {new_state:?}");
            self.emit(EngineEvent::StateChanged(new_state));
        }
    }

    /// Cancel the current pipeline and make the queue head current.
    fn advance_locked(&self, inner: &mut Inner) {
        if let Some(token) = inner.pipeline.take() {
            token.cancel();
        }
        inner.generation += 1;

        if let Some(next) = inner.queue.advance() {
            debug!("Loading {}", next.title());
            inner.pipeline = Some(self.shutdown.child_token());
            self.set_state(inner, EngineState::Loading);
            self.wake.notify_one();
        } else {
            self.set_state(inner, EngineState::Idle);
        }
    }

    /// Advance after a pipeline ended on its own, unless it was superseded.
    fn finish(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation {
            self.advance_locked(&mut inner);
        }
    }

    fn next_job(&self, last_started: u64) -> Option<Job> {
        let inner = self.inner.lock();
        if inner.state != EngineState::Loading || inner.generation == last_started {
            return None;
        }
        Some(Job {
            generation: inner.generation,
            track: inner.queue.current()?.clone(),
            token: inner.pipeline.clone()?,
        })
    }

    async fn run(self: Arc<Self>) {
        info!("Playback driver started");
        let mut last_started = 0;

        loop {
            if let Some(job) = self.next_job(last_started) {
                last_started = job.generation;
                self.play(job).await;
                continue;
            }

            tokio::select! {
                () = self.wake.notified() => {}
                () = self.shutdown.cancelled() => break,
            }
        }

        info!("Playback driver stopped");
    }

    async fn play(&self, job: Job) {
        let Job {
            generation,
            track,
            token,
        } = job;

        match self.stream_track(&track, generation, &token).await {
            Ok(Finish::Ended) => {
                info!("Finished playing: {}", track.title());
                self.emit(EngineEvent::TrackFinished(track));
                self.finish(generation);
            }
            Ok(Finish::Cancelled) => {
                debug!("Pipeline for {} cancelled", track.title());
            }
            Err(e) => {
                error!("Error playing {}: {e}", track.title());
                self.emit(EngineEvent::TrackFailed {
                    track,
                    reason: e.to_string(),
                });
                self.finish(generation);
            }
        }
    }

    async fn stream_track(
        &self,
        track: &Track,
        generation: u64,
        token: &CancellationToken,
    ) -> Result<Finish> {
        let path = tokio::select! {
            biased;
            () = token.cancelled() => return Ok(Finish::Cancelled),
            path = with_timeout(self.fetch_timeout, self.resolver.fetch(track.info())) => path?,
        };

        let mut stream = tokio::select! {
            biased;
            () = token.cancelled() => return Ok(Finish::Cancelled),
            stream = self.decoder.start(&path) => stream?,
        };

        let superseded = {
            let mut inner = self.inner.lock();
            let superseded = inner.generation != generation;
            if !superseded {
                self.set_state(&mut inner, EngineState::Playing);
            }
            superseded
        };
        if superseded {
            stream.cancel().await;
            return Ok(Finish::Cancelled);
        }

        info!("Now playing: {}", track.display_line());
        self.emit(EngineEvent::TrackStarted(track.clone()));

        let result = self.pump(&mut *stream, token).await;
        stream.cancel().await;
        result
    }

    /// Forward frames to the sink until the stream ends or is cancelled.
    async fn pump(&self, stream: &mut dyn FrameStream, token: &CancellationToken) -> Result<Finish> {
        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => return Ok(Finish::Cancelled),
                frame = stream.next_frame() => frame?,
            };
            let Some(mut frame) = next else {
                return Ok(Finish::Ended);
            };

            let (paused, volume) = {
                let inner = self.inner.lock();
                (inner.state == EngineState::Paused, inner.volume)
            };
            if paused {
                continue;
            }

            gain::apply(&mut frame, volume);
            tokio::select! {
                biased;
                () = token.cancelled() => return Ok(Finish::Cancelled),
                sent = self.sink.send_frame(&frame) => sent.map_err(|e| match e {
                    Error::Transport(_) => e,
                    other => Error::Transport(other.to_string()),
                })?,
            }
        }
    }
}

async fn with_timeout<T>(limit: Option<Duration>, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(limit))?,
        None => fut.await,
    }
}
