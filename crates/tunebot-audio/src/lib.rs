//! # tunebot-audio
//!
//! Playback engine for Tunebot.
//!
//! Features:
//! - Bounded FIFO queue with a single active track
//! - FFmpeg-based streaming decode to 48 kHz stereo s16 frames
//! - Pause, skip, stop and live volume control
//! - Automatic advance past tracks that fail to fetch, decode or stream

pub mod engine;
pub mod ffmpeg_decode;
pub mod gain;

pub use engine::{
    EngineConfig, EngineEvent, EngineState, Enqueued, PauseOutcome, PlaybackEngine, PlaybackState,
};
pub use ffmpeg_decode::FfmpegDecoder;
