//! Core domain types for Tunebot.

pub mod common;
pub mod frame;
pub mod queue;
pub mod track;

pub use common::*;
pub use frame::{Frame, CHANNELS, FRAME_BYTES, FRAME_SAMPLES, SAMPLE_RATE};
pub use queue::PlaybackQueue;
pub use track::{Track, TrackInfo};
