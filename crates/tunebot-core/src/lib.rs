//! # tunebot-core
//!
//! Core types, traits, and error handling for the Tunebot voice-channel
//! music bot.

pub mod error;
pub mod permission;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{Error, Result};
pub use permission::{Combine, Invoker, PermissionGate, PermissionPolicy};
pub use traits::{ChatTransport, DecodePort, FrameStream, IdentityLookup, MediaResolver, VoiceSink};
pub use types::*;
