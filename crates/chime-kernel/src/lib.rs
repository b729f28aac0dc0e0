//! # Chime Kernel
//!
//! Fire-and-forget playback of short PCM sounds over a fixed channel pool.
//!
//! This crate provides:
//! - RIFF/WAVE container parsing with strict format validation
//! - Playback channels with an Idle/Playing state machine
//! - A fixed-size channel pool (idle and active collections)
//! - Sound assets that know which channels play them
//! - The [`AudioBackend`] seam plus an in-process [`ManualBackend`]
//!
//! ## Architecture
//!
//! ```text
//!   SoundAsset::play ──▶ AudioEngine ──▶ ChannelPool::allocate
//!                              │                │
//!                              │          PlaybackChannel::play ──▶ AudioBackend
//!                              │                                        │
//!                              ◀──────── CompletionSink::notify ◀───────┘
//! ```
//!
//! Requests beyond the pool size are dropped silently. Dropping an asset
//! stops every channel still playing it and blocks until they are idle.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod asset;
pub mod backend;
pub mod channel;
pub mod container;
pub mod engine;
pub mod manual_backend;
pub mod pool;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::asset::*;
    pub use crate::backend::*;
    pub use crate::channel::*;
    pub use crate::container::*;
    pub use crate::engine::*;
    pub use crate::manual_backend::*;
    pub use crate::pool::*;
}

pub use prelude::*;
