//! ID types for sounds and playback channels.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for asset IDs.
static ASSET_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a loaded sound asset.
///
/// Channels refer to the asset they play through this ID only; it never keeps
/// the asset alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(u64);

impl AssetId {
    /// Allocates a fresh, process-unique asset ID.
    #[must_use]
    pub fn next() -> Self {
        Self(ASSET_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "asset#{}", self.0)
    }
}

/// Identifier of a playback channel within its pool.
///
/// Assigned once at pool construction (0..capacity) and stable for the
/// channel's whole life, whichever collection it currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u16);

impl ChannelId {
    /// Creates a channel ID from its pool index.
    #[must_use]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Index of this channel in construction order.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}
