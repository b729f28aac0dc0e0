//! # Chime Common
//!
//! Shared types for the Chime playback engine:
//! - PCM format description and RIFF chunk tags
//! - ID types for assets and channels
//! - Error types for loading and backend failures
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod format;
pub mod ids;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::*;
    pub use crate::format::*;
    pub use crate::ids::*;
}

pub use prelude::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_id_generation() {
        let id1 = AssetId::next();
        let id2 = AssetId::next();
        assert_ne!(id1, id2);
        assert!(id2.raw() > id1.raw());
    }

    #[test]
    fn test_channel_id_index() {
        assert_eq!(ChannelId::new(7).index(), 7);
        assert_eq!(ChannelId::new(3).to_string(), "ch3");
    }
}
