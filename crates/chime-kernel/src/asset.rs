//! Loaded sounds and the registry of channels playing them.
//!
//! A [`SoundAsset`] owns its PCM bytes. Which channels are currently playing
//! it is recorded in a [`ChannelRegistry`] that lives next to the channel pool
//! under the engine lock; neither side owns the other.
//!
//! Dropping an asset blocks until no channel plays it any more.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chime_common::{AssetId, ChannelId, FormatDescriptor};
use tracing::debug;

use crate::backend::AudioBackend;
use crate::container::DecodedPcm;
use crate::engine::{AudioEngine, AudioResult};

/// Non-owning back-references from assets to the channels playing them.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    by_asset: HashMap<AssetId, Vec<ChannelId>>,
}

impl ChannelRegistry {
    /// Records that `channel` started playing `asset`.
    pub fn register(&mut self, asset: AssetId, channel: ChannelId) {
        let channels = self.by_asset.entry(asset).or_default();
        debug_assert!(!channels.contains(&channel), "{channel} registered twice");
        channels.push(channel);
    }

    /// Removes `channel` from `asset`'s set. Returns whether it was present.
    pub fn unregister(&mut self, asset: AssetId, channel: ChannelId) -> bool {
        let Some(channels) = self.by_asset.get_mut(&asset) else {
            return false;
        };
        let Some(pos) = channels.iter().position(|c| *c == channel) else {
            return false;
        };
        channels.remove(pos);
        if channels.is_empty() {
            self.by_asset.remove(&asset);
        }
        true
    }

    /// Channels currently playing `asset`.
    #[must_use]
    pub fn channels(&self, asset: AssetId) -> &[ChannelId] {
        self.by_asset.get(&asset).map(Vec::as_slice).unwrap_or_default()
    }

    /// Total number of registrations across all assets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_asset.values().map(Vec::len).sum()
    }

    /// Whether no asset is being played.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_asset.is_empty()
    }
}

/// A decoded sound ready for playback.
///
/// Created through [`AudioEngine::load_asset`] and friends. The PCM bytes are
/// read-only; any number of channels may play the same asset at once.
pub struct SoundAsset<B: AudioBackend> {
    id: AssetId,
    format: FormatDescriptor,
    pcm: Arc<[u8]>,
    engine: AudioEngine<B>,
}

impl<B: AudioBackend> SoundAsset<B> {
    pub(crate) fn new(engine: AudioEngine<B>, decoded: DecodedPcm) -> Self {
        Self {
            id: AssetId::next(),
            format: decoded.format,
            pcm: Arc::from(decoded.data),
            engine,
        }
    }

    /// Process-unique id of this asset.
    #[must_use]
    pub const fn id(&self) -> AssetId {
        self.id
    }

    /// PCM layout (always the engine's device format).
    #[must_use]
    pub const fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    /// Raw PCM bytes from the data chunk.
    #[must_use]
    pub fn pcm(&self) -> &[u8] {
        &self.pcm
    }

    /// Number of PCM bytes.
    #[must_use]
    pub fn byte_length(&self) -> usize {
        self.pcm.len()
    }

    /// Playback time of the whole buffer.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.pcm.len())
    }

    /// Starts playing the sound on a free channel.
    ///
    /// Returns `Ok(None)` when every channel is busy; the request is dropped
    /// and nothing plays.
    pub fn play(&self) -> AudioResult<Option<ChannelId>> {
        self.engine.play_asset(self.id, &self.pcm)
    }

    /// Channels currently playing this asset.
    #[must_use]
    pub fn active_channels(&self) -> Vec<ChannelId> {
        self.engine.channels_playing(self.id)
    }

    /// Whether at least one channel is playing this asset.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        !self.active_channels().is_empty()
    }
}

impl<B: AudioBackend> Drop for SoundAsset<B> {
    fn drop(&mut self) {
        self.engine.release_asset(self.id);
        debug!("Released {} ({} bytes)", self.id, self.pcm.len());
    }
}

impl<B: AudioBackend> fmt::Debug for SoundAsset<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundAsset")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("byte_length", &self.pcm.len())
            .finish_non_exhaustive()
    }
}
