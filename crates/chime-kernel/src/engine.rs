//! Playback engine: channel pool, asset registry and completion handling.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         AudioEngine                          │
//! │  ┌──────────────┐   Mutex<EngineState>          Condvar      │
//! │  │ AudioBackend │   ┌─────────────┬──────────────────┐       │
//! │  │  (voices)    │   │ ChannelPool │ ChannelRegistry  │  ◀── reclaimed
//! │  └──────────────┘   └─────────────┴──────────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//!        ▲ submit/start/stop                ▲ CompletionSink::notify
//!   client thread                      backend mixing thread
//! ```
//!
//! Client calls and completion signals both take the one engine lock, so the
//! pool partition and every asset's channel set only change atomically.
//!
//! There is meant to be one engine per process. It is created explicitly and
//! handed (cheaply cloned) to whatever needs it; there is no global instance.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use chime_common::{AssetId, BackendError, ChannelId, FormatDescriptor, LoadError};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::asset::{ChannelRegistry, SoundAsset};
use crate::backend::{AudioBackend, CompletionSink, PlayTicket};
use crate::channel::PlaybackChannel;
use crate::container::{parse_container, read_container};
use crate::pool::{ChannelPool, PoolSnapshot};

/// Default number of playback channels.
pub const DEFAULT_CHANNEL_COUNT: usize = 64;

/// Largest pool the engine accepts.
pub const MAX_CHANNEL_COUNT: usize = u16::MAX as usize;

/// Engine error types.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Container could not be turned into an asset.
    #[error("failed to load sound: {0}")]
    Load(#[from] LoadError),

    /// Container file could not be loaded.
    #[error("failed to load sound '{path}': {source}")]
    LoadFailed {
        /// Path to the file that failed to load.
        path: PathBuf,
        /// Underlying failure.
        source: LoadError,
    },

    /// Backend rejected an operation.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// An engine needs at least one channel.
    #[error("channel pool cannot be empty")]
    EmptyPool,

    /// Requested pool is larger than channel ids can address.
    #[error("too many channels: {requested} (max {max})")]
    TooManyChannels {
        /// Requested number of channels.
        requested: usize,
        /// Largest supported number of channels.
        max: usize,
    },
}

/// Result type for engine operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// Construction parameters for [`AudioEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Number of playback channels (fixed for the engine's lifetime).
    pub channel_count: usize,
    /// The one PCM format every asset must match.
    pub device_format: FormatDescriptor,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            channel_count: DEFAULT_CHANNEL_COUNT,
            device_format: FormatDescriptor::CD_QUALITY,
        }
    }
}

impl EngineSettings {
    /// Settings with a specific channel count.
    #[must_use]
    pub const fn with_channel_count(mut self, count: usize) -> Self {
        self.channel_count = count;
        self
    }

    /// Settings with a specific device format.
    #[must_use]
    pub const fn with_device_format(mut self, format: FormatDescriptor) -> Self {
        self.device_format = format;
        self
    }
}

/// Everything guarded by the engine lock.
#[derive(Debug)]
struct EngineState<V> {
    pool: ChannelPool<V>,
    registry: ChannelRegistry,
}

struct EngineShared<B: AudioBackend> {
    backend: B,
    format: FormatDescriptor,
    state: Mutex<EngineState<B::Voice>>,
    /// Notified whenever a channel returns to the idle collection.
    reclaimed: Condvar,
}

/// Handle to the playback engine.
///
/// Clones share the same engine. Every [`SoundAsset`] holds one, so the
/// engine outlives all assets loaded through it.
pub struct AudioEngine<B: AudioBackend> {
    shared: Arc<EngineShared<B>>,
}

impl<B: AudioBackend> Clone for AudioEngine<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: AudioBackend> std::fmt::Debug for AudioEngine<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("format", &self.shared.format)
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl<B: AudioBackend> AudioEngine<B> {
    /// Creates the engine and all of its voices.
    ///
    /// Every channel starts idle. If any voice cannot be created, the ones
    /// already created are destroyed and the error is returned.
    pub fn new(backend: B, settings: EngineSettings) -> AudioResult<Self> {
        let count = settings.channel_count;
        if count == 0 {
            return Err(AudioError::EmptyPool);
        }
        if count > MAX_CHANNEL_COUNT {
            return Err(AudioError::TooManyChannels {
                requested: count,
                max: MAX_CHANNEL_COUNT,
            });
        }

        let shared = Arc::new(EngineShared {
            backend,
            format: settings.device_format,
            state: Mutex::new(EngineState {
                pool: ChannelPool::new(Vec::new()),
                registry: ChannelRegistry::default(),
            }),
            reclaimed: Condvar::new(),
        });

        let weak = Arc::downgrade(&shared);
        let mut channels = Vec::with_capacity(count);
        for index in 0..count {
            let sink = completion_sink(weak.clone());
            match shared.backend.create_voice(&shared.format, sink) {
                Ok(voice) => {
                    let id = ChannelId::new(index as u16);
                    channels.push(PlaybackChannel::new(id, voice));
                },
                Err(e) => {
                    warn!("Failed to create voice {} of {}: {}", index, count, e);
                    for channel in channels {
                        shared.backend.destroy_voice(channel.into_voice());
                    }
                    return Err(e.into());
                },
            }
        }

        shared.state.lock().pool = ChannelPool::new(channels);
        info!(
            "Audio engine initialized with {} channels ({})",
            count, shared.format
        );

        Ok(Self { shared })
    }

    /// Format every asset must match.
    #[must_use]
    pub fn device_format(&self) -> FormatDescriptor {
        self.shared.format
    }

    /// The backend driving the voices.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    // ============================================
    // Loading
    // ============================================

    /// Parses a container from a stream and creates an asset.
    pub fn load_asset<R: Read + Seek>(&self, reader: R) -> AudioResult<SoundAsset<B>> {
        let decoded = read_container(reader, &self.shared.format)?;
        let asset = SoundAsset::new(self.clone(), decoded);
        debug!("Loaded {} ({} bytes)", asset.id(), asset.byte_length());
        Ok(asset)
    }

    /// Parses an in-memory container and creates an asset.
    pub fn load_asset_bytes(&self, bytes: &[u8]) -> AudioResult<SoundAsset<B>> {
        let decoded = parse_container(bytes, &self.shared.format)?;
        Ok(SoundAsset::new(self.clone(), decoded))
    }

    /// Loads a container file and creates an asset.
    pub fn load_asset_file(&self, path: impl AsRef<Path>) -> AudioResult<SoundAsset<B>> {
        let path = path.as_ref();
        let load = || -> Result<SoundAsset<B>, LoadError> {
            let file = File::open(path)?;
            let decoded = read_container(BufReader::new(file), &self.shared.format)?;
            Ok(SoundAsset::new(self.clone(), decoded))
        };

        let asset = load().map_err(|source| AudioError::LoadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            "Loaded sound {:?} -> {} ({:.2}s)",
            path,
            asset.id(),
            asset.duration().as_secs_f64()
        );
        Ok(asset)
    }

    // ============================================
    // Pool inspection
    // ============================================

    /// Total number of channels.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.state.lock().pool.capacity()
    }

    /// Channels available for playback.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.shared.state.lock().pool.idle_count()
    }

    /// Channels currently playing.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.shared.state.lock().pool.active_count()
    }

    /// Ids in the idle and active collections, taken atomically.
    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        self.shared.state.lock().pool.snapshot()
    }

    /// Checks the pool partition and that it agrees with the asset registry.
    #[must_use]
    pub fn check_invariants(&self) -> bool {
        let state = self.shared.state.lock();
        state.pool.check_invariants()
            && state.registry.len() == state.pool.active_count()
    }

    /// Blocks until every channel is idle.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock();
        while state.pool.active_count() > 0 {
            self.shared.reclaimed.wait(&mut state);
        }
    }

    // ============================================
    // Asset plumbing
    // ============================================

    pub(crate) fn play_asset(
        &self,
        asset: AssetId,
        pcm: &Arc<[u8]>,
    ) -> AudioResult<Option<ChannelId>> {
        let shared = &*self.shared;
        let mut guard = shared.state.lock();
        let state = &mut *guard;

        let Some(channel) = state.pool.allocate() else {
            trace!("No idle channel, dropping play request for {}", asset);
            return Ok(None);
        };
        let id = channel.id();

        match channel.play(&shared.backend, &mut state.registry, asset, Arc::clone(pcm)) {
            Ok(ticket) => {
                debug!("Playing {} on {} (generation {})", asset, id, ticket.generation());
                Ok(Some(id))
            },
            Err(e) => {
                state.pool.reclaim(id);
                drop(guard);
                shared.reclaimed.notify_all();
                warn!("Failed to start {} on {}: {}", asset, id, e);
                Err(e.into())
            },
        }
    }

    pub(crate) fn channels_playing(&self, asset: AssetId) -> Vec<ChannelId> {
        self.shared.state.lock().registry.channels(asset).to_vec()
    }

    /// Stops every channel still bound to `asset` and waits until all of them
    /// are idle again.
    pub(crate) fn release_asset(&self, asset: AssetId) {
        self.shared.release(asset);
    }

    #[cfg(test)]
    fn complete(&self, ticket: PlayTicket) {
        self.shared.complete(ticket);
    }
}

impl<B: AudioBackend> EngineShared<B> {
    /// Completion path: detach the channel from its asset and make it idle.
    fn complete(&self, ticket: PlayTicket) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(channel) = state.pool.active_mut(ticket.channel()) else {
            trace!("Ignoring completion for idle {}", ticket.channel());
            return;
        };
        if !channel.accepts(ticket) {
            trace!(
                "Ignoring stale completion for {} (generation {})",
                ticket.channel(),
                ticket.generation()
            );
            return;
        }

        let asset = channel.on_completion(&mut state.registry);
        state.pool.reclaim(ticket.channel());
        drop(guard);

        self.reclaimed.notify_all();
        debug!("{} finished playing {}", ticket.channel(), asset);
    }

    fn release(&self, asset: AssetId) {
        let mut guard = self.state.lock();
        let bound = guard.registry.channels(asset).to_vec();
        if bound.is_empty() {
            return;
        }

        debug!("Stopping {} channel(s) still playing {}", bound.len(), asset);
        let self_reclaim = !self.backend.stop_signals_completion();
        {
            let state = &mut *guard;
            for id in bound {
                let Some(channel) = state.pool.active_mut(id) else {
                    continue;
                };
                channel.stop(&self.backend);
                if self_reclaim {
                    channel.on_completion(&mut state.registry);
                    state.pool.reclaim(id);
                }
            }
        }
        if self_reclaim {
            drop(guard);
            self.reclaimed.notify_all();
            return;
        }

        while !guard.registry.channels(asset).is_empty() {
            self.reclaimed.wait(&mut guard);
        }
    }
}

impl<B: AudioBackend> Drop for EngineShared<B> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        debug_assert_eq!(
            state.pool.active_count(),
            0,
            "engine dropped with active channels"
        );
        let mut destroyed = 0;
        for channel in state.pool.drain_idle() {
            self.backend.destroy_voice(channel.into_voice());
            destroyed += 1;
        }
        debug!("Audio engine shut down, destroyed {} voices", destroyed);
    }
}

/// Sink that forwards completions to the engine while it is alive.
fn completion_sink<B: AudioBackend>(engine: Weak<EngineShared<B>>) -> CompletionSink {
    CompletionSink::new(move |ticket| {
        if let Some(shared) = engine.upgrade() {
            shared.complete(ticket);
        }
    })
}
