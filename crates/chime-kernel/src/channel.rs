//! A single playback voice and its Idle/Playing state machine.
//!
//! ```text
//!            play(asset)
//!   ┌──────┐ ───────────▶ ┌─────────┐
//!   │ Idle │              │ Playing │ ── stop() ──▶ (backend halted, still Playing)
//!   └──────┘ ◀─────────── └─────────┘
//!            on_completion()
//! ```
//!
//! A channel is Playing exactly when it refers to an asset. Calling an
//! operation from the wrong state means the pool handed out a channel it did
//! not own, so those calls panic instead of returning an error.

use std::sync::Arc;

use chime_common::{AssetId, ChannelId};

use crate::asset::ChannelRegistry;
use crate::backend::{AudioBackend, BackendResult, PlayTicket};

/// Logical state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Available for allocation.
    Idle,
    /// Bound to the given asset.
    Playing(AssetId),
}

/// One voice of the channel pool.
///
/// Owns its backend voice handle for its whole life. The asset it plays is
/// referenced by id only.
#[derive(Debug)]
pub struct PlaybackChannel<V> {
    id: ChannelId,
    voice: V,
    current: Option<AssetId>,
    generation: u32,
}

impl<V> PlaybackChannel<V> {
    /// Wraps a freshly created voice. Channels start idle.
    #[must_use]
    pub fn new(id: ChannelId, voice: V) -> Self {
        Self {
            id,
            voice,
            current: None,
            generation: 0,
        }
    }

    /// Stable id of this channel.
    #[must_use]
    pub const fn id(&self) -> ChannelId {
        self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.current.map_or(ChannelState::Idle, ChannelState::Playing)
    }

    /// Whether the channel is available for allocation.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    /// Asset being played, if any.
    #[must_use]
    pub const fn current_asset(&self) -> Option<AssetId> {
        self.current
    }

    /// Ticket of the play in progress, if any.
    #[must_use]
    pub fn ticket(&self) -> Option<PlayTicket> {
        self.current
            .map(|_| PlayTicket::new(self.id, self.generation))
    }

    /// Whether a completion carrying `ticket` belongs to the current play.
    #[must_use]
    pub fn accepts(&self, ticket: PlayTicket) -> bool {
        self.current.is_some() && ticket.channel() == self.id && ticket.generation() == self.generation
    }

    /// Binds the channel to `asset` and starts playing `pcm`.
    ///
    /// On a backend failure the channel is left idle and unregistered.
    ///
    /// # Panics
    ///
    /// Panics if the channel is already playing.
    pub fn play<B>(
        &mut self,
        backend: &B,
        registry: &mut ChannelRegistry,
        asset: AssetId,
        pcm: Arc<[u8]>,
    ) -> BackendResult<PlayTicket>
    where
        B: AudioBackend<Voice = V>,
    {
        assert!(
            self.current.is_none(),
            "{} allocated while still playing {:?}",
            self.id,
            self.current
        );

        self.generation = self.generation.wrapping_add(1);
        let ticket = PlayTicket::new(self.id, self.generation);

        registry.register(asset, self.id);
        self.current = Some(asset);

        let started = backend
            .submit_buffer(&self.voice, pcm, ticket)
            .and_then(|()| backend.start(&self.voice));

        if let Err(e) = started {
            backend.stop(&self.voice);
            backend.flush_buffers(&self.voice);
            registry.unregister(asset, self.id);
            self.current = None;
            return Err(e);
        }
        Ok(ticket)
    }

    /// Handles the end of the current play and returns the asset it was
    /// bound to. The caller reclaims the channel into the idle set.
    ///
    /// # Panics
    ///
    /// Panics if the channel is idle.
    pub fn on_completion(&mut self, registry: &mut ChannelRegistry) -> AssetId {
        let asset = self
            .current
            .take()
            .unwrap_or_else(|| panic!("{} completed while idle", self.id));
        registry.unregister(asset, self.id);
        asset
    }

    /// Halts the voice and discards its queued buffer.
    ///
    /// Does not change state; see [`AudioBackend::stop_signals_completion`].
    ///
    /// # Panics
    ///
    /// Panics if the channel is idle.
    pub fn stop<B>(&self, backend: &B)
    where
        B: AudioBackend<Voice = V>,
    {
        assert!(self.current.is_some(), "{} stopped while idle", self.id);
        backend.stop(&self.voice);
        backend.flush_buffers(&self.voice);
    }

    /// Gives up the voice handle so it can be destroyed.
    ///
    /// # Panics
    ///
    /// Panics if the channel is still playing.
    pub fn into_voice(self) -> V {
        assert!(
            self.current.is_none(),
            "{} destroyed while playing {:?}",
            self.id,
            self.current
        );
        self.voice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manual_backend::ManualBackend;
    use crate::backend::CompletionSink;
    use chime_common::FormatDescriptor;

    fn channel(backend: &ManualBackend) -> PlaybackChannel<crate::manual_backend::ManualVoice> {
        let voice = backend
            .create_voice(&FormatDescriptor::CD_QUALITY, CompletionSink::new(|_| {}))
            .expect("voice");
        PlaybackChannel::new(ChannelId::new(0), voice)
    }

    fn pcm(bytes: &[u8]) -> Arc<[u8]> {
        Arc::from(bytes)
    }

    #[test]
    fn test_play_then_complete() {
        let backend = ManualBackend::new();
        let mut registry = ChannelRegistry::default();
        let mut ch = channel(&backend);
        let asset = AssetId::next();

        assert_eq!(ch.state(), ChannelState::Idle);
        let ticket = ch
            .play(&backend, &mut registry, asset, pcm(&[1, 2, 3, 4]))
            .expect("play");

        assert_eq!(ch.state(), ChannelState::Playing(asset));
        assert_eq!(ch.ticket(), Some(ticket));
        assert!(ch.accepts(ticket));
        assert_eq!(registry.channels(asset), &[ch.id()]);
        assert_eq!(backend.pending(), vec![ticket]);

        assert_eq!(ch.on_completion(&mut registry), asset);
        assert!(ch.is_idle());
        assert!(registry.channels(asset).is_empty());
        assert!(!ch.accepts(ticket));
    }

    #[test]
    fn test_generation_changes_between_plays() {
        let backend = ManualBackend::new();
        let mut registry = ChannelRegistry::default();
        let mut ch = channel(&backend);
        let asset = AssetId::next();

        let first = ch.play(&backend, &mut registry, asset, pcm(&[0; 4])).expect("play");
        ch.on_completion(&mut registry);
        let second = ch.play(&backend, &mut registry, asset, pcm(&[0; 4])).expect("play");

        assert_ne!(first, second);
        assert!(!ch.accepts(first));
        assert!(ch.accepts(second));
    }

    #[test]
    fn test_submit_failure_rolls_back() {
        let backend = ManualBackend::new();
        let mut registry = ChannelRegistry::default();
        let mut ch = channel(&backend);
        let asset = AssetId::next();

        backend.fail_next_submit();
        assert!(ch.play(&backend, &mut registry, asset, pcm(&[0; 4])).is_err());
        assert!(ch.is_idle());
        assert!(registry.channels(asset).is_empty());
        assert!(backend.pending().is_empty());
    }

    #[test]
    fn test_stop_keeps_state() {
        let backend = ManualBackend::new();
        let mut registry = ChannelRegistry::default();
        let mut ch = channel(&backend);
        let asset = AssetId::next();

        ch.play(&backend, &mut registry, asset, pcm(&[0; 4])).expect("play");
        ch.stop(&backend);
        assert_eq!(ch.state(), ChannelState::Playing(asset));
        assert!(backend.pending().is_empty());
        assert_eq!(backend.stop_count(0), 1);
    }

    #[test]
    #[should_panic(expected = "while still playing")]
    fn test_double_play_panics() {
        let backend = ManualBackend::new();
        let mut registry = ChannelRegistry::default();
        let mut ch = channel(&backend);
        let asset = AssetId::next();

        ch.play(&backend, &mut registry, asset, pcm(&[0; 4])).expect("play");
        let _ = ch.play(&backend, &mut registry, asset, pcm(&[0; 4]));
    }

    #[test]
    #[should_panic(expected = "completed while idle")]
    fn test_completion_while_idle_panics() {
        let backend = ManualBackend::new();
        let mut ch = channel(&backend);
        ch.on_completion(&mut ChannelRegistry::default());
    }

    #[test]
    #[should_panic(expected = "destroyed while playing")]
    fn test_destroy_while_playing_panics() {
        let backend = ManualBackend::new();
        let mut registry = ChannelRegistry::default();
        let mut ch = channel(&backend);
        ch.play(&backend, &mut registry, AssetId::next(), pcm(&[0; 4]))
            .expect("play");
        let _ = ch.into_voice();
    }
}
