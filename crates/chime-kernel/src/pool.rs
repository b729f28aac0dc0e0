//! Fixed-size pool of playback channels.
//!
//! Every channel lives in exactly one of two collections:
//!
//! ```text
//!   idle:   [ch0, ch1, ch2, ...]   ── allocate() pops the last ──▶
//!   active: [ch7, ch5, ...]        ◀── reclaim(id) moves it back ──
//! ```
//!
//! The pool never grows. When `idle` is empty an allocation simply returns
//! `None` and the request is dropped.
//!
//! The pool itself is not synchronized; the engine keeps it behind its lock.

use std::collections::HashSet;

use chime_common::ChannelId;

use crate::channel::PlaybackChannel;

/// Channel ids in each collection at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PoolSnapshot {
    /// Ids in the idle collection, in collection order
    pub idle: Vec<ChannelId>,
    /// Ids in the active collection, in collection order
    pub active: Vec<ChannelId>,
}

impl PoolSnapshot {
    /// Whether the two collections partition exactly the ids `0..capacity`.
    #[must_use]
    pub fn is_partition_of(&self, capacity: usize) -> bool {
        if self.idle.len() + self.active.len() != capacity {
            return false;
        }
        let mut seen = HashSet::with_capacity(capacity);
        self.idle
            .iter()
            .chain(&self.active)
            .all(|id| id.index() < capacity && seen.insert(*id))
    }
}

/// Owner of all playback channels.
#[derive(Debug)]
pub struct ChannelPool<V> {
    idle: Vec<PlaybackChannel<V>>,
    active: Vec<PlaybackChannel<V>>,
    capacity: usize,
}

impl<V> ChannelPool<V> {
    /// Creates a pool owning `channels`, all of which start idle.
    ///
    /// # Panics
    ///
    /// Panics if any channel is playing.
    #[must_use]
    pub fn new(channels: Vec<PlaybackChannel<V>>) -> Self {
        assert!(
            channels.iter().all(PlaybackChannel::is_idle),
            "pool channels must start idle"
        );
        let capacity = channels.len();
        Self {
            idle: channels,
            active: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Total number of channels.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Channels available for allocation.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Channels currently handed out.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Whether every channel is in use.
    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.idle.is_empty()
    }

    /// Moves the last idle channel to the active collection and returns it.
    ///
    /// Returns `None` when no channel is idle.
    pub fn allocate(&mut self) -> Option<&mut PlaybackChannel<V>> {
        let channel = self.idle.pop()?;
        self.active.push(channel);
        debug_assert!(self.check_invariants());
        self.active.last_mut()
    }

    /// Moves the active channel `id` back to the idle collection.
    ///
    /// Returns `false` if `id` is not active.
    ///
    /// # Panics
    ///
    /// Panics if the channel is still playing.
    pub fn reclaim(&mut self, id: ChannelId) -> bool {
        let Some(pos) = self.active.iter().position(|c| c.id() == id) else {
            return false;
        };
        let channel = self.active.remove(pos);
        assert!(channel.is_idle(), "{id} reclaimed while playing");
        self.idle.push(channel);
        debug_assert!(self.check_invariants());
        true
    }

    /// Active channel with the given id.
    pub fn active_mut(&mut self, id: ChannelId) -> Option<&mut PlaybackChannel<V>> {
        self.active.iter_mut().find(|c| c.id() == id)
    }

    /// Channel with the given id, wherever it is.
    pub fn get(&self, id: ChannelId) -> Option<&PlaybackChannel<V>> {
        self.idle.iter().chain(&self.active).find(|c| c.id() == id)
    }

    /// Whether `id` is in the active collection.
    #[must_use]
    pub fn is_active(&self, id: ChannelId) -> bool {
        self.active.iter().any(|c| c.id() == id)
    }

    /// Ids in both collections.
    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            idle: self.idle.iter().map(PlaybackChannel::id).collect(),
            active: self.active.iter().map(PlaybackChannel::id).collect(),
        }
    }

    /// Checks the partition invariants and that no idle-listed channel plays.
    #[must_use]
    pub fn check_invariants(&self) -> bool {
        self.snapshot().is_partition_of(self.capacity) && self.idle.iter().all(PlaybackChannel::is_idle)
    }

    /// Removes every idle channel, leaving the pool empty of them.
    pub(crate) fn drain_idle(&mut self) -> std::vec::Drain<'_, PlaybackChannel<V>> {
        self.idle.drain(..)
    }
}
