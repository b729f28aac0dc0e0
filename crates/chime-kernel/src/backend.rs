//! Audio output backend interface.
//!
//! The kernel drives an output backend through [`AudioBackend`] and is driven
//! back by it through a [`CompletionSink`]. The sink is the only way into the
//! kernel from the backend's mixing thread.
//!
//! ```text
//!   kernel ──create_voice/submit/start/stop/flush──▶ backend
//!   kernel ◀────────── CompletionSink::notify(ticket) ─ backend (own thread)
//! ```
//!
//! Opening the device and the output/mastering path is the backend's own
//! construction step and happens before the engine exists.

use std::fmt;
use std::sync::Arc;

use chime_common::{BackendError, ChannelId, FormatDescriptor};

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Opaque context passed with every submitted buffer.
///
/// Identifies one play of one channel. The generation changes on every play,
/// so a completion that arrives for an earlier play can be told apart from the
/// current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayTicket {
    channel: ChannelId,
    generation: u32,
}

impl PlayTicket {
    /// Ticket for play number `generation` of `channel`.
    #[must_use]
    pub const fn new(channel: ChannelId, generation: u32) -> Self {
        Self {
            channel,
            generation,
        }
    }

    /// Channel the buffer was submitted on.
    #[must_use]
    pub const fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Play generation of that channel.
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

/// Capability handed to the backend for reporting finished buffers.
///
/// Cheap to clone. Calling [`notify`](Self::notify) after the engine has been
/// dropped is harmless.
#[derive(Clone)]
pub struct CompletionSink {
    notify: Arc<dyn Fn(PlayTicket) + Send + Sync>,
}

impl CompletionSink {
    /// Wraps a notification closure.
    pub fn new(notify: impl Fn(PlayTicket) + Send + Sync + 'static) -> Self {
        Self {
            notify: Arc::new(notify),
        }
    }

    /// Reports that the buffer submitted with `ticket` finished playing.
    pub fn notify(&self, ticket: PlayTicket) {
        (self.notify)(ticket);
    }
}

impl fmt::Debug for CompletionSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSink").finish_non_exhaustive()
    }
}

/// Output backend driven by the engine.
///
/// Every method except [`destroy_voice`](Self::destroy_voice) may be called
/// while the engine lock is held, so implementations must not invoke the
/// completion sink synchronously from inside them. Completions are delivered
/// later, from the backend's own thread.
pub trait AudioBackend: Send + Sync + 'static {
    /// Handle to one source voice. Owned by exactly one playback channel.
    type Voice: Send;

    /// Creates a source voice for `format` that reports to `sink`.
    fn create_voice(
        &self,
        format: &FormatDescriptor,
        sink: CompletionSink,
    ) -> BackendResult<Self::Voice>;

    /// Queues `pcm` on `voice`. `ticket` must be passed back on completion.
    fn submit_buffer(
        &self,
        voice: &Self::Voice,
        pcm: Arc<[u8]>,
        ticket: PlayTicket,
    ) -> BackendResult<()>;

    /// Starts (or resumes) playback of queued buffers.
    fn start(&self, voice: &Self::Voice) -> BackendResult<()>;

    /// Halts playback immediately.
    fn stop(&self, voice: &Self::Voice);

    /// Discards all queued buffers.
    fn flush_buffers(&self, voice: &Self::Voice);

    /// Releases a voice. Only called for idle voices.
    fn destroy_voice(&self, voice: Self::Voice);

    /// Whether `stop` followed by `flush_buffers` still delivers a completion
    /// for the flushed buffer.
    ///
    /// When `false` the engine performs the idle transition itself during
    /// teardown and ignores any completion that shows up afterwards.
    fn stop_signals_completion(&self) -> bool {
        false
    }
}

/// A shared backend drives voices exactly like the backend it wraps, so the
/// host can keep its own handle to it.
impl<B: AudioBackend> AudioBackend for Arc<B> {
    type Voice = B::Voice;

    fn create_voice(
        &self,
        format: &FormatDescriptor,
        sink: CompletionSink,
    ) -> BackendResult<Self::Voice> {
        (**self).create_voice(format, sink)
    }

    fn submit_buffer(
        &self,
        voice: &Self::Voice,
        pcm: Arc<[u8]>,
        ticket: PlayTicket,
    ) -> BackendResult<()> {
        (**self).submit_buffer(voice, pcm, ticket)
    }

    fn start(&self, voice: &Self::Voice) -> BackendResult<()> {
        (**self).start(voice)
    }

    fn stop(&self, voice: &Self::Voice) {
        (**self).stop(voice);
    }

    fn flush_buffers(&self, voice: &Self::Voice) {
        (**self).flush_buffers(voice);
    }

    fn destroy_voice(&self, voice: Self::Voice) {
        (**self).destroy_voice(voice);
    }

    fn stop_signals_completion(&self) -> bool {
        (**self).stop_signals_completion()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_completion_sink_forwards_ticket() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            CompletionSink::new(move |ticket| seen.lock().push(ticket))
        };

        let ticket = PlayTicket::new(ChannelId::new(3), 9);
        sink.clone().notify(ticket);
        assert_eq!(*seen.lock(), vec![ticket]);
        assert_eq!(ticket.channel(), ChannelId::new(3));
        assert_eq!(ticket.generation(), 9);
    }
}
