//! In-process backend with explicit completion delivery.
//!
//! Nothing is rendered. Submitted buffers stay queued until the host calls one
//! of the `complete_*` methods, which invokes the completion sink on the
//! calling thread, exactly like a mixing thread would. Useful for headless
//! runs and for driving the engine deterministically in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chime_common::{BackendError, FormatDescriptor};
use parking_lot::Mutex;
use tracing::trace;

use crate::backend::{AudioBackend, BackendResult, CompletionSink, PlayTicket};

/// Handle to a voice of a [`ManualBackend`].
#[derive(Debug, PartialEq, Eq)]
pub struct ManualVoice(usize);

impl ManualVoice {
    /// Creation index of the voice.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0
    }
}

/// A buffer handed to a voice.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Ticket to report on completion
    pub ticket: PlayTicket,
    /// PCM bytes as submitted
    pub pcm: Arc<[u8]>,
}

#[derive(Debug)]
struct VoiceSlot {
    sink: CompletionSink,
    queued: Option<Submission>,
    running: bool,
    destroyed: bool,
    stops: usize,
    last: Option<Submission>,
}

#[derive(Debug, Default)]
struct ManualState {
    voices: Vec<VoiceSlot>,
    flushed: Vec<(CompletionSink, PlayTicket)>,
    create_limit: Option<usize>,
}

/// Backend whose completions are fired by the host.
#[derive(Debug, Default)]
pub struct ManualBackend {
    state: Mutex<ManualState>,
    signal_on_stop: bool,
    fail_next_submit: AtomicBool,
}

impl ManualBackend {
    /// Creates a backend that drops flushed buffers silently.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `stop` + `flush_buffers` hold back a completion for the flushed
    /// buffer, to be delivered by [`deliver_flushed`](Self::deliver_flushed).
    #[must_use]
    pub fn with_stop_signals_completion(mut self, enabled: bool) -> Self {
        self.signal_on_stop = enabled;
        self
    }

    /// Makes every `create_voice` call fail once `count` voices exist.
    pub fn fail_create_after(&self, count: usize) {
        self.state.lock().create_limit = Some(count);
    }

    /// Makes the next `submit_buffer` call fail.
    pub fn fail_next_submit(&self) {
        self.fail_next_submit.store(true, Ordering::SeqCst);
    }

    /// Number of voices created so far (including destroyed ones).
    #[must_use]
    pub fn voice_count(&self) -> usize {
        self.state.lock().voices.len()
    }

    /// Number of voices destroyed so far.
    #[must_use]
    pub fn destroyed_count(&self) -> usize {
        self.state.lock().voices.iter().filter(|v| v.destroyed).count()
    }

    /// Tickets of buffers that are queued on a running voice.
    #[must_use]
    pub fn pending(&self) -> Vec<PlayTicket> {
        self.state
            .lock()
            .voices
            .iter()
            .filter(|v| v.running)
            .filter_map(|v| v.queued.as_ref().map(|s| s.ticket))
            .collect()
    }

    /// Times `stop` was called on voice `index`.
    #[must_use]
    pub fn stop_count(&self, index: usize) -> usize {
        self.state.lock().voices.get(index).map_or(0, |v| v.stops)
    }

    /// Most recent submission on voice `index`, even if already finished.
    #[must_use]
    pub fn last_submission(&self, index: usize) -> Option<Submission> {
        self.state.lock().voices.get(index).and_then(|v| v.last.clone())
    }

    /// Finishes the `n`-th pending buffer (in [`pending`](Self::pending)
    /// order). Returns its ticket, or `None` if there is no such buffer.
    pub fn complete_nth(&self, n: usize) -> Option<PlayTicket> {
        let (sink, ticket) = {
            let mut state = self.state.lock();
            let slot = state
                .voices
                .iter_mut()
                .filter(|v| v.running && v.queued.is_some())
                .nth(n)?;
            let submission = slot.queued.take()?;
            slot.running = false;
            (slot.sink.clone(), submission.ticket)
        };
        trace!("Manual completion for {:?}", ticket);
        sink.notify(ticket);
        Some(ticket)
    }

    /// Finishes the oldest-created pending buffer.
    pub fn complete_next(&self) -> Option<PlayTicket> {
        self.complete_nth(0)
    }

    /// Finishes every pending buffer. Returns how many were finished.
    pub fn complete_all(&self) -> usize {
        let mut count = 0;
        while self.complete_next().is_some() {
            count += 1;
        }
        count
    }

    /// Delivers completions held back for flushed buffers.
    pub fn deliver_flushed(&self) -> usize {
        let flushed = std::mem::take(&mut self.state.lock().flushed);
        let count = flushed.len();
        for (sink, ticket) in flushed {
            sink.notify(ticket);
        }
        count
    }

    /// Delivers an arbitrary ticket through the sink of its channel's voice,
    /// as a late or duplicated callback would.
    pub fn deliver(&self, ticket: PlayTicket) {
        let sink = self
            .state
            .lock()
            .voices
            .get(ticket.channel().index())
            .map(|v| v.sink.clone());
        if let Some(sink) = sink {
            sink.notify(ticket);
        }
    }

    fn with_slot<R>(&self, voice: &ManualVoice, f: impl FnOnce(&mut VoiceSlot) -> R) -> Option<R> {
        let mut state = self.state.lock();
        state.voices.get_mut(voice.0).map(f)
    }
}

impl AudioBackend for ManualBackend {
    type Voice = ManualVoice;

    fn create_voice(
        &self,
        _format: &FormatDescriptor,
        sink: CompletionSink,
    ) -> BackendResult<ManualVoice> {
        let mut state = self.state.lock();
        let index = state.voices.len();
        if state.create_limit.is_some_and(|limit| index >= limit) {
            return Err(BackendError::VoiceCreation(format!(
                "injected failure at voice {index}"
            )));
        }
        state.voices.push(VoiceSlot {
            sink,
            queued: None,
            running: false,
            destroyed: false,
            stops: 0,
            last: None,
        });
        Ok(ManualVoice(index))
    }

    fn submit_buffer(
        &self,
        voice: &ManualVoice,
        pcm: Arc<[u8]>,
        ticket: PlayTicket,
    ) -> BackendResult<()> {
        if self.fail_next_submit.swap(false, Ordering::SeqCst) {
            return Err(BackendError::Submit("injected failure".to_string()));
        }
        self.with_slot(voice, |slot| {
            let submission = Submission { ticket, pcm };
            slot.last = Some(submission.clone());
            slot.queued = Some(submission);
        })
        .ok_or_else(|| BackendError::Submit(format!("unknown voice {}", voice.0)))
    }

    fn start(&self, voice: &ManualVoice) -> BackendResult<()> {
        self.with_slot(voice, |slot| slot.running = true)
            .ok_or_else(|| BackendError::Start(format!("unknown voice {}", voice.0)))
    }

    fn stop(&self, voice: &ManualVoice) {
        self.with_slot(voice, |slot| {
            slot.running = false;
            slot.stops += 1;
        });
    }

    fn flush_buffers(&self, voice: &ManualVoice) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(slot) = state.voices.get_mut(voice.0) else {
            return;
        };
        let Some(submission) = slot.queued.take() else {
            return;
        };
        if self.signal_on_stop {
            let sink = slot.sink.clone();
            state.flushed.push((sink, submission.ticket));
        }
    }

    fn destroy_voice(&self, voice: ManualVoice) {
        self.with_slot(&voice, |slot| {
            slot.destroyed = true;
            slot.queued = None;
        });
    }

    fn stop_signals_completion(&self) -> bool {
        self.signal_on_stop
    }
}
