//! Audio backend on top of rodio.
//!
//! Each voice is a paused [`rodio::Sink`] on the shared output stream. A play
//! appends the PCM buffer followed by an empty callback source; when the mixer
//! reaches the callback the buffer has been fully consumed.
//!
//! The callback runs on the audio thread, which must never wait for the engine
//! lock, so it only forwards the ticket over a channel. A dispatcher thread
//! owned by the backend delivers it to the engine.
//!
//! Flushing never waits for the audio thread. It cancels the pending callback
//! and stops the sink; the next submission replaces the stopped sink with a
//! fresh one. A flushed buffer therefore never reports completion.
//!
//! Only 16-bit integer PCM is supported.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chime_common::{BackendError, FormatDescriptor, WAVE_FORMAT_PCM};
use chime_kernel::{AudioBackend, BackendResult, CompletionSink, PlayTicket};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use rodio::buffer::SamplesBuffer;
use rodio::source::EmptyCallback;
use rodio::{OutputStreamHandle, Sink};
use tracing::{debug, trace, warn};

/// The sink currently backing a voice.
struct VoiceSink {
    sink: Sink,
    /// Set when the buffer queued on `sink` is flushed.
    cancelled: Arc<AtomicBool>,
    stopped: bool,
}

impl VoiceSink {
    fn new(handle: &OutputStreamHandle) -> Result<Self, rodio::PlayError> {
        let sink = Sink::try_new(handle)?;
        sink.pause();
        Ok(Self {
            sink,
            cancelled: Arc::new(AtomicBool::new(false)),
            stopped: false,
        })
    }
}

/// One rodio sink plus what it needs to report completions.
pub struct RodioVoice {
    current: Mutex<VoiceSink>,
    completion: CompletionSink,
    channels: u16,
    sample_rate: u32,
}

impl std::fmt::Debug for RodioVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RodioVoice")
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("queued", &self.current.lock().sink.len())
            .finish_non_exhaustive()
    }
}

type Completion = (CompletionSink, PlayTicket);

/// Backend playing through a rodio output stream.
///
/// The [`rodio::OutputStream`] itself is not `Send`; the caller keeps it
/// alive for as long as the backend is in use.
pub struct RodioBackend {
    handle: OutputStreamHandle,
    completions: Sender<Completion>,
    _dispatcher: JoinHandle<()>,
}

impl std::fmt::Debug for RodioBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RodioBackend").finish_non_exhaustive()
    }
}

impl RodioBackend {
    /// Creates a backend on an open output stream.
    pub fn new(handle: OutputStreamHandle) -> BackendResult<Self> {
        let (completions, rx) = unbounded::<Completion>();
        let dispatcher = thread::Builder::new()
            .name("chime-completions".to_string())
            .spawn(move || {
                for (sink, ticket) in rx {
                    sink.notify(ticket);
                }
                debug!("Completion dispatcher stopped");
            })
            .map_err(|e| BackendError::Device(format!("failed to spawn dispatcher: {e}")))?;

        Ok(Self {
            handle,
            completions,
            _dispatcher: dispatcher,
        })
    }
}

/// Checks that rodio can play `format` as submitted.
pub fn check_format(format: &FormatDescriptor) -> BackendResult<()> {
    if format.format_tag != WAVE_FORMAT_PCM {
        return Err(BackendError::UnsupportedFormat(format!(
            "format tag {} is not integer PCM",
            format.format_tag
        )));
    }
    if format.bits_per_sample != 16 {
        return Err(BackendError::UnsupportedFormat(format!(
            "{}-bit samples (only 16-bit is supported)",
            format.bits_per_sample
        )));
    }
    if format.channels == 0 || format.sample_rate == 0 {
        return Err(BackendError::UnsupportedFormat(format!("{format}")));
    }
    Ok(())
}

/// Reinterprets native-endian PCM bytes as 16-bit samples.
fn samples_of(pcm: &[u8]) -> Vec<i16> {
    bytemuck::pod_collect_to_vec(pcm)
}

/// Callback run by the mixer once the buffer of `ticket` has been consumed.
fn completion_callback(
    tx: Sender<Completion>,
    completion: CompletionSink,
    ticket: PlayTicket,
    cancelled: Arc<AtomicBool>,
) -> impl Fn() + Send + 'static {
    move || {
        if cancelled.load(Ordering::Acquire) {
            trace!("Dropping completion for flushed {:?}", ticket);
            return;
        }
        if tx.send((completion.clone(), ticket)).is_err() {
            warn!("Completion for {:?} dropped, dispatcher gone", ticket);
        }
    }
}

impl AudioBackend for RodioBackend {
    type Voice = RodioVoice;

    fn create_voice(
        &self,
        format: &FormatDescriptor,
        sink: CompletionSink,
    ) -> BackendResult<RodioVoice> {
        check_format(format)?;
        let current =
            VoiceSink::new(&self.handle).map_err(|e| BackendError::VoiceCreation(e.to_string()))?;

        Ok(RodioVoice {
            current: Mutex::new(current),
            completion: sink,
            channels: format.channels,
            sample_rate: format.sample_rate,
        })
    }

    fn submit_buffer(
        &self,
        voice: &RodioVoice,
        pcm: Arc<[u8]>,
        ticket: PlayTicket,
    ) -> BackendResult<()> {
        let mut current = voice.current.lock();
        if current.stopped {
            *current =
                VoiceSink::new(&self.handle).map_err(|e| BackendError::Submit(e.to_string()))?;
        }

        let samples = samples_of(&pcm);
        trace!("Submitting {} samples for {:?}", samples.len(), ticket);

        let cancelled = Arc::new(AtomicBool::new(false));
        current.cancelled = Arc::clone(&cancelled);
        let on_end = completion_callback(
            self.completions.clone(),
            voice.completion.clone(),
            ticket,
            cancelled,
        );

        current
            .sink
            .append(SamplesBuffer::new(voice.channels, voice.sample_rate, samples));
        current.sink.append(EmptyCallback::<i16>::new(Box::new(on_end)));
        Ok(())
    }

    fn start(&self, voice: &RodioVoice) -> BackendResult<()> {
        voice.current.lock().sink.play();
        Ok(())
    }

    fn stop(&self, voice: &RodioVoice) {
        voice.current.lock().sink.pause();
    }

    fn flush_buffers(&self, voice: &RodioVoice) {
        let mut current = voice.current.lock();
        current.cancelled.store(true, Ordering::Release);
        current.sink.stop();
        current.stopped = true;
    }

    fn destroy_voice(&self, voice: RodioVoice) {
        voice.current.into_inner().sink.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chime_common::ChannelId;

    #[test]
    fn test_check_format() {
        assert!(check_format(&FormatDescriptor::CD_QUALITY).is_ok());
        assert!(check_format(&FormatDescriptor::pcm(1, 8_000, 16)).is_ok());

        let err = check_format(&FormatDescriptor::pcm(2, 44_100, 8)).expect_err("8-bit");
        assert!(matches!(err, BackendError::UnsupportedFormat(_)));

        let float = FormatDescriptor {
            format_tag: 3,
            ..FormatDescriptor::CD_QUALITY
        };
        assert!(check_format(&float).is_err());
    }

    #[test]
    fn test_flushed_buffer_reports_nothing() {
        let (tx, rx) = unbounded();
        let ticket = PlayTicket::new(ChannelId::new(2), 7);
        let cancelled = Arc::new(AtomicBool::new(false));
        let on_end = completion_callback(
            tx,
            CompletionSink::new(|_| {}),
            ticket,
            Arc::clone(&cancelled),
        );

        on_end();
        let (_, delivered) = rx.try_recv().expect("completion");
        assert_eq!(delivered, ticket);

        cancelled.store(true, Ordering::Release);
        on_end();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    #[cfg(target_endian = "little")]
    fn test_samples_are_little_endian_pairs() {
        assert_eq!(samples_of(&[0x01, 0x00, 0xFF, 0x7F, 0x00, 0x80]), vec![1, i16::MAX, i16::MIN]);
        assert!(samples_of(&[]).is_empty());
    }
}
