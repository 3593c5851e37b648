//! Live playback on the default audio device.
//!
//! In callback mode the mixer moves into the rodio source and lives on the
//! audio thread. Control messages reach it as integer codes through a
//! lock-free SPSC ring, drained before each block is rendered, and playback
//! status comes back through atomics. The audio thread never waits on the
//! control side.
//!
//! In queued mode the mixer stays with the host loop, which calls
//! [`AudioEngine::update`] to render the elapsed time and queue it.

use super::message::{Message, MAX_TRACKS};
use super::mixer::{Mixer, PlaybackStatus, MAX_BUFFER_LEN, SAMPLE_RATE};
use super::sink::{pump, QueueSink};
use crate::config::OutputMode;
use crate::midi::{InitError, ReadError};
use anyhow::{Context, Result};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use rodio::{OutputStream, OutputStreamHandle, Source};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Samples rendered per block in callback mode.
/// Smaller = lower latency but more frequent message polling.
const BLOCK_SIZE: usize = 256;

/// Control messages that can wait for the next block.
const MESSAGE_QUEUE_LEN: usize = 64;

const NO_TRACK: u32 = u32::MAX;
const NO_ERROR: usize = usize::MAX;

/// Why a control message was not delivered.
#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Init(#[from] InitError),

    #[error("audio message queue is full, dropped {0:?}")]
    QueueFull(Message),
}

/// Playback status published by the audio thread.
/// Uses atomics for lock-free access from the control side.
#[derive(Debug)]
struct SharedState {
    playing: AtomicBool,
    muted: AtomicBool,
    volume: AtomicU8,
    /// Sequencer position in ticks.
    clock: AtomicU32,
    repeat: AtomicU32,
    /// Offset of the last read failure.
    error_offset: AtomicUsize,
}

impl SharedState {
    fn new(status: PlaybackStatus) -> Self {
        let state = Self {
            playing: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            volume: AtomicU8::new(0),
            clock: AtomicU32::new(0),
            repeat: AtomicU32::new(NO_TRACK),
            error_offset: AtomicUsize::new(NO_ERROR),
        };
        state.publish(status);
        state
    }

    fn publish(&self, status: PlaybackStatus) {
        self.playing.store(status.playing, Ordering::Relaxed);
        self.muted.store(status.muted, Ordering::Relaxed);
        self.volume.store(status.volume, Ordering::Relaxed);
        self.clock.store(status.clock, Ordering::Relaxed);
        self.repeat.store(
            status.repeat.map_or(NO_TRACK, u32::from),
            Ordering::Relaxed,
        );
        let offset = match status.last_error {
            Some(ReadError::UnexpectedEnd { offset }) => offset,
            None => NO_ERROR,
        };
        self.error_offset.store(offset, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PlaybackStatus {
        let repeat = self.repeat.load(Ordering::Relaxed);
        let offset = self.error_offset.load(Ordering::Relaxed);
        PlaybackStatus {
            playing: self.playing.load(Ordering::Relaxed),
            muted: self.muted.load(Ordering::Relaxed),
            volume: self.volume.load(Ordering::Relaxed),
            clock: self.clock.load(Ordering::Relaxed),
            repeat: (repeat != NO_TRACK).then_some(repeat as u16),
            last_error: (offset != NO_ERROR).then_some(ReadError::UnexpectedEnd { offset }),
        }
    }
}

/// Audio source that owns the mixer on the audio thread.
struct SynthSource {
    mixer: Mixer,
    messages: HeapCons<u32>,
    state: Arc<SharedState>,
    buf: Vec<f32>,
    /// Current position in the buffer.
    buf_pos: usize,
}

impl SynthSource {
    fn new(mixer: Mixer, messages: HeapCons<u32>, state: Arc<SharedState>) -> Self {
        Self {
            mixer,
            messages,
            state,
            buf: vec![0.0; BLOCK_SIZE],
            buf_pos: BLOCK_SIZE, // Start at end to trigger first render
        }
    }

    fn render(&mut self) {
        while let Some(code) = self.messages.try_pop() {
            if let Some(message) = Message::from_code(code) {
                // Start failures show up in the published last_error.
                self.mixer.apply(message).ok();
            }
        }

        let mut filled = 0;
        while filled < self.buf.len() {
            let written = self.mixer.generate(&mut self.buf[filled..]);
            if written == 0 {
                break;
            }
            filled += written;
        }
        self.buf[filled..].fill(0.0);
        self.buf_pos = 0;

        self.state.publish(self.mixer.status());
    }
}

impl Iterator for SynthSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.buf_pos >= self.buf.len() {
            self.render();
        }
        let sample = self.buf[self.buf_pos];
        self.buf_pos += 1;
        Some(sample)
    }
}

impl Source for SynthSource {
    fn current_frame_len(&self) -> Option<usize> {
        None // Continuous stream
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        None // Infinite stream
    }
}

/// Builds the audio-side source and the control-side handles feeding it.
fn source_channel(mixer: Mixer) -> (SynthSource, HeapProd<u32>, Arc<SharedState>) {
    let state = Arc::new(SharedState::new(mixer.status()));
    let (producer, consumer) = HeapRb::<u32>::new(MESSAGE_QUEUE_LEN).split();
    let source = SynthSource::new(mixer, consumer, Arc::clone(&state));
    (source, producer, state)
}

/// Rejects play requests the mixer would refuse, before they are queued.
fn check_track(message: Message, track_count: u16) -> Result<(), InitError> {
    match message.track() {
        Some(track) if u16::from(track) >= track_count.min(MAX_TRACKS) => {
            Err(InitError::TrackOutOfRange {
                id: u16::from(track),
                count: track_count,
            })
        }
        _ => Ok(()),
    }
}

enum Output {
    Callback {
        messages: HeapProd<u32>,
        state: Arc<SharedState>,
        /// Audio output stream (must be kept alive).
        _stream: OutputStream,
        _stream_handle: OutputStreamHandle,
    },
    Queued {
        mixer: Mixer,
        sink: QueueSink,
        scratch: Vec<i16>,
    },
}

/// Plays a mixer through the default output device.
pub struct AudioEngine {
    output: Output,
    track_count: u16,
}

impl AudioEngine {
    /// Opens the default output device and starts feeding it from `mixer`.
    ///
    /// # Errors
    ///
    /// Returns error if audio output cannot be initialized
    pub fn new(mixer: Mixer, mode: OutputMode) -> Result<Self> {
        let track_count = mixer.track_count();

        let output = match mode {
            OutputMode::Callback => {
                let (stream, stream_handle) =
                    OutputStream::try_default().context("Failed to open audio output")?;
                let (source, messages, state) = source_channel(mixer);
                stream_handle
                    .play_raw(source)
                    .context("Failed to start audio playback")?;
                Output::Callback {
                    messages,
                    state,
                    _stream: stream,
                    _stream_handle: stream_handle,
                }
            }
            OutputMode::Queued => Output::Queued {
                mixer,
                sink: QueueSink::new()?,
                scratch: vec![0; MAX_BUFFER_LEN],
            },
        };
        tracing::info!(?mode, sample_rate = SAMPLE_RATE, "audio output started");

        Ok(Self {
            output,
            track_count,
        })
    }

    /// Sends a control message to the mixer.
    ///
    /// In callback mode the message takes effect at the next rendered block.
    pub fn send(&mut self, message: Message) -> Result<(), SendError> {
        check_track(message, self.track_count)?;

        match &mut self.output {
            Output::Callback { messages, .. } => {
                tracing::debug!(?message, "queueing audio message");
                messages
                    .try_push(message.code())
                    .map_err(|_| SendError::QueueFull(message))
            }
            Output::Queued { mixer, .. } => Ok(mixer.handle_message(message)?),
        }
    }

    /// Renders and queues the audio due since the last call.
    ///
    /// Does nothing in callback mode, where the device pulls on its own.
    pub fn update(&mut self) -> Result<()> {
        if let Output::Queued {
            mixer,
            sink,
            scratch,
        } = &mut self.output
        {
            pump(mixer, sink, scratch)?;
        }
        Ok(())
    }

    /// Latest playback status. Lags the audio thread by at most one block.
    pub fn status(&self) -> PlaybackStatus {
        match &self.output {
            Output::Callback { state, .. } => state.snapshot(),
            Output::Queued { mixer, .. } => mixer.status(),
        }
    }

    pub fn track_count(&self) -> u16 {
        self.track_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::midi::test_support::{event, note_then_end, smf};
    use crate::midi::TrackReader;
    use std::thread;

    fn mixer(tracks: &[&[u8]]) -> Mixer {
        let reader = TrackReader::new(smf(tracks)).unwrap();
        Mixer::new(reader, &EngineConfig::default())
    }

    fn render_block(source: &mut SynthSource) -> Vec<f32> {
        source.by_ref().take(BLOCK_SIZE).collect()
    }

    #[test]
    fn test_source_is_mono_stream() {
        let (source, _, _) = source_channel(mixer(&[&note_then_end()]));
        assert_eq!(source.channels(), 1);
        assert_eq!(source.sample_rate(), SAMPLE_RATE);
        assert_eq!(source.total_duration(), None);
    }

    #[test]
    fn test_messages_apply_at_next_block() {
        let (mut source, mut messages, state) = source_channel(mixer(&[&note_then_end()]));
        assert!(render_block(&mut source).iter().all(|s| *s == 0.0));
        assert_eq!(state.snapshot().volume, 5);

        messages.try_push(Message::Play(0).code()).unwrap();
        messages.try_push(Message::VolumeUp.code()).unwrap();
        assert!(!state.snapshot().playing);

        assert!(render_block(&mut source).iter().all(|s| *s != 0.0));
        let status = state.snapshot();
        assert!(status.playing);
        assert_eq!(status.volume, 6);
        assert_eq!(status.clock, 1);

        messages.try_push(Message::Stop.code()).unwrap();
        assert!(render_block(&mut source).iter().all(|s| *s == 0.0));
        assert!(!state.snapshot().playing);
    }

    #[test]
    fn test_messages_arrive_while_rendering() {
        let (mut source, mut messages, state) = source_channel(mixer(&[&note_then_end()]));
        let done = Arc::new(AtomicBool::new(false));

        let audio = {
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut blocks = 0usize;
                while !done.load(Ordering::Relaxed) {
                    render_block(&mut source);
                    blocks += 1;
                }
                blocks
            })
        };

        let sent = [
            Message::Repeat(0),
            Message::VolumeUp,
            Message::VolumeUp,
            Message::VolumeUp,
        ];
        for message in sent {
            while messages.try_push(message.code()).is_err() {
                thread::yield_now();
            }
        }

        let mut seen = false;
        for _ in 0..100_000 {
            let status = state.snapshot();
            if status.volume == 8 && status.repeat == Some(0) {
                seen = true;
                break;
            }
            thread::yield_now();
        }
        done.store(true, Ordering::Relaxed);
        let blocks = audio.join().unwrap();

        assert!(seen);
        assert!(blocks > 0);
        assert!(state.snapshot().playing);
    }

    #[test]
    fn test_read_error_is_published() {
        let mut track = event(0, &[0x90, 60, 100]);
        track.extend(event(1, &[0x90, 64]));
        let (mut source, mut messages, state) = source_channel(mixer(&[&track]));

        messages.try_push(Message::Play(0).code()).unwrap();
        assert!(render_block(&mut source).iter().all(|s| *s == 0.0));

        let status = state.snapshot();
        assert!(!status.playing);
        assert!(matches!(
            status.last_error,
            Some(ReadError::UnexpectedEnd { .. })
        ));
    }

    #[test]
    fn test_status_round_trips_through_atomics() {
        let status = PlaybackStatus {
            playing: true,
            muted: true,
            volume: 3,
            clock: 1234,
            repeat: Some(7),
            last_error: Some(ReadError::UnexpectedEnd { offset: 99 }),
        };
        let state = SharedState::new(status);
        assert_eq!(state.snapshot(), status);

        state.publish(PlaybackStatus::default());
        assert_eq!(state.snapshot(), PlaybackStatus::default());
    }

    #[test]
    fn test_check_track() {
        assert!(check_track(Message::Play(0), 2).is_ok());
        assert!(check_track(Message::Repeat(1), 2).is_ok());
        assert!(check_track(Message::Stop, 0).is_ok());
        assert_eq!(
            check_track(Message::Play(2), 2),
            Err(InitError::TrackOutOfRange { id: 2, count: 2 })
        );
        // Ids past the 7-bit field would alias a lower track.
        assert!(check_track(Message::Play(130), 300).is_err());
        assert!(check_track(Message::Play(127), 300).is_ok());
    }
}
