//! The synthesis core: sequencer, three voices, and master volume.
//!
//! `generate` is the only call made from the audio path. It never allocates
//! and never logs; everything else runs on the control side.

use super::channel::{Channel, ENV_RATE};
use super::message::Message;
use crate::config::EngineConfig;
use crate::midi::{InitError, MidiEvent, ReadError, Sequencer, TrackReader};

/// Output sample rate in Hz. The period table is tuned for this rate.
pub const SAMPLE_RATE: u32 = 44100;
/// Highest master volume.
pub const MAX_VOLUME: u8 = 10;
/// Master volume at start-up.
pub const DEFAULT_VOLUME: u8 = MAX_VOLUME / 2;
/// Default bound on samples written per `generate` call.
pub const MAX_BUFFER_LEN: usize = 1024;
/// Events dispatched per sample before the rest wait for the next sample.
/// Stops a repeating track made only of zero-delta events from spinning.
pub const MAX_EVENTS_PER_SAMPLE: usize = 64;
const VOICES: usize = 3;

/// A PCM sample type the mixer can render into.
pub trait PcmSample: Copy + Default + Send + 'static {
    /// Converts a mixed integer sample.
    fn from_mix(mix: i32) -> Self;
}

impl PcmSample for i16 {
    fn from_mix(mix: i32) -> Self {
        mix.clamp(i16::MIN as i32, i16::MAX as i32) as i16
    }
}

impl PcmSample for f32 {
    fn from_mix(mix: i32) -> Self {
        mix as f32 / 32768.0
    }
}

/// Playback state as seen from the control side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStatus {
    pub playing: bool,
    pub muted: bool,
    pub volume: u8,
    /// Sequencer position in ticks.
    pub clock: u32,
    pub repeat: Option<u16>,
    pub last_error: Option<ReadError>,
}

/// Owns playback state and renders PCM from it.
#[derive(Debug, Clone)]
pub struct Mixer {
    sequencer: Sequencer,
    channels: [Channel; VOICES],
    volume: u8,
    /// Volume saved by `ToggleMute`, present while muted.
    muted: Option<u8>,
    max_buffer_len: usize,
    /// Samples generated so far, paces the envelopes.
    sample_clock: u32,
}

impl Mixer {
    pub fn new(reader: TrackReader, config: &EngineConfig) -> Self {
        let config = config.sanitized();
        Self {
            sequencer: Sequencer::new(reader, config.samples_per_tick),
            channels: Default::default(),
            volume: config.volume,
            muted: None,
            max_buffer_len: config.max_buffer_len,
            sample_clock: 0,
        }
    }

    /// Applies a control message.
    ///
    /// # Errors
    ///
    /// Returns an `InitError` when a play request names a track that does not
    /// exist or cannot be started. Playback state is left stopped.
    pub fn handle_message(&mut self, message: Message) -> Result<(), InitError> {
        tracing::debug!(?message, "audio message");
        let was_playing = self.is_playing();
        let result = self.apply(message);
        match &result {
            Ok(()) => {
                if let Message::Play(track) | Message::Repeat(track) = message {
                    if !was_playing && self.is_playing() {
                        tracing::info!(track, repeat = self.repeat().is_some(), "playing track");
                    }
                }
            }
            Err(err) => tracing::warn!(?message, %err, "cannot start track"),
        }
        result
    }

    /// Applies a control message without logging.
    ///
    /// This is the entry point for the audio thread.
    pub fn apply(&mut self, message: Message) -> Result<(), InitError> {
        match message {
            Message::Stop => self.stop(),
            Message::ToggleMute => self.toggle_mute(),
            Message::VolumeDown => self.change_volume(-1),
            Message::VolumeUp => self.change_volume(1),
            Message::Play(track) => return self.play(track as u16, false),
            Message::Repeat(track) => return self.play(track as u16, true),
        }
        Ok(())
    }

    /// Decodes and applies an integer message code, ignoring unknown codes.
    pub fn handle_code(&mut self, code: u32) -> Result<(), InitError> {
        match Message::from_code(code) {
            Some(message) => self.handle_message(message),
            None => {
                tracing::warn!(code, "ignoring unknown audio message");
                Ok(())
            }
        }
    }

    fn play(&mut self, track: u16, repeat: bool) -> Result<(), InitError> {
        if self.sequencer.is_playing() {
            return Ok(());
        }

        self.channels = Default::default();
        self.sequencer.set_repeat(None);
        self.sequencer.play(track)?;
        if repeat {
            self.sequencer.set_repeat(Some(track));
        }
        Ok(())
    }

    /// Stops playback and silences every voice.
    pub fn stop(&mut self) {
        self.sequencer.stop();
        for channel in &mut self.channels {
            channel.silence();
        }
    }

    fn toggle_mute(&mut self) {
        match self.muted.take() {
            Some(saved) => self.volume = saved,
            None => {
                self.muted = Some(self.volume);
                self.volume = 0;
            }
        }
    }

    fn change_volume(&mut self, delta: i8) {
        if let Some(saved) = self.muted.take() {
            self.volume = saved;
        }
        self.volume = self
            .volume
            .saturating_add_signed(delta)
            .min(MAX_VOLUME);
    }

    /// Fills `out` with rendered samples.
    ///
    /// Writes at most `max_buffer_len` samples and returns how many were
    /// written.
    pub fn generate<S: PcmSample>(&mut self, out: &mut [S]) -> usize {
        let len = out.len().min(self.max_buffer_len);
        let volume = self.volume as i32;

        for slot in &mut out[..len] {
            let was_playing = self.sequencer.is_playing();
            for _ in 0..MAX_EVENTS_PER_SAMPLE {
                match self.sequencer.advance() {
                    Some(event) => self.dispatch(event),
                    None => break,
                }
            }
            // End of track, a substituted end, or a read error: nothing
            // will release notes still held.
            if was_playing && !self.sequencer.is_playing() {
                for channel in &mut self.channels {
                    channel.silence();
                }
            }

            if self.sample_clock % ENV_RATE == 0 {
                for channel in &mut self.channels {
                    channel.advance_envelope();
                }
            }
            self.sample_clock = self.sample_clock.wrapping_add(1);

            let mix: i32 = self.channels.iter_mut().map(Channel::sample).sum();
            *slot = S::from_mix(mix * volume);
        }

        len
    }

    fn dispatch(&mut self, event: MidiEvent) {
        if event.kind().is_some() {
            self.channels[event.voice()].handle_event(event);
        }
    }

    pub fn is_playing(&self) -> bool {
        self.sequencer.is_playing()
    }

    pub fn is_muted(&self) -> bool {
        self.muted.is_some()
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    /// Current sequencer position in ticks.
    pub fn clock(&self) -> u32 {
        self.sequencer.clock()
    }

    pub fn repeat(&self) -> Option<u16> {
        self.sequencer.repeat()
    }

    /// The read failure that last stopped playback, if any.
    pub fn last_error(&self) -> Option<ReadError> {
        self.sequencer.last_error()
    }

    pub fn track_count(&self) -> u16 {
        self.sequencer.reader().track_count()
    }

    /// Snapshot of what a host displays.
    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            playing: self.is_playing(),
            muted: self.is_muted(),
            volume: self.volume,
            clock: self.clock(),
            repeat: self.repeat(),
            last_error: self.last_error(),
        }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::channel::CC_ENVELOPE_STEP;
    use crate::midi::test_support::{end_of_track, event, melody, note_then_end, sequential_smf, smf};

    fn mixer(tracks: &[&[u8]]) -> Mixer {
        let reader = TrackReader::new(smf(tracks)).unwrap();
        Mixer::new(reader, &EngineConfig::default())
    }

    fn tune() -> Mixer {
        let data = sequential_smf(vec![
            melody(0, &[60, 64, 67, 72], 4),
            melody(1, &[48, 55], 8),
        ]);
        Mixer::new(TrackReader::new(data).unwrap(), &EngineConfig::default())
    }

    #[test]
    fn test_volume_is_clamped() {
        let mut m = mixer(&[&note_then_end()]);
        assert_eq!(m.volume(), DEFAULT_VOLUME);

        for _ in 0..20 {
            m.handle_message(Message::VolumeUp).unwrap();
        }
        assert_eq!(m.volume(), MAX_VOLUME);
        m.handle_message(Message::VolumeUp).unwrap();
        assert_eq!(m.volume(), MAX_VOLUME);

        let mut last = m.volume();
        for _ in 0..20 {
            m.handle_message(Message::VolumeDown).unwrap();
            assert!(m.volume() <= last);
            last = m.volume();
        }
        assert_eq!(m.volume(), 0);
    }

    #[test]
    fn test_mute_restores_volume() {
        let mut m = mixer(&[&note_then_end()]);
        m.handle_message(Message::VolumeUp).unwrap();
        m.handle_message(Message::VolumeUp).unwrap();
        assert_eq!(m.volume(), 7);

        m.handle_message(Message::ToggleMute).unwrap();
        assert!(m.is_muted());
        assert_eq!(m.volume(), 0);
        m.handle_message(Message::ToggleMute).unwrap();
        assert!(!m.is_muted());
        assert_eq!(m.volume(), 7);

        // Changing the volume while muted starts from the saved level.
        m.handle_message(Message::ToggleMute).unwrap();
        m.handle_message(Message::VolumeDown).unwrap();
        assert!(!m.is_muted());
        assert_eq!(m.volume(), 6);
    }

    #[test]
    fn test_muted_output_is_silent_but_keeps_time() {
        let mut m = mixer(&[&note_then_end()]);
        m.handle_message(Message::Play(0)).unwrap();
        m.handle_message(Message::ToggleMute).unwrap();

        let mut buf = [1i16; 512];
        assert_eq!(m.generate(&mut buf), 512);
        assert!(buf.iter().all(|&s| s == 0));
        assert_eq!(m.clock(), 2);
    }

    #[test]
    fn test_play_renders_sound() {
        let mut m = mixer(&[&note_then_end()]);
        let mut buf = [0i16; 256];
        m.generate(&mut buf);
        assert!(buf.iter().all(|&s| s == 0));

        m.handle_message(Message::Play(0)).unwrap();
        assert!(m.is_playing());
        m.generate(&mut buf);
        let peak = 32 * (100 / 4) * DEFAULT_VOLUME as i16;
        assert!(buf.iter().all(|&s| s.abs() == peak));
    }

    #[test]
    fn test_note_off_silences_within_one_step() {
        let mut track = event(0, &[0x90, 60, 100]);
        track.extend(event(1, &[0x80, 60, 0]));
        track.extend(event(1, &[0x90, 64, 100]));
        track.extend(event(1, &[0x90, 64, 0]));
        track.extend(end_of_track(5));
        let mut m = mixer(&[&track]);
        m.handle_message(Message::Play(0)).unwrap();

        let mut buf = vec![0i16; 800];
        m.generate(&mut buf);
        // Draining an event costs one extra sequencer step, so each later
        // tick lands one sample early: note-off at index 198, the second
        // note at 397 and its zero-velocity note-on at 596.
        assert!(buf[..198].iter().all(|&s| s != 0));
        assert!(buf[198..397].iter().all(|&s| s == 0));
        assert!(buf[397..596].iter().all(|&s| s != 0));
        assert!(buf[596..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_stop_silences_voices() {
        let mut m = mixer(&[&note_then_end()]);
        m.handle_message(Message::Play(0)).unwrap();
        let mut buf = [0i16; 64];
        m.generate(&mut buf);
        assert!(buf.iter().any(|&s| s != 0));

        m.handle_message(Message::Stop).unwrap();
        assert!(!m.is_playing());
        assert!(m.channels().iter().all(|c| c.velocity() == 0));
        m.generate(&mut buf);
        assert!(buf.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_play_resets_voices_and_is_ignored_while_playing() {
        let mut track = event(0, &[0xb0, CC_ENVELOPE_STEP, 100]);
        track.extend(event(0, &[0x90, 60, 100]));
        track.extend(end_of_track(50));
        let other = note_then_end();
        let mut m = mixer(&[&track, &other]);

        m.handle_message(Message::Play(0)).unwrap();
        let mut buf = [0i16; 16];
        m.generate(&mut buf);
        assert_eq!(m.channels()[0].envelope_step(), 36);

        m.handle_message(Message::Play(1)).unwrap();
        assert_eq!(m.channels()[0].envelope_step(), 36);

        m.handle_message(Message::Stop).unwrap();
        m.handle_message(Message::Play(1)).unwrap();
        assert_eq!(m.channels()[0].envelope_step(), 0);
    }

    #[test]
    fn test_out_of_range_play() {
        let mut m = mixer(&[&note_then_end()]);
        assert_eq!(
            m.handle_message(Message::Play(4)),
            Err(InitError::TrackOutOfRange { id: 4, count: 1 })
        );
        assert!(!m.is_playing());
        assert!(m.handle_code(0x999).is_ok());
    }

    #[test]
    fn test_repeat_keeps_playing() {
        let mut track = event(0, &[0x90, 60, 100]);
        track.extend(event(4, &[0x80, 60, 0]));
        track.extend(end_of_track(10));
        let mut m = mixer(&[&track]);
        m.handle_message(Message::Repeat(0)).unwrap();
        assert_eq!(m.repeat(), Some(0));

        let mut buf = vec![0i16; 1024];
        for _ in 0..10 {
            m.generate(&mut buf);
        }
        assert!(m.is_playing());
        assert!(m.clock() <= 4);

        m.handle_message(Message::Stop).unwrap();
        assert_eq!(m.repeat(), None);
    }

    #[test]
    fn test_substituted_end_silences_held_note() {
        let mut track = event(0, &[0x90, 60, 100]);
        track.extend(event(2, &[0xf0, 0x01]));
        let mut m = mixer(&[&track]);
        m.handle_message(Message::Play(0)).unwrap();

        let mut out = Vec::new();
        let mut chunk = [0i16; 1024];
        for _ in 0..4 {
            let n = m.generate(&mut chunk);
            out.extend_from_slice(&chunk[..n]);
        }

        assert!(!m.is_playing());
        assert!(out[..64].iter().all(|&s| s != 0));
        assert!(out[2048..].iter().all(|&s| s == 0));
        assert!(m.channels().iter().all(|c| c.velocity() == 0));
    }

    #[test]
    fn test_truncated_track_silences_held_note() {
        let mut track = event(0, &[0x90, 60, 100]);
        track.extend(event(2, &[0x90, 64]));
        let mut m = mixer(&[&track]);
        m.handle_message(Message::Play(0)).unwrap();

        let mut buf = [0i16; 1024];
        m.generate(&mut buf);

        assert!(!m.is_playing());
        assert!(matches!(m.last_error(), Some(ReadError::UnexpectedEnd { .. })));
        assert!(buf.iter().all(|&s| s == 0));
        assert!(m.channels().iter().all(|c| c.velocity() == 0));
        assert_eq!(m.status().last_error, m.last_error());
    }

    #[test]
    fn test_natural_end_silences_voices() {
        let mut m = mixer(&[&note_then_end()]);
        m.handle_message(Message::Play(0)).unwrap();

        let mut buf = vec![0i16; 3000];
        m.generate(&mut buf[..1024]);
        m.generate(&mut buf[1024..2048]);
        m.generate(&mut buf[2048..]);
        assert!(!m.is_playing());
        assert!(buf[2100..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_status_snapshot() {
        let mut m = mixer(&[&note_then_end()]);
        m.handle_message(Message::Repeat(0)).unwrap();
        m.handle_message(Message::ToggleMute).unwrap();

        let status = m.status();
        assert!(status.playing);
        assert!(status.muted);
        assert_eq!(status.volume, 0);
        assert_eq!(status.repeat, Some(0));
        assert_eq!(status.last_error, None);
    }

    #[test]
    fn test_zero_delta_loop_is_bounded() {
        let mut track = event(0, &[0x90, 60, 100]);
        track.extend(end_of_track(0));
        let mut m = mixer(&[&track]);
        m.handle_message(Message::Repeat(0)).unwrap();

        let mut buf = [0i16; 32];
        assert_eq!(m.generate(&mut buf), 32);
        assert!(m.is_playing());
    }

    #[test]
    fn test_generate_respects_max_buffer_len() {
        let reader = TrackReader::new(smf(&[&note_then_end()])).unwrap();
        let config = EngineConfig {
            max_buffer_len: 100,
            ..EngineConfig::default()
        };
        let mut m = Mixer::new(reader, &config);
        let mut buf = [7i16; 150];
        assert_eq!(m.generate(&mut buf), 100);
        assert!(buf[100..].iter().all(|&s| s == 7));
    }

    #[test]
    fn test_float_output_matches_integer_output() {
        let mut a = tune();
        let mut b = tune();
        a.handle_message(Message::Play(0)).unwrap();
        b.handle_message(Message::Play(0)).unwrap();

        let mut ints = vec![0i16; 1024];
        let mut floats = vec![0f32; 1024];
        a.generate(&mut ints);
        b.generate(&mut floats);

        for (i, f) in ints.iter().zip(&floats) {
            assert_eq!(*f, *i as f32 / 32768.0);
            assert!(f.abs() <= 1.0);
        }
    }

    #[test]
    fn test_output_is_deterministic_across_chunking() {
        let mut whole = tune();
        let mut chunked = tune();
        for m in [&mut whole, &mut chunked] {
            m.handle_message(Message::Play(1)).unwrap();
            m.handle_message(Message::VolumeUp).unwrap();
        }

        let mut expected = vec![0i16; 4000];
        let mut written = 0;
        while written < expected.len() {
            written += whole.generate(&mut expected[written..]);
        }

        let mut actual = Vec::new();
        let mut chunk = [0i16; 37];
        while actual.len() < expected.len() {
            let n = chunked.generate(&mut chunk);
            actual.extend_from_slice(&chunk[..n]);
        }
        actual.truncate(expected.len());

        assert_eq!(actual, expected);
        assert!(expected.iter().any(|&s| s != 0));
    }

    #[test]
    fn test_voices_mix_together() {
        let mut track = event(0, &[0x90, 60, 100]);
        track.extend(event(0, &[0x91, 60, 100]));
        track.extend(event(0, &[0x95, 60, 100]));
        track.extend(end_of_track(10));
        let mut m = mixer(&[&track]);
        m.handle_message(Message::Play(0)).unwrap();

        let mut buf = [0i16; 8];
        m.generate(&mut buf);
        let single = 32 * 25 * DEFAULT_VOLUME as i16;
        assert!(buf.iter().all(|&s| s.abs() == 3 * single));
        assert!(m.channels().iter().all(|c| c.velocity() == 100));
    }
}
