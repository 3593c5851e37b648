//! Three-voice synthesis and audio output.
//!
//! This module turns sequenced MIDI events into mono PCM:
//! - Square-wave voices with envelopes, pitch bend, and LFSR noise
//! - A mixer driven by integer control messages
//! - Live output through rodio, either device-pulled or host-queued
//! - Offline WAV rendering

pub mod channel;
pub mod engine;
pub mod export;
pub mod message;
pub mod mixer;
pub mod sink;

pub use engine::{AudioEngine, SendError};
pub use export::{export_all, render_track, RenderOptions, RenderStats};
pub use message::Message;
pub use mixer::{Mixer, PcmSample, PlaybackStatus, SAMPLE_RATE};
pub use sink::{pump, AudioSink, QueueSink, WavSink};
