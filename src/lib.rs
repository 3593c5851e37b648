//! antimatter-sound - A three-voice square-wave MIDI music engine.
//!
//! Reads format 2 Standard MIDI Files from memory, sequences one track at a
//! time in step with the audio clock, and renders mono PCM on demand.

pub mod audio;
pub mod config;
pub mod midi;

// Re-export commonly used types
pub use audio::{AudioEngine, Message, Mixer};
pub use config::{EngineConfig, OutputMode, SampleFormat, Settings};
pub use midi::{InitError, ReadError, TrackReader};
