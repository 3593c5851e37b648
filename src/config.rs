//! Engine and host settings.
//!
//! Settings are stored as JSON. Every field has a default, so a settings file
//! only needs to name the values it changes.

use crate::audio::mixer::{DEFAULT_VOLUME, MAX_BUFFER_LEN, MAX_VOLUME};
use crate::midi::SAMPLES_PER_TICK;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Parameters of the synthesis core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output samples per sequencer tick. Sets the playback speed.
    pub samples_per_tick: u32,
    /// Largest number of samples a single `generate` call will write.
    pub max_buffer_len: usize,
    /// Master volume at start-up, 0 to 10.
    pub volume: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            samples_per_tick: SAMPLES_PER_TICK,
            max_buffer_len: MAX_BUFFER_LEN,
            volume: DEFAULT_VOLUME,
        }
    }
}

impl EngineConfig {
    /// Returns a copy with out-of-range values pulled back into range.
    pub fn sanitized(&self) -> Self {
        Self {
            samples_per_tick: self.samples_per_tick.max(1),
            max_buffer_len: self.max_buffer_len.max(1),
            volume: self.volume.min(MAX_VOLUME),
        }
    }
}

/// How live playback reaches the audio device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// The device pulls buffers from the shared mixer on its own thread.
    #[default]
    Callback,
    /// The host loop renders in lock-step with wall-clock time and queues
    /// buffers on the device.
    Queued,
}

/// Sample format for rendered WAV files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    #[default]
    Int16,
    Float32,
}

/// Settings for the `amsound` host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub output: OutputMode,
    pub sample_format: SampleFormat,
    /// Upper bound on rendered length, in seconds.
    pub render_seconds: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            output: OutputMode::default(),
            sample_format: SampleFormat::default(),
            render_seconds: 300,
        }
    }
}

impl Settings {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Loads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not valid settings JSON
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
