//! Offline rendering to WAV files.
//!
//! A track is rendered by driving a private mixer through a [`WavSink`] until
//! the track ends or the length budget runs out.

use super::message::{Message, MAX_TRACKS};
use super::mixer::{Mixer, SAMPLE_RATE};
use super::sink::{pump, WavSample, WavSink};
use crate::config::{EngineConfig, SampleFormat};
use crate::midi::TrackReader;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// What to render and how.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub track: u16,
    /// Restart the track whenever it ends. Rendering then runs until the
    /// length budget is spent.
    pub repeat: bool,
    pub engine: EngineConfig,
    pub format: SampleFormat,
    /// Upper bound on rendered length.
    pub max_seconds: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            track: 0,
            repeat: false,
            engine: EngineConfig::default(),
            format: SampleFormat::default(),
            max_seconds: 300,
        }
    }
}

/// Outcome of a finished render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    pub samples: usize,
    /// Sequencer position when rendering stopped.
    pub ticks: u32,
    /// True when the track ended on its own rather than hitting the budget.
    pub completed: bool,
}

impl RenderStats {
    pub fn seconds(&self) -> f64 {
        self.samples as f64 / SAMPLE_RATE as f64
    }
}

/// Renders one track of `reader` to a mono WAV file.
///
/// # Arguments
///
/// * `reader` - Parsed file to render from
/// * `options` - Track, format, and length budget
/// * `output_path` - Path for the output WAV file
/// * `progress_callback` - Optional callback for progress updates (0.0 to 1.0
///   of the length budget)
///
/// # Errors
///
/// Returns error if:
/// - The track cannot be started
/// - Output file cannot be created or written
/// - The track data is truncated
pub fn render_track<P, F>(
    reader: &TrackReader,
    options: &RenderOptions,
    output_path: P,
    progress_callback: Option<F>,
) -> Result<RenderStats>
where
    P: AsRef<Path>,
    F: FnMut(f32),
{
    if options.track >= MAX_TRACKS {
        anyhow::bail!("Track {} cannot be addressed by a play message", options.track);
    }
    let message = if options.repeat {
        Message::Repeat(options.track as u8)
    } else {
        Message::Play(options.track as u8)
    };

    let mut mixer = Mixer::new(reader.clone(), &options.engine);
    mixer
        .handle_message(message)
        .with_context(|| format!("Failed to start track {}", options.track))?;

    let budget = options.max_seconds as usize * SAMPLE_RATE as usize;
    let path = output_path.as_ref();
    tracing::info!(track = options.track, path = %path.display(), "rendering");

    let stats = match options.format {
        SampleFormat::Int16 => {
            render_with::<i16, F>(&mut mixer, path, budget, options, progress_callback)?
        }
        SampleFormat::Float32 => {
            render_with::<f32, F>(&mut mixer, path, budget, options, progress_callback)?
        }
    };

    if let Some(err) = mixer.last_error() {
        return Err(err).with_context(|| format!("Track {} is malformed", options.track));
    }

    tracing::info!(
        track = options.track,
        samples = stats.samples,
        completed = stats.completed,
        "render finished"
    );
    Ok(stats)
}

fn render_with<S: WavSample, F: FnMut(f32)>(
    mixer: &mut Mixer,
    path: &Path,
    budget: usize,
    options: &RenderOptions,
    mut progress_callback: Option<F>,
) -> Result<RenderStats> {
    let mut sink = WavSink::<S>::create(path, budget)?;
    let mut scratch = vec![S::default(); options.engine.sanitized().max_buffer_len];

    while mixer.is_playing() && sink.remaining() > 0 {
        if pump(mixer, &mut sink, &mut scratch)? == 0 {
            break;
        }
        if let Some(ref mut callback) = progress_callback {
            callback(sink.written() as f32 / budget as f32);
        }
    }

    let completed = !mixer.is_playing();
    let samples = sink.finalize()?;
    Ok(RenderStats {
        samples,
        ticks: mixer.clock(),
        completed,
    })
}

/// Renders every track to `out_dir/track_NN.wav`, in parallel.
///
/// Returns the written paths in track order.
pub fn export_all<P: AsRef<Path>>(
    reader: &TrackReader,
    options: &RenderOptions,
    out_dir: P,
) -> Result<Vec<PathBuf>> {
    let out_dir = out_dir.as_ref();
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create directory: {}", out_dir.display()))?;

    let count = reader.track_count().min(MAX_TRACKS);
    (0..count)
        .into_par_iter()
        .map(|track| {
            let path = out_dir.join(format!("track_{:02}.wav", track));
            let options = RenderOptions {
                track,
                ..options.clone()
            };
            render_track(reader, &options, &path, None::<fn(f32)>)?;
            Ok(path)
        })
        .collect()
}
