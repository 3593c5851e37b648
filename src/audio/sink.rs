//! Destinations for rendered audio.
//!
//! An [`AudioSink`] reports how many samples it wants and accepts rendered
//! buffers. The mixer knows nothing about sinks; [`pump`] moves samples from
//! one to the other through a caller-owned scratch buffer.

use super::mixer::{Mixer, PcmSample, SAMPLE_RATE};
use anyhow::{Context, Result};
use hound::{WavSpec, WavWriter};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::{Duration, Instant};

/// Largest backlog a queued sink will catch up on at once.
/// Longer stalls (a suspended process, a debugger) are dropped, not replayed.
const MAX_LAG: Duration = Duration::from_millis(800);

/// Samples rendered per WAV write.
const RENDER_BLOCK: usize = 4096;

/// Something that consumes rendered PCM.
pub trait AudioSink {
    type Sample: PcmSample;

    /// Number of samples the sink is ready to take right now.
    fn samples_needed(&mut self) -> usize;

    /// Hands a rendered buffer to the sink.
    fn queue(&mut self, samples: &[Self::Sample]) -> Result<()>;
}

/// Renders as many samples as `sink` asks for and hands them over.
///
/// Returns the number of samples delivered.
pub fn pump<K: AudioSink>(
    mixer: &mut Mixer,
    sink: &mut K,
    scratch: &mut [K::Sample],
) -> Result<usize> {
    let mut remaining = sink.samples_needed();
    let mut delivered = 0;

    while remaining > 0 {
        let len = remaining.min(scratch.len());
        let written = mixer.generate(&mut scratch[..len]);
        if written == 0 {
            break;
        }
        sink.queue(&scratch[..written])?;
        remaining -= written;
        delivered += written;
    }

    Ok(delivered)
}

/// Queues buffers on a rodio sink in lock-step with wall-clock time.
///
/// Each call to `samples_needed` reports the samples worth of time elapsed
/// since the previous call, carrying the sub-sample remainder forward.
pub struct QueueSink {
    /// Audio output stream (must be kept alive).
    _stream: OutputStream,
    sink: Sink,
    prev: Instant,
    /// Elapsed time not yet converted into samples, in microseconds.
    carry_us: u64,
}

impl QueueSink {
    /// Opens the default output device.
    pub fn new() -> Result<Self> {
        let (stream, handle) =
            OutputStream::try_default().context("Failed to open audio output")?;
        let sink = Sink::try_new(&handle).context("Failed to create audio sink")?;

        Ok(Self {
            _stream: stream,
            sink,
            prev: Instant::now(),
            carry_us: 0,
        })
    }

    /// Number of buffers waiting to be played.
    pub fn queued(&self) -> usize {
        self.sink.len()
    }
}

impl AudioSink for QueueSink {
    type Sample = i16;

    fn samples_needed(&mut self) -> usize {
        let now = Instant::now();
        let elapsed = now.duration_since(self.prev).min(MAX_LAG);
        self.prev = now;

        let total_us = elapsed.as_micros() as u64 + self.carry_us;
        let samples = total_us * SAMPLE_RATE as u64 / 1_000_000;
        self.carry_us = total_us - samples * 1_000_000 / SAMPLE_RATE as u64;
        samples as usize
    }

    fn queue(&mut self, samples: &[i16]) -> Result<()> {
        self.sink
            .append(SamplesBuffer::new(1, SAMPLE_RATE, samples.to_vec()));
        Ok(())
    }
}

/// Writes rendered audio to a mono WAV file, up to a fixed sample budget.
pub struct WavSink<S> {
    writer: WavWriter<BufWriter<File>>,
    remaining: usize,
    written: usize,
    _sample: std::marker::PhantomData<S>,
}

/// Sample types that can be written to a WAV file.
pub trait WavSample: PcmSample + hound::Sample {
    fn spec() -> WavSpec;
}

impl WavSample for i16 {
    fn spec() -> WavSpec {
        WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }
}

impl WavSample for f32 {
    fn spec() -> WavSpec {
        WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        }
    }
}

impl<S: WavSample> WavSink<S> {
    /// Creates the output file, accepting at most `budget` samples.
    pub fn create<P: AsRef<Path>>(path: P, budget: usize) -> Result<Self> {
        let writer = WavWriter::create(path.as_ref(), S::spec()).with_context(|| {
            format!(
                "Failed to create output WAV file: {}",
                path.as_ref().display()
            )
        })?;

        Ok(Self {
            writer,
            remaining: budget,
            written: 0,
            _sample: std::marker::PhantomData,
        })
    }

    /// Samples still accepted before the budget runs out.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Flushes the header and closes the file.
    pub fn finalize(self) -> Result<usize> {
        let written = self.written;
        self.writer
            .finalize()
            .context("Failed to finalize WAV file")?;
        Ok(written)
    }
}

impl<S: WavSample> AudioSink for WavSink<S> {
    type Sample = S;

    fn samples_needed(&mut self) -> usize {
        self.remaining.min(RENDER_BLOCK)
    }

    fn queue(&mut self, samples: &[S]) -> Result<()> {
        let samples = &samples[..samples.len().min(self.remaining)];
        for &sample in samples {
            self.writer.write_sample(sample)?;
        }
        self.remaining -= samples.len();
        self.written += samples.len();
        Ok(())
    }
}
