//! A single synthesizer voice.
//!
//! Each voice is a square-wave oscillator with a slow clamped amplitude
//! envelope and an optional LFSR noise source, driven by MIDI channel-voice
//! messages.

use crate::midi::{MidiEvent, StatusType};

/// Upper bound of the envelope phase.
pub const ENV_CEILING: i32 = 32000;
/// Samples between envelope steps.
pub const ENV_RATE: u32 = 4;
/// Envelope phase units per output level.
const ENV_PREC: i32 = 1000;
/// Oscillator phase advance per sample.
const OSC_PREC: i32 = 100;
/// Pitch-bend value of an unbent wheel.
const BEND_CENTER: i32 = 0x2000;
const DEFAULT_NOTE: usize = 60;

/// Controller setting the envelope step.
pub const CC_ENVELOPE_STEP: u8 = 80;
/// Controller setting the noise period.
pub const CC_NOISE_PERIOD: u8 = 81;

const LFSR_SEED: u32 = 1;
/// Galois feedback mask for taps 17 and 14.
const LFSR_TAPS: u32 = (1 << 16) | (1 << 13);

/// Oscillator period for each MIDI note, in `OSC_PREC` units per sample at
/// 44.1 kHz.
pub const PERIOD_TABLE: [i32; 128] = [
    539397, 509123, 480548, 453577, 428120, 404091, 381411, 360004, 339799, 320727, 302726, 285736,
    269698, 254561, 240274, 226788, 214060, 202046, 190706, 180002, 169899, 160364, 151363, 142868,
    134849, 127281, 120137, 113394, 107030, 101023, 95353, 90001, 84950, 80182, 75682, 71434,
    67425, 63640, 60068, 56697, 53515, 50511, 47676, 45001, 42475, 40091, 37841, 35717, 33712,
    31820, 30034, 28349, 26757, 25256, 23838, 22500, 21237, 20045, 18920, 17858, 16856, 15910,
    15017, 14174, 13379, 12628, 11919, 11250, 10619, 10023, 9460, 8929, 8428, 7955, 7509, 7087,
    6689, 6314, 5960, 5625, 5309, 5011, 4730, 4465, 4214, 3978, 3754, 3544, 3345, 3157, 2980, 2813,
    2655, 2506, 2365, 2232, 2107, 1989, 1877, 1772, 1672, 1578, 1490, 1406, 1327, 1253, 1183, 1116,
    1054, 994, 939, 886, 836, 789, 745, 703, 664, 626, 591, 558, 527, 497, 469, 443, 418, 395, 372, 352,
];

/// 17-bit Galois linear-feedback shift register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lfsr {
    state: u32,
}

impl Lfsr {
    pub fn new(seed: u32) -> Self {
        // An all-zero register never leaves zero.
        let state = seed & 0x1_ffff;
        Self {
            state: if state == 0 { LFSR_SEED } else { state },
        }
    }

    /// Shifts once and returns the new output bit.
    pub fn clock(&mut self) -> bool {
        let out = self.state & 1;
        self.state >>= 1;
        if out != 0 {
            self.state ^= LFSR_TAPS;
        }
        self.bit()
    }

    pub fn bit(&self) -> bool {
        self.state & 1 != 0
    }

    pub fn state(&self) -> u32 {
        self.state
    }
}

impl Default for Lfsr {
    fn default() -> Self {
        Self::new(LFSR_SEED)
    }
}

/// Synthesis state for one of the three voices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    velocity: i32,
    osc_phase: i32,
    /// Period of the current note before pitch bend.
    base_period: i32,
    bend: i32,
    osc_period: i32,
    env_phase: i32,
    env_step: i32,
    noise: Lfsr,
    noise_count: u32,
    noise_period: u32,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            velocity: 0,
            osc_phase: 0,
            base_period: PERIOD_TABLE[DEFAULT_NOTE],
            bend: 0,
            osc_period: PERIOD_TABLE[DEFAULT_NOTE],
            env_phase: ENV_CEILING,
            env_step: 0,
            noise: Lfsr::default(),
            noise_count: 0,
            noise_period: 0,
        }
    }
}

impl Channel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a channel-voice message addressed to this voice.
    pub fn handle_event(&mut self, event: MidiEvent) {
        match event.kind() {
            Some(StatusType::NoteOff) => self.note_off(),
            Some(StatusType::NoteOn) if event.data2 == 0 => self.note_off(),
            Some(StatusType::NoteOn) => self.note_on(event.data1, event.data2),
            Some(StatusType::ControlChange) => self.control_change(event.data1, event.data2),
            Some(StatusType::PitchBend) => {
                let value = (event.data2 as i32) << 7 | event.data1 as i32;
                self.pitch_bend(value - BEND_CENTER);
            }
            _ => {}
        }
    }

    pub fn note_on(&mut self, note: u8, velocity: u8) {
        if velocity == 0 {
            self.note_off();
            return;
        }
        self.env_phase = if self.env_step > 0 { 0 } else { ENV_CEILING };
        self.base_period = PERIOD_TABLE[(note & 0x7f) as usize];
        self.apply_period();
        self.velocity = velocity as i32;
    }

    pub fn note_off(&mut self) {
        self.velocity = 0;
    }

    pub fn control_change(&mut self, controller: u8, value: u8) {
        match controller {
            CC_ENVELOPE_STEP => self.env_step = value as i32 - 64,
            CC_NOISE_PERIOD => {
                self.noise_period = value as u32;
                self.noise_count = 0;
            }
            _ => {}
        }
    }

    /// Offsets the oscillator period by a signed bend amount.
    pub fn pitch_bend(&mut self, bend: i32) {
        self.bend = bend;
        self.apply_period();
    }

    fn apply_period(&mut self) {
        self.osc_period = (self.base_period + self.bend).max(1);
    }

    /// Moves the envelope one step, staying within `[0, ENV_CEILING]`.
    pub fn advance_envelope(&mut self) {
        self.env_phase = (self.env_phase + self.env_step).clamp(0, ENV_CEILING);
    }

    /// Produces the next sample and advances the oscillator and noise source.
    pub fn sample(&mut self) -> i32 {
        self.osc_phase = (self.osc_phase + OSC_PREC) % self.osc_period;

        let high = if self.noise_period == 0 {
            self.osc_phase < self.osc_period / 2
        } else {
            self.noise_count += 1;
            if self.noise_count >= self.noise_period {
                self.noise_count = 0;
                self.noise.clock();
            }
            self.noise.bit()
        };

        let wave = if high { 1 } else { -1 };
        wave * (self.env_phase / ENV_PREC) * (self.velocity / 4)
    }

    pub fn silence(&mut self) {
        self.velocity = 0;
    }

    pub fn velocity(&self) -> i32 {
        self.velocity
    }

    pub fn envelope_phase(&self) -> i32 {
        self.env_phase
    }

    pub fn envelope_step(&self) -> i32 {
        self.env_step
    }

    pub fn period(&self) -> i32 {
        self.osc_period
    }

    pub fn noise_period(&self) -> u32 {
        self.noise_period
    }
}
