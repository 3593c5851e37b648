//! Playback state for a single active track.
//!
//! The sequencer is advanced once per generated sample. Every
//! `samples_per_tick` calls the clock moves forward one tick, and events are
//! released as their delta times elapse.

use super::cursor::ReadError;
use super::reader::{InitError, TrackReader};
use super::MidiEvent;

/// Walks one track of a [`TrackReader`] in step with audio time.
#[derive(Debug, Clone)]
pub struct Sequencer {
    reader: TrackReader,
    samples_per_tick: u32,
    playing: bool,
    /// Track restarted automatically when the current one ends.
    repeat: Option<u16>,
    /// Samples elapsed within the current tick.
    count: u32,
    clock: u32,
    /// Tick at which `pending` becomes due.
    next: u32,
    pending: MidiEvent,
    last_error: Option<ReadError>,
}

impl Sequencer {
    /// Creates an idle sequencer over `reader`.
    ///
    /// A `samples_per_tick` of zero is treated as one.
    pub fn new(reader: TrackReader, samples_per_tick: u32) -> Self {
        Self {
            reader,
            samples_per_tick: samples_per_tick.max(1),
            playing: false,
            repeat: None,
            count: 0,
            clock: 0,
            next: 0,
            pending: MidiEvent::default(),
            last_error: None,
        }
    }

    /// Starts a track from its first event.
    ///
    /// Does nothing while a track is already playing.
    pub fn play(&mut self, track_id: u16) -> Result<(), InitError> {
        if self.playing {
            return Ok(());
        }
        self.start(track_id)
    }

    fn start(&mut self, track_id: u16) -> Result<(), InitError> {
        self.reader.select_track(track_id)?;
        let first = match self.reader.read_event() {
            Ok(first) => first,
            Err(err) => {
                self.playing = false;
                self.last_error = Some(err);
                return Err(err.into());
            }
        };

        self.count = 0;
        self.clock = 0;
        self.next = first.delta;
        self.pending = first.event;
        self.playing = !first.event.is_end_of_track();
        self.last_error = None;
        Ok(())
    }

    /// Stops playback and forgets the repeat target.
    pub fn stop(&mut self) {
        self.playing = false;
        self.repeat = None;
    }

    /// Sets the track to restart when the current one reaches its end.
    pub fn set_repeat(&mut self, track_id: Option<u16>) {
        self.repeat = track_id;
    }

    pub fn repeat(&self) -> Option<u16> {
        self.repeat
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Current position in ticks.
    pub fn clock(&self) -> u32 {
        self.clock
    }

    /// Tick at which the pending event is released.
    pub fn next_event_time(&self) -> u32 {
        self.next
    }

    /// The read failure that last stopped playback, if any.
    pub fn last_error(&self) -> Option<ReadError> {
        self.last_error
    }

    pub fn reader(&self) -> &TrackReader {
        &self.reader
    }

    /// Advances by one sample and returns the event that became due, if any.
    ///
    /// Call repeatedly until `None` to drain every event landing on the same
    /// sample. An event is reported on the first call at which its tick has
    /// been reached, one tick after the previous event was read. End-of-track
    /// is reported once and stops playback, unless a repeat target restarts
    /// the track as soon as its end is read.
    pub fn advance(&mut self) -> Option<MidiEvent> {
        self.count = (self.count + 1) % self.samples_per_tick;
        let now = self.clock.saturating_add(u32::from(self.count == 0));

        if !self.playing || now < self.next {
            self.clock = now;
            return None;
        }

        let due = self.pending;
        self.clock = self.next;

        if due.is_end_of_track() {
            self.playing = false;
            return Some(due);
        }

        match self.reader.read_event() {
            Ok(next) => {
                self.next = self.next.saturating_add(next.delta);
                self.pending = next.event;

                if next.event.is_end_of_track() {
                    if let Some(track_id) = self.repeat {
                        self.restart(track_id);
                    }
                }
            }
            Err(err) => {
                self.playing = false;
                self.last_error = Some(err);
            }
        }

        Some(due)
    }

    fn restart(&mut self, track_id: u16) {
        if self.start(track_id).is_err() {
            self.playing = false;
            self.repeat = None;
        }
    }
}
