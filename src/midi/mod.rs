//! Standard MIDI File track reading and sequencing.
//!
//! The reader never materializes a track: events are decoded one at a time
//! straight out of the shared byte buffer while the sequencer walks the track
//! in step with generated audio.

mod cursor;
mod reader;
mod sequencer;

#[cfg(test)]
pub(crate) mod test_support;

pub use cursor::{ByteCursor, ReadError};
pub use reader::{InitError, TrackReader, TrackSummary};
pub use sequencer::Sequencer;

/// Number of output samples per sequencer tick.
///
/// Playback speed is governed by this rate, not by the file's division.
pub const SAMPLES_PER_TICK: u32 = 200;

/// Status values understood by the engine.
///
/// Channel-voice kinds are compared against the high nibble of the status
/// byte. `EndOfTrack` is the meta type surfaced as a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusType {
    NoteOff = 0x80,
    NoteOn = 0x90,
    PolyAftertouch = 0xa0,
    ControlChange = 0xb0,
    ProgramChange = 0xc0,
    ChannelAftertouch = 0xd0,
    PitchBend = 0xe0,
    EndOfTrack = 0x2f,
}

impl StatusType {
    /// Classifies a channel-voice status byte by its high nibble.
    pub fn from_channel_status(status: u8) -> Option<Self> {
        match status & 0xf0 {
            0x80 => Some(Self::NoteOff),
            0x90 => Some(Self::NoteOn),
            0xa0 => Some(Self::PolyAftertouch),
            0xb0 => Some(Self::ControlChange),
            0xc0 => Some(Self::ProgramChange),
            0xd0 => Some(Self::ChannelAftertouch),
            0xe0 => Some(Self::PitchBend),
            _ => None,
        }
    }

    /// Number of data bytes following a channel-voice status.
    pub fn data_len(self) -> usize {
        match self {
            Self::ProgramChange | Self::ChannelAftertouch => 1,
            Self::EndOfTrack => 0,
            _ => 2,
        }
    }
}

/// A single decoded MIDI message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MidiEvent {
    /// Channel-voice status byte, or a meta type for meta events.
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl MidiEvent {
    pub const END_OF_TRACK: MidiEvent = MidiEvent {
        status: StatusType::EndOfTrack as u8,
        data1: 0,
        data2: 0,
    };

    pub fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            status,
            data1,
            data2,
        }
    }

    pub fn is_end_of_track(&self) -> bool {
        self.status == StatusType::EndOfTrack as u8
    }

    /// The kind of channel-voice message, if this is one.
    pub fn kind(&self) -> Option<StatusType> {
        StatusType::from_channel_status(self.status)
    }

    /// Voice index this event targets, folding all 16 MIDI channels onto the
    /// three available voices.
    pub fn voice(&self) -> usize {
        (self.status & 0x0f) as usize % 3
    }
}

/// An event together with its delta time in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackEvent {
    pub delta: u32,
    pub event: MidiEvent,
}

/// Standard MIDI note names for display purposes.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Converts a MIDI note number to a name with octave, e.g. "C4" for 60.
pub fn note_to_name(note: u8) -> String {
    let octave = (note / 12) as i8 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", NOTE_NAMES[note_index], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_to_name() {
        assert_eq!(note_to_name(60), "C4");
        assert_eq!(note_to_name(69), "A4");
        assert_eq!(note_to_name(0), "C-1");
        assert_eq!(note_to_name(127), "G9");
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            StatusType::from_channel_status(0x93),
            Some(StatusType::NoteOn)
        );
        assert_eq!(
            StatusType::from_channel_status(0xcf),
            Some(StatusType::ProgramChange)
        );
        assert_eq!(StatusType::from_channel_status(0xf0), None);
        assert_eq!(StatusType::from_channel_status(0x2f), None);
        assert_eq!(StatusType::PitchBend.data_len(), 2);
        assert_eq!(StatusType::ChannelAftertouch.data_len(), 1);
    }

    #[test]
    fn test_voice_folding() {
        let voices: Vec<usize> = (0x90..=0x9f)
            .map(|status| MidiEvent::new(status, 60, 100).voice())
            .collect();
        assert_eq!(&voices[..6], &[0, 1, 2, 0, 1, 2]);
        assert!(voices.iter().all(|&v| v < 3));
        assert!(MidiEvent::END_OF_TRACK.is_end_of_track());
        assert_eq!(MidiEvent::END_OF_TRACK.kind(), None);
    }
}
