//! Fixture builders for MIDI tests.

use midly::num::{u15, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

/// Encodes a value as a MIDI variable-length quantity.
pub fn encode_variable_length(mut value: u32) -> Vec<u8> {
    let mut bytes = vec![(value & 0x7f) as u8];
    value >>= 7;
    while value > 0 {
        bytes.push((value & 0x7f) as u8 | 0x80);
        value >>= 7;
    }
    bytes.reverse();
    bytes
}

/// Builds an SMF with a raw header and raw track payloads.
pub fn smf_with_header(format: u16, division: u16, tracks: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&format.to_be_bytes());
    out.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    out.extend_from_slice(&division.to_be_bytes());
    for track in tracks {
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&(track.len() as u32).to_be_bytes());
        out.extend_from_slice(track);
    }
    out
}

/// Builds a format 2 SMF from raw track payloads.
pub fn smf(tracks: &[&[u8]]) -> Vec<u8> {
    smf_with_header(2, 96, tracks)
}

/// Raw payload for one channel event preceded by its delta.
pub fn event(delta: u32, bytes: &[u8]) -> Vec<u8> {
    let mut out = encode_variable_length(delta);
    out.extend_from_slice(bytes);
    out
}

/// Raw end-of-track meta event preceded by its delta.
pub fn end_of_track(delta: u32) -> Vec<u8> {
    event(delta, &[0xff, 0x2f, 0x00])
}

/// The two-event track used throughout the timing tests: note-on(60, 100)
/// at delta 0, then end-of-track 10 ticks later.
pub fn note_then_end() -> Vec<u8> {
    let mut track = event(0, &[0x90, 60, 100]);
    track.extend(end_of_track(10));
    track
}

/// A simple melody on the given MIDI channel, written with midly.
pub fn melody(channel: u8, notes: &[u8], ticks_per_note: u32) -> Vec<midly::TrackEvent<'static>> {
    let ch = u4::new(channel);
    let mut events = Vec::new();
    for &note in notes {
        events.push(midly::TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel: ch,
                message: MidiMessage::NoteOn {
                    key: u7::new(note),
                    vel: u7::new(100),
                },
            },
        });
        events.push(midly::TrackEvent {
            delta: u28::new(ticks_per_note),
            kind: TrackEventKind::Midi {
                channel: ch,
                message: MidiMessage::NoteOff {
                    key: u7::new(note),
                    vel: u7::new(0),
                },
            },
        });
    }
    events.push(midly::TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    events
}

/// Serializes tracks into a format 2 (sequential) SMF using midly.
pub fn sequential_smf(tracks: Vec<Vec<midly::TrackEvent<'static>>>) -> Vec<u8> {
    let mut smf = Smf::new(Header::new(
        Format::Sequential,
        Timing::Metrical(u15::new(96)),
    ));
    smf.tracks = tracks;
    let mut out = Vec::new();
    smf.write_std(&mut out).expect("write to Vec cannot fail");
    out
}
