//! Format 2 Standard MIDI File reader.
//!
//! Construction validates the header and indexes the byte offset of every
//! track chunk. Events are then decoded lazily, one per call, from whichever
//! track is currently selected.

use super::cursor::{ByteCursor, ReadError};
use super::{MidiEvent, StatusType, TrackEvent};
use std::sync::Arc;
use thiserror::Error;

const HEADER_MAGIC: u32 = 0x4d54_6864; // "MThd"
const TRACK_MAGIC: u32 = 0x4d54_726b; // "MTrk"
const HEADER_LEN: u32 = 6;
const SEQUENTIAL_FORMAT: u16 = 2;
const CHUNK_HEADER_LEN: usize = 8;
const META_EVENT: u8 = 0xff;

/// Errors that prevent a reader from being built or a track from being
/// selected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("invalid midi header: missing MThd magic")]
    BadMagic,
    #[error("invalid midi header: length {0}, expected 6")]
    BadHeaderLength(u32),
    #[error("invalid midi format {0}, only format 2 is supported")]
    UnsupportedFormat(u16),
    #[error("midi file declares no tracks")]
    NoTracks,
    #[error("midi file declares a zero time division")]
    ZeroDivision,
    #[error("invalid header for track {index}")]
    BadTrackHeader { index: usize },
    #[error("track {id} out of range, file has {count} tracks")]
    TrackOutOfRange { id: u16, count: u16 },
    #[error("truncated midi data: {0}")]
    Read(#[from] ReadError),
}

/// Summary of a single track, gathered by walking it to its end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackSummary {
    /// Events read, including the final end-of-track.
    pub events: usize,
    pub note_ons: usize,
    /// Length of the track in ticks.
    pub ticks: u64,
    /// Lowest and highest sounding note, if any note-on was seen.
    pub note_range: Option<(u8, u8)>,
    /// Whether the walk ended on an end-of-track event rather than an error.
    pub terminated: bool,
}

/// Lazy event decoder over an indexed format 2 MIDI file.
///
/// Cloning is cheap: the byte buffer and the track index are shared, each
/// clone has its own cursor and running status.
#[derive(Debug, Clone)]
pub struct TrackReader {
    cursor: ByteCursor,
    tracks: Arc<[usize]>,
    division: u16,
    running_status: Option<u8>,
}

impl TrackReader {
    /// Validates and indexes a format 2 MIDI file.
    ///
    /// # Errors
    ///
    /// Returns an `InitError` if the header or any track chunk header is
    /// malformed, or if a chunk runs past the end of the data.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Result<Self, InitError> {
        let mut cursor = ByteCursor::new(data.into());

        if cursor.read_u32().map_err(|_| InitError::BadMagic)? != HEADER_MAGIC {
            return Err(InitError::BadMagic);
        }

        let header_len = cursor.read_u32()?;
        if header_len != HEADER_LEN {
            return Err(InitError::BadHeaderLength(header_len));
        }

        let format = cursor.read_u16()?;
        if format != SEQUENTIAL_FORMAT {
            return Err(InitError::UnsupportedFormat(format));
        }

        let track_count = cursor.read_u16()?;
        if track_count == 0 {
            return Err(InitError::NoTracks);
        }

        let division = cursor.read_u16()?;
        if division == 0 {
            return Err(InitError::ZeroDivision);
        }

        let tracks = scan_for_tracks(&mut cursor, track_count)?;
        tracing::debug!(tracks = tracks.len(), division, "indexed midi tracks");

        Ok(Self {
            cursor,
            tracks: tracks.into(),
            division,
            running_status: None,
        })
    }

    pub fn track_count(&self) -> u16 {
        self.tracks.len() as u16
    }

    /// Time division from the header. Validated but not used for timing.
    pub fn division(&self) -> u16 {
        self.division
    }

    /// Positions the reader at the start of a track.
    ///
    /// The read bound becomes the next track's chunk header, or the end of
    /// the data for the last track. Running status is cleared.
    pub fn select_track(&mut self, id: u16) -> Result<(), InitError> {
        let index = id as usize;
        let start = *self.tracks.get(index).ok_or(InitError::TrackOutOfRange {
            id,
            count: self.track_count(),
        })?;

        let end = match self.tracks.get(index + 1) {
            Some(next) => next - CHUNK_HEADER_LEN,
            None => usize::MAX,
        };

        self.cursor.seek(start, end);
        self.running_status = None;
        Ok(())
    }

    /// Decodes the next event of the selected track.
    ///
    /// Meta events surface their type as the status so end-of-track can be
    /// detected; their payload is skipped. Unrecognized channel statuses are
    /// reported as end-of-track.
    pub fn read_event(&mut self) -> Result<TrackEvent, ReadError> {
        let delta = self.cursor.read_variable_length()?;
        let byte = self.cursor.read_u8()?;

        let event = if byte == META_EVENT {
            self.running_status = None;
            self.read_meta()?
        } else if byte & 0x80 != 0 {
            self.running_status = Some(byte);
            let data1 = self.cursor.read_u8()?;
            self.read_channel_message(data1)?
        } else {
            self.read_channel_message(byte)?
        };

        Ok(TrackEvent { delta, event })
    }

    fn read_channel_message(&mut self, first: u8) -> Result<MidiEvent, ReadError> {
        let status = self.running_status.unwrap_or(0);
        let Some(kind) = StatusType::from_channel_status(status) else {
            self.running_status = Some(StatusType::EndOfTrack as u8);
            return Ok(MidiEvent::END_OF_TRACK);
        };

        let data1 = first & 0x7f;
        let data2 = if kind.data_len() == 2 {
            self.cursor.read_u8()? & 0x7f
        } else {
            0
        };

        Ok(MidiEvent::new(status, data1, data2))
    }

    fn read_meta(&mut self) -> Result<MidiEvent, ReadError> {
        let meta_type = self.cursor.read_u8()?;
        let len = self.cursor.read_variable_length()?;
        self.cursor.skip(len as usize)?;
        Ok(MidiEvent::new(meta_type, 0, 0))
    }

    /// Walks a whole track and reports what it contains.
    ///
    /// Leaves the reader positioned wherever the walk stopped; select a track
    /// again before playing from it.
    pub fn summarize(&mut self, id: u16) -> Result<TrackSummary, InitError> {
        self.select_track(id)?;
        let mut summary = TrackSummary::default();

        while let Ok(TrackEvent { delta, event }) = self.read_event() {
            summary.events += 1;
            summary.ticks += delta as u64;

            if event.is_end_of_track() {
                summary.terminated = true;
                break;
            }

            if event.kind() == Some(StatusType::NoteOn) && event.data2 > 0 {
                summary.note_ons += 1;
                let note = event.data1;
                summary.note_range = Some(match summary.note_range {
                    Some((low, high)) => (low.min(note), high.max(note)),
                    None => (note, note),
                });
            }
        }

        Ok(summary)
    }
}

/// Records the payload offset of each track chunk, skipping the payloads.
fn scan_for_tracks(cursor: &mut ByteCursor, count: u16) -> Result<Vec<usize>, InitError> {
    let mut tracks = Vec::with_capacity(count as usize);

    for index in 0..count as usize {
        let bad_header = |_| InitError::BadTrackHeader { index };
        let magic = cursor.read_u32().map_err(bad_header)?;
        let len = cursor.read_u32().map_err(bad_header)?;

        if magic != TRACK_MAGIC || len == 0 {
            return Err(InitError::BadTrackHeader { index });
        }

        tracks.push(cursor.position());
        cursor.skip(len as usize)?;
    }

    Ok(tracks)
}
