//! Control messages accepted by the mixer.
//!
//! Messages travel from the game side to the audio side as plain integers so
//! they can cross any host boundary (a thread, an audio worklet port).

/// Integer code for [`Message::Stop`].
pub const MSG_STOP: u32 = 0x01;
/// Integer code for [`Message::ToggleMute`].
pub const MSG_MUTE: u32 = 0x02;
/// Integer code for [`Message::VolumeDown`].
pub const MSG_VOLUME_DOWN: u32 = 0x03;
/// Integer code for [`Message::VolumeUp`].
pub const MSG_VOLUME_UP: u32 = 0x04;
/// Flag marking a play request; the low 7 bits carry the track id.
pub const MSG_PLAY: u32 = 0x80;
/// Flag marking a repeating play request; the low 7 bits carry the track id.
pub const MSG_REPEAT: u32 = 0x100;

const TRACK_MASK: u32 = 0x7f;

/// Number of tracks a play message can address.
pub const MAX_TRACKS: u16 = TRACK_MASK as u16 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Stop,
    /// Silences output, or restores the volume saved when muting.
    ToggleMute,
    VolumeDown,
    VolumeUp,
    /// Starts a track once.
    Play(u8),
    /// Starts a track and restarts it whenever it ends.
    Repeat(u8),
}

impl Message {
    /// Decodes an integer message code. Unknown codes yield `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        let track = (code & TRACK_MASK) as u8;
        let stray = code & !(MSG_REPEAT | MSG_PLAY | TRACK_MASK);

        if code & (MSG_REPEAT | MSG_PLAY) != 0 {
            if stray != 0 {
                return None;
            }
            return Some(if code & MSG_REPEAT != 0 {
                Self::Repeat(track)
            } else {
                Self::Play(track)
            });
        }

        match code {
            MSG_STOP => Some(Self::Stop),
            MSG_MUTE => Some(Self::ToggleMute),
            MSG_VOLUME_DOWN => Some(Self::VolumeDown),
            MSG_VOLUME_UP => Some(Self::VolumeUp),
            _ => None,
        }
    }

    /// Track named by a play request.
    pub fn track(self) -> Option<u8> {
        match self {
            Self::Play(track) | Self::Repeat(track) => Some(track),
            _ => None,
        }
    }

    /// Encodes the message as an integer code.
    ///
    /// Track ids are truncated to 7 bits.
    pub fn code(self) -> u32 {
        match self {
            Self::Stop => MSG_STOP,
            Self::ToggleMute => MSG_MUTE,
            Self::VolumeDown => MSG_VOLUME_DOWN,
            Self::VolumeUp => MSG_VOLUME_UP,
            Self::Play(track) => MSG_PLAY | (track as u32 & TRACK_MASK),
            Self::Repeat(track) => MSG_PLAY | MSG_REPEAT | (track as u32 & TRACK_MASK),
        }
    }
}
