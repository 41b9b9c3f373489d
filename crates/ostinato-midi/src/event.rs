//! Raw MIDI short messages and their decoded form.
//!
//! Decoding is a pure function over the packed 32-bit message layout used by
//! hardware drivers: the low byte is the status byte, the next two bytes are
//! the data bytes. Anything the decoder does not recognize is reported as a
//! [`DecodeError`] and dropped upstream; malformed hardware data must never
//! halt the event stream.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::InputHandle;

/// Names of the twelve chromatic pitch classes, indexed by `note % 12`.
pub const PITCH_CLASSES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Octave labels indexed by `note / 12`, spanning the full 0..=127 note range.
const OCTAVES: [i8; 11] = [-2, -1, 0, 1, 2, 3, 4, 5, 6, 7, 8];

/// A packed MIDI short message, bit-exact with the driver-level layout.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawMessage(u32);

impl RawMessage {
    /// Wraps an already-packed 32-bit message.
    pub fn new(packed: u32) -> Self {
        Self(packed)
    }

    /// Packs a status/data1/data2 byte triplet.
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Self(u32::from(bytes[0]) | u32::from(bytes[1]) << 8 | u32::from(bytes[2]) << 16)
    }

    /// Status byte (low byte of the packed value).
    pub fn status(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// First data byte.
    pub fn data1(self) -> u8 {
        (self.0 >> 8 & 0xFF) as u8
    }

    /// Second data byte.
    pub fn data2(self) -> u8 {
        (self.0 >> 16 & 0xFF) as u8
    }

    /// The packed 32-bit value.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// The status/data1/data2 byte triplet, as sent on the wire.
    pub fn bytes(self) -> [u8; 3] {
        [self.status(), self.data1(), self.data2()]
    }
}

impl fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawMessage(0x{:08X})", self.0)
    }
}

impl From<[u8; 3]> for RawMessage {
    fn from(bytes: [u8; 3]) -> Self {
        Self::from_bytes(bytes)
    }
}

/// A note number with name derivation off the fixed pitch-class and octave
/// tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note(u8);

impl Note {
    /// Wraps a 7-bit note number.
    pub fn new(number: u8) -> Self {
        Self(number & 0x7F)
    }

    /// The raw note number (0..=127).
    pub fn number(self) -> u8 {
        self.0
    }

    /// Pitch-class name, e.g. `"A"` or `"C#"`.
    pub fn pitch_class(self) -> &'static str {
        PITCH_CLASSES[usize::from(self.0) % 12]
    }

    /// Octave label from the fixed table, e.g. note 60 sits in octave 3.
    pub fn octave(self) -> i8 {
        OCTAVES[usize::from(self.0) / 12]
    }

    /// Full note name, pitch class followed by octave, e.g. `"A3"`.
    pub fn name(self) -> String {
        format!("{}{}", self.pitch_class(), self.octave())
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.pitch_class(), self.octave())
    }
}

/// Decoded channel-voice or system payload of a short message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MidiMessage {
    NoteOff { note: Note, velocity: u8 },
    NoteOn { note: Note, velocity: u8 },
    Aftertouch { note: Note, velocity: u8 },
    ControlChange { controller: u8, value: u8 },
    ProgramChange { program: u8 },
    ChannelPressure { pressure: u8 },
    /// 14-bit wheel position, 0..=16383 with 8192 as center.
    PitchWheel { pitch: u16 },
    System(SystemMessage),
}

impl MidiMessage {
    /// Status-kind label used when building handler identifiers.
    pub fn kind_label(&self) -> &'static str {
        match self {
            MidiMessage::NoteOff { .. } => "NoteOff",
            MidiMessage::NoteOn { .. } => "NoteOn",
            MidiMessage::Aftertouch { .. } => "Aftertouch",
            MidiMessage::ControlChange { .. } => "ControlChange",
            MidiMessage::ProgramChange { .. } => "ProgramChange",
            MidiMessage::ChannelPressure { .. } => "ChannelPressure",
            MidiMessage::PitchWheel { .. } => "PitchWheel",
            MidiMessage::System(_) => "SystemMessage",
        }
    }
}

/// System-message subtype, selected by the low nibble of a 0xF-status byte.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemMessage {
    /// Leading byte of a system-exclusive stream; the payload byte is carried
    /// opaquely, its contents are not interpreted.
    SysexData { byte: u8 },
    Timecode,
    SongPosition { position: u16 },
    SongSelect { number: u8 },
    TuneRequest,
    Clock,
    Tick,
    Start,
    Continue,
    Stop,
    ActiveSense,
    Reset,
}

impl SystemMessage {
    /// Subtype label used when building handler identifiers.
    pub fn label(&self) -> &'static str {
        match self {
            SystemMessage::SysexData { .. } => "SysexData",
            SystemMessage::Timecode => "Timecode",
            SystemMessage::SongPosition { .. } => "SongPositionPointer",
            SystemMessage::SongSelect { .. } => "SongSelect",
            SystemMessage::TuneRequest => "TuneRequest",
            SystemMessage::Clock => "Clock",
            SystemMessage::Tick => "Tick",
            SystemMessage::Start => "Start",
            SystemMessage::Continue => "Continue",
            SystemMessage::Stop => "Stop",
            SystemMessage::ActiveSense => "ActiveSense",
            SystemMessage::Reset => "Reset",
        }
    }
}

/// A fully decoded event, as delivered to handlers and retained by the cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiEvent {
    /// Decoded payload.
    pub message: MidiMessage,
    /// Channel number 1..=16. Absent for system messages.
    pub channel: Option<u8>,
    /// The original packed message, preserved verbatim for pass-through.
    pub raw: RawMessage,
    /// Input handle the message arrived on.
    pub source: InputHandle,
    /// Backend timestamp in microseconds.
    pub timestamp_micros: u64,
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(channel) = self.channel {
            write!(f, "ch {channel} ")?;
        }
        match &self.message {
            MidiMessage::NoteOff { note, velocity }
            | MidiMessage::NoteOn { note, velocity }
            | MidiMessage::Aftertouch { note, velocity } => {
                write!(f, "{} {note} vel {velocity}", self.message.kind_label())
            }
            MidiMessage::ControlChange { controller, value } => {
                write!(f, "ControlChange {controller} = {value}")
            }
            MidiMessage::ProgramChange { program } => write!(f, "ProgramChange {program}"),
            MidiMessage::ChannelPressure { pressure } => write!(f, "ChannelPressure {pressure}"),
            MidiMessage::PitchWheel { pitch } => write!(f, "PitchWheel {pitch}"),
            MidiMessage::System(sys) => write!(f, "{}", sys.label()),
        }
    }
}

/// Decode failure. Never escalated; the dispatcher drops the message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Status byte outside the recognized set, including stray data bytes.
    #[error("unsupported status byte 0x{status:02X}")]
    UnsupportedStatus { status: u8 },
    /// 0xF-status byte whose low nibble names no known system message.
    #[error("unrecognized system message 0x{status:02X}")]
    UnrecognizedSystem { status: u8 },
}

/// Message payload plus channel, before the event envelope is attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decoded {
    pub message: MidiMessage,
    pub channel: Option<u8>,
}

/// Decodes a packed short message. Pure and deterministic.
pub fn decode(raw: RawMessage) -> Result<Decoded, DecodeError> {
    let status = raw.status();
    let data1 = raw.data1() & 0x7F;
    let data2 = raw.data2() & 0x7F;

    let message = match status >> 4 {
        0x8 => MidiMessage::NoteOff {
            note: Note::new(data1),
            velocity: data2,
        },
        // A NoteOn with velocity zero is a NoteOff.
        0x9 if data2 == 0 => MidiMessage::NoteOff {
            note: Note::new(data1),
            velocity: 0,
        },
        0x9 => MidiMessage::NoteOn {
            note: Note::new(data1),
            velocity: data2,
        },
        0xA => MidiMessage::Aftertouch {
            note: Note::new(data1),
            velocity: data2,
        },
        0xB => MidiMessage::ControlChange {
            controller: data1,
            value: data2,
        },
        0xC => MidiMessage::ProgramChange { program: data1 },
        0xD => MidiMessage::ChannelPressure { pressure: data1 },
        0xE => MidiMessage::PitchWheel {
            pitch: u16::from(data2) << 7 | u16::from(data1),
        },
        0xF => MidiMessage::System(decode_system(status, data1, data2)?),
        _ => return Err(DecodeError::UnsupportedStatus { status }),
    };

    let channel = match message {
        MidiMessage::System(_) => None,
        _ => Some((status & 0x0F) + 1),
    };

    Ok(Decoded { message, channel })
}

fn decode_system(status: u8, data1: u8, data2: u8) -> Result<SystemMessage, DecodeError> {
    let message = match status & 0x0F {
        0x0 => SystemMessage::SysexData { byte: data1 },
        0x1 => SystemMessage::Timecode,
        0x2 => SystemMessage::SongPosition {
            position: u16::from(data2) << 7 | u16::from(data1),
        },
        0x3 => SystemMessage::SongSelect { number: data1 },
        0x6 => SystemMessage::TuneRequest,
        0x8 => SystemMessage::Clock,
        0x9 => SystemMessage::Tick,
        0xA => SystemMessage::Start,
        0xB => SystemMessage::Continue,
        0xC => SystemMessage::Stop,
        0xE => SystemMessage::ActiveSense,
        0xF => SystemMessage::Reset,
        _ => return Err(DecodeError::UnrecognizedSystem { status }),
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_unpacks_byte_triplets() {
        let raw = RawMessage::from_bytes([0x90, 0x70, 0x40]);
        assert_eq!(raw.as_u32(), 0x0040_7090);
        assert_eq!(raw.status(), 0x90);
        assert_eq!(raw.data1(), 0x70);
        assert_eq!(raw.data2(), 0x40);
        assert_eq!(raw.bytes(), [0x90, 0x70, 0x40]);
    }

    #[test]
    fn decodes_note_on_with_channel() {
        let decoded = decode(RawMessage::from_bytes([0x95, 60, 100])).unwrap();
        assert_eq!(decoded.channel, Some(6));
        assert_eq!(
            decoded.message,
            MidiMessage::NoteOn {
                note: Note::new(60),
                velocity: 100
            }
        );
    }

    #[test]
    fn note_on_with_zero_velocity_becomes_note_off() {
        let decoded = decode(RawMessage::from_bytes([0x93, 72, 0])).unwrap();
        assert_eq!(decoded.channel, Some(4));
        assert_eq!(
            decoded.message,
            MidiMessage::NoteOff {
                note: Note::new(72),
                velocity: 0
            }
        );
    }

    #[test]
    fn note_names_follow_the_fixed_tables() {
        assert_eq!(Note::new(60).name(), "C3");
        assert_eq!(Note::new(69).name(), "A3");
        assert_eq!(Note::new(112).name(), "E7");
        assert_eq!(Note::new(0).name(), "C-2");
        assert_eq!(Note::new(127).name(), "G8");
        assert_eq!(Note::new(61).pitch_class(), "C#");
    }

    #[test]
    fn pitch_wheel_center_decodes_to_8192() {
        let decoded = decode(RawMessage::from_bytes([0xE0, 0x00, 0x40])).unwrap();
        assert_eq!(decoded.message, MidiMessage::PitchWheel { pitch: 8192 });
    }

    #[test]
    fn decodes_channel_pressure_and_program_change() {
        let decoded = decode(RawMessage::from_bytes([0xC2, 42, 0])).unwrap();
        assert_eq!(decoded.channel, Some(3));
        assert_eq!(decoded.message, MidiMessage::ProgramChange { program: 42 });

        let decoded = decode(RawMessage::from_bytes([0xD0, 100, 0])).unwrap();
        assert_eq!(decoded.message, MidiMessage::ChannelPressure { pressure: 100 });
    }

    #[test]
    fn decodes_system_subtypes_without_channel() {
        let clock = decode(RawMessage::from_bytes([0xF8, 0, 0])).unwrap();
        assert_eq!(clock.channel, None);
        assert_eq!(clock.message, MidiMessage::System(SystemMessage::Clock));

        let position = decode(RawMessage::from_bytes([0xF2, 0x01, 0x02])).unwrap();
        assert_eq!(
            position.message,
            MidiMessage::System(SystemMessage::SongPosition { position: 0x101 })
        );

        let sysex = decode(RawMessage::from_bytes([0xF0, 0x7D, 0])).unwrap();
        assert_eq!(
            sysex.message,
            MidiMessage::System(SystemMessage::SysexData { byte: 0x7D })
        );
    }

    #[test]
    fn rejects_unrecognized_system_nibbles() {
        for status in [0xF4, 0xF5, 0xF7, 0xFD] {
            let err = decode(RawMessage::from_bytes([status, 0, 0])).unwrap_err();
            assert_eq!(err, DecodeError::UnrecognizedSystem { status });
        }
    }

    #[test]
    fn rejects_data_bytes_as_status() {
        let err = decode(RawMessage::from_bytes([0x45, 0, 0])).unwrap_err();
        assert_eq!(err, DecodeError::UnsupportedStatus { status: 0x45 });
    }

    #[test]
    fn decoding_is_deterministic() {
        let raw = RawMessage::new(0x0040_7090);
        assert_eq!(decode(raw), decode(raw));
    }
}
