//! Wire-accurate MIDI message model.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sustain pedal controller number.
pub const CC_SUSTAIN: u8 = 64;
/// "All notes off" controller number, sent on panic.
pub const CC_ALL_NOTES_OFF: u8 = 123;
/// Bank select MSB / LSB controller numbers.
pub const CC_BANK_MSB: u8 = 0;
pub const CC_BANK_LSB: u8 = 32;

/// Centre value of the 14-bit pitchbend range.
pub const PITCHBEND_CENTER: i32 = 8192;
pub const PITCHBEND_MIN: i16 = -8192;
pub const PITCHBEND_MAX: i16 = 8191;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Message type, i.e. the high nibble of the status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MidiEventKind {
    NoteOff,
    NoteOn,
    PolyAftertouch,
    ControlChange,
    ProgramChange,
    Aftertouch,
    PitchBend,
    System,
}

impl MidiEventKind {
    pub fn status_nibble(self) -> u8 {
        match self {
            MidiEventKind::NoteOff => 0x80,
            MidiEventKind::NoteOn => 0x90,
            MidiEventKind::PolyAftertouch => 0xA0,
            MidiEventKind::ControlChange => 0xB0,
            MidiEventKind::ProgramChange => 0xC0,
            MidiEventKind::Aftertouch => 0xD0,
            MidiEventKind::PitchBend => 0xE0,
            MidiEventKind::System => 0xF0,
        }
    }

    /// Decode from a status byte. Returns `None` for data bytes (< 0x80).
    pub fn from_status(status: u8) -> Option<Self> {
        match status & 0xF0 {
            0x80 => Some(MidiEventKind::NoteOff),
            0x90 => Some(MidiEventKind::NoteOn),
            0xA0 => Some(MidiEventKind::PolyAftertouch),
            0xB0 => Some(MidiEventKind::ControlChange),
            0xC0 => Some(MidiEventKind::ProgramChange),
            0xD0 => Some(MidiEventKind::Aftertouch),
            0xE0 => Some(MidiEventKind::PitchBend),
            0xF0 => Some(MidiEventKind::System),
            _ => None,
        }
    }

    /// Whether the message carries a second data byte.
    pub fn has_data2(self) -> bool {
        !matches!(
            self,
            MidiEventKind::ProgramChange | MidiEventKind::Aftertouch
        )
    }

    pub fn is_note(self) -> bool {
        matches!(self, MidiEventKind::NoteOn | MidiEventKind::NoteOff)
    }

    fn label(self) -> &'static str {
        match self {
            MidiEventKind::NoteOff => "Noteoff",
            MidiEventKind::NoteOn => "Noteon",
            MidiEventKind::PolyAftertouch => "Polyaftertouch",
            MidiEventKind::ControlChange => "CC",
            MidiEventKind::ProgramChange => "Program",
            MidiEventKind::Aftertouch => "Aftertouch",
            MidiEventKind::PitchBend => "Pitchbend",
            MidiEventKind::System => "System",
        }
    }
}

/// A single MIDI message.
///
/// `data2` is `None` for two-byte messages. Bank select bytes are only
/// meaningful on program changes and are carried alongside so that a
/// program + bank trigger can be stored as one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MidiEvent {
    pub kind: MidiEventKind,
    pub channel: u8,
    pub data1: u8,
    #[serde(default)]
    pub data2: Option<u8>,
    #[serde(default)]
    pub bank_msb: Option<u8>,
    #[serde(default)]
    pub bank_lsb: Option<u8>,
}

impl MidiEvent {
    pub fn new(kind: MidiEventKind, channel: u8, data1: u8, data2: Option<u8>) -> Self {
        Self {
            kind,
            channel: channel & 0x0F,
            data1: data1 & 0x7F,
            data2: if kind.has_data2() {
                Some(data2.unwrap_or(0) & 0x7F)
            } else {
                None
            },
            bank_msb: None,
            bank_lsb: None,
        }
    }

    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(MidiEventKind::NoteOn, channel, note, Some(velocity))
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(MidiEventKind::NoteOff, channel, note, Some(velocity))
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self::new(MidiEventKind::ControlChange, channel, controller, Some(value))
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        Self::new(MidiEventKind::ProgramChange, channel, program, None)
    }

    pub fn pitch_bend(channel: u8, value: i16) -> Self {
        let mut ev = Self::new(MidiEventKind::PitchBend, channel, 0, Some(0));
        ev.set_pitchbend_signed(value);
        ev
    }

    pub fn all_notes_off(channel: u8) -> Self {
        Self::control_change(channel, CC_ALL_NOTES_OFF, 0)
    }

    /// Attach bank select bytes (program changes).
    pub fn with_bank(mut self, msb: u8, lsb: u8) -> Self {
        self.bank_msb = Some(msb & 0x7F);
        self.bank_lsb = Some(lsb & 0x7F);
        self
    }

    /// Parse a raw message. Running status is not supported; the first byte
    /// must be a status byte.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        let kind = MidiEventKind::from_status(status)?;
        let data1 = bytes.get(1).copied().unwrap_or(0) & 0x7F;
        let data2 = if kind.has_data2() {
            Some(bytes.get(2).copied().unwrap_or(0) & 0x7F)
        } else {
            None
        };
        if kind != MidiEventKind::System && bytes.len() < 1 + 1 + usize::from(data2.is_some()) {
            return None;
        }
        Some(Self {
            kind,
            channel: status & 0x0F,
            data1,
            data2,
            bank_msb: None,
            bank_lsb: None,
        })
    }

    pub fn status_byte(&self) -> u8 {
        self.kind.status_nibble() | (self.channel & 0x0F)
    }

    /// Encode into `out`, returning the number of bytes written (2 or 3).
    pub fn write_bytes(&self, out: &mut [u8; 3]) -> usize {
        out[0] = self.status_byte();
        out[1] = self.data1 & 0x7F;
        match self.data2 {
            Some(d2) => {
                out[2] = d2 & 0x7F;
                3
            }
            None => 2,
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = [0u8; 3];
        let n = self.write_bytes(&mut buf);
        buf[..n].to_vec()
    }

    pub fn note(&self) -> u8 {
        self.data1
    }

    pub fn velocity(&self) -> u8 {
        self.data2.unwrap_or(0)
    }

    pub fn set_note(&mut self, note: u8) {
        self.data1 = note & 0x7F;
    }

    pub fn set_velocity(&mut self, velocity: u8) {
        self.data2 = Some(velocity & 0x7F);
    }

    /// True for note-off, and for note-on with velocity 0.
    pub fn is_note_release(&self) -> bool {
        match self.kind {
            MidiEventKind::NoteOff => true,
            MidiEventKind::NoteOn => self.velocity() == 0,
            _ => false,
        }
    }

    pub fn is_all_notes_off(&self) -> bool {
        self.kind == MidiEventKind::ControlChange && self.data1 == CC_ALL_NOTES_OFF
    }

    /// Pitchbend as a signed value centred on zero (-8192..=8191).
    pub fn pitchbend_signed(&self) -> i16 {
        pitchbend_from_data(self.data1, self.data2.unwrap_or(0))
    }

    pub fn set_pitchbend_signed(&mut self, value: i16) {
        let (lsb, msb) = pitchbend_to_data(value);
        self.data1 = lsb;
        self.data2 = Some(msb);
    }

    /// Combined 14-bit bank number, if both bank bytes are present.
    pub fn bank(&self) -> Option<u16> {
        match (self.bank_msb, self.bank_lsb) {
            (Some(msb), Some(lsb)) => Some((u16::from(msb & 0x7F) << 7) | u16::from(lsb & 0x7F)),
            _ => None,
        }
    }

    /// Packs status/channel, data1 and bank bytes into one key for trigger
    /// lookups. Data2 is deliberately left out so any velocity/value matches.
    pub fn hash_key(&self) -> u32 {
        let status = u32::from(self.kind.status_nibble() | (self.channel & 0x0F));
        let msb = u32::from(self.bank_msb.unwrap_or(0x7F) & 0x7F);
        let lsb = u32::from(self.bank_lsb.unwrap_or(0x7F) & 0x7F);
        (((status << 8) | u32::from(self.data1 & 0x7F)) << 8 | msb) << 8 | lsb
    }
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ch {} ", self.channel + 1)?;
        match self.kind {
            MidiEventKind::NoteOn | MidiEventKind::NoteOff => write!(
                f,
                "{} {}, {}  ({})",
                self.kind.label(),
                self.data1,
                self.velocity(),
                note_name(self.data1)
            ),
            MidiEventKind::ControlChange | MidiEventKind::PolyAftertouch => {
                write!(f, "{} {}, {}", self.kind.label(), self.data1, self.velocity())
            }
            MidiEventKind::PitchBend => {
                write!(f, "{} {}", self.kind.label(), self.pitchbend_signed())
            }
            MidiEventKind::ProgramChange => match self.bank() {
                Some(bank) => write!(f, "Prog {} Bank {}", self.data1, bank),
                None => write!(f, "Program {}", self.data1),
            },
            MidiEventKind::Aftertouch | MidiEventKind::System => {
                write!(f, "{} {}", self.kind.label(), self.data1)
            }
        }
    }
}

/// Note name with octave, where note 0 is C0.
pub fn note_name(note: u8) -> String {
    let note = note & 0x7F;
    format!("{}{}", NOTE_NAMES[usize::from(note % 12)], note / 12)
}

/// Decode two 7-bit data bytes (LSB first) into a signed pitchbend.
pub fn pitchbend_from_data(lsb: u8, msb: u8) -> i16 {
    let raw = (i32::from(msb & 0x7F) << 7) | i32::from(lsb & 0x7F);
    (raw - PITCHBEND_CENTER) as i16
}

/// Encode a signed pitchbend into (LSB, MSB) data bytes.
pub fn pitchbend_to_data(value: i16) -> (u8, u8) {
    let clamped = value.clamp(PITCHBEND_MIN, PITCHBEND_MAX);
    let raw = i32::from(clamped) + PITCHBEND_CENTER;
    ((raw & 0x7F) as u8, ((raw >> 7) & 0x7F) as u8)
}
