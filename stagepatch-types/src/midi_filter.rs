//! Per-layer MIDI predicate and transform.

use serde::{Deserialize, Serialize};

use crate::midi::{MidiEvent, MidiEventKind, CC_SUSTAIN};

/// A key/velocity window with a transform for the notes that fall inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiFilterZone {
    pub low_note: u8,
    pub high_note: u8,
    /// Semitones added to the note number.
    #[serde(default)]
    pub transpose: i16,
    pub low_vel: u8,
    pub high_vel: u8,
    /// Velocity scale factor, applied before `vel_add`.
    #[serde(default = "default_vel_multiply")]
    pub vel_multiply: f32,
    #[serde(default)]
    pub vel_add: i16,
}

fn default_vel_multiply() -> f32 {
    1.0
}

impl MidiFilterZone {
    /// Zone covering `[low_note, high_note]` at any velocity, no transform.
    pub fn new(low_note: u8, high_note: u8) -> Self {
        Self {
            low_note,
            high_note,
            transpose: 0,
            low_vel: 0,
            high_vel: 127,
            vel_multiply: 1.0,
            vel_add: 0,
        }
    }

    pub fn full() -> Self {
        Self::new(0, 127)
    }

    pub fn with_transpose(mut self, semitones: i16) -> Self {
        self.transpose = semitones;
        self
    }

    pub fn with_velocity_range(mut self, low: u8, high: u8) -> Self {
        self.low_vel = low;
        self.high_vel = high;
        self
    }

    pub fn with_velocity_transform(mut self, multiply: f32, add: i16) -> Self {
        self.vel_multiply = multiply;
        self.vel_add = add;
        self
    }

    fn note_in_range(&self, note: u8) -> bool {
        (self.low_note..=self.high_note).contains(&note)
    }

    /// Releases are matched on note range only so a note-off is never
    /// swallowed by a velocity window its note-on passed.
    pub fn matches(&self, ev: &MidiEvent) -> bool {
        if !self.note_in_range(ev.note()) {
            return false;
        }
        ev.is_note_release() || (self.low_vel..=self.high_vel).contains(&ev.velocity())
    }

    /// Apply transpose and velocity transform. Releases keep their velocity,
    /// otherwise a note-on with velocity 0 could turn into a sounding note.
    pub fn transform(&self, ev: &MidiEvent) -> MidiEvent {
        let mut out = *ev;
        out.set_note(clamp_7bit(i32::from(ev.note()) + i32::from(self.transpose)));
        if !ev.is_note_release() {
            let scaled = (f32::from(ev.velocity()) * self.vel_multiply).round() as i32;
            out.set_velocity(clamp_7bit(scaled + i32::from(self.vel_add)));
        }
        out
    }
}

impl Default for MidiFilterZone {
    fn default() -> Self {
        Self::full()
    }
}

fn clamp_7bit(v: i32) -> u8 {
    v.clamp(0, 127) as u8
}

/// Decides which events reach a layer and how they are rewritten on the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiFilter {
    /// Note whitelist; empty means every note passes untouched.
    #[serde(default)]
    zones: Vec<MidiFilterZone>,
    pub pass_cc: Vec<u8>,
    pub pass_all_cc: bool,
    pub pass_program: bool,
    pub pass_pitchbend: bool,
    /// Only accept this channel. `None` accepts all.
    #[serde(default)]
    pub in_channel: Option<u8>,
    /// Rewrite to this channel. `None` keeps the original.
    #[serde(default)]
    pub out_channel: Option<u8>,
}

impl Default for MidiFilter {
    fn default() -> Self {
        Self {
            zones: Vec::new(),
            pass_cc: vec![CC_SUSTAIN],
            pass_all_cc: false,
            pass_program: false,
            pass_pitchbend: true,
            in_channel: None,
            out_channel: None,
        }
    }
}

impl MidiFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter that forwards every event unchanged.
    pub fn pass_all() -> Self {
        Self {
            pass_all_cc: true,
            pass_program: true,
            ..Self::default()
        }
    }

    pub fn zones(&self) -> &[MidiFilterZone] {
        &self.zones
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    pub fn add_zone(&mut self, zone: MidiFilterZone) {
        self.zones.push(zone);
    }

    /// Remove the zone at `index`. Out-of-range indices are ignored.
    pub fn remove_zone(&mut self, index: usize) -> Option<MidiFilterZone> {
        (index < self.zones.len()).then(|| self.zones.remove(index))
    }

    pub fn clear_zones(&mut self) {
        self.zones.clear();
    }

    pub fn passes_cc(&self, controller: u8) -> bool {
        self.pass_all_cc || self.pass_cc.contains(&controller)
    }

    pub fn passes(&self, ev: &MidiEvent) -> bool {
        if let Some(ch) = self.in_channel {
            if ev.kind != MidiEventKind::System && ev.channel != ch {
                return false;
            }
        }
        match ev.kind {
            MidiEventKind::NoteOn | MidiEventKind::NoteOff => {
                self.zones.is_empty() || self.zones.iter().any(|z| z.matches(ev))
            }
            // Panic must reach every layer regardless of the CC policy.
            MidiEventKind::ControlChange => ev.is_all_notes_off() || self.passes_cc(ev.data1),
            MidiEventKind::ProgramChange => self.pass_program,
            MidiEventKind::PitchBend => self.pass_pitchbend,
            MidiEventKind::System => true,
            MidiEventKind::Aftertouch | MidiEventKind::PolyAftertouch => false,
        }
    }

    /// Transform an event with the first matching zone and the output
    /// channel. Call after `passes`; events no zone matches are only
    /// rechannelled.
    pub fn apply(&self, ev: &MidiEvent) -> MidiEvent {
        let mut out = if ev.kind.is_note() {
            match self.zones.iter().find(|z| z.matches(ev)) {
                Some(zone) => zone.transform(ev),
                None => *ev,
            }
        } else {
            *ev
        };
        self.rechannel(&mut out);
        out
    }

    /// Filter and transform, emitting one event per matching zone.
    /// Returns how many events were emitted.
    pub fn process(&self, ev: &MidiEvent, mut emit: impl FnMut(MidiEvent)) -> usize {
        if !self.passes(ev) {
            return 0;
        }
        if !ev.kind.is_note() || self.zones.is_empty() {
            let mut out = *ev;
            self.rechannel(&mut out);
            emit(out);
            return 1;
        }
        let mut count = 0;
        for zone in self.zones.iter().filter(|z| z.matches(ev)) {
            let mut out = zone.transform(ev);
            self.rechannel(&mut out);
            emit(out);
            count += 1;
        }
        count
    }

    fn rechannel(&self, ev: &mut MidiEvent) {
        if ev.kind == MidiEventKind::System {
            return;
        }
        if let Some(ch) = self.out_channel {
            ev.channel = ch & 0x0F;
        }
    }
}
