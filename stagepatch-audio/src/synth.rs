//! In-process soundfont synth bank.
//!
//! [`SynthBank`] is the control-side half: it adds and removes programs and
//! sets gains, taking the shared lock normally. [`SynthBankProcessor`] is
//! the half that lives in the audio callback. It only ever `try_with`s the
//! shared state; a MIDI batch or audio block that meets a held lock is
//! dropped and counted.
//!
//! The bank tracks voice, pedal and bend state per program. Sample output
//! belongs to the external synthesizer, so blocks handed to
//! [`SynthBankProcessor::render`] are only cleared.

use std::collections::BTreeMap;

use stagepatch_core::engine::backend::{EngineEvent, EngineEventSender, SoundfontEngine};
use stagepatch_core::error::{BackendError, BackendResult};
use stagepatch_core::realtime::RtShared;
use stagepatch_types::midi::{CC_ALL_NOTES_OFF, CC_SUSTAIN};
use stagepatch_types::{EngineHandle, MidiEvent, MidiEventKind, SoundfontProgram};

#[derive(Debug, Clone, Copy)]
struct Voice {
    channel: u8,
    note: u8,
    velocity: u8,
    /// Released while the sustain pedal was down.
    sustained: bool,
}

struct Synth {
    program: SoundfontProgram,
    gain: f32,
    voices: Vec<Voice>,
    sustain: bool,
    pitchbend: i16,
}

impl Synth {
    fn new(program: SoundfontProgram) -> Self {
        Self {
            program,
            gain: 1.0,
            voices: Vec::new(),
            sustain: false,
            pitchbend: 0,
        }
    }

    fn handle_event(&mut self, ev: &MidiEvent) {
        match ev.kind {
            MidiEventKind::NoteOn if ev.velocity() > 0 => {
                self.voices.retain(|v| !(v.channel == ev.channel && v.note == ev.note()));
                self.voices.push(Voice {
                    channel: ev.channel,
                    note: ev.note(),
                    velocity: ev.velocity(),
                    sustained: false,
                });
            }
            MidiEventKind::NoteOn | MidiEventKind::NoteOff => {
                if self.sustain {
                    for v in self.voices.iter_mut() {
                        if v.channel == ev.channel && v.note == ev.note() {
                            v.sustained = true;
                        }
                    }
                } else {
                    self.voices.retain(|v| !(v.channel == ev.channel && v.note == ev.note()));
                }
            }
            MidiEventKind::ControlChange if ev.data1 == CC_ALL_NOTES_OFF => {
                self.voices.clear();
            }
            MidiEventKind::ControlChange if ev.data1 == CC_SUSTAIN => {
                self.sustain = ev.data2.unwrap_or(0) >= 64;
                if !self.sustain {
                    self.voices.retain(|v| !v.sustained);
                }
            }
            MidiEventKind::PitchBend => {
                self.pitchbend = ev.pitchbend_signed();
            }
            _ => {}
        }
    }
}

struct SynthBankState {
    next_handle: u32,
    synths: BTreeMap<EngineHandle, Synth>,
}

/// Control-side handle to the synth bank.
pub struct SynthBank {
    state: RtShared<SynthBankState>,
    events: Option<EngineEventSender>,
}

impl SynthBank {
    pub fn new() -> Self {
        Self {
            state: RtShared::new(SynthBankState {
                next_handle: 0,
                synths: BTreeMap::new(),
            }),
            events: None,
        }
    }

    /// Realtime half, for the audio callback.
    pub fn processor(&self) -> SynthBankProcessor {
        SynthBankProcessor {
            state: self.state.clone(),
        }
    }

    pub fn synth_count(&self) -> usize {
        self.state.lock().synths.len()
    }

    pub fn program(&self, handle: EngineHandle) -> Option<SoundfontProgram> {
        self.state
            .lock()
            .synths
            .get(&handle)
            .map(|s| s.program.clone())
    }

    pub fn active_voices(&self, handle: EngineHandle) -> usize {
        self.state
            .lock()
            .synths
            .get(&handle)
            .map_or(0, |s| s.voices.len())
    }

    pub fn pitchbend(&self, handle: EngineHandle) -> Option<i16> {
        self.state.lock().synths.get(&handle).map(|s| s.pitchbend)
    }

    /// Sounding notes of one synth with their velocities, oldest first.
    pub fn voices(&self, handle: EngineHandle) -> Vec<(u8, u8)> {
        self.state
            .lock()
            .synths
            .get(&handle)
            .map(|s| s.voices.iter().map(|v| (v.note, v.velocity)).collect())
            .unwrap_or_default()
    }

    fn message(&self, text: String) {
        if let Some(tx) = &self.events {
            let _ = tx.send(EngineEvent::UserMessage(text));
        }
    }
}

impl Default for SynthBank {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundfontEngine for SynthBank {
    fn init_engine(&mut self, events: EngineEventSender) -> BackendResult {
        self.events = Some(events);
        log::info!(target: "synth", "synth bank ready");
        Ok(())
    }

    fn add_program(&mut self, program: &SoundfontProgram) -> BackendResult<EngineHandle> {
        if !program.soundfont_path.is_file() {
            return Err(BackendError::FileNotFound(program.soundfont_path.clone()));
        }
        let handle = {
            let mut state = self.state.lock();
            let handle = EngineHandle::new(state.next_handle);
            state.next_handle += 1;
            state.synths.insert(handle, Synth::new(program.clone()));
            handle
        };
        log::debug!(
            target: "synth",
            "synth {} <- {} bank {} program {}",
            handle,
            program.soundfont_path.display(),
            program.bank,
            program.program
        );
        self.message(format!("Loaded soundfont program {}", program.name));
        Ok(handle)
    }

    fn remove_program(&mut self, handle: EngineHandle) -> BackendResult {
        if self.state.lock().synths.remove(&handle).is_none() {
            log::error!(target: "synth", "remove_program: unknown handle {}", handle);
            return Err(BackendError::UnknownHandle(handle));
        }
        Ok(())
    }

    fn gain(&self, handle: EngineHandle) -> Option<f32> {
        self.state.lock().synths.get(&handle).map(|s| s.gain)
    }

    fn set_gain(&mut self, handle: EngineHandle, gain: f32) {
        if let Some(synth) = self.state.lock().synths.get_mut(&handle) {
            synth.gain = gain.clamp(0.0, 1.0);
        }
    }
}

/// Audio-callback half of the synth bank. Never blocks.
#[derive(Clone)]
pub struct SynthBankProcessor {
    state: RtShared<SynthBankState>,
}

impl SynthBankProcessor {
    /// Feed a batch of events to one synth. Returns false if the batch was
    /// dropped because the control side held the lock.
    pub fn process_midi(&self, handle: EngineHandle, events: &[MidiEvent]) -> bool {
        self.state
            .try_with(|state| {
                if let Some(synth) = state.synths.get_mut(&handle) {
                    for ev in events {
                        synth.handle_event(ev);
                    }
                }
            })
            .is_some()
    }

    /// Take one audio block for a synth and clear it. Returns how many
    /// voices were sounding, or `None` if the block was dropped because the
    /// control side held the lock.
    pub fn render(&self, handle: EngineHandle, out: &mut [f32]) -> Option<usize> {
        out.fill(0.0);
        self.state
            .try_with(|state| state.synths.get(&handle).map_or(0, |s| s.voices.len()))
    }

    /// Batches and blocks dropped so far.
    pub fn dropped(&self) -> u64 {
        self.state.dropped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn bank_with_program() -> (SynthBank, EngineHandle, tempfile::NamedTempFile) {
        let file = tempfile::Builder::new().suffix(".sf2").tempfile().unwrap();
        let mut bank = SynthBank::new();
        let program = SoundfontProgram::new(file.path(), 0, 0, "Piano");
        let handle = bank.add_program(&program).unwrap();
        (bank, handle, file)
    }

    #[test]
    fn missing_soundfont_is_rejected() {
        let mut bank = SynthBank::default();
        let program = SoundfontProgram::new(Path::new("/no/such.sf2"), 0, 0, "Ghost");
        assert!(matches!(
            bank.add_program(&program),
            Err(BackendError::FileNotFound(_))
        ));
        assert_eq!(bank.synth_count(), 0);
    }

    #[test]
    fn note_on_sounds_and_all_notes_off_silences() {
        let (bank, h, _file) = bank_with_program();
        let rt = bank.processor();
        let mut block = [0.5f32; 256];

        assert!(rt.process_midi(h, &[MidiEvent::note_on(0, 60, 100), MidiEvent::note_on(0, 64, 80)]));
        assert_eq!(bank.voices(h), vec![(60, 100), (64, 80)]);
        assert_eq!(rt.render(h, &mut block), Some(2));
        assert!(block.iter().all(|s| *s == 0.0));

        // Retrigger replaces the voice instead of stacking it.
        rt.process_midi(h, &[MidiEvent::note_on(0, 60, 40)]);
        assert_eq!(bank.voices(h), vec![(64, 80), (60, 40)]);

        rt.process_midi(h, &[MidiEvent::control_change(0, CC_ALL_NOTES_OFF, 0)]);
        assert_eq!(bank.active_voices(h), 0);
        assert_eq!(rt.render(h, &mut block), Some(0));
    }

    #[test]
    fn sustain_holds_released_notes() {
        let (bank, h, _file) = bank_with_program();
        let rt = bank.processor();
        rt.process_midi(
            h,
            &[
                MidiEvent::control_change(0, CC_SUSTAIN, 127),
                MidiEvent::note_on(0, 60, 90),
                MidiEvent::note_off(0, 60, 0),
            ],
        );
        assert_eq!(bank.active_voices(h), 1);
        rt.process_midi(h, &[MidiEvent::control_change(0, CC_SUSTAIN, 0)]);
        assert_eq!(bank.active_voices(h), 0);
    }

    #[test]
    fn pitchbend_is_stored_signed() {
        let (bank, h, _file) = bank_with_program();
        let rt = bank.processor();
        rt.process_midi(h, &[MidiEvent::pitch_bend(0, -4096)]);
        assert_eq!(bank.pitchbend(h), Some(-4096));
    }

    #[test]
    fn gain_is_clamped() {
        let (mut bank, h, _file) = bank_with_program();
        assert_eq!(bank.gain(h), Some(1.0));
        bank.set_gain(h, 0.25);
        assert_eq!(bank.gain(h), Some(0.25));
        bank.set_gain(h, -1.0);
        assert_eq!(bank.gain(h), Some(0.0));
        bank.set_gain(h, 4.0);
        assert_eq!(bank.gain(h), Some(1.0));
        assert_eq!(bank.gain(EngineHandle::new(99)), None);
    }

    #[test]
    fn remove_unknown_handle_is_an_error() {
        let (mut bank, h, _file) = bank_with_program();
        bank.remove_program(h).unwrap();
        assert_eq!(
            bank.remove_program(h),
            Err(BackendError::UnknownHandle(h))
        );
    }

    #[test]
    fn held_lock_drops_the_block_without_waiting() {
        let (bank, h, _file) = bank_with_program();
        let rt = bank.processor();
        let control = bank.state.clone();
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = thread::spawn(move || {
            let _guard = control.lock();
            locked_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });
        locked_rx.recv().unwrap();

        let mut block = [1.0f32; 64];
        let start = Instant::now();
        let midi_ok = rt.process_midi(h, &[MidiEvent::note_on(0, 60, 100)]);
        let rendered = rt.render(h, &mut block);
        let elapsed = start.elapsed();
        release_tx.send(()).unwrap();
        holder.join().unwrap();

        assert!(!midi_ok);
        assert_eq!(rendered, None);
        assert!(elapsed < Duration::from_millis(5), "blocked for {:?}", elapsed);
        assert!(block.iter().all(|s| *s == 0.0));
        assert_eq!(rt.dropped(), 2);
        assert_eq!(bank.active_voices(h), 0);
    }
}
