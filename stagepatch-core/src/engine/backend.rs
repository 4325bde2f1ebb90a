//! Sound engine capability interface.
//!
//! A sound engine materializes instruments (SFZ/GIG files, soundfont
//! programs) and publishes the realtime ports they play through. The patch
//! engine only ever sees opaque [`EngineHandle`]s and port names.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use stagepatch_types::{EngineHandle, SoundfontProgram};

use crate::error::{BackendError, BackendResult};

/// Notification from a backend to the control thread.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Text for the user's console.
    UserMessage(String),
    /// Backend-specific status dump (e.g. per-subprocess state).
    StatusInfo(String),
    /// Asynchronous initialization finished.
    Initialized,
    /// A settle window closed; requests refused with `NotReady` may be retried.
    Settled,
}

pub type EngineEventSender = Sender<EngineEvent>;

/// Backend that hosts sampled instruments as plugins.
///
/// `add_sfz` may block the control thread. Port name getters may return
/// empty strings while the backend is still publishing its ports.
pub trait SoundEngine: Send {
    /// Short name for logs.
    fn engine_name(&self) -> &'static str;

    /// One-time setup. May finish asynchronously by sending
    /// [`EngineEvent::Initialized`].
    fn init_engine(&mut self, events: EngineEventSender) -> BackendResult;

    fn add_sfz(&mut self, path: &Path) -> BackendResult<EngineHandle>;

    /// Release an instrument. Unknown handles are a caller bug and return
    /// [`BackendError::UnknownHandle`].
    fn remove_sfz(&mut self, handle: EngineHandle) -> BackendResult;

    fn plugin_name(&self, handle: EngineHandle) -> String;
    fn midi_in_port_name(&self, handle: EngineHandle) -> String;
    /// Left and right audio outputs.
    fn audio_out_port_names(&self, handle: EngineHandle) -> [String; 2];

    fn set_gain(&mut self, handle: EngineHandle, gain: f32);

    /// Client name(s) this engine owns in the port graph.
    fn client_names(&self) -> Vec<String>;
}

/// In-process soundfont synthesizer.
pub trait SoundfontEngine: Send {
    fn init_engine(&mut self, _events: EngineEventSender) -> BackendResult {
        Ok(())
    }

    fn add_program(&mut self, program: &SoundfontProgram) -> BackendResult<EngineHandle>;
    fn remove_program(&mut self, handle: EngineHandle) -> BackendResult;
    fn gain(&self, handle: EngineHandle) -> Option<f32>;
    fn set_gain(&mut self, handle: EngineHandle, gain: f32);
}

// ─── Test Engine ────────────────────────────────────────────────────

/// An operation recorded by `TestEngine`.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOp {
    Init,
    Add(PathBuf),
    Remove(EngineHandle),
    SetGain(EngineHandle, f32),
}

#[derive(Default)]
struct TestEngineState {
    ops: Vec<EngineOp>,
    next_handle: u32,
    live: BTreeMap<EngineHandle, PathBuf>,
    gains: HashMap<EngineHandle, f32>,
    failing: Vec<PathBuf>,
    not_ready: bool,
    publish_ports: bool,
    events: Option<EngineEventSender>,
}

/// Fake backend implementing both engine traits. Clones share state, so a
/// test can keep one clone to inspect what the patch engine did.
#[derive(Clone)]
pub struct TestEngine {
    state: Arc<Mutex<TestEngineState>>,
}

impl TestEngine {
    pub fn new() -> Self {
        let state = TestEngineState {
            publish_ports: true,
            ..TestEngineState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Make materialization of this path fail.
    pub fn fail_path(&self, path: impl Into<PathBuf>) {
        self.state.lock().failing.push(path.into());
    }

    /// Refuse adds with `NotReady` until switched off.
    pub fn set_not_ready(&self, not_ready: bool) {
        self.state.lock().not_ready = not_ready;
    }

    /// Report empty port names, as a backend still starting up would.
    pub fn set_publish_ports(&self, publish: bool) {
        self.state.lock().publish_ports = publish;
    }

    /// Send an event as the backend would, once `init_engine` has run.
    pub fn emit(&self, event: EngineEvent) -> bool {
        match &self.state.lock().events {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn live_handles(&self) -> Vec<EngineHandle> {
        self.state.lock().live.keys().copied().collect()
    }

    pub fn operations(&self) -> Vec<EngineOp> {
        self.state.lock().ops.clone()
    }

    pub fn clear(&self) {
        self.state.lock().ops.clear();
    }

    pub fn gain_of(&self, handle: EngineHandle) -> Option<f32> {
        self.state.lock().gains.get(&handle).copied()
    }

    fn add(&self, path: &Path) -> BackendResult<EngineHandle> {
        let mut state = self.state.lock();
        state.ops.push(EngineOp::Add(path.to_path_buf()));
        if state.not_ready {
            return Err(BackendError::NotReady);
        }
        if state.failing.iter().any(|p| p == path) {
            return Err(BackendError::FileNotFound(path.to_path_buf()));
        }
        let handle = EngineHandle::new(state.next_handle);
        state.next_handle += 1;
        state.live.insert(handle, path.to_path_buf());
        Ok(handle)
    }

    fn remove(&self, handle: EngineHandle) -> BackendResult {
        let mut state = self.state.lock();
        state.ops.push(EngineOp::Remove(handle));
        if state.live.remove(&handle).is_none() {
            return Err(BackendError::UnknownHandle(handle));
        }
        state.gains.remove(&handle);
        Ok(())
    }

    fn store_gain(&self, handle: EngineHandle, gain: f32) {
        let mut state = self.state.lock();
        state.ops.push(EngineOp::SetGain(handle, gain));
        state.gains.insert(handle, gain);
    }

    fn port(&self, handle: EngineHandle, suffix: &str) -> String {
        if self.state.lock().publish_ports {
            format!("test:plugin_{}_{}", handle, suffix)
        } else {
            String::new()
        }
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundEngine for TestEngine {
    fn engine_name(&self) -> &'static str {
        "test"
    }

    fn init_engine(&mut self, events: EngineEventSender) -> BackendResult {
        let mut state = self.state.lock();
        state.ops.push(EngineOp::Init);
        let _ = events.send(EngineEvent::Initialized);
        state.events = Some(events);
        Ok(())
    }

    fn add_sfz(&mut self, path: &Path) -> BackendResult<EngineHandle> {
        self.add(path)
    }

    fn remove_sfz(&mut self, handle: EngineHandle) -> BackendResult {
        self.remove(handle)
    }

    fn plugin_name(&self, handle: EngineHandle) -> String {
        format!("plugin_{}_sfz", handle)
    }

    fn midi_in_port_name(&self, handle: EngineHandle) -> String {
        self.port(handle, "events-in")
    }

    fn audio_out_port_names(&self, handle: EngineHandle) -> [String; 2] {
        [self.port(handle, "out_L"), self.port(handle, "out_R")]
    }

    fn set_gain(&mut self, handle: EngineHandle, gain: f32) {
        self.store_gain(handle, gain);
    }

    fn client_names(&self) -> Vec<String> {
        vec!["test".to_string()]
    }
}

impl SoundfontEngine for TestEngine {
    fn add_program(&mut self, program: &SoundfontProgram) -> BackendResult<EngineHandle> {
        self.add(&program.soundfont_path)
    }

    fn remove_program(&mut self, handle: EngineHandle) -> BackendResult {
        self.remove(handle)
    }

    fn gain(&self, handle: EngineHandle) -> Option<f32> {
        self.gain_of(handle)
    }

    fn set_gain(&mut self, handle: EngineHandle, gain: f32) {
        self.store_gain(handle, gain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let probe = TestEngine::new();
        let mut engine = probe.clone();
        let h = engine.add_sfz(Path::new("/a.sfz")).unwrap();
        assert_eq!(probe.live_handles(), vec![h]);
        engine.remove_sfz(h).unwrap();
        assert_eq!(probe.live_count(), 0);
    }

    #[test]
    fn removing_unknown_handle_is_an_error() {
        let mut engine = TestEngine::new();
        assert_eq!(
            engine.remove_sfz(EngineHandle::new(42)),
            Err(BackendError::UnknownHandle(EngineHandle::new(42)))
        );
    }

    #[test]
    fn unpublished_ports_are_empty() {
        let mut engine = TestEngine::new();
        engine.set_publish_ports(false);
        let h = engine.add_sfz(Path::new("/a.sfz")).unwrap();
        assert!(engine.midi_in_port_name(h).is_empty());
        assert_eq!(engine.audio_out_port_names(h), [String::new(), String::new()]);
    }
}
