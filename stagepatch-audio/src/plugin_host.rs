//! Plugin host backend: one hosted sampler plugin per SFZ/GIG layer.
//!
//! The host needs a moment after its first plugin is instantiated before
//! further plugins come up with sound. That moment is [`FIRST_LOAD_SETTLE`]:
//! a timer thread holds the window open and sends
//! [`EngineEvent::Settled`] when it closes. Adds during the window are
//! refused with [`BackendError::NotReady`] and get retried by the patch
//! engine on the next reload.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stagepatch_core::config::Config;
use stagepatch_core::engine::backend::{EngineEvent, EngineEventSender, SoundEngine};
use stagepatch_core::error::{BackendError, BackendResult};
use stagepatch_types::EngineHandle;

/// Default length of the settle window opened by the first instantiation.
pub const FIRST_LOAD_SETTLE: Duration = Duration::from_millis(500);

const MIDI_IN_POSTFIX: &str = "events-in";
const AUDIO_OUT_POSTFIXES: [&str; 2] = ["audio-out1", "audio-out2"];

/// Instrument formats the host can load, by lowercase extension.
const SUPPORTED_EXTENSIONS: [&str; 2] = ["sfz", "gig"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentFormat {
    Sfz,
    Gig,
}

/// Classify an instrument file by extension.
pub fn instrument_format(path: &Path) -> BackendResult<InstrumentFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "sfz" => Ok(InstrumentFormat::Sfz),
        "gig" => Ok(InstrumentFormat::Gig),
        _ => Err(BackendError::Unsupported(format!(
            "{} (expected one of: {})",
            path.display(),
            SUPPORTED_EXTENSIONS.join(", ")
        ))),
    }
}

#[derive(Debug, Clone)]
struct HostedPlugin {
    path: PathBuf,
    name: String,
    format: InstrumentFormat,
    gain: f32,
}

pub struct PluginHostEngine {
    client_name: String,
    settle_delay: Duration,
    next_id: u32,
    plugins: BTreeMap<EngineHandle, HostedPlugin>,
    settling: Arc<AtomicBool>,
    events: Option<EngineEventSender>,
}

impl PluginHostEngine {
    pub fn new(client_name: &str, settle_delay: Duration) -> Self {
        Self {
            client_name: client_name.to_string(),
            settle_delay,
            next_id: 0,
            plugins: BTreeMap::new(),
            settling: Arc::new(AtomicBool::new(false)),
            events: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&format!("{}_plugins", config.client_name()), config.settle_delay())
    }

    /// Whether a settle window is currently open.
    pub fn is_settling(&self) -> bool {
        self.settling.load(Ordering::Acquire)
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    pub fn plugin_path(&self, handle: EngineHandle) -> Option<&Path> {
        self.plugins.get(&handle).map(|p| p.path.as_path())
    }

    pub fn plugin_format(&self, handle: EngineHandle) -> Option<InstrumentFormat> {
        self.plugins.get(&handle).map(|p| p.format)
    }

    pub fn plugin_gain(&self, handle: EngineHandle) -> Option<f32> {
        self.plugins.get(&handle).map(|p| p.gain)
    }

    fn message(&self, text: String) {
        log::info!(target: "plugin_host", "{}", text);
        if let Some(tx) = &self.events {
            let _ = tx.send(EngineEvent::UserMessage(text));
        }
    }

    fn port(&self, handle: EngineHandle, postfix: &str) -> String {
        match self.plugins.get(&handle) {
            Some(p) => format!("{}:{}:{}", self.client_name, p.name, postfix),
            None => String::new(),
        }
    }

    /// Open the settle window. If no timer thread can be started there is
    /// no window at all.
    fn open_settle_window(&self) {
        if self.settle_delay.is_zero() {
            return;
        }
        self.settling.store(true, Ordering::Release);
        let settling = Arc::clone(&self.settling);
        let events = self.events.clone();
        let delay = self.settle_delay;
        let spawned = thread::Builder::new()
            .name("plugin-host-settle".into())
            .spawn(move || {
                thread::sleep(delay);
                settling.store(false, Ordering::Release);
                if let Some(tx) = events {
                    let _ = tx.send(EngineEvent::Settled);
                }
            });
        match spawned {
            Ok(_) => log::debug!(target: "plugin_host", "settle window open for {:?}", delay),
            Err(e) => {
                log::warn!(target: "plugin_host", "could not start settle timer: {}", e);
                self.settling.store(false, Ordering::Release);
            }
        }
    }
}

impl SoundEngine for PluginHostEngine {
    fn engine_name(&self) -> &'static str {
        "plugin_host"
    }

    fn init_engine(&mut self, events: EngineEventSender) -> BackendResult {
        let _ = events.send(EngineEvent::Initialized);
        self.events = Some(events);
        self.message(format!("Plugin host initialised as {}", self.client_name));
        Ok(())
    }

    fn add_sfz(&mut self, path: &Path) -> BackendResult<EngineHandle> {
        if self.is_settling() {
            return Err(BackendError::NotReady);
        }
        if !path.is_file() {
            return Err(BackendError::FileNotFound(path.to_path_buf()));
        }
        let format = instrument_format(path)?;

        let handle = EngineHandle::new(self.next_id);
        self.next_id += 1;
        let name = format!("plugin_{}_sfz", handle);
        self.message(format!("Loading sfz: {}, {}", path.display(), name));

        let first = self.plugins.is_empty();
        self.plugins.insert(
            handle,
            HostedPlugin {
                path: path.to_path_buf(),
                name,
                format,
                gain: 1.0,
            },
        );
        if first {
            self.open_settle_window();
        }
        Ok(handle)
    }

    fn remove_sfz(&mut self, handle: EngineHandle) -> BackendResult {
        match self.plugins.remove(&handle) {
            Some(p) => {
                log::debug!(target: "plugin_host", "removed {}", p.name);
                Ok(())
            }
            None => {
                log::error!(target: "plugin_host", "remove_sfz: unknown handle {}", handle);
                Err(BackendError::UnknownHandle(handle))
            }
        }
    }

    fn plugin_name(&self, handle: EngineHandle) -> String {
        self.plugins
            .get(&handle)
            .map(|p| p.name.clone())
            .unwrap_or_default()
    }

    fn midi_in_port_name(&self, handle: EngineHandle) -> String {
        self.port(handle, MIDI_IN_POSTFIX)
    }

    fn audio_out_port_names(&self, handle: EngineHandle) -> [String; 2] {
        AUDIO_OUT_POSTFIXES.map(|postfix| self.port(handle, postfix))
    }

    fn set_gain(&mut self, handle: EngineHandle, gain: f32) {
        if let Some(p) = self.plugins.get_mut(&handle) {
            p.gain = gain.clamp(0.0, 1.0);
        }
    }

    fn client_names(&self) -> Vec<String> {
        vec![self.client_name.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::time::Instant;

    fn instrument(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, "<region> sample=a.wav\n").unwrap();
        path
    }

    #[test]
    fn names_and_ports_follow_the_plugin_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = PluginHostEngine::new("live_plugins", Duration::ZERO);
        let a = host.add_sfz(&instrument(&dir, "piano.sfz")).unwrap();
        let b = host.add_sfz(&instrument(&dir, "strings.SFZ")).unwrap();

        assert_eq!(host.plugin_name(b), format!("plugin_{}_sfz", b));
        assert_eq!(
            host.midi_in_port_name(a),
            format!("live_plugins:plugin_{}_sfz:events-in", a)
        );
        assert_eq!(
            host.audio_out_port_names(a),
            [
                format!("live_plugins:plugin_{}_sfz:audio-out1", a),
                format!("live_plugins:plugin_{}_sfz:audio-out2", a),
            ]
        );
        assert_eq!(host.plugin_format(b), Some(InstrumentFormat::Sfz));
    }

    #[test]
    fn gig_files_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = PluginHostEngine::new("p", Duration::ZERO);
        let h = host.add_sfz(&instrument(&dir, "grand.gig")).unwrap();
        assert_eq!(host.plugin_format(h), Some(InstrumentFormat::Gig));
    }

    #[test]
    fn rejects_missing_and_unsupported_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = PluginHostEngine::new("p", Duration::ZERO);
        assert!(matches!(
            host.add_sfz(&dir.path().join("nope.sfz")),
            Err(BackendError::FileNotFound(_))
        ));
        assert!(matches!(
            host.add_sfz(&instrument(&dir, "song.wav")),
            Err(BackendError::Unsupported(_))
        ));
        assert_eq!(host.plugin_count(), 0);
    }

    #[test]
    fn unknown_handles() {
        let mut host = PluginHostEngine::new("p", Duration::ZERO);
        let h = EngineHandle::new(7);
        assert_eq!(host.remove_sfz(h), Err(BackendError::UnknownHandle(h)));
        assert!(host.midi_in_port_name(h).is_empty());
        assert!(host.plugin_name(h).is_empty());
    }

    #[test]
    fn first_load_opens_settle_window() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = unbounded();
        let mut host = PluginHostEngine::new("p", Duration::from_millis(50));
        host.init_engine(tx).unwrap();

        let first = instrument(&dir, "a.sfz");
        let second = instrument(&dir, "b.sfz");
        host.add_sfz(&first).unwrap();
        assert!(host.is_settling());
        assert_eq!(host.add_sfz(&second), Err(BackendError::NotReady));

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut settled = false;
        while Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(EngineEvent::Settled) => {
                    settled = true;
                    break;
                }
                Ok(_) => continue,
                Err(_) => {}
            }
        }
        assert!(settled, "no Settled event");
        assert!(!host.is_settling());
        assert!(host.add_sfz(&second).is_ok());
        assert_eq!(host.plugin_count(), 2);
    }

    #[test]
    fn later_loads_do_not_reopen_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = PluginHostEngine::new("p", Duration::ZERO);
        host.add_sfz(&instrument(&dir, "a.sfz")).unwrap();
        host.settle_delay = Duration::from_secs(60);
        host.add_sfz(&instrument(&dir, "b.sfz")).unwrap();
        assert!(!host.is_settling());
    }

    #[test]
    fn gain_is_stored_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = PluginHostEngine::new("p", Duration::ZERO);
        let h = host.add_sfz(&instrument(&dir, "a.sfz")).unwrap();
        host.set_gain(h, 0.25);
        assert_eq!(host.plugin_gain(h), Some(0.25));
        host.set_gain(h, -1.0);
        assert_eq!(host.plugin_gain(h), Some(0.0));
    }
}
