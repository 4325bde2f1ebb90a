//! Bridge backend: each instrument runs in its own sub-process, which
//! registers as a separate JACK client named `<client>_subclient_<id>`.
//!
//! A monitor thread polls the children. One that exits is started again
//! until it has used up `max_restarts`; after that it is left as
//! [`BridgeState::Failed`] and the user is told. Every state change is
//! published as an [`EngineEvent::StatusInfo`] dump.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use stagepatch_core::config::Config;
use stagepatch_core::engine::backend::{EngineEvent, EngineEventSender, SoundEngine};
use stagepatch_core::error::{BackendError, BackendResult};
use stagepatch_types::EngineHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Running,
    /// Exhausted its restarts.
    Failed,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeState::Running => write!(f, "Running"),
            BridgeState::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeStatus {
    pub jackname: String,
    pub soundfile: PathBuf,
    pub state: BridgeState,
    pub start_count: u32,
}

struct BridgeItem {
    status: BridgeStatus,
    child: Option<Child>,
    gain: f32,
}

struct BridgeShared {
    exe: PathBuf,
    max_restarts: u32,
    items: BTreeMap<EngineHandle, BridgeItem>,
    events: Option<EngineEventSender>,
}

impl BridgeShared {
    fn send(&self, event: EngineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn message(&self, text: String) {
        log::info!(target: "bridge", "{}", text);
        self.send(EngineEvent::UserMessage(text));
    }

    fn status_text(&self) -> String {
        let mut out = String::new();
        for (id, item) in &self.items {
            out.push_str(&format!(
                "Subclient {}\n   State: {}\n   StartCount: {}\n   Soundfile: {}\n",
                id,
                item.status.state,
                item.status.start_count,
                item.status.soundfile.display()
            ));
        }
        out
    }

    fn publish_status(&self) {
        self.send(EngineEvent::StatusInfo(self.status_text()));
    }

    /// Reap exited children and restart or retire them.
    fn check_children(&mut self) {
        let mut changed = false;
        let ids: Vec<EngineHandle> = self.items.keys().copied().collect();
        for id in ids {
            let exited = match self.items.get_mut(&id).and_then(|i| i.child.as_mut()) {
                Some(child) => match child.try_wait() {
                    Ok(Some(status)) => Some(status.to_string()),
                    Ok(None) => None,
                    Err(e) => Some(e.to_string()),
                },
                None => None,
            };
            let Some(reason) = exited else { continue };
            changed = true;

            let restarts_used = self.items.get(&id).map_or(0, |i| i.status.start_count.saturating_sub(1));
            if restarts_used >= self.max_restarts {
                if let Some(item) = self.items.get_mut(&id) {
                    item.child = None;
                    item.status.state = BridgeState::Failed;
                }
                log::error!(target: "bridge", "subclient {} stopped ({}), giving up after {} restarts", id, reason, restarts_used);
                self.message(format!(
                    "Bridge client {} stopped: {}. Not restarting after {} restarts.",
                    id, reason, restarts_used
                ));
                continue;
            }

            self.message(format!("Bridge client {} stopped: {}. Restarting...", id, reason));
            if let Err(e) = self.start(id) {
                log::error!(target: "bridge", "restart of subclient {} failed: {}", id, e);
                if let Some(item) = self.items.get_mut(&id) {
                    item.status.state = BridgeState::Failed;
                }
            }
        }
        if changed {
            self.publish_status();
        }
    }

    fn start(&mut self, id: EngineHandle) -> BackendResult {
        let exe = self.exe.clone();
        let item = self
            .items
            .get_mut(&id)
            .ok_or(BackendError::UnknownHandle(id))?;
        let child = spawn_subclient(&exe, &item.status.jackname, &item.status.soundfile)?;
        item.child = Some(child);
        item.status.start_count += 1;
        item.status.state = BridgeState::Running;
        Ok(())
    }
}

fn spawn_subclient(exe: &Path, jackname: &str, soundfile: &Path) -> BackendResult<Child> {
    log::debug!(
        target: "bridge",
        "starting {} -j {} {}",
        exe.display(),
        jackname,
        soundfile.display()
    );
    Command::new(exe)
        .arg("-j")
        .arg(jackname)
        .arg(soundfile)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| BackendError::Process(format!("could not start {}: {}", exe.display(), e)))
}

/// Kill and reap off the calling thread; `wait` may block.
fn stop_child(mut child: Child) {
    thread::spawn(move || {
        let _ = child.kill();
        let _ = child.wait();
    });
}

pub struct BridgeEngine {
    client_name: String,
    poll_interval: Duration,
    next_id: u32,
    shared: Arc<Mutex<BridgeShared>>,
    running: Arc<AtomicBool>,
    monitor_started: bool,
}

impl BridgeEngine {
    pub fn new(client_name: &str, exe: PathBuf, max_restarts: u32, poll_interval: Duration) -> Self {
        Self {
            client_name: client_name.to_string(),
            poll_interval,
            next_id: 0,
            shared: Arc::new(Mutex::new(BridgeShared {
                exe,
                max_restarts,
                items: BTreeMap::new(),
                events: None,
            })),
            running: Arc::new(AtomicBool::new(true)),
            monitor_started: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.client_name(),
            config.bridge_exe(),
            config.bridge_max_restarts(),
            config.bridge_poll_interval(),
        )
    }

    pub fn status(&self, handle: EngineHandle) -> Option<BridgeStatus> {
        self.shared
            .lock()
            .items
            .get(&handle)
            .map(|i| i.status.clone())
    }

    /// The same text sent with `EngineEvent::StatusInfo`.
    pub fn status_text(&self) -> String {
        self.shared.lock().status_text()
    }

    fn ensure_monitor(&mut self) -> BackendResult {
        if self.monitor_started {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let running = Arc::clone(&self.running);
        let interval = self.poll_interval;
        thread::Builder::new()
            .name("bridge-monitor".into())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    shared.lock().check_children();
                }
            })
            .map_err(|e| BackendError::Process(format!("could not start bridge monitor: {}", e)))?;
        self.monitor_started = true;
        Ok(())
    }
}

impl Drop for BridgeEngine {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        let mut shared = self.shared.lock();
        for item in shared.items.values_mut() {
            if let Some(child) = item.child.take() {
                stop_child(child);
            }
        }
    }
}

impl SoundEngine for BridgeEngine {
    fn engine_name(&self) -> &'static str {
        "bridge"
    }

    fn init_engine(&mut self, events: EngineEventSender) -> BackendResult {
        let _ = events.send(EngineEvent::Initialized);
        let mut shared = self.shared.lock();
        shared.events = Some(events);
        shared.message("Bridge engine initialised.".to_string());
        Ok(())
    }

    fn add_sfz(&mut self, path: &Path) -> BackendResult<EngineHandle> {
        if !path.is_file() {
            return Err(BackendError::FileNotFound(path.to_path_buf()));
        }
        self.ensure_monitor()?;

        let id = EngineHandle::new(self.next_id);
        self.next_id += 1;
        let jackname = format!("{}_subclient_{}", self.client_name, id);

        let mut shared = self.shared.lock();
        shared.items.insert(
            id,
            BridgeItem {
                status: BridgeStatus {
                    jackname,
                    soundfile: path.to_path_buf(),
                    state: BridgeState::Running,
                    start_count: 0,
                },
                child: None,
                gain: 1.0,
            },
        );
        if let Err(e) = shared.start(id) {
            shared.items.remove(&id);
            return Err(e);
        }
        shared.message(format!("Bridge client {} started.", id));
        shared.publish_status();
        Ok(id)
    }

    fn remove_sfz(&mut self, handle: EngineHandle) -> BackendResult {
        let mut shared = self.shared.lock();
        let Some(mut item) = shared.items.remove(&handle) else {
            log::error!(target: "bridge", "remove_sfz: unknown handle {}", handle);
            return Err(BackendError::UnknownHandle(handle));
        };
        if let Some(child) = item.child.take() {
            stop_child(child);
        }
        log::debug!(target: "bridge", "stopped {}", item.status.jackname);
        shared.publish_status();
        Ok(())
    }

    fn plugin_name(&self, handle: EngineHandle) -> String {
        self.shared
            .lock()
            .items
            .get(&handle)
            .map(|i| i.status.soundfile.display().to_string())
            .unwrap_or_default()
    }

    fn midi_in_port_name(&self, handle: EngineHandle) -> String {
        self.shared
            .lock()
            .items
            .get(&handle)
            .map(|i| format!("{}:midi_in_0", i.status.jackname))
            .unwrap_or_default()
    }

    fn audio_out_port_names(&self, handle: EngineHandle) -> [String; 2] {
        match self.shared.lock().items.get(&handle) {
            Some(i) => [
                format!("{}:bus_0_L", i.status.jackname),
                format!("{}:bus_0_R", i.status.jackname),
            ],
            None => Default::default(),
        }
    }

    /// Sub-processes take no remote gain control; the value is only recorded.
    fn set_gain(&mut self, handle: EngineHandle, gain: f32) {
        if let Some(item) = self.shared.lock().items.get_mut(&handle) {
            item.gain = gain.clamp(0.0, 1.0);
            log::debug!(target: "bridge", "gain of subclient {} is {:.3} (not forwarded)", handle, item.gain);
        }
    }

    fn client_names(&self) -> Vec<String> {
        self.shared
            .lock()
            .items
            .values()
            .map(|i| i.status.jackname.clone())
            .collect()
    }
}
