#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use stagepatch_core::engine::backend::EngineEvent;

/// Stand-in sub-process executables, written once per test binary so that
/// no script is still open for writing while another test spawns.
pub struct Scripts {
    dir: tempfile::TempDir,
    pub long_running: PathBuf,
    pub crashing: PathBuf,
    pub recording: PathBuf,
    pub instrument: PathBuf,
}

impl Scripts {
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

pub fn scripts() -> &'static Scripts {
    static SCRIPTS: OnceLock<Scripts> = OnceLock::new();
    SCRIPTS.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let long_running = write_script(dir.path(), "long_running.sh", "exec sleep 30\n");
        let crashing = write_script(dir.path(), "crashing.sh", "exit 3\n");
        let recording = write_script(
            dir.path(),
            "recording.sh",
            "printf '%s\\n' \"$@\" > \"$0.args\"\nexec sleep 30\n",
        );
        let instrument = dir.path().join("piano.sfz");
        std::fs::write(&instrument, "<region> sample=piano.wav\n").unwrap();
        Scripts {
            dir,
            long_running,
            crashing,
            recording,
            instrument,
        }
    })
}

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Poll `cond` until it holds or `timeout` runs out.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

pub fn drain(rx: &Receiver<EngineEvent>) -> Vec<EngineEvent> {
    rx.try_iter().collect()
}
