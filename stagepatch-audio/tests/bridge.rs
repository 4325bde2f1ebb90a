#![cfg(unix)]

mod common;

use std::time::Duration;

use crossbeam_channel::unbounded;
use stagepatch_audio::bridge::{BridgeEngine, BridgeState};
use stagepatch_core::engine::backend::{EngineEvent, SoundEngine};
use stagepatch_core::error::BackendError;
use stagepatch_types::EngineHandle;

use common::{drain, scripts, wait_for};

const POLL: Duration = Duration::from_millis(10);

#[test]
fn test_subclient_gets_jack_name_and_soundfile() {
    let s = scripts();
    let mut engine = BridgeEngine::new("live", s.recording.clone(), 3, POLL);
    let h = engine.add_sfz(&s.instrument).unwrap();

    let args_file = s.dir().join("recording.sh.args");
    assert!(wait_for(Duration::from_secs(5), || args_file.exists()
        && std::fs::read_to_string(&args_file).map_or(false, |a| a.lines().count() == 3)));
    let args = std::fs::read_to_string(&args_file).unwrap();
    let expected = format!("-j\nlive_subclient_{}\n{}\n", h, s.instrument.display());
    assert_eq!(args, expected);
}

#[test]
fn test_port_names_follow_the_subclient() {
    let s = scripts();
    let mut engine = BridgeEngine::new("live", s.long_running.clone(), 3, POLL);
    let h = engine.add_sfz(&s.instrument).unwrap();
    let jack = format!("live_subclient_{}", h);

    assert_eq!(engine.midi_in_port_name(h), format!("{}:midi_in_0", jack));
    assert_eq!(
        engine.audio_out_port_names(h),
        [format!("{}:bus_0_L", jack), format!("{}:bus_0_R", jack)]
    );
    assert_eq!(engine.client_names(), vec![jack]);
    assert_eq!(engine.plugin_name(h), s.instrument.display().to_string());
}

#[test]
fn test_healthy_child_is_left_alone() {
    let s = scripts();
    let mut engine = BridgeEngine::new("live", s.long_running.clone(), 3, POLL);
    let h = engine.add_sfz(&s.instrument).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let status = engine.status(h).unwrap();
    assert_eq!(status.state, BridgeState::Running);
    assert_eq!(status.start_count, 1);
}

#[test]
fn test_crashing_child_is_restarted_then_given_up() {
    let s = scripts();
    let (tx, rx) = unbounded();
    let mut engine = BridgeEngine::new("live", s.crashing.clone(), 2, POLL);
    engine.init_engine(tx).unwrap();
    let h = engine.add_sfz(&s.instrument).unwrap();

    assert!(wait_for(Duration::from_secs(10), || {
        engine.status(h).map(|st| st.state) == Some(BridgeState::Failed)
    }));
    let status = engine.status(h).unwrap();
    assert_eq!(status.start_count, 3);

    let events = drain(&rx);
    let restarts = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::UserMessage(m) if m.ends_with("Restarting...")))
        .count();
    assert_eq!(restarts, 2);
    assert!(events.iter().any(
        |e| matches!(e, EngineEvent::UserMessage(m) if m.contains("Not restarting after 2 restarts"))
    ));
    assert!(events.iter().any(
        |e| matches!(e, EngineEvent::StatusInfo(t) if t.contains("State: Failed") && t.contains("StartCount: 3"))
    ));
}

#[test]
fn test_status_text_lists_every_subclient() {
    let s = scripts();
    let mut engine = BridgeEngine::new("live", s.long_running.clone(), 3, POLL);
    let a = engine.add_sfz(&s.instrument).unwrap();
    let b = engine.add_sfz(&s.instrument).unwrap();

    let text = engine.status_text();
    assert!(text.contains(&format!("Subclient {}\n   State: Running\n   StartCount: 1\n", a)));
    assert!(text.contains(&format!("Subclient {}\n", b)));
    assert!(text.contains(&format!("   Soundfile: {}", s.instrument.display())));
}

#[test]
fn test_remove_stops_and_forgets_the_subclient() {
    let s = scripts();
    let mut engine = BridgeEngine::new("live", s.long_running.clone(), 3, POLL);
    let h = engine.add_sfz(&s.instrument).unwrap();
    engine.remove_sfz(h).unwrap();

    assert!(engine.status(h).is_none());
    assert!(engine.client_names().is_empty());
    assert_eq!(engine.remove_sfz(h), Err(BackendError::UnknownHandle(h)));
}

#[test]
fn test_missing_instrument_or_executable() {
    let s = scripts();
    let mut engine = BridgeEngine::new("live", s.long_running.clone(), 3, POLL);
    assert!(matches!(
        engine.add_sfz(&s.dir().join("absent.sfz")),
        Err(BackendError::FileNotFound(_))
    ));

    let mut broken = BridgeEngine::new("live", s.dir().join("no-such-exe"), 3, POLL);
    assert!(matches!(broken.add_sfz(&s.instrument), Err(BackendError::Process(_))));
    assert!(broken.status(EngineHandle::new(0)).is_none());
}
