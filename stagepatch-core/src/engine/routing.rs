//! Realtime routing surface: the port graph the patch engine drives.
//!
//! `RoutingSurface` captures what the engine *means* to do (create a port,
//! route a layer to a bus, solo a port) independently of the graph that
//! does it. The realtime callback behind an implementation reads this state
//! every audio block; the engine only ever writes it from the control thread.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use stagepatch_types::{EngineHandle, MidiFilter, RtLayerId, RtPortId};

use crate::error::{RoutingError, RoutingResult};

/// Role of a port owned by the routing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// Receives MIDI from controllers.
    MidiIn,
    /// Sends MIDI to external gear.
    MidiOut,
    /// Receives audio from outside (one side of an audio-in pair).
    AudioIn,
    /// Sends audio out (one side of a bus).
    AudioOut,
}

/// Which sound engine produced a layer's ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerEngine {
    Plugin,
    Soundfont,
}

/// Ports to create for one materialized layer.
///
/// For plugin layers the surface creates a MIDI output connected to
/// `midi_in_port` and audio inputs connected to `audio_out_ports`. Empty
/// names mean the backend has not published its ports yet; the surface
/// creates its side and leaves it unconnected.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerPortSpec {
    pub engine: LayerEngine,
    pub handle: EngineHandle,
    pub name: String,
    pub midi_in_port: String,
    pub audio_out_ports: [String; 2],
    pub filter: MidiFilter,
}

/// Layer-to-graph routing: the MIDI input feeding it and the bus it plays into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerRouting {
    pub midi_in: Option<RtPortId>,
    pub bus_left: Option<RtPortId>,
    pub bus_right: Option<RtPortId>,
}

/// Everything that should be processing for the current patch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActivePorts {
    pub midi_out: Vec<RtPortId>,
    pub audio_in: Vec<RtPortId>,
    pub layers: Vec<RtLayerId>,
}

/// Port graph consumed by the patch engine.
///
/// Setters never fail: they update state that the realtime thread picks up
/// on the next block. Only creating ports can fail.
pub trait RoutingSurface: Send {
    /// Client name in the port graph, used as the prefix of our own ports.
    fn client_name(&self) -> String;

    fn add_port(&self, kind: PortKind, name: &str) -> RoutingResult<RtPortId>;
    fn remove_port(&self, port: RtPortId);
    fn add_port_client(&self, port: RtPortId, client: &str);
    fn remove_port_client(&self, port: RtPortId, client: &str);

    fn set_port_filter(&self, port: RtPortId, filter: &MidiFilter);
    fn set_port_solo(&self, port: RtPortId, solo: bool);
    fn set_port_mute(&self, port: RtPortId, mute: bool);
    fn set_port_gain(&self, port: RtPortId, gain: f32);
    /// Set the single routing partner of a port: the bus side an audio input
    /// plays into, or the MIDI input feeding a MIDI output.
    fn set_port_routing(&self, port: RtPortId, partner: RtPortId);

    /// Create and connect the ports for a materialized layer. The layer's
    /// MIDI filter is applied as part of this.
    fn add_layer_ports(&self, spec: &LayerPortSpec) -> RoutingResult<RtLayerId>;
    fn remove_layer_ports(&self, layer: RtLayerId);
    fn set_layer_filter(&self, layer: RtLayerId, filter: &MidiFilter);
    fn set_layer_solo(&self, layer: RtLayerId, solo: bool);
    fn set_layer_mute(&self, layer: RtLayerId, mute: bool);
    fn set_layer_gain(&self, layer: RtLayerId, gain: f32);
    fn set_layer_routing(&self, layer: RtLayerId, routing: LayerRouting);

    /// Deactivate everything, then activate what the patch needs.
    fn activate_ports(&self, active: &ActivePorts);

    /// Whether any active port or layer is soloed, as seen by the graph.
    fn solo_flag_internal(&self) -> bool;
    fn set_solo_flag_external(&self, solo: bool);

    /// While on, every MIDI output sends all-notes-off and input is ignored.
    fn panic(&self, on: bool);

    /// Clients currently connected to the graph.
    fn connected_clients(&self) -> Vec<String>;
}

// ─── Null Surface ───────────────────────────────────────────────────

/// Routing surface that accepts everything and routes nothing.
/// Used for headless runs without a port graph.
pub struct NullRoutingSurface {
    next_id: Mutex<u32>,
}

impl NullRoutingSurface {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(0),
        }
    }

    fn alloc(&self) -> u32 {
        let mut next = self.next_id.lock();
        let id = *next;
        *next += 1;
        id
    }
}

impl Default for NullRoutingSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingSurface for NullRoutingSurface {
    fn client_name(&self) -> String {
        "stagepatch".to_string()
    }
    fn add_port(&self, _kind: PortKind, _name: &str) -> RoutingResult<RtPortId> {
        Ok(RtPortId::new(self.alloc()))
    }
    fn remove_port(&self, _port: RtPortId) {}
    fn add_port_client(&self, _port: RtPortId, _client: &str) {}
    fn remove_port_client(&self, _port: RtPortId, _client: &str) {}
    fn set_port_filter(&self, _port: RtPortId, _filter: &MidiFilter) {}
    fn set_port_solo(&self, _port: RtPortId, _solo: bool) {}
    fn set_port_mute(&self, _port: RtPortId, _mute: bool) {}
    fn set_port_gain(&self, _port: RtPortId, _gain: f32) {}
    fn set_port_routing(&self, _port: RtPortId, _partner: RtPortId) {}
    fn add_layer_ports(&self, _spec: &LayerPortSpec) -> RoutingResult<RtLayerId> {
        Ok(RtLayerId::new(self.alloc()))
    }
    fn remove_layer_ports(&self, _layer: RtLayerId) {}
    fn set_layer_filter(&self, _layer: RtLayerId, _filter: &MidiFilter) {}
    fn set_layer_solo(&self, _layer: RtLayerId, _solo: bool) {}
    fn set_layer_mute(&self, _layer: RtLayerId, _mute: bool) {}
    fn set_layer_gain(&self, _layer: RtLayerId, _gain: f32) {}
    fn set_layer_routing(&self, _layer: RtLayerId, _routing: LayerRouting) {}
    fn activate_ports(&self, _active: &ActivePorts) {}
    fn solo_flag_internal(&self) -> bool {
        false
    }
    fn set_solo_flag_external(&self, _solo: bool) {}
    fn panic(&self, _on: bool) {}
    fn connected_clients(&self) -> Vec<String> {
        Vec::new()
    }
}

// ─── Test Surface ───────────────────────────────────────────────────

/// An operation recorded by `TestRoutingSurface` for assertion in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingOp {
    AddPort {
        kind: PortKind,
        name: String,
        port: RtPortId,
    },
    RemovePort(RtPortId),
    AddPortClient {
        port: RtPortId,
        client: String,
    },
    RemovePortClient {
        port: RtPortId,
        client: String,
    },
    SetPortFilter {
        port: RtPortId,
        filter: MidiFilter,
    },
    SetPortSolo {
        port: RtPortId,
        solo: bool,
    },
    SetPortMute {
        port: RtPortId,
        mute: bool,
    },
    SetPortGain {
        port: RtPortId,
        gain: f32,
    },
    SetPortRouting {
        port: RtPortId,
        partner: RtPortId,
    },
    AddLayerPorts {
        layer: RtLayerId,
        spec: LayerPortSpec,
    },
    RemoveLayerPorts(RtLayerId),
    SetLayerFilter {
        layer: RtLayerId,
        filter: MidiFilter,
    },
    SetLayerSolo {
        layer: RtLayerId,
        solo: bool,
    },
    SetLayerMute {
        layer: RtLayerId,
        mute: bool,
    },
    SetLayerGain {
        layer: RtLayerId,
        gain: f32,
    },
    SetLayerRouting {
        layer: RtLayerId,
        routing: LayerRouting,
    },
    ActivatePorts(ActivePorts),
    SetSoloFlagExternal(bool),
    Panic(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SoloTarget {
    Port(RtPortId),
    Layer(RtLayerId),
}

#[derive(Default)]
struct TestState {
    ops: Vec<RoutingOp>,
    next_id: u32,
    solos: HashMap<SoloTarget, bool>,
    live_layers: Vec<RtLayerId>,
    live_ports: Vec<RtPortId>,
    connected_clients: Vec<String>,
    fail_layer_ports: bool,
}

/// A routing surface that records every operation for assertions.
/// All operations succeed unless `fail_layer_ports` is switched on.
pub struct TestRoutingSurface {
    state: Mutex<TestState>,
}

impl TestRoutingSurface {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TestState::default()),
        }
    }

    /// Return all recorded operations.
    pub fn operations(&self) -> Vec<RoutingOp> {
        self.state.lock().ops.clone()
    }

    /// Clear recorded operations. Live ports and solo state are kept.
    pub fn clear(&self) {
        self.state.lock().ops.clear();
    }

    /// Count operations matching a predicate.
    pub fn count<F: Fn(&RoutingOp) -> bool>(&self, f: F) -> usize {
        self.state.lock().ops.iter().filter(|op| f(op)).count()
    }

    /// Find the first operation matching a predicate.
    pub fn find<F: Fn(&RoutingOp) -> bool>(&self, f: F) -> Option<RoutingOp> {
        self.state.lock().ops.iter().find(|op| f(op)).cloned()
    }

    /// Layers whose ports currently exist.
    pub fn live_layers(&self) -> Vec<RtLayerId> {
        self.state.lock().live_layers.clone()
    }

    pub fn live_ports(&self) -> Vec<RtPortId> {
        self.state.lock().live_ports.clone()
    }

    /// Most recent external solo flag pushed, if any.
    pub fn last_external_solo(&self) -> Option<bool> {
        self.state.lock().ops.iter().rev().find_map(|op| match op {
            RoutingOp::SetSoloFlagExternal(s) => Some(*s),
            _ => None,
        })
    }

    pub fn set_connected_clients(&self, clients: &[&str]) {
        self.state.lock().connected_clients = clients.iter().map(|c| c.to_string()).collect();
    }

    /// Make subsequent `add_layer_ports` calls fail.
    pub fn set_fail_layer_ports(&self, fail: bool) {
        self.state.lock().fail_layer_ports = fail;
    }

    fn record(&self, op: RoutingOp) {
        self.state.lock().ops.push(op);
    }
}

impl Default for TestRoutingSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingSurface for TestRoutingSurface {
    fn client_name(&self) -> String {
        "stagepatch".to_string()
    }

    fn add_port(&self, kind: PortKind, name: &str) -> RoutingResult<RtPortId> {
        let mut state = self.state.lock();
        let port = RtPortId::new(state.next_id);
        state.next_id += 1;
        state.live_ports.push(port);
        state.ops.push(RoutingOp::AddPort {
            kind,
            name: name.to_string(),
            port,
        });
        Ok(port)
    }

    fn remove_port(&self, port: RtPortId) {
        let mut state = self.state.lock();
        state.live_ports.retain(|p| *p != port);
        state.solos.remove(&SoloTarget::Port(port));
        state.ops.push(RoutingOp::RemovePort(port));
    }

    fn add_port_client(&self, port: RtPortId, client: &str) {
        self.record(RoutingOp::AddPortClient {
            port,
            client: client.to_string(),
        });
    }

    fn remove_port_client(&self, port: RtPortId, client: &str) {
        self.record(RoutingOp::RemovePortClient {
            port,
            client: client.to_string(),
        });
    }

    fn set_port_filter(&self, port: RtPortId, filter: &MidiFilter) {
        self.record(RoutingOp::SetPortFilter {
            port,
            filter: filter.clone(),
        });
    }

    fn set_port_solo(&self, port: RtPortId, solo: bool) {
        let mut state = self.state.lock();
        state.solos.insert(SoloTarget::Port(port), solo);
        state.ops.push(RoutingOp::SetPortSolo { port, solo });
    }

    fn set_port_mute(&self, port: RtPortId, mute: bool) {
        self.record(RoutingOp::SetPortMute { port, mute });
    }

    fn set_port_gain(&self, port: RtPortId, gain: f32) {
        self.record(RoutingOp::SetPortGain { port, gain });
    }

    fn set_port_routing(&self, port: RtPortId, partner: RtPortId) {
        self.record(RoutingOp::SetPortRouting { port, partner });
    }

    fn add_layer_ports(&self, spec: &LayerPortSpec) -> RoutingResult<RtLayerId> {
        let mut state = self.state.lock();
        if state.fail_layer_ports {
            return Err(RoutingError(format!("cannot register ports for {}", spec.name)));
        }
        let layer = RtLayerId::new(state.next_id);
        state.next_id += 1;
        state.live_layers.push(layer);
        state.ops.push(RoutingOp::AddLayerPorts {
            layer,
            spec: spec.clone(),
        });
        Ok(layer)
    }

    fn remove_layer_ports(&self, layer: RtLayerId) {
        let mut state = self.state.lock();
        state.live_layers.retain(|l| *l != layer);
        state.solos.remove(&SoloTarget::Layer(layer));
        state.ops.push(RoutingOp::RemoveLayerPorts(layer));
    }

    fn set_layer_filter(&self, layer: RtLayerId, filter: &MidiFilter) {
        self.record(RoutingOp::SetLayerFilter {
            layer,
            filter: filter.clone(),
        });
    }

    fn set_layer_solo(&self, layer: RtLayerId, solo: bool) {
        let mut state = self.state.lock();
        state.solos.insert(SoloTarget::Layer(layer), solo);
        state.ops.push(RoutingOp::SetLayerSolo { layer, solo });
    }

    fn set_layer_mute(&self, layer: RtLayerId, mute: bool) {
        self.record(RoutingOp::SetLayerMute { layer, mute });
    }

    fn set_layer_gain(&self, layer: RtLayerId, gain: f32) {
        self.record(RoutingOp::SetLayerGain { layer, gain });
    }

    fn set_layer_routing(&self, layer: RtLayerId, routing: LayerRouting) {
        self.record(RoutingOp::SetLayerRouting { layer, routing });
    }

    fn activate_ports(&self, active: &ActivePorts) {
        self.record(RoutingOp::ActivatePorts(active.clone()));
    }

    fn solo_flag_internal(&self) -> bool {
        self.state.lock().solos.values().any(|s| *s)
    }

    fn set_solo_flag_external(&self, solo: bool) {
        self.record(RoutingOp::SetSoloFlagExternal(solo));
    }

    fn panic(&self, on: bool) {
        self.record(RoutingOp::Panic(on));
    }

    fn connected_clients(&self) -> Vec<String> {
        self.state.lock().connected_clients.clone()
    }
}

/// Wrapper around `Arc<TestRoutingSurface>` that implements `RoutingSurface`,
/// so a test can hand the surface to an engine and still inspect it.
pub struct SharedTestRoutingSurface(pub Arc<TestRoutingSurface>);

impl RoutingSurface for SharedTestRoutingSurface {
    fn client_name(&self) -> String {
        self.0.client_name()
    }
    fn add_port(&self, kind: PortKind, name: &str) -> RoutingResult<RtPortId> {
        self.0.add_port(kind, name)
    }
    fn remove_port(&self, port: RtPortId) {
        self.0.remove_port(port)
    }
    fn add_port_client(&self, port: RtPortId, client: &str) {
        self.0.add_port_client(port, client)
    }
    fn remove_port_client(&self, port: RtPortId, client: &str) {
        self.0.remove_port_client(port, client)
    }
    fn set_port_filter(&self, port: RtPortId, filter: &MidiFilter) {
        self.0.set_port_filter(port, filter)
    }
    fn set_port_solo(&self, port: RtPortId, solo: bool) {
        self.0.set_port_solo(port, solo)
    }
    fn set_port_mute(&self, port: RtPortId, mute: bool) {
        self.0.set_port_mute(port, mute)
    }
    fn set_port_gain(&self, port: RtPortId, gain: f32) {
        self.0.set_port_gain(port, gain)
    }
    fn set_port_routing(&self, port: RtPortId, partner: RtPortId) {
        self.0.set_port_routing(port, partner)
    }
    fn add_layer_ports(&self, spec: &LayerPortSpec) -> RoutingResult<RtLayerId> {
        self.0.add_layer_ports(spec)
    }
    fn remove_layer_ports(&self, layer: RtLayerId) {
        self.0.remove_layer_ports(layer)
    }
    fn set_layer_filter(&self, layer: RtLayerId, filter: &MidiFilter) {
        self.0.set_layer_filter(layer, filter)
    }
    fn set_layer_solo(&self, layer: RtLayerId, solo: bool) {
        self.0.set_layer_solo(layer, solo)
    }
    fn set_layer_mute(&self, layer: RtLayerId, mute: bool) {
        self.0.set_layer_mute(layer, mute)
    }
    fn set_layer_gain(&self, layer: RtLayerId, gain: f32) {
        self.0.set_layer_gain(layer, gain)
    }
    fn set_layer_routing(&self, layer: RtLayerId, routing: LayerRouting) {
        self.0.set_layer_routing(layer, routing)
    }
    fn activate_ports(&self, active: &ActivePorts) {
        self.0.activate_ports(active)
    }
    fn solo_flag_internal(&self) -> bool {
        self.0.solo_flag_internal()
    }
    fn set_solo_flag_external(&self, solo: bool) {
        self.0.set_solo_flag_external(solo)
    }
    fn panic(&self, on: bool) {
        self.0.panic(on)
    }
    fn connected_clients(&self) -> Vec<String> {
        self.0.connected_clients()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_records_and_tracks_live_ports() {
        let surface = TestRoutingSurface::new();
        let port = surface.add_port(PortKind::AudioOut, "bus_0_L").unwrap();
        surface.set_port_solo(port, true);
        assert!(surface.solo_flag_internal());
        surface.remove_port(port);
        assert!(!surface.solo_flag_internal());
        assert!(surface.live_ports().is_empty());
        assert_eq!(surface.count(|op| matches!(op, RoutingOp::RemovePort(_))), 1);
    }

    #[test]
    fn failing_layer_ports() {
        let surface = TestRoutingSurface::new();
        surface.set_fail_layer_ports(true);
        let spec = LayerPortSpec {
            engine: LayerEngine::Plugin,
            handle: EngineHandle::new(0),
            name: "plugin_0_sfz".into(),
            midi_in_port: String::new(),
            audio_out_ports: [String::new(), String::new()],
            filter: MidiFilter::default(),
        };
        assert!(surface.add_layer_ports(&spec).is_err());
        assert!(surface.live_layers().is_empty());
    }

    #[test]
    fn null_surface_hands_out_distinct_ids() {
        let surface = NullRoutingSurface::new();
        let a = surface.add_port(PortKind::MidiIn, "a").unwrap();
        let b = surface.add_port(PortKind::MidiIn, "b").unwrap();
        assert_ne!(a, b);
    }
}
