//! In-process routing surface.
//!
//! `MixTable` is the control-side handle; it implements [`RoutingSurface`]
//! and may block. `MixTableReader` is the audio-callback side: every read
//! goes through [`RtShared::try_with`], so a reader never waits on the
//! control thread. On contention the read returns `None` and the caller
//! drops that block or MIDI batch.
//!
//! A layer or port is audible when it is active for the current patch, not
//! muted, and either nothing in the graph is soloed or it is soloed itself.
//!
//! Note-ons, sustain-ons and non-zero pitchbends are remembered per target
//! with the filter they went through. The matching note-off, sustain-off or
//! pitchbend-zero goes only to those targets, whether or not they are still
//! active or audible, so a patch switch or a mute never leaves a note hanging.

use std::collections::HashMap;

use stagepatch_types::midi::CC_SUSTAIN;
use stagepatch_types::{MidiEvent, MidiEventKind, MidiFilter, RtLayerId, RtPortId};

use crate::engine::routing::{
    ActivePorts, LayerPortSpec, LayerRouting, PortKind, RoutingSurface,
};
use crate::error::RoutingResult;
use crate::realtime::RtShared;

/// Sustain values at or below this count as pedal up.
const SUSTAIN_THRESHOLD: u8 = 63;

/// Held events tracked at once. The list is never grown on the audio
/// thread; events past this are routed but not remembered.
const HELD_CAPACITY: usize = 512;

#[derive(Debug, Clone)]
struct PortState {
    kind: PortKind,
    name: String,
    clients: Vec<String>,
    filter: MidiFilter,
    solo: bool,
    mute: bool,
    gain: f32,
    partner: Option<RtPortId>,
}

#[derive(Debug, Clone)]
struct LayerState {
    spec: LayerPortSpec,
    filter: MidiFilter,
    solo: bool,
    mute: bool,
    gain: f32,
    routing: LayerRouting,
}

/// Something sounding on a target that needs an explicit release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Held {
    /// Output note number, after the target's filter.
    Note(u8),
    Sustain,
    Pitchbend,
}

impl Held {
    fn of(ev: &MidiEvent) -> Option<Self> {
        match ev.kind {
            MidiEventKind::NoteOn if ev.velocity() > 0 => Some(Held::Note(ev.note())),
            MidiEventKind::ControlChange
                if ev.data1 == CC_SUSTAIN && ev.velocity() > SUSTAIN_THRESHOLD =>
            {
                Some(Held::Sustain)
            }
            MidiEventKind::PitchBend if ev.pitchbend_signed() != 0 => Some(Held::Pitchbend),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    Note,
    Sustain,
    Pitchbend,
}

impl Release {
    fn of(ev: &MidiEvent) -> Option<Self> {
        if ev.is_note_release() {
            return Some(Release::Note);
        }
        match ev.kind {
            MidiEventKind::ControlChange
                if ev.data1 == CC_SUSTAIN && ev.velocity() <= SUSTAIN_THRESHOLD =>
            {
                Some(Release::Sustain)
            }
            MidiEventKind::PitchBend if ev.pitchbend_signed() == 0 => Some(Release::Pitchbend),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct HeldRecord {
    source: RtPortId,
    target: MidiTarget,
    /// Target filter at the time the event was routed.
    filter: MidiFilter,
    held: Held,
}

#[derive(Debug, Default)]
struct MixState {
    next_id: u32,
    ports: HashMap<RtPortId, PortState>,
    layers: HashMap<RtLayerId, LayerState>,
    active: ActivePorts,
    held: Vec<HeldRecord>,
    solo_external: bool,
    panic: bool,
}

fn audible(panic: bool, solo_external: bool, solo: bool, mute: bool) -> bool {
    !panic && !mute && (!solo_external || solo)
}

/// Remember `out`, just sent from `source` to `target`, if it needs a release.
fn remember(
    held: &mut Vec<HeldRecord>,
    source: RtPortId,
    target: MidiTarget,
    filter: &MidiFilter,
    out: &MidiEvent,
) {
    let Some(kind) = Held::of(out) else {
        return;
    };
    let duplicate = !matches!(kind, Held::Note(_))
        && held
            .iter()
            .any(|h| h.source == source && h.target == target && h.held == kind);
    if duplicate || held.len() == held.capacity() {
        return;
    }
    held.push(HeldRecord {
        source,
        target,
        filter: filter.clone(),
        held: kind,
    });
}

/// Send `ev` to every target holding something from `source` that it
/// releases, through the filter recorded with it, and forget those records.
fn release_held(
    held: &mut Vec<HeldRecord>,
    source: RtPortId,
    release: Release,
    ev: &MidiEvent,
    emit: &mut impl FnMut(MidiTarget, MidiEvent),
) {
    held.retain(|rec| {
        if rec.source != source {
            return true;
        }
        match (release, rec.held) {
            (Release::Note, Held::Note(note)) => {
                let mut matched = None;
                rec.filter.process(ev, |out| {
                    if matched.is_none() && out.note() == note {
                        matched = Some(out);
                    }
                });
                match matched {
                    Some(out) => {
                        emit(rec.target, out);
                        false
                    }
                    None => true,
                }
            }
            (Release::Sustain, Held::Sustain) => {
                let mut out = rec.filter.apply(ev);
                out.data2 = Some(0);
                emit(rec.target, out);
                false
            }
            (Release::Pitchbend, Held::Pitchbend) => {
                emit(rec.target, rec.filter.apply(ev));
                false
            }
            _ => true,
        }
    });
}

impl MixState {
    fn new() -> Self {
        Self {
            held: Vec::with_capacity(HELD_CAPACITY),
            ..Self::default()
        }
    }

    fn audible(&self, solo: bool, mute: bool) -> bool {
        audible(self.panic, self.solo_external, solo, mute)
    }

    fn alloc(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Control-side lock on a [`MixTable`]; see [`MixTable::hold`].
pub struct MixTableLock<'a> {
    _guard: parking_lot::MutexGuard<'a, MixState>,
}

/// Where a routed MIDI event should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiTarget {
    Layer(RtLayerId),
    Port(RtPortId),
}

/// Clones share the same table.
#[derive(Clone)]
pub struct MixTable {
    client_name: String,
    state: RtShared<MixState>,
}

impl MixTable {
    pub fn new(client_name: &str) -> Self {
        Self {
            client_name: client_name.to_string(),
            state: RtShared::new(MixState::new()),
        }
    }

    /// Realtime handle sharing this table's state.
    pub fn reader(&self) -> MixTableReader {
        MixTableReader {
            state: self.state.clone(),
        }
    }

    /// Hold the table lock until the guard drops, as a long control-side
    /// mutation would.
    pub fn hold(&self) -> MixTableLock<'_> {
        MixTableLock {
            _guard: self.state.lock(),
        }
    }

    /// Name the surface gave a port, if it exists.
    pub fn port_name(&self, port: RtPortId) -> Option<String> {
        self.state.with(|s| s.ports.get(&port).map(|p| p.name.clone()))
    }

    /// Instrument name of a layer's ports, if they exist.
    pub fn layer_name(&self, layer: RtLayerId) -> Option<String> {
        self.state.with(|s| s.layers.get(&layer).map(|l| l.spec.name.clone()))
    }

    pub fn layer_count(&self) -> usize {
        self.state.with(|s| s.layers.len())
    }

    /// Notes, pedals and bends still waiting for their release.
    pub fn held_count(&self) -> usize {
        self.state.with(|s| s.held.len())
    }
}

impl RoutingSurface for MixTable {
    fn client_name(&self) -> String {
        self.client_name.clone()
    }

    fn add_port(&self, kind: PortKind, name: &str) -> RoutingResult<RtPortId> {
        let port = self.state.with(|s| {
            let port = RtPortId::new(s.alloc());
            s.ports.insert(
                port,
                PortState {
                    kind,
                    name: format!("{}:{}", self.client_name, name),
                    clients: Vec::new(),
                    filter: MidiFilter::pass_all(),
                    solo: false,
                    mute: false,
                    gain: 1.0,
                    partner: None,
                },
            );
            port
        });
        log::debug!(target: "routing", "added {:?} port {} ({})", kind, name, port);
        Ok(port)
    }

    fn remove_port(&self, port: RtPortId) {
        self.state.with(|s| {
            s.ports.remove(&port);
            s.held
                .retain(|h| h.source != port && h.target != MidiTarget::Port(port));
            s.active.midi_out.retain(|p| *p != port);
            s.active.audio_in.retain(|p| *p != port);
        });
    }

    fn add_port_client(&self, port: RtPortId, client: &str) {
        self.state.with(|s| {
            if let Some(p) = s.ports.get_mut(&port) {
                if !p.clients.iter().any(|c| c == client) {
                    p.clients.push(client.to_string());
                }
            }
        });
    }

    fn remove_port_client(&self, port: RtPortId, client: &str) {
        self.state.with(|s| {
            if let Some(p) = s.ports.get_mut(&port) {
                p.clients.retain(|c| c != client);
            }
        });
    }

    fn set_port_filter(&self, port: RtPortId, filter: &MidiFilter) {
        self.state.with(|s| {
            if let Some(p) = s.ports.get_mut(&port) {
                p.filter = filter.clone();
            }
        });
    }

    fn set_port_solo(&self, port: RtPortId, solo: bool) {
        self.state.with(|s| {
            if let Some(p) = s.ports.get_mut(&port) {
                p.solo = solo;
            }
        });
    }

    fn set_port_mute(&self, port: RtPortId, mute: bool) {
        self.state.with(|s| {
            if let Some(p) = s.ports.get_mut(&port) {
                p.mute = mute;
            }
        });
    }

    fn set_port_gain(&self, port: RtPortId, gain: f32) {
        self.state.with(|s| {
            if let Some(p) = s.ports.get_mut(&port) {
                p.gain = gain;
            }
        });
    }

    fn set_port_routing(&self, port: RtPortId, partner: RtPortId) {
        self.state.with(|s| {
            if let Some(p) = s.ports.get_mut(&port) {
                p.partner = Some(partner);
            }
        });
    }

    fn add_layer_ports(&self, spec: &LayerPortSpec) -> RoutingResult<RtLayerId> {
        let layer = self.state.with(|s| {
            let layer = RtLayerId::new(s.alloc());
            s.layers.insert(
                layer,
                LayerState {
                    spec: spec.clone(),
                    filter: spec.filter.clone(),
                    solo: false,
                    mute: false,
                    gain: 1.0,
                    routing: LayerRouting::default(),
                },
            );
            layer
        });
        log::debug!(target: "routing", "added ports for layer {} ({})", spec.name, layer);
        Ok(layer)
    }

    fn remove_layer_ports(&self, layer: RtLayerId) {
        self.state.with(|s| {
            s.layers.remove(&layer);
            s.held.retain(|h| h.target != MidiTarget::Layer(layer));
            s.active.layers.retain(|l| *l != layer);
        });
    }

    fn set_layer_filter(&self, layer: RtLayerId, filter: &MidiFilter) {
        self.state.with(|s| {
            if let Some(l) = s.layers.get_mut(&layer) {
                l.filter = filter.clone();
            }
        });
    }

    fn set_layer_solo(&self, layer: RtLayerId, solo: bool) {
        self.state.with(|s| {
            if let Some(l) = s.layers.get_mut(&layer) {
                l.solo = solo;
            }
        });
    }

    fn set_layer_mute(&self, layer: RtLayerId, mute: bool) {
        self.state.with(|s| {
            if let Some(l) = s.layers.get_mut(&layer) {
                l.mute = mute;
            }
        });
    }

    fn set_layer_gain(&self, layer: RtLayerId, gain: f32) {
        self.state.with(|s| {
            if let Some(l) = s.layers.get_mut(&layer) {
                l.gain = gain;
            }
        });
    }

    fn set_layer_routing(&self, layer: RtLayerId, routing: LayerRouting) {
        self.state.with(|s| {
            if let Some(l) = s.layers.get_mut(&layer) {
                l.routing = routing;
            }
        });
    }

    fn activate_ports(&self, active: &ActivePorts) {
        self.state.with(|s| s.active = active.clone());
    }

    fn solo_flag_internal(&self) -> bool {
        self.state.with(|s| {
            let active = &s.active;
            s.layers
                .iter()
                .any(|(id, l)| l.solo && active.layers.contains(id))
                || s.ports.iter().any(|(id, p)| {
                    p.solo && (active.midi_out.contains(id) || active.audio_in.contains(id))
                })
        })
    }

    fn set_solo_flag_external(&self, solo: bool) {
        self.state.with(|s| s.solo_external = solo);
    }

    fn panic(&self, on: bool) {
        log::info!(target: "routing", "panic {}", if on { "on" } else { "off" });
        self.state.with(|s| s.panic = on);
    }

    /// Distinct client names our ports are connected to.
    fn connected_clients(&self) -> Vec<String> {
        self.state.with(|s| {
            let mut clients: Vec<String> = s
                .ports
                .values()
                .flat_map(|p| p.clients.iter())
                .map(|c| c.split(':').next().unwrap_or(c).to_string())
                .collect();
            clients.sort();
            clients.dedup();
            clients
        })
    }
}

/// Audio-callback view of a [`MixTable`]. Never blocks.
#[derive(Clone)]
pub struct MixTableReader {
    state: RtShared<MixState>,
}

impl MixTableReader {
    /// Output gain of a layer for this block: zero if it is inactive,
    /// muted or soloed out. `None` if the table is locked; drop the block.
    pub fn layer_gain(&self, layer: RtLayerId) -> Option<f32> {
        self.state.try_with(|s| match s.layers.get(&layer) {
            Some(l) if s.active.layers.contains(&layer) && s.audible(l.solo, l.mute) => l.gain,
            _ => 0.0,
        })
    }

    /// Gain of an audio input or bus port for this block.
    pub fn port_gain(&self, port: RtPortId) -> Option<f32> {
        self.state.try_with(|s| match s.ports.get(&port) {
            Some(p) if p.kind == PortKind::AudioOut => p.gain,
            Some(p) if s.active.audio_in.contains(&port) && s.audible(p.solo, p.mute) => p.gain,
            _ => 0.0,
        })
    }

    /// Bus ports a layer plays into, left and right.
    pub fn layer_destination(&self, layer: RtLayerId) -> Option<[Option<RtPortId>; 2]> {
        self.state.try_with(|s| {
            s.layers
                .get(&layer)
                .map_or([None, None], |l| [l.routing.bus_left, l.routing.bus_right])
        })
    }

    /// Route one event arriving on MIDI input `port` through the input's
    /// filter, then to every audible layer and MIDI output listening on it,
    /// each with its own filter applied. Releases (note-off, sustain-off,
    /// pitchbend zero) go to the targets holding the matching event instead,
    /// even during panic. Returns false if the table was locked and the
    /// event was dropped.
    pub fn route_midi(
        &self,
        port: RtPortId,
        event: &MidiEvent,
        mut emit: impl FnMut(MidiTarget, MidiEvent),
    ) -> bool {
        self.state
            .try_with(|s| {
                let MixState {
                    ports,
                    layers,
                    active,
                    held,
                    solo_external,
                    panic,
                    ..
                } = s;
                let (panic, solo_external) = (*panic, *solo_external);
                let Some(input) = ports.get(&port) else {
                    return;
                };
                input.filter.process(event, |ev| {
                    if let Some(release) = Release::of(&ev) {
                        release_held(held, port, release, &ev, &mut emit);
                        return;
                    }
                    for layer in &active.layers {
                        let Some(l) = layers.get(layer) else {
                            continue;
                        };
                        if l.routing.midi_in == Some(port)
                            && audible(panic, solo_external, l.solo, l.mute)
                        {
                            let target = MidiTarget::Layer(*layer);
                            l.filter.process(&ev, |out| {
                                remember(held, port, target, &l.filter, &out);
                                emit(target, out);
                            });
                        }
                    }
                    for out_port in &active.midi_out {
                        let Some(p) = ports.get(out_port) else {
                            continue;
                        };
                        if p.partner == Some(port) && audible(panic, solo_external, p.solo, p.mute) {
                            let target = MidiTarget::Port(*out_port);
                            p.filter.process(&ev, |out| {
                                remember(held, port, target, &p.filter, &out);
                                emit(target, out);
                            });
                        }
                    }
                });
            })
            .is_some()
    }

    /// Blocks and MIDI batches dropped on contention so far.
    pub fn dropped(&self) -> u64 {
        self.state.dropped()
    }
}
