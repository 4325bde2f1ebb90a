use stagepatch_types::{Bus, LayerKind, RtPortId, Side};

use super::routing::LayerRouting;
use super::{convert_gain, PatchEngine};
use crate::error::{EngineError, EngineResult};

impl PatchEngine {
    /// Push gain, solo, mute and routing of every healthy layer of the
    /// current patch to the routing surface, then the aggregated solo flag.
    ///
    /// A layer whose bus or MIDI input has gone falls back to the first one
    /// in the project with a warning. A project with no buses at all is an
    /// error.
    pub fn refresh_all_gains_and_routing(&mut self) -> EngineResult {
        let Some(patch_id) = self.current else {
            return Ok(());
        };
        let master = self.master_gain;
        let mut warnings = Vec::new();

        // Field borrows: the project is read while the engines are mutated.
        let patch = self
            .project
            .patch(patch_id)
            .ok_or(EngineError::UnknownPatch(patch_id))?;
        for (index, layer) in patch.layers().iter().enumerate() {
            if layer.has_error() {
                continue;
            }

            let bus = match self.project.bus(layer.bus) {
                Some(bus) => bus,
                None => {
                    warnings.push(format!("Layer {} invalid bus {}", index + 1, layer.bus));
                    let Some(first) = self.project.first_bus_id(None) else {
                        log::error!(target: "engine", "refresh: project has no buses");
                        return Err(EngineError::NoBuses);
                    };
                    warnings.push(format!("   Defaulting to bus {}", first));
                    match self.project.bus(first) {
                        Some(bus) => bus,
                        None => return Err(EngineError::NoBuses),
                    }
                }
            };
            let [bus_left, bus_right] = bus_ports(bus);

            let midi_in = match self.project.midi_in_port(layer.midi_in_port) {
                Some(port) => port.rt_port,
                None => {
                    warnings.push(format!(
                        "Layer {} invalid MIDI input port {}",
                        index + 1,
                        layer.midi_in_port
                    ));
                    let first = self.project.first_midi_in_port_id(None);
                    match first {
                        Some(id) => warnings.push(format!("   Defaulting to port {}", id)),
                        None => warnings.push("   No MIDI input ports, layer gets no MIDI".to_string()),
                    }
                    first
                        .and_then(|id| self.project.midi_in_port(id))
                        .and_then(|p| p.rt_port)
                }
            };

            let gain = convert_gain(layer.gain() * master);
            match layer.kind() {
                LayerKind::SoundfontProgram(sf) => {
                    let Some(binding) = layer.binding() else {
                        continue;
                    };
                    self.soundfont_engine.set_gain(binding.handle, gain);
                    if let Some(rt) = binding.rt_layer {
                        self.routing.set_layer_solo(rt, sf.solo);
                        self.routing.set_layer_mute(rt, sf.mute);
                        self.routing.set_layer_routing(
                            rt,
                            LayerRouting { midi_in, bus_left, bus_right },
                        );
                    }
                }
                LayerKind::Plugin(plugin) => {
                    // Gain goes to the surface: not every plugin host backend
                    // implements instrument volume.
                    let Some(rt) = layer.binding().and_then(|b| b.rt_layer) else {
                        continue;
                    };
                    self.routing.set_layer_gain(rt, gain);
                    self.routing.set_layer_solo(rt, plugin.solo);
                    self.routing.set_layer_mute(rt, plugin.mute);
                    self.routing
                        .set_layer_routing(rt, LayerRouting { midi_in, bus_left, bus_right });
                }
                LayerKind::MidiOut(out) => {
                    let Some(rt) = self.project.midi_out_port(out.port).and_then(|p| p.rt_port) else {
                        continue;
                    };
                    self.routing.set_port_solo(rt, out.solo);
                    self.routing.set_port_mute(rt, out.mute);
                    if let Some(midi_in) = midi_in {
                        self.routing.set_port_routing(rt, midi_in);
                    }
                }
                LayerKind::AudioIn(input) => {
                    let Some(port) = self.project.audio_in_port(input.port) else {
                        continue;
                    };
                    for (side, bus_rt) in Side::BOTH.into_iter().zip([bus_left, bus_right]) {
                        let Some(rt) = port.channel(side).rt_port else {
                            continue;
                        };
                        self.routing.set_port_solo(rt, input.solo);
                        self.routing.set_port_mute(rt, input.mute);
                        self.routing.set_port_gain(rt, gain);
                        if let Some(bus_rt) = bus_rt {
                            self.routing.set_port_routing(rt, bus_rt);
                        }
                    }
                }
            }
        }

        let solo = self.routing.solo_flag_internal();
        self.routing.set_solo_flag_external(solo);

        for msg in warnings {
            self.warn(msg);
        }
        Ok(())
    }
}

fn bus_ports(bus: &Bus) -> [Option<RtPortId>; 2] {
    [bus.left.rt_port, bus.right.rt_port]
}
