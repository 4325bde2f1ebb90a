//! Realtime ports backing the project's buses and external ports.

use stagepatch_types::{BusId, MidiFilter, PortId, RtPortId, Side};

use super::routing::PortKind;
use super::PatchEngine;
use crate::error::EngineResult;

fn side_suffix(side: Side) -> &'static str {
    match side {
        Side::Left => "L",
        Side::Right => "R",
    }
}

impl PatchEngine {
    /// Create a realtime port for every bus and project port and connect
    /// the stored external clients. Runtime only: the modified flag is kept.
    pub(crate) fn create_project_ports(&mut self) -> EngineResult {
        let was_modified = self.project.is_modified();

        let bus_ids: Vec<BusId> = self.project.bus_ids().collect();
        for id in bus_ids {
            self.create_bus_ports(id)?;
        }
        let audio_in: Vec<PortId> = self.project.audio_in_port_ids().collect();
        for id in audio_in {
            self.create_audio_in_ports(id)?;
        }
        let midi_out: Vec<PortId> = self.project.midi_out_port_ids().collect();
        for id in midi_out {
            self.create_midi_out_port(id)?;
        }
        let midi_in: Vec<PortId> = self.project.midi_in_port_ids().collect();
        for id in midi_in {
            self.create_midi_in_port(id)?;
        }

        self.project.set_modified(was_modified);
        log::debug!(
            target: "engine",
            "created ports for {} buses, {} MIDI inputs",
            self.project.bus_count(),
            self.project.midi_in_port_ids().count()
        );
        Ok(())
    }

    /// Drop every project port from the surface.
    pub(crate) fn remove_project_ports(&mut self) {
        let was_modified = self.project.is_modified();
        let mut ports: Vec<RtPortId> = Vec::new();

        let bus_ids: Vec<BusId> = self.project.bus_ids().collect();
        for id in bus_ids {
            if let Some(bus) = self.project.bus_mut(id) {
                ports.extend(bus.left.rt_port.take());
                ports.extend(bus.right.rt_port.take());
            }
        }
        let audio_in: Vec<PortId> = self.project.audio_in_port_ids().collect();
        for id in audio_in {
            if let Some(port) = self.project.audio_in_port_mut(id) {
                ports.extend(port.left.rt_port.take());
                ports.extend(port.right.rt_port.take());
            }
        }
        let midi_out: Vec<PortId> = self.project.midi_out_port_ids().collect();
        for id in midi_out {
            if let Some(port) = self.project.midi_out_port_mut(id) {
                ports.extend(port.rt_port.take());
            }
        }
        let midi_in: Vec<PortId> = self.project.midi_in_port_ids().collect();
        for id in midi_in {
            if let Some(port) = self.project.midi_in_port_mut(id) {
                ports.extend(port.rt_port.take());
            }
        }

        for port in ports {
            self.routing.remove_port(port);
        }
        self.project.set_modified(was_modified);
    }

    fn create_bus_ports(&mut self, id: BusId) -> EngineResult {
        for side in Side::BOTH {
            let name = format!("bus_{}_{}", id, side_suffix(side));
            let rt = self.routing.add_port(PortKind::AudioOut, &name)?;
            if let Some(bus) = self.project.bus_mut(id) {
                let channel = bus.channel_mut(side);
                channel.rt_port = Some(rt);
                self.routing.set_port_gain(rt, channel.gain);
                for client in &channel.clients {
                    self.routing.add_port_client(rt, client);
                }
            }
        }
        Ok(())
    }

    fn create_audio_in_ports(&mut self, id: PortId) -> EngineResult {
        for side in Side::BOTH {
            let name = format!("audio_in_{}_{}", id, side_suffix(side));
            let rt = self.routing.add_port(PortKind::AudioIn, &name)?;
            if let Some(port) = self.project.audio_in_port_mut(id) {
                let channel = port.channel_mut(side);
                channel.rt_port = Some(rt);
                for client in &channel.clients {
                    self.routing.add_port_client(rt, client);
                }
            }
        }
        Ok(())
    }

    fn create_midi_out_port(&mut self, id: PortId) -> EngineResult {
        let rt = self.routing.add_port(PortKind::MidiOut, &format!("midi_out_{}", id))?;
        if let Some(port) = self.project.midi_out_port_mut(id) {
            port.rt_port = Some(rt);
            for client in &port.clients {
                self.routing.add_port_client(rt, client);
            }
        }
        Ok(())
    }

    fn create_midi_in_port(&mut self, id: PortId) -> EngineResult {
        let rt = self.routing.add_port(PortKind::MidiIn, &format!("midi_in_{}", id))?;
        if let Some(port) = self.project.midi_in_port_mut(id) {
            port.rt_port = Some(rt);
            self.routing.set_port_filter(rt, &port.filter);
            for client in &port.clients {
                self.routing.add_port_client(rt, client);
            }
        }
        Ok(())
    }

    // -- buses --

    pub fn add_bus(&mut self, name: &str) -> EngineResult<BusId> {
        let id = self.project.add_bus(name);
        self.create_bus_ports(id)?;
        log::info!(target: "engine", "added bus {} '{}'", id, name);
        Ok(id)
    }

    /// Remove a bus and its ports. Layers still pointing at it fall back
    /// to the first remaining bus on the next refresh.
    pub fn remove_bus(&mut self, id: BusId) -> EngineResult {
        let Some(bus) = self.project.remove_bus(id) else {
            return Ok(());
        };
        for rt in [bus.left.rt_port, bus.right.rt_port].into_iter().flatten() {
            self.routing.remove_port(rt);
        }
        self.refresh_all_gains_and_routing()
    }

    pub fn set_bus_gain(&mut self, id: BusId, side: Side, gain: f32) {
        let gain = gain.clamp(0.0, 1.0);
        if let Some(bus) = self.project.bus_mut(id) {
            let channel = bus.channel_mut(side);
            channel.gain = gain;
            if let Some(rt) = channel.rt_port {
                self.routing.set_port_gain(rt, gain);
            }
        }
    }

    pub fn add_bus_client(&mut self, id: BusId, side: Side, client: &str) {
        if self.project.add_bus_client(id, side, client) {
            if let Some(rt) = self.project.bus(id).and_then(|b| b.channel(side).rt_port) {
                self.routing.add_port_client(rt, client);
            }
        }
    }

    pub fn remove_bus_client(&mut self, id: BusId, side: Side, client: &str) {
        if self.project.remove_bus_client(id, side, client) {
            if let Some(rt) = self.project.bus(id).and_then(|b| b.channel(side).rt_port) {
                self.routing.remove_port_client(rt, client);
            }
        }
    }

    // -- external ports --

    pub fn add_audio_in_port(&mut self, name: &str, destination_bus: BusId) -> EngineResult<PortId> {
        let id = self.project.add_audio_in_port(name, destination_bus);
        self.create_audio_in_ports(id)?;
        Ok(id)
    }

    pub fn remove_audio_in_port(&mut self, id: PortId) {
        if let Some(port) = self.project.remove_audio_in_port(id) {
            for rt in [port.left.rt_port, port.right.rt_port].into_iter().flatten() {
                self.routing.remove_port(rt);
            }
        }
    }

    pub fn add_midi_out_port(&mut self, name: &str) -> EngineResult<PortId> {
        let id = self.project.add_midi_out_port(name);
        self.create_midi_out_port(id)?;
        Ok(id)
    }

    pub fn remove_midi_out_port(&mut self, id: PortId) {
        if let Some(rt) = self.project.remove_midi_out_port(id).and_then(|p| p.rt_port) {
            self.routing.remove_port(rt);
        }
    }

    pub fn add_midi_out_client(&mut self, id: PortId, client: &str) {
        if self.project.add_midi_out_client(id, client) {
            if let Some(rt) = self.project.midi_out_port(id).and_then(|p| p.rt_port) {
                self.routing.add_port_client(rt, client);
            }
        }
    }

    pub fn add_midi_in_port(&mut self, name: &str) -> EngineResult<PortId> {
        let id = self.project.add_midi_in_port(name);
        self.create_midi_in_port(id)?;
        Ok(id)
    }

    /// Remove a MIDI input. Layers listening on it fall back to the first
    /// remaining input on the next refresh.
    pub fn remove_midi_in_port(&mut self, id: PortId) -> EngineResult {
        if let Some(rt) = self.project.remove_midi_in_port(id).and_then(|p| p.rt_port) {
            self.routing.remove_port(rt);
        }
        self.refresh_all_gains_and_routing()
    }

    pub fn add_midi_in_client(&mut self, id: PortId, client: &str) {
        if self.project.add_midi_in_client(id, client) {
            if let Some(rt) = self.project.midi_in_port(id).and_then(|p| p.rt_port) {
                self.routing.add_port_client(rt, client);
            }
        }
    }

    pub fn set_midi_in_port_filter(&mut self, id: PortId, filter: MidiFilter) {
        if let Some(port) = self.project.midi_in_port_mut(id) {
            if let Some(rt) = port.rt_port {
                self.routing.set_port_filter(rt, &filter);
            }
            port.filter = filter;
        }
    }
}
