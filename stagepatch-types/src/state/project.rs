use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::patch::Patch;
use super::ports::{AudioInPort, Bus, MidiInPort, MidiOutPort};
use crate::{BusId, PatchId, PortId, Side};

pub const DEFAULT_BUS_NAME: &str = "Master Bus";
pub const DEFAULT_MIDI_IN_NAME: &str = "MIDI In";

/// A performable rig: patches plus the buses and ports they route into.
///
/// New ids are one past the highest id in use. Removing the last bus is
/// allowed here; the patch engine refuses to refresh routing without one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(default)]
    patches: Vec<Patch>,
    #[serde(default)]
    buses: BTreeMap<BusId, Bus>,
    #[serde(default)]
    audio_in_ports: BTreeMap<PortId, AudioInPort>,
    #[serde(default)]
    midi_out_ports: BTreeMap<PortId, MidiOutPort>,
    #[serde(default)]
    midi_in_ports: BTreeMap<PortId, MidiInPort>,
    #[serde(skip)]
    modified: bool,
    /// Patches loaded at least once this session.
    #[serde(skip)]
    loaded_patches: HashSet<PatchId>,
}

impl Default for Project {
    fn default() -> Self {
        Self::new("New Project")
    }
}

fn next_key<K: Copy + Into<u32>, V>(map: &BTreeMap<K, V>) -> u32 {
    map.keys().next_back().map(|k| (*k).into() + 1).unwrap_or(0)
}

impl Project {
    /// New project with one default bus and one MIDI input.
    pub fn new(name: &str) -> Self {
        let mut project = Self {
            name: name.to_string(),
            patches: Vec::new(),
            buses: BTreeMap::new(),
            audio_in_ports: BTreeMap::new(),
            midi_out_ports: BTreeMap::new(),
            midi_in_ports: BTreeMap::new(),
            modified: false,
            loaded_patches: HashSet::new(),
        };
        project.add_bus(DEFAULT_BUS_NAME);
        project.add_midi_in_port(DEFAULT_MIDI_IN_NAME);
        project.modified = false;
        project
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    // Patches

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn patch_count(&self) -> usize {
        self.patches.len()
    }

    pub fn patch(&self, id: PatchId) -> Option<&Patch> {
        self.patches.iter().find(|p| p.id == id)
    }

    pub fn patch_mut(&mut self, id: PatchId) -> Option<&mut Patch> {
        let patch = self.patches.iter_mut().find(|p| p.id == id)?;
        self.modified = true;
        Some(patch)
    }

    /// Mutable access for runtime state (bindings, errors) that is not
    /// persisted. Does not mark the project modified.
    pub fn patch_runtime_mut(&mut self, id: PatchId) -> Option<&mut Patch> {
        self.patches.iter_mut().find(|p| p.id == id)
    }

    pub fn patch_at(&self, index: usize) -> Option<&Patch> {
        self.patches.get(index)
    }

    pub fn patch_index(&self, id: PatchId) -> Option<usize> {
        self.patches.iter().position(|p| p.id == id)
    }

    pub fn add_patch(&mut self, name: &str) -> PatchId {
        let id = self.next_patch_id();
        self.patches.push(Patch::new(id, name));
        self.modified = true;
        id
    }

    /// Add an existing patch under a fresh project id.
    pub fn insert_patch(&mut self, mut patch: Patch) -> PatchId {
        let id = self.next_patch_id();
        patch.id = id;
        self.patches.push(patch);
        self.modified = true;
        id
    }

    pub fn remove_patch(&mut self, id: PatchId) -> Option<Patch> {
        let idx = self.patch_index(id)?;
        self.loaded_patches.remove(&id);
        self.modified = true;
        Some(self.patches.remove(idx))
    }

    pub fn move_patch_up(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.patches.len() {
            return false;
        }
        self.patches.swap(index, index - 1);
        self.modified = true;
        true
    }

    pub fn move_patch_down(&mut self, index: usize) -> bool {
        if index + 1 >= self.patches.len() {
            return false;
        }
        self.patches.swap(index, index + 1);
        self.modified = true;
        true
    }

    fn next_patch_id(&self) -> PatchId {
        PatchId::new(self.patches.iter().map(|p| p.id.get() + 1).max().unwrap_or(0))
    }

    pub fn mark_patch_loaded(&mut self, id: PatchId) {
        self.loaded_patches.insert(id);
    }

    pub fn unmark_patch_loaded(&mut self, id: PatchId) {
        self.loaded_patches.remove(&id);
    }

    pub fn is_patch_loaded(&self, id: PatchId) -> bool {
        self.loaded_patches.contains(&id)
    }

    // Buses

    pub fn bus(&self, id: BusId) -> Option<&Bus> {
        self.buses.get(&id)
    }

    pub fn bus_mut(&mut self, id: BusId) -> Option<&mut Bus> {
        let bus = self.buses.get_mut(&id)?;
        self.modified = true;
        Some(bus)
    }

    pub fn bus_exists(&self, id: BusId) -> bool {
        self.buses.contains_key(&id)
    }

    pub fn bus_ids(&self) -> impl Iterator<Item = BusId> + '_ {
        self.buses.keys().copied()
    }

    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }

    pub fn add_bus(&mut self, name: &str) -> BusId {
        let id = BusId::new(next_key(&self.buses));
        self.buses.insert(id, Bus::new(name));
        self.modified = true;
        id
    }

    pub fn remove_bus(&mut self, id: BusId) -> Option<Bus> {
        let bus = self.buses.remove(&id)?;
        self.modified = true;
        Some(bus)
    }

    /// Replace the bus stored under `id`. Returns false if it doesn't exist.
    pub fn replace_bus(&mut self, id: BusId, bus: Bus) -> bool {
        match self.buses.get_mut(&id) {
            Some(slot) => {
                *slot = bus;
                self.modified = true;
                true
            }
            None => false,
        }
    }

    /// Lowest bus id, optionally skipping one (e.g. the bus being removed).
    pub fn first_bus_id(&self, skip: Option<BusId>) -> Option<BusId> {
        self.buses.keys().copied().find(|id| Some(*id) != skip)
    }

    pub fn add_bus_client(&mut self, id: BusId, side: Side, client: &str) -> bool {
        let added = self
            .buses
            .get_mut(&id)
            .is_some_and(|b| b.channel_mut(side).add_client(client));
        self.modified |= added;
        added
    }

    pub fn remove_bus_client(&mut self, id: BusId, side: Side, client: &str) -> bool {
        let removed = self
            .buses
            .get_mut(&id)
            .is_some_and(|b| b.channel_mut(side).remove_client(client));
        self.modified |= removed;
        removed
    }

    // Audio input ports

    pub fn audio_in_port(&self, id: PortId) -> Option<&AudioInPort> {
        self.audio_in_ports.get(&id)
    }

    pub fn audio_in_port_mut(&mut self, id: PortId) -> Option<&mut AudioInPort> {
        let port = self.audio_in_ports.get_mut(&id)?;
        self.modified = true;
        Some(port)
    }

    pub fn audio_in_port_ids(&self) -> impl Iterator<Item = PortId> + '_ {
        self.audio_in_ports.keys().copied()
    }

    pub fn audio_in_port_count(&self) -> usize {
        self.audio_in_ports.len()
    }

    pub fn add_audio_in_port(&mut self, name: &str, destination_bus: BusId) -> PortId {
        let id = PortId::new(next_key(&self.audio_in_ports));
        self.audio_in_ports.insert(id, AudioInPort::new(name, destination_bus));
        self.modified = true;
        id
    }

    pub fn remove_audio_in_port(&mut self, id: PortId) -> Option<AudioInPort> {
        let port = self.audio_in_ports.remove(&id)?;
        self.modified = true;
        Some(port)
    }

    pub fn add_audio_in_client(&mut self, id: PortId, side: Side, client: &str) -> bool {
        let added = self
            .audio_in_ports
            .get_mut(&id)
            .is_some_and(|p| p.channel_mut(side).add_client(client));
        self.modified |= added;
        added
    }

    pub fn remove_audio_in_client(&mut self, id: PortId, side: Side, client: &str) -> bool {
        let removed = self
            .audio_in_ports
            .get_mut(&id)
            .is_some_and(|p| p.channel_mut(side).remove_client(client));
        self.modified |= removed;
        removed
    }

    // MIDI output ports

    pub fn midi_out_port(&self, id: PortId) -> Option<&MidiOutPort> {
        self.midi_out_ports.get(&id)
    }

    pub fn midi_out_port_mut(&mut self, id: PortId) -> Option<&mut MidiOutPort> {
        let port = self.midi_out_ports.get_mut(&id)?;
        self.modified = true;
        Some(port)
    }

    pub fn midi_out_port_ids(&self) -> impl Iterator<Item = PortId> + '_ {
        self.midi_out_ports.keys().copied()
    }

    pub fn add_midi_out_port(&mut self, name: &str) -> PortId {
        let id = PortId::new(next_key(&self.midi_out_ports));
        self.midi_out_ports.insert(id, MidiOutPort::new(name));
        self.modified = true;
        id
    }

    pub fn remove_midi_out_port(&mut self, id: PortId) -> Option<MidiOutPort> {
        let port = self.midi_out_ports.remove(&id)?;
        self.modified = true;
        Some(port)
    }

    pub fn add_midi_out_client(&mut self, id: PortId, client: &str) -> bool {
        let added = self
            .midi_out_ports
            .get_mut(&id)
            .is_some_and(|p| p.add_client(client));
        self.modified |= added;
        added
    }

    pub fn remove_midi_out_client(&mut self, id: PortId, client: &str) -> bool {
        let removed = self
            .midi_out_ports
            .get_mut(&id)
            .is_some_and(|p| p.remove_client(client));
        self.modified |= removed;
        removed
    }

    // MIDI input ports

    pub fn midi_in_port(&self, id: PortId) -> Option<&MidiInPort> {
        self.midi_in_ports.get(&id)
    }

    pub fn midi_in_port_mut(&mut self, id: PortId) -> Option<&mut MidiInPort> {
        let port = self.midi_in_ports.get_mut(&id)?;
        self.modified = true;
        Some(port)
    }

    pub fn midi_in_port_ids(&self) -> impl Iterator<Item = PortId> + '_ {
        self.midi_in_ports.keys().copied()
    }

    pub fn first_midi_in_port_id(&self, skip: Option<PortId>) -> Option<PortId> {
        self.midi_in_ports.keys().copied().find(|id| Some(*id) != skip)
    }

    pub fn add_midi_in_port(&mut self, name: &str) -> PortId {
        let id = PortId::new(next_key(&self.midi_in_ports));
        self.midi_in_ports.insert(id, MidiInPort::new(name));
        self.modified = true;
        id
    }

    pub fn remove_midi_in_port(&mut self, id: PortId) -> Option<MidiInPort> {
        let port = self.midi_in_ports.remove(&id)?;
        self.modified = true;
        Some(port)
    }

    pub fn add_midi_in_client(&mut self, id: PortId, client: &str) -> bool {
        let added = self
            .midi_in_ports
            .get_mut(&id)
            .is_some_and(|p| p.add_client(client));
        self.modified |= added;
        added
    }

    pub fn remove_midi_in_client(&mut self, id: PortId, client: &str) -> bool {
        let removed = self
            .midi_in_ports
            .get_mut(&id)
            .is_some_and(|p| p.remove_client(client));
        self.modified |= removed;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_project_has_default_bus_and_midi_in() {
        let project = Project::new("Gig");
        assert_eq!(project.bus_count(), 1);
        assert_eq!(project.bus(BusId::new(0)).unwrap().name, DEFAULT_BUS_NAME);
        assert_eq!(project.first_midi_in_port_id(None), Some(PortId::new(0)));
        assert!(!project.is_modified());
    }

    #[test]
    fn ids_are_one_past_highest() {
        let mut project = Project::new("Gig");
        let b1 = project.add_bus("Monitors");
        let b2 = project.add_bus("FX");
        assert_eq!(b1, BusId::new(1));
        assert_eq!(b2, BusId::new(2));
        project.remove_bus(b1);
        assert_eq!(project.add_bus("Again"), BusId::new(3));
        assert!(project.is_modified());
    }

    #[test]
    fn first_bus_skips_requested_id() {
        let mut project = Project::new("Gig");
        let b1 = project.add_bus("Monitors");
        assert_eq!(project.first_bus_id(None), Some(BusId::new(0)));
        assert_eq!(project.first_bus_id(Some(BusId::new(0))), Some(b1));
        project.remove_bus(BusId::new(0));
        project.remove_bus(b1);
        assert_eq!(project.first_bus_id(None), None);
    }

    #[test]
    fn patch_reorder() {
        let mut project = Project::new("Gig");
        let a = project.add_patch("A");
        let b = project.add_patch("B");
        assert!(!project.move_patch_up(0));
        assert!(project.move_patch_up(1));
        assert_eq!(project.patch_at(0).unwrap().id, b);
        assert!(project.move_patch_down(0));
        assert_eq!(project.patch_at(0).unwrap().id, a);
        assert!(!project.move_patch_down(1));
    }

    #[test]
    fn removed_patch_forgets_loaded_mark() {
        let mut project = Project::new("Gig");
        let a = project.add_patch("A");
        project.mark_patch_loaded(a);
        assert!(project.is_patch_loaded(a));
        project.remove_patch(a);
        assert!(!project.is_patch_loaded(a));
    }

    #[test]
    fn port_clients() {
        let mut project = Project::new("Gig");
        let out = project.add_midi_out_port("Synth");
        assert!(project.add_midi_out_client(out, "hw:midi_1"));
        assert!(!project.add_midi_out_client(out, "hw:midi_1"));
        assert!(!project.add_midi_out_client(PortId::new(9), "x"));
        let input = project.add_audio_in_port("Guitar", BusId::new(0));
        assert!(project.add_audio_in_client(input, Side::Right, "system:capture_2"));
        assert_eq!(project.audio_in_port(input).unwrap().right.clients, vec!["system:capture_2"]);
    }

    #[test]
    fn serde_roundtrip_skips_runtime_state() {
        let mut project = Project::new("Gig");
        let id = project.add_patch("A");
        project.mark_patch_loaded(id);
        project.bus_mut(BusId::new(0)).unwrap().left.rt_port = Some(crate::RtPortId::new(4));
        let json = serde_json::to_string(&project).unwrap();
        let back: Project = serde_json::from_str(&json).unwrap();
        assert!(!back.is_patch_loaded(id));
        assert_eq!(back.bus(BusId::new(0)).unwrap().left.rt_port, None);
        assert_eq!(back.patch_count(), 1);
    }
}
