use std::path::Path;

use stagepatch_types::{
    BusId, Layer, LayerId, LayerKind, LayerKindMut, MidiFilter, PatchId, PortId, SoundfontProgram,
};

use super::{LayerRef, PatchEngine};
use crate::error::{EngineError, EngineResult};

impl PatchEngine {
    /// Layers of the current patch in display order, errored ones included.
    pub fn layers(&self) -> Vec<Layer> {
        self.current_patch()
            .map(|p| p.layers().to_vec())
            .unwrap_or_default()
    }

    /// Snapshot of one layer of the current patch.
    pub fn layer(&self, layer: impl Into<LayerRef>) -> EngineResult<Layer> {
        let (patch_id, layer_id) = self.resolve(layer.into())?;
        Ok(self.layer_in(patch_id, layer_id)?.clone())
    }

    pub fn layer_count(&self) -> usize {
        self.current_patch().map_or(0, |p| p.layer_count())
    }

    pub fn patch_name(&self) -> Option<&str> {
        self.current_patch().map(|p| p.name.as_str())
    }

    pub fn set_patch_name(&mut self, name: &str) -> EngineResult {
        let id = self.require_current()?;
        if let Some(patch) = self.project.patch_mut(id) {
            patch.name = name.to_string();
        }
        Ok(())
    }

    pub fn patch_note(&self) -> Option<&str> {
        self.current_patch().map(|p| p.note.as_str())
    }

    pub fn set_patch_note(&mut self, note: &str) -> EngineResult {
        let id = self.require_current()?;
        if let Some(patch) = self.project.patch_mut(id) {
            patch.note = note.to_string();
        }
        Ok(())
    }

    // -- gain / solo / mute / routing --

    pub fn set_layer_gain(&mut self, layer: impl Into<LayerRef>, gain: f32) -> EngineResult {
        let (patch_id, layer_id) = self.resolve(layer.into())?;
        self.layer_in_mut(patch_id, layer_id)?.set_gain(gain);
        self.refresh_all_gains_and_routing()
    }

    pub fn set_layer_solo(&mut self, layer: impl Into<LayerRef>, solo: bool) -> EngineResult {
        let (patch_id, layer_id) = self.resolve(layer.into())?;
        self.layer_in_mut(patch_id, layer_id)?.set_solo(solo);
        self.refresh_all_gains_and_routing()
    }

    pub fn set_layer_mute(&mut self, layer: impl Into<LayerRef>, mute: bool) -> EngineResult {
        let (patch_id, layer_id) = self.resolve(layer.into())?;
        self.layer_in_mut(patch_id, layer_id)?.set_mute(mute);
        self.refresh_all_gains_and_routing()
    }

    pub fn set_layer_bus(&mut self, layer: impl Into<LayerRef>, bus: BusId) -> EngineResult {
        let (patch_id, layer_id) = self.resolve(layer.into())?;
        self.set_layer_bus_in(patch_id, layer_id, bus)
    }

    /// Set the bus of a layer in any patch; routing is refreshed only if
    /// that patch is current.
    pub fn set_layer_bus_in(
        &mut self,
        patch_id: PatchId,
        layer_id: LayerId,
        bus: BusId,
    ) -> EngineResult {
        self.layer_in_mut(patch_id, layer_id)?.bus = bus;
        self.refresh_if_current(patch_id)
    }

    pub fn set_layer_midi_in_port(
        &mut self,
        layer: impl Into<LayerRef>,
        port: PortId,
    ) -> EngineResult {
        let (patch_id, layer_id) = self.resolve(layer.into())?;
        self.set_layer_midi_in_port_in(patch_id, layer_id, port)
    }

    pub fn set_layer_midi_in_port_in(
        &mut self,
        patch_id: PatchId,
        layer_id: LayerId,
        port: PortId,
    ) -> EngineResult {
        self.layer_in_mut(patch_id, layer_id)?.midi_in_port = port;
        self.refresh_if_current(patch_id)
    }

    /// Replace a layer's MIDI filter and push it to the surface. Filters
    /// don't affect gains or routing, so no refresh. Returns false for
    /// audio input layers, which have no filter.
    pub fn set_layer_filter(
        &mut self,
        layer: impl Into<LayerRef>,
        filter: MidiFilter,
    ) -> EngineResult<bool> {
        let (patch_id, layer_id) = self.resolve(layer.into())?;
        let l = self.layer_in_mut(patch_id, layer_id)?;
        if !l.set_midi_filter(filter.clone()) {
            return Ok(false);
        }
        let rt_layer = l.binding().and_then(|b| b.rt_layer);
        let out_port = match l.kind() {
            LayerKind::MidiOut(out) => Some(out.port),
            _ => None,
        };

        if let Some(rt) = rt_layer {
            self.routing.set_layer_filter(rt, &filter);
        } else if let Some(port) = out_port {
            match self.project.midi_out_port(port).and_then(|p| p.rt_port) {
                Some(rt) => self.routing.set_port_filter(rt, &filter),
                None => log::debug!(target: "engine", "MIDI out port {} has no realtime port yet", port),
            }
        }
        Ok(true)
    }

    fn refresh_if_current(&mut self, patch_id: PatchId) -> EngineResult {
        if self.current == Some(patch_id) {
            self.refresh_all_gains_and_routing()
        } else {
            Ok(())
        }
    }

    // -- adding and removing layers --

    pub fn add_program_layer(&mut self, program: SoundfontProgram) -> EngineResult<Layer> {
        self.add_layer(LayerKind::soundfont(program))
    }

    pub fn add_sfz_layer(&mut self, path: impl AsRef<Path>) -> EngineResult<Layer> {
        self.add_layer(LayerKind::plugin(path))
    }

    pub fn add_midi_out_port_layer(&mut self, port: PortId) -> EngineResult<Layer> {
        if self.project.midi_out_port(port).is_none() {
            log::warn!(target: "engine", "adding layer for unknown MIDI out port {}", port);
        }
        self.add_layer(LayerKind::midi_out(port))
    }

    pub fn add_audio_in_port_layer(&mut self, port: PortId) -> EngineResult<Layer> {
        let name = match self.project.audio_in_port(port) {
            Some(p) => p.name.clone(),
            None => {
                log::warn!(target: "engine", "adding layer for unknown audio in port {}", port);
                String::new()
            }
        };
        self.add_layer(LayerKind::audio_in(port, &name))
    }

    /// New layers play into the first bus and listen on the first MIDI
    /// input: ids 0 may not exist in the project.
    fn add_layer(&mut self, kind: LayerKind) -> EngineResult<Layer> {
        let patch_id = self.require_current()?;
        let bus = self.project.first_bus_id(None).ok_or(EngineError::NoBuses)?;
        let midi_in = self.project.first_midi_in_port_id(None);

        let patch = self
            .project
            .patch_mut(patch_id)
            .ok_or(EngineError::UnknownPatch(patch_id))?;
        let layer_id = patch.add_layer(kind);
        if let Some(layer) = patch.layer_mut(layer_id) {
            layer.bus = bus;
            if let Some(port) = midi_in {
                layer.midi_in_port = port;
            }
        }

        self.reload_patch()?;
        Ok(self.layer_in(patch_id, layer_id)?.clone())
    }

    pub fn remove_layer(&mut self, layer: impl Into<LayerRef>) -> EngineResult {
        let (patch_id, layer_id) = self.resolve(layer.into())?;
        self.remove_layer_from(patch_id, layer_id)
    }

    /// Unload and remove a layer from any patch. Reloads if the patch is current.
    pub fn remove_layer_from(&mut self, patch_id: PatchId, layer_id: LayerId) -> EngineResult {
        let unloaded = self.unload_layer(patch_id, layer_id);
        self.project
            .patch_mut(patch_id)
            .ok_or(EngineError::UnknownPatch(patch_id))?
            .remove_layer(layer_id);
        if self.current == Some(patch_id) {
            self.reload_patch()?;
        }
        unloaded
    }

    /// Change the instrument file of a plugin layer and materialize it again.
    pub fn set_layer_sfz_path(
        &mut self,
        layer: impl Into<LayerRef>,
        path: impl AsRef<Path>,
    ) -> EngineResult<Layer> {
        let (patch_id, layer_id) = self.resolve(layer.into())?;
        self.unload_layer(patch_id, layer_id)?;
        if let LayerKindMut::Plugin(plugin) =
            self.layer_in_mut(patch_id, layer_id)?.kind_mut()
        {
            let path = path.as_ref();
            plugin.path = path.to_path_buf();
            if let Some(stem) = path.file_stem() {
                plugin.name = stem.to_string_lossy().into_owned();
            }
        }
        self.reload_patch()?;
        Ok(self.layer_in(patch_id, layer_id)?.clone())
    }
}
