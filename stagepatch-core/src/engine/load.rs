//! Load, unload and reload: binding layers to sound engine instances.

use stagepatch_types::{
    LayerBinding, LayerId, LayerKind, LayerType, Patch, PatchId, RtLayerId, Side,
};

use super::routing::{ActivePorts, LayerEngine, LayerPortSpec};
use super::PatchEngine;
use crate::error::{BackendError, EngineError, EngineResult};

/// Outcome of loading a patch. Loading is best effort: layers that fail
/// are marked with an error and the rest stay live.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub loaded: Vec<LayerId>,
    pub failed: Vec<(LayerId, String)>,
    /// Refused with `NotReady`; retried when the engine settles.
    pub pending: Vec<LayerId>,
}

impl LoadReport {
    /// True if no layer failed to materialize.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Materialized {
    Loaded,
    Failed(String),
    Pending,
}

impl PatchEngine {
    /// Make `patch_id` the current patch and materialize its layers.
    pub fn load_patch(&mut self, patch_id: PatchId) -> EngineResult<LoadReport> {
        let layer_ids = self.patch_ref(patch_id)?.layer_ids();

        let is_new = !self.project.is_patch_loaded(patch_id);
        if is_new {
            // Handles from a previous session or process mean nothing now.
            if let Some(patch) = self.project.patch_runtime_mut(patch_id) {
                for layer in patch.layers_mut() {
                    layer.unbind();
                    layer.clear_error();
                }
            }
            self.project.mark_patch_loaded(patch_id);
        }
        self.current = Some(patch_id);

        let mut report = LoadReport::default();
        for pass in [LayerType::Plugin, LayerType::SoundfontProgram] {
            for &layer_id in &layer_ids {
                let layer = self.layer_in(patch_id, layer_id)?;
                if layer.layer_type() != pass || layer.is_loaded() {
                    continue;
                }
                match self.materialize(patch_id, layer_id)? {
                    Materialized::Loaded => report.loaded.push(layer_id),
                    Materialized::Failed(msg) => report.failed.push((layer_id, msg)),
                    Materialized::Pending => report.pending.push(layer_id),
                }
            }
        }

        self.apply_midi_out_filters(patch_id)?;
        self.activate_ports_for(patch_id)?;
        self.refresh_all_gains_and_routing()?;

        log::info!(
            target: "engine",
            "loaded patch {} ({} loaded, {} failed, {} pending)",
            patch_id,
            report.loaded.len(),
            report.failed.len(),
            report.pending.len()
        );
        Ok(report)
    }

    /// Load the current patch again, materializing anything still unbound.
    pub fn reload_patch(&mut self) -> EngineResult<LoadReport> {
        let patch_id = self.require_current()?;
        self.load_patch(patch_id)
    }

    /// Release every layer of a patch. The next load treats it as new.
    pub fn unload_patch(&mut self, patch_id: PatchId) -> EngineResult {
        if !self.project.is_patch_loaded(patch_id) {
            return Ok(());
        }
        let mut first_err = None;
        for layer_id in self.patch_ref(patch_id)?.layer_ids() {
            if let Err(e) = self.unload_layer(patch_id, layer_id) {
                first_err.get_or_insert(e);
            }
        }
        self.project.unmark_patch_loaded(patch_id);
        if self.current == Some(patch_id) {
            self.current = None;
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Unload a patch, then delete it from the project. Removing the current
    /// patch leaves no patch current.
    pub fn remove_patch(&mut self, patch_id: PatchId) -> EngineResult<Patch> {
        self.patch_ref(patch_id)?;
        let unloaded = self.unload_patch(patch_id);
        if self.current == Some(patch_id) {
            self.current = None;
        }
        let patch = self
            .project
            .remove_patch(patch_id)
            .ok_or(EngineError::UnknownPatch(patch_id))?;
        log::info!(target: "engine", "removed patch {} ({})", patch_id, patch.name);
        unloaded.map(|()| patch)
    }

    /// Release one layer: routing ports first so the realtime thread stops
    /// using the backend's ports, then the backend instance, then the binding.
    pub fn unload_layer(&mut self, patch_id: PatchId, layer_id: LayerId) -> EngineResult {
        let layer = self.layer_in(patch_id, layer_id)?;
        let layer_type = layer.layer_type();
        let Some(binding) = layer.binding().cloned() else {
            return Ok(());
        };

        if let Some(rt_layer) = binding.rt_layer {
            self.routing.remove_layer_ports(rt_layer);
        }
        let released = match layer_type {
            LayerType::Plugin => self.sfz_engine.remove_sfz(binding.handle),
            LayerType::SoundfontProgram => self.soundfont_engine.remove_program(binding.handle),
            LayerType::MidiOut | LayerType::AudioIn => Ok(()),
        };
        self.layer_runtime_mut(patch_id, layer_id)?.unbind();

        if let Err(e) = released {
            log::error!(
                target: "engine",
                "releasing layer {} (handle {}) failed: {}",
                layer_id,
                binding.handle,
                e
            );
            return Err(e.into());
        }
        log::debug!(target: "engine", "unloaded layer {} of patch {}", layer_id, patch_id);
        Ok(())
    }

    /// Unload and load a layer of the current patch again. Returns a fresh
    /// snapshot: the handle and port names may have changed.
    pub fn reload_layer(
        &mut self,
        layer: impl Into<super::LayerRef>,
    ) -> EngineResult<stagepatch_types::Layer> {
        let (patch_id, layer_id) = self.resolve(layer.into())?;
        self.unload_layer(patch_id, layer_id)?;
        self.reload_patch()?;
        Ok(self.layer_in(patch_id, layer_id)?.clone())
    }

    fn materialize(&mut self, patch_id: PatchId, layer_id: LayerId) -> EngineResult<Materialized> {
        let layer = self.layer_in(patch_id, layer_id)?;
        let kind = layer.kind().clone();

        let (engine, added) = match &kind {
            LayerKind::Plugin(plugin) => (LayerEngine::Plugin, self.sfz_engine.add_sfz(&plugin.path)),
            LayerKind::SoundfontProgram(sf) => {
                (LayerEngine::Soundfont, self.soundfont_engine.add_program(&sf.program))
            }
            LayerKind::MidiOut(_) | LayerKind::AudioIn(_) => return Ok(Materialized::Loaded),
        };

        let handle = match added {
            Ok(handle) => handle,
            Err(BackendError::NotReady) => {
                log::debug!(target: "engine", "layer {} pending, engine not ready", layer_id);
                return Ok(Materialized::Pending);
            }
            Err(e) => {
                let msg = match &kind {
                    LayerKind::Plugin(p) => format!("Failed to load {}: {}", p.path.display(), e),
                    _ => format!("Failed to load soundfont: {}", e),
                };
                log::warn!(target: "engine", "layer {}: {}", layer_id, msg);
                self.layer_runtime_mut(patch_id, layer_id)?.set_error(msg.clone());
                return Ok(Materialized::Failed(msg));
            }
        };

        let mut binding = LayerBinding::new(handle);
        let filter = match &kind {
            LayerKind::Plugin(p) => {
                binding.plugin_name = self.sfz_engine.plugin_name(handle);
                binding.midi_in_port = self.sfz_engine.midi_in_port_name(handle);
                binding.audio_out_ports = self.sfz_engine.audio_out_port_names(handle);
                if binding.midi_in_port.is_empty() {
                    log::warn!(target: "engine", "{} has not published its ports yet", binding.plugin_name);
                }
                p.filter.clone()
            }
            LayerKind::SoundfontProgram(sf) => {
                binding.plugin_name = sf.program.name.clone();
                sf.filter.clone()
            }
            LayerKind::MidiOut(_) | LayerKind::AudioIn(_) => return Ok(Materialized::Loaded),
        };

        let spec = LayerPortSpec {
            engine,
            handle,
            name: binding.plugin_name.clone(),
            midi_in_port: binding.midi_in_port.clone(),
            audio_out_ports: binding.audio_out_ports.clone(),
            filter,
        };
        match self.routing.add_layer_ports(&spec) {
            Ok(rt_layer) => binding.rt_layer = Some(rt_layer),
            Err(e) => {
                // Without ports the instance is unreachable; give it back.
                let released = match engine {
                    LayerEngine::Plugin => self.sfz_engine.remove_sfz(handle),
                    LayerEngine::Soundfont => self.soundfont_engine.remove_program(handle),
                };
                if let Err(re) = released {
                    log::error!(target: "engine", "releasing handle {} failed: {}", handle, re);
                }
                let msg = format!("Failed to create ports for {}: {}", spec.name, e);
                self.layer_runtime_mut(patch_id, layer_id)?.set_error(msg.clone());
                return Ok(Materialized::Failed(msg));
            }
        }

        let layer = self.layer_runtime_mut(patch_id, layer_id)?;
        layer.clear_error();
        layer.bind(binding);
        log::debug!(target: "engine", "layer {} bound to handle {}", layer_id, handle);
        Ok(Materialized::Loaded)
    }

    fn apply_midi_out_filters(&mut self, patch_id: PatchId) -> EngineResult {
        let mut missing = Vec::new();
        let patch = self.patch_ref(patch_id)?;
        for layer in patch.layers() {
            let LayerKind::MidiOut(out) = layer.kind() else {
                continue;
            };
            match self.project.midi_out_port(out.port) {
                Some(port) => {
                    if let Some(rt) = port.rt_port {
                        self.routing.set_port_filter(rt, &out.filter);
                    }
                }
                None => missing.push(out.port),
            }
        }
        for port in missing {
            self.warn(format!(
                "MIDI out port layer refers to project port that does not exist: {}",
                port
            ));
        }
        Ok(())
    }

    fn activate_ports_for(&mut self, patch_id: PatchId) -> EngineResult {
        let mut active = ActivePorts::default();
        let patch = self.patch_ref(patch_id)?;
        for layer in patch.layers().iter().filter(|l| !l.has_error()) {
            match layer.kind() {
                LayerKind::Plugin(_) | LayerKind::SoundfontProgram(_) => {
                    if let Some(rt) = layer.binding().and_then(|b| b.rt_layer) {
                        active.layers.push(rt);
                    }
                }
                LayerKind::MidiOut(out) => {
                    if let Some(rt) = self.project.midi_out_port(out.port).and_then(|p| p.rt_port) {
                        active.midi_out.push(rt);
                    }
                }
                LayerKind::AudioIn(input) => {
                    if let Some(port) = self.project.audio_in_port(input.port) {
                        active
                            .audio_in
                            .extend(Side::BOTH.iter().filter_map(|s| port.channel(*s).rt_port));
                    }
                }
            }
        }
        self.routing.activate_ports(&active);
        Ok(())
    }

    /// Realtime layer ids of every bound layer across loaded patches.
    pub fn live_rt_layers(&self) -> Vec<RtLayerId> {
        self.project
            .patches()
            .iter()
            .flat_map(|p| p.layers())
            .filter_map(|l| l.binding().and_then(|b| b.rt_layer))
            .collect()
    }
}
