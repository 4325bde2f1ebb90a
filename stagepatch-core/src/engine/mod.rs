//! Patch engine: binds the layers of the current patch to sound engines and
//! keeps the routing surface in step with the model.
//!
//! Every mutation runs on the control thread. Gain, solo, mute and routing
//! changes go through a full [`PatchEngine::refresh_all_gains_and_routing`]
//! pass rather than incremental updates; patches hold tens of layers.

pub mod backend;
mod layers;
mod load;
mod project_ports;
mod refresh;
pub mod routing;

use crossbeam_channel::{Receiver, Sender};
use stagepatch_types::{Layer, LayerId, Patch, PatchId, Project};

use crate::error::{EngineError, EngineResult};
use backend::{EngineEvent, SoundEngine, SoundfontEngine};
use routing::RoutingSurface;

pub use load::LoadReport;

/// Perceptual gain curve: slider position in [0, 1] to linear amplitude.
pub fn convert_gain(x: f32) -> f32 {
    x.clamp(0.0, 1.0).powi(3)
}

/// A layer of the current patch, by id or by display index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRef {
    Id(LayerId),
    Index(usize),
}

impl From<LayerId> for LayerRef {
    fn from(id: LayerId) -> Self {
        LayerRef::Id(id)
    }
}

impl From<usize> for LayerRef {
    fn from(index: usize) -> Self {
        LayerRef::Index(index)
    }
}

pub struct PatchEngine {
    project: Project,
    current: Option<PatchId>,
    master_gain: f32,
    routing: Box<dyn RoutingSurface>,
    sfz_engine: Box<dyn SoundEngine>,
    soundfont_engine: Box<dyn SoundfontEngine>,
    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
    /// Warnings and backend messages waiting for the user's console.
    messages: Vec<String>,
    status_info: String,
    panicking: bool,
}

impl PatchEngine {
    pub fn new(
        project: Project,
        routing: Box<dyn RoutingSurface>,
        sfz_engine: Box<dyn SoundEngine>,
        soundfont_engine: Box<dyn SoundfontEngine>,
    ) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            project,
            current: None,
            master_gain: 1.0,
            routing,
            sfz_engine,
            soundfont_engine,
            events_tx,
            events_rx,
            messages: Vec::new(),
            status_info: String::new(),
            panicking: false,
        }
    }

    /// Initialize the sound engines and create the project's ports.
    pub fn init(&mut self) -> EngineResult {
        log::info!(target: "engine", "initializing {} engine", self.sfz_engine.engine_name());
        self.sfz_engine.init_engine(self.events_tx.clone())?;
        self.soundfont_engine.init_engine(self.events_tx.clone())?;
        self.create_project_ports()
    }

    /// Handle pending backend events. A `Settled` event reloads the current
    /// patch so layers refused with `NotReady` get materialized.
    pub fn poll(&mut self) -> Vec<EngineEvent> {
        let events: Vec<EngineEvent> = self.events_rx.try_iter().collect();
        for event in &events {
            match event {
                EngineEvent::UserMessage(msg) => {
                    log::info!(target: "engine", "{}", msg);
                    self.messages.push(msg.clone());
                }
                EngineEvent::StatusInfo(info) => self.status_info = info.clone(),
                EngineEvent::Initialized => {
                    log::info!(target: "engine", "{} engine initialized", self.sfz_engine.engine_name())
                }
                EngineEvent::Settled => {
                    if self.current.is_some() {
                        if let Err(e) = self.reload_patch() {
                            log::error!(target: "engine", "reload after settle failed: {}", e);
                        }
                    }
                }
            }
        }
        events
    }

    /// Take queued user-facing messages.
    pub fn drain_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }

    /// Last status dump reported by a backend.
    pub fn status_info(&self) -> &str {
        &self.status_info
    }

    pub(crate) fn warn(&mut self, msg: String) {
        log::warn!(target: "engine", "{}", msg);
        self.messages.push(format!("WARNING: {}", msg));
    }

    pub fn panic(&mut self, on: bool) {
        self.panicking = on;
        self.routing.panic(on);
    }

    pub fn is_panicking(&self) -> bool {
        self.panicking
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn set_master_gain(&mut self, gain: f32) -> EngineResult {
        self.master_gain = gain.clamp(0.0, 1.0);
        self.refresh_all_gains_and_routing()
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Direct model access. Changes that affect routing need a
    /// `reload_patch` or `refresh_all_gains_and_routing` afterwards.
    pub fn project_mut(&mut self) -> &mut Project {
        &mut self.project
    }

    /// Replace the project, unloading everything from the old one first.
    pub fn set_project(&mut self, project: Project) -> EngineResult<Project> {
        let loaded: Vec<PatchId> = self
            .project
            .patches()
            .iter()
            .map(|p| p.id)
            .filter(|id| self.project.is_patch_loaded(*id))
            .collect();
        let mut first_err = None;
        for id in loaded {
            if let Err(e) = self.unload_patch(id) {
                first_err.get_or_insert(e);
            }
        }
        self.remove_project_ports();
        let old = std::mem::replace(&mut self.project, project);
        self.current = None;
        self.create_project_ports()?;
        match first_err {
            Some(e) => Err(e),
            None => Ok(old),
        }
    }

    pub fn current_patch_id(&self) -> Option<PatchId> {
        self.current
    }

    pub fn current_patch(&self) -> Option<&Patch> {
        self.project.patch(self.current?)
    }

    fn require_current(&self) -> EngineResult<PatchId> {
        self.current.ok_or(EngineError::NoCurrentPatch)
    }

    pub(crate) fn patch_ref(&self, patch_id: PatchId) -> EngineResult<&Patch> {
        self.project
            .patch(patch_id)
            .ok_or(EngineError::UnknownPatch(patch_id))
    }

    pub(crate) fn layer_in(&self, patch_id: PatchId, layer_id: LayerId) -> EngineResult<&Layer> {
        self.patch_ref(patch_id)?
            .layer(layer_id)
            .ok_or(EngineError::UnknownLayer {
                patch: patch_id,
                layer: layer_id,
            })
    }

    pub(crate) fn layer_in_mut(
        &mut self,
        patch_id: PatchId,
        layer_id: LayerId,
    ) -> EngineResult<&mut Layer> {
        self.project
            .patch_mut(patch_id)
            .ok_or(EngineError::UnknownPatch(patch_id))?
            .layer_mut(layer_id)
            .ok_or(EngineError::UnknownLayer {
                patch: patch_id,
                layer: layer_id,
            })
    }

    /// Like `layer_in_mut` but for runtime state only; leaves the project's
    /// modified flag alone.
    pub(crate) fn layer_runtime_mut(
        &mut self,
        patch_id: PatchId,
        layer_id: LayerId,
    ) -> EngineResult<&mut Layer> {
        self.project
            .patch_runtime_mut(patch_id)
            .ok_or(EngineError::UnknownPatch(patch_id))?
            .layer_mut(layer_id)
            .ok_or(EngineError::UnknownLayer {
                patch: patch_id,
                layer: layer_id,
            })
    }

    /// Resolve a layer reference against the current patch.
    pub(crate) fn resolve(&self, layer: LayerRef) -> EngineResult<(PatchId, LayerId)> {
        let patch_id = self.require_current()?;
        let patch = self.patch_ref(patch_id)?;
        let id = match layer {
            LayerRef::Id(id) => patch.layer(id).map(|l| l.id()).ok_or(EngineError::UnknownLayer {
                patch: patch_id,
                layer: id,
            })?,
            LayerRef::Index(index) => patch
                .layer_at(index)
                .map(|l| l.id())
                .ok_or(EngineError::LayerIndexOutOfRange {
                    index,
                    len: patch.layer_count(),
                })?,
        };
        Ok((patch_id, id))
    }

    /// Client names owned by our sound engines.
    pub fn our_client_names(&self) -> Vec<String> {
        self.sfz_engine.client_names()
    }

    /// Connected clients that look like ours (same name prefix) but belong
    /// to no live engine, e.g. left over from a crashed session.
    pub fn orphaned_clients(&self) -> Vec<String> {
        let prefix = self.routing.client_name();
        let ours = self.our_client_names();
        self.routing
            .connected_clients()
            .into_iter()
            .filter(|c| c.starts_with(&prefix) && *c != prefix && !ours.contains(c))
            .collect()
    }
}
