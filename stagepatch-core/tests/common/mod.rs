#![allow(dead_code)]

use std::sync::Arc;

use stagepatch_core::engine::backend::TestEngine;
use stagepatch_core::engine::routing::{RoutingOp, SharedTestRoutingSurface, TestRoutingSurface};
use stagepatch_core::PatchEngine;
use stagepatch_types::{Layer, PatchId, Project, RtLayerId, RtPortId};

pub struct Harness {
    pub engine: PatchEngine,
    pub routing: Arc<TestRoutingSurface>,
    pub sfz: TestEngine,
    pub synth: TestEngine,
    pub patch: PatchId,
}

/// Engine over a fresh project with one empty patch, initialized and loaded.
pub fn make_engine() -> Harness {
    make_engine_with(Project::new("Test"))
}

/// Like `make_engine`, for a prepared project. Its first patch is loaded;
/// one is added if it has none.
pub fn make_engine_with(mut project: Project) -> Harness {
    let existing = project.patch_at(0).map(|p| p.id);
    let patch = match existing {
        Some(id) => id,
        None => project.add_patch("Patch 1"),
    };
    let routing = Arc::new(TestRoutingSurface::new());
    let sfz = TestEngine::new();
    let synth = TestEngine::new();
    let mut engine = PatchEngine::new(
        project,
        Box::new(SharedTestRoutingSurface(routing.clone())),
        Box::new(sfz.clone()),
        Box::new(synth.clone()),
    );
    engine.init().unwrap();
    engine.load_patch(patch).unwrap();
    Harness {
        engine,
        routing,
        sfz,
        synth,
        patch,
    }
}

pub fn rt_layer(layer: &Layer) -> RtLayerId {
    layer
        .binding()
        .and_then(|b| b.rt_layer)
        .expect("layer has no realtime ports")
}

/// Realtime port created under `name`.
pub fn port_named(routing: &TestRoutingSurface, name: &str) -> RtPortId {
    match routing.find(|op| matches!(op, RoutingOp::AddPort { name: n, .. } if n == name)) {
        Some(RoutingOp::AddPort { port, .. }) => port,
        _ => panic!("no port named {}", name),
    }
}

/// Most recent gain pushed to a layer's ports.
pub fn last_layer_gain(routing: &TestRoutingSurface, layer: RtLayerId) -> Option<f32> {
    routing
        .operations()
        .iter()
        .rev()
        .find_map(|op| match op {
            RoutingOp::SetLayerGain { layer: l, gain } if *l == layer => Some(*gain),
            _ => None,
        })
}
