use serde::{Deserialize, Serialize};

use super::layer::{Layer, LayerKind};
use crate::{LayerId, PatchId};

/// A named, loadable set of layers. Layer order is display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub id: PatchId,
    pub name: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    layers: Vec<Layer>,
    /// Next layer id to assign; ids are not reused within a patch.
    #[serde(default)]
    next_layer_id: u32,
}

impl Patch {
    pub fn new(id: PatchId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            note: String::new(),
            layers: Vec::new(),
            next_layer_id: 0,
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> impl Iterator<Item = &mut Layer> {
        self.layers.iter_mut()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.layers.iter().map(|l| l.id()).collect()
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id() == id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id() == id)
    }

    pub fn layer_at(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn layer_index(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id() == id)
    }

    /// Append a layer of the given kind, returning its new id.
    pub fn add_layer(&mut self, kind: LayerKind) -> LayerId {
        let id = self.alloc_layer_id();
        self.layers.push(Layer::new(id, kind));
        id
    }

    /// Append an existing layer (e.g. copied from another patch) under a
    /// fresh id. Its binding and error are dropped.
    pub fn insert_layer(&mut self, mut layer: Layer) -> LayerId {
        let id = self.alloc_layer_id();
        layer.set_id(id);
        layer.unbind();
        layer.clear_error();
        self.layers.push(layer);
        id
    }

    pub fn remove_layer(&mut self, id: LayerId) -> Option<Layer> {
        let idx = self.layer_index(id)?;
        Some(self.layers.remove(idx))
    }

    /// Move a layer to a new display position.
    pub fn move_layer(&mut self, id: LayerId, to: usize) -> bool {
        let Some(from) = self.layer_index(id) else {
            return false;
        };
        if to >= self.layers.len() {
            return false;
        }
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);
        true
    }

    pub fn clear_layers(&mut self) {
        self.layers.clear();
    }

    fn alloc_layer_id(&mut self) -> LayerId {
        let after_existing = self
            .layers
            .iter()
            .map(|l| l.id().get() + 1)
            .max()
            .unwrap_or(0);
        let id = self.next_layer_id.max(after_existing);
        self.next_layer_id = id + 1;
        LayerId::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LayerType, PortId};

    #[test]
    fn layer_ids_are_not_reused() {
        let mut patch = Patch::new(PatchId::new(0), "Piano");
        let a = patch.add_layer(LayerKind::plugin("a.sfz"));
        let b = patch.add_layer(LayerKind::plugin("b.sfz"));
        assert_ne!(a, b);
        patch.remove_layer(b);
        let c = patch.add_layer(LayerKind::midi_out(PortId::new(0)));
        assert_ne!(c, b);
        assert_eq!(patch.layer_count(), 2);
        assert_eq!(patch.layer_at(1).map(|l| l.layer_type()), Some(LayerType::MidiOut));
    }

    #[test]
    fn deserialized_patch_continues_after_highest_id() {
        let mut patch = Patch::new(PatchId::new(0), "P");
        patch.add_layer(LayerKind::plugin("a.sfz"));
        patch.add_layer(LayerKind::plugin("b.sfz"));
        let mut json: serde_json::Value = serde_json::to_value(&patch).unwrap();
        json.as_object_mut().unwrap().remove("next_layer_id");
        let mut back: Patch = serde_json::from_value(json).unwrap();
        assert_eq!(back.add_layer(LayerKind::plugin("c.sfz")), LayerId::new(2));
    }

    #[test]
    fn move_layer_reorders() {
        let mut patch = Patch::new(PatchId::new(0), "P");
        let a = patch.add_layer(LayerKind::plugin("a.sfz"));
        let b = patch.add_layer(LayerKind::plugin("b.sfz"));
        assert!(patch.move_layer(b, 0));
        assert_eq!(patch.layer_ids(), vec![b, a]);
        assert!(!patch.move_layer(a, 5));
    }
}
