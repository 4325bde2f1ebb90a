mod layer;
mod patch;
mod ports;
mod project;

pub use layer::{
    AudioInLayer, Layer, LayerBinding, LayerKind, LayerKindMut, LayerStatus, LayerType, MidiOutLayer,
    PluginLayer, SoundfontLayer, SoundfontProgram,
};
pub use patch::Patch;
pub use ports::{AudioInPort, Bus, MidiInPort, MidiOutPort, PortChannel};
pub use project::{Project, DEFAULT_BUS_NAME, DEFAULT_MIDI_IN_NAME};

/// Default gain for newly added layers.
pub const DEFAULT_LAYER_GAIN: f32 = 0.8;
