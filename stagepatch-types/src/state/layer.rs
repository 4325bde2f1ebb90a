use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::DEFAULT_LAYER_GAIN;
use crate::midi_filter::MidiFilter;
use crate::{BusId, EngineHandle, LayerId, PortId, RtLayerId};

/// A program inside a soundfont file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundfontProgram {
    pub soundfont_path: PathBuf,
    pub bank: u16,
    pub program: u8,
    pub name: String,
}

impl SoundfontProgram {
    pub fn new(soundfont_path: impl Into<PathBuf>, bank: u16, program: u8, name: &str) -> Self {
        Self {
            soundfont_path: soundfont_path.into(),
            bank,
            program,
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundfontLayer {
    pub program: SoundfontProgram,
    pub gain: f32,
    pub solo: bool,
    pub mute: bool,
    #[serde(default)]
    pub filter: MidiFilter,
}

/// A sampled instrument (SFZ/GIG) hosted by a plugin-style sound engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginLayer {
    pub name: String,
    pub path: PathBuf,
    pub gain: f32,
    pub solo: bool,
    pub mute: bool,
    #[serde(default)]
    pub filter: MidiFilter,
}

/// MIDI forwarded to one of the project's MIDI output ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiOutLayer {
    pub port: PortId,
    pub solo: bool,
    pub mute: bool,
    #[serde(default)]
    pub filter: MidiFilter,
}

/// Audio from one of the project's audio input ports, routed to a bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInLayer {
    pub port: PortId,
    pub name: String,
    pub gain: f32,
    pub solo: bool,
    pub mute: bool,
}

/// The closed set of layer payloads. A layer's kind never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LayerKind {
    SoundfontProgram(SoundfontLayer),
    Plugin(PluginLayer),
    MidiOut(MidiOutLayer),
    AudioIn(AudioInLayer),
}

impl LayerKind {
    pub fn soundfont(program: SoundfontProgram) -> Self {
        LayerKind::SoundfontProgram(SoundfontLayer {
            program,
            gain: DEFAULT_LAYER_GAIN,
            solo: false,
            mute: false,
            filter: MidiFilter::default(),
        })
    }

    pub fn plugin(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        LayerKind::Plugin(PluginLayer {
            name,
            path: path.to_path_buf(),
            gain: DEFAULT_LAYER_GAIN,
            solo: false,
            mute: false,
            filter: MidiFilter::default(),
        })
    }

    pub fn midi_out(port: PortId) -> Self {
        LayerKind::MidiOut(MidiOutLayer {
            port,
            solo: false,
            mute: false,
            filter: MidiFilter::default(),
        })
    }

    pub fn audio_in(port: PortId, name: &str) -> Self {
        LayerKind::AudioIn(AudioInLayer {
            port,
            name: name.to_string(),
            gain: DEFAULT_LAYER_GAIN,
            solo: false,
            mute: false,
        })
    }

    pub fn layer_type(&self) -> LayerType {
        match self {
            LayerKind::SoundfontProgram(_) => LayerType::SoundfontProgram,
            LayerKind::Plugin(_) => LayerType::Plugin,
            LayerKind::MidiOut(_) => LayerType::MidiOut,
            LayerKind::AudioIn(_) => LayerType::AudioIn,
        }
    }
}

/// Payload-free discriminant of [`LayerKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerType {
    SoundfontProgram,
    Plugin,
    MidiOut,
    AudioIn,
}

impl LayerType {
    /// Whether layers of this type are materialized in a sound engine.
    pub fn needs_engine(self) -> bool {
        matches!(self, LayerType::SoundfontProgram | LayerType::Plugin)
    }
}

/// Where a materialized layer lives in its engine and in the routing surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerBinding {
    pub handle: EngineHandle,
    pub rt_layer: Option<RtLayerId>,
    pub plugin_name: String,
    pub midi_in_port: String,
    pub audio_out_ports: [String; 2],
}

impl LayerBinding {
    pub fn new(handle: EngineHandle) -> Self {
        Self {
            handle,
            rt_layer: None,
            plugin_name: String::new(),
            midi_in_port: String::new(),
            audio_out_ports: [String::new(), String::new()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerStatus {
    Unloaded,
    Loaded,
    Error(String),
}

/// One sound or routing unit inside a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    id: LayerId,
    pub bus: BusId,
    pub midi_in_port: PortId,
    #[serde(skip)]
    error: Option<String>,
    #[serde(skip)]
    binding: Option<LayerBinding>,
    kind: LayerKind,
}

impl Layer {
    pub fn new(id: LayerId, kind: LayerKind) -> Self {
        Self {
            id,
            bus: BusId::default(),
            midi_in_port: PortId::default(),
            error: None,
            binding: None,
            kind,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: LayerId) {
        self.id = id;
    }

    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    /// Mutable payload access. The variant itself cannot be swapped out.
    pub fn kind_mut(&mut self) -> LayerKindMut<'_> {
        match &mut self.kind {
            LayerKind::SoundfontProgram(l) => LayerKindMut::SoundfontProgram(l),
            LayerKind::Plugin(l) => LayerKindMut::Plugin(l),
            LayerKind::MidiOut(l) => LayerKindMut::MidiOut(l),
            LayerKind::AudioIn(l) => LayerKindMut::AudioIn(l),
        }
    }

    pub fn layer_type(&self) -> LayerType {
        self.kind.layer_type()
    }

    pub fn name(&self) -> String {
        match &self.kind {
            LayerKind::SoundfontProgram(l) => l.program.name.clone(),
            LayerKind::Plugin(l) => l.name.clone(),
            LayerKind::MidiOut(l) => format!("MIDI Out {}", l.port),
            LayerKind::AudioIn(l) => l.name.clone(),
        }
    }

    /// MIDI output layers have no gain and always report 0.
    pub fn gain(&self) -> f32 {
        match &self.kind {
            LayerKind::SoundfontProgram(l) => l.gain,
            LayerKind::Plugin(l) => l.gain,
            LayerKind::MidiOut(_) => 0.0,
            LayerKind::AudioIn(l) => l.gain,
        }
    }

    /// Clamped to [0, 1]. Ignored for MIDI output layers.
    pub fn set_gain(&mut self, gain: f32) {
        let gain = gain.clamp(0.0, 1.0);
        match &mut self.kind {
            LayerKind::SoundfontProgram(l) => l.gain = gain,
            LayerKind::Plugin(l) => l.gain = gain,
            LayerKind::MidiOut(_) => {}
            LayerKind::AudioIn(l) => l.gain = gain,
        }
    }

    pub fn is_solo(&self) -> bool {
        match &self.kind {
            LayerKind::SoundfontProgram(l) => l.solo,
            LayerKind::Plugin(l) => l.solo,
            LayerKind::MidiOut(l) => l.solo,
            LayerKind::AudioIn(l) => l.solo,
        }
    }

    pub fn set_solo(&mut self, solo: bool) {
        match &mut self.kind {
            LayerKind::SoundfontProgram(l) => l.solo = solo,
            LayerKind::Plugin(l) => l.solo = solo,
            LayerKind::MidiOut(l) => l.solo = solo,
            LayerKind::AudioIn(l) => l.solo = solo,
        }
    }

    pub fn is_mute(&self) -> bool {
        match &self.kind {
            LayerKind::SoundfontProgram(l) => l.mute,
            LayerKind::Plugin(l) => l.mute,
            LayerKind::MidiOut(l) => l.mute,
            LayerKind::AudioIn(l) => l.mute,
        }
    }

    pub fn set_mute(&mut self, mute: bool) {
        match &mut self.kind {
            LayerKind::SoundfontProgram(l) => l.mute = mute,
            LayerKind::Plugin(l) => l.mute = mute,
            LayerKind::MidiOut(l) => l.mute = mute,
            LayerKind::AudioIn(l) => l.mute = mute,
        }
    }

    /// Audio input layers carry no MIDI and have no filter.
    pub fn midi_filter(&self) -> Option<&MidiFilter> {
        match &self.kind {
            LayerKind::SoundfontProgram(l) => Some(&l.filter),
            LayerKind::Plugin(l) => Some(&l.filter),
            LayerKind::MidiOut(l) => Some(&l.filter),
            LayerKind::AudioIn(_) => None,
        }
    }

    /// Returns false if this layer type has no filter.
    pub fn set_midi_filter(&mut self, filter: MidiFilter) -> bool {
        match &mut self.kind {
            LayerKind::SoundfontProgram(l) => l.filter = filter,
            LayerKind::Plugin(l) => l.filter = filter,
            LayerKind::MidiOut(l) => l.filter = filter,
            LayerKind::AudioIn(_) => return false,
        }
        true
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// An empty message clears the error.
    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.error = if message.is_empty() { None } else { Some(message) };
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn binding(&self) -> Option<&LayerBinding> {
        self.binding.as_ref()
    }

    pub fn binding_mut(&mut self) -> Option<&mut LayerBinding> {
        self.binding.as_mut()
    }

    pub fn handle(&self) -> Option<EngineHandle> {
        self.binding.as_ref().map(|b| b.handle)
    }

    pub fn bind(&mut self, binding: LayerBinding) {
        self.binding = Some(binding);
    }

    /// Drop the binding, returning what it held.
    pub fn unbind(&mut self) -> Option<LayerBinding> {
        self.binding.take()
    }

    pub fn is_loaded(&self) -> bool {
        self.binding.is_some()
    }

    pub fn status(&self) -> LayerStatus {
        match (&self.error, &self.binding) {
            (Some(msg), _) => LayerStatus::Error(msg.clone()),
            (None, Some(_)) => LayerStatus::Loaded,
            (None, None) => LayerStatus::Unloaded,
        }
    }
}

/// Mutable view of a layer payload.
pub enum LayerKindMut<'a> {
    SoundfontProgram(&'a mut SoundfontLayer),
    Plugin(&'a mut PluginLayer),
    MidiOut(&'a mut MidiOutLayer),
    AudioIn(&'a mut AudioInLayer),
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LayerType::SoundfontProgram => "soundfont",
            LayerType::Plugin => "plugin",
            LayerType::MidiOut => "midi-out",
            LayerType::AudioIn => "audio-in",
        };
        f.write_str(s)
    }
}
