//! # stagepatch-types
//!
//! Shared data model for the stagepatch live rig: MIDI events and filters,
//! layers, patches and the project registry of buses and ports.
//! Nothing in here talks to a backend or the realtime graph.

pub mod midi;
pub mod midi_filter;
pub mod state;

pub use midi::{MidiEvent, MidiEventKind};
pub use midi_filter::{MidiFilter, MidiFilterZone};
pub use state::*;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            Default,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            pub fn new(id: u32) -> Self {
                Self(id)
            }
            pub fn get(self) -> u32 {
                self.0
            }
        }

        impl From<$name> for u32 {
            fn from(id: $name) -> u32 {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a layer, unique within its patch.
    LayerId
);

id_type!(
    /// Identifier of an output bus. Bus 0 is not guaranteed to exist.
    BusId
);

id_type!(
    /// Identifier of an audio-in, MIDI-out or MIDI-in port in the project.
    PortId
);

id_type!(
    /// Identifier of a patch, unique within its project.
    PatchId
);

id_type!(
    /// Opaque token handed out by a sound engine for a materialized instrument.
    EngineHandle
);

id_type!(
    /// Port created in the realtime routing surface.
    RtPortId
);

id_type!(
    /// Plugin/soundfont layer registered in the realtime routing surface.
    RtLayerId
);

/// Which side of a stereo pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrips_raw_value() {
        let id = LayerId::new(7);
        assert_eq!(id.get(), 7);
        assert_eq!(id.to_string(), "7");
        assert!(BusId::new(0) < BusId::new(1));
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&PatchId::new(3)).unwrap();
        assert_eq!(json, "3");
        let back: PatchId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PatchId::new(3));
    }
}
