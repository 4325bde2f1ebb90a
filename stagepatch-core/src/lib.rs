//! # stagepatch-core
//!
//! Patch engine for live performance: switches between patches of layered
//! instruments, MIDI-thru and audio-thru ports, and keeps gain, solo, mute,
//! bus routing and MIDI filtering in step with a realtime port graph.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagepatch_core::config::Config;
//! use stagepatch_core::engine::PatchEngine;
//! use stagepatch_core::mix_table::MixTable;
//! use stagepatch_types::Project;
//!
//! let config = Config::load();
//! let mut project = Project::new("Gig");
//! let patch = project.add_patch("Piano + Pad");
//!
//! let mut engine = PatchEngine::new(
//!     project,
//!     Box::new(MixTable::new(&config.client_name())),
//!     sfz_engine,       // Box<dyn SoundEngine>, see stagepatch-audio
//!     soundfont_engine, // Box<dyn SoundfontEngine>
//! );
//! engine.init()?;
//! let report = engine.load_patch(patch)?;
//! engine.set_layer_gain(0, 0.6)?;
//!
//! // On the control thread's tick:
//! engine.poll();
//! for msg in engine.drain_messages() { println!("{msg}"); }
//! ```
//!
//! ## Module Overview
//!
//! - [`engine`]: `PatchEngine`: load/unload/reload, layer mutations, gain refresh;
//!   the `SoundEngine`/`SoundfontEngine` backend traits and the `RoutingSurface` contract
//! - [`mix_table`]: in-process `RoutingSurface` with a non-blocking realtime reader
//! - [`realtime`]: `RtShared`, the try-lock-or-drop primitive shared with the audio callback
//! - [`config`]: TOML configuration (embedded defaults + user override)
//! - [`error`]: error types
//! - [`logging`]: file logger setup

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod mix_table;
pub mod realtime;

pub use engine::{convert_gain, LayerRef, LoadReport, PatchEngine};
pub use error::{BackendError, EngineError};
