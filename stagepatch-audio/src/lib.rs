//! # stagepatch-audio
//!
//! Concrete sound engines for the patch engine:
//!
//! - [`synth`]: in-process soundfont synth bank with a non-blocking realtime half
//! - [`plugin_host`]: hosted SFZ/GIG plugins, with the first-load settle window
//! - [`sampler`]: LinuxSampler over LSCP
//! - [`bridge`]: one sub-process per instrument, restarted when it dies
//!
//! [`build_sound_engine`] picks the SFZ backend named in the config;
//! [`Rig::from_config`] wires a whole patch engine around it.

pub mod bridge;
pub mod plugin_host;
pub mod sampler;
pub mod synth;

use stagepatch_core::config::{BackendKind, Config};
use stagepatch_core::engine::backend::SoundEngine;
use stagepatch_core::error::EngineResult;
use stagepatch_core::mix_table::{MixTable, MixTableReader};
use stagepatch_core::PatchEngine;
use stagepatch_types::Project;

pub use bridge::BridgeEngine;
pub use plugin_host::PluginHostEngine;
pub use sampler::SamplerEngine;
pub use synth::{SynthBank, SynthBankProcessor};

/// SFZ/GIG engine selected by `[engine] backend`.
pub fn build_sound_engine(config: &Config) -> Box<dyn SoundEngine> {
    let engine: Box<dyn SoundEngine> = match config.backend() {
        BackendKind::PluginHost => Box::new(PluginHostEngine::from_config(config)),
        BackendKind::Bridge => Box::new(BridgeEngine::from_config(config)),
        BackendKind::Sampler => Box::new(SamplerEngine::from_config(config)),
    };
    log::info!(target: "engine", "using {} backend", engine.engine_name());
    engine
}

/// A patch engine on the in-process mix table, plus the realtime halves
/// the audio callback needs.
pub struct Rig {
    pub engine: PatchEngine,
    pub mix: MixTableReader,
    pub synth: SynthBankProcessor,
}

impl Rig {
    /// Build and initialize everything `config` describes for `project`.
    pub fn from_config(config: &Config, project: Project) -> EngineResult<Self> {
        let table = MixTable::new(&config.client_name());
        let synth = SynthBank::default();
        let mix = table.reader();
        let synth_rt = synth.processor();

        let mut engine = PatchEngine::new(
            project,
            Box::new(table),
            build_sound_engine(config),
            Box::new(synth),
        );
        engine.set_master_gain(config.master_gain())?;
        engine.init()?;
        Ok(Self {
            engine,
            mix,
            synth: synth_rt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_follows_config() {
        let cases = [
            ("", "plugin_host"),
            ("[engine]\nbackend = \"bridge\"\n", "bridge"),
            ("[engine]\nbackend = \"sampler\"\n", "sampler"),
        ];
        for (toml, name) in cases {
            let config = Config::from_toml_str(toml).unwrap();
            assert_eq!(build_sound_engine(&config).engine_name(), name);
        }
    }

    #[test]
    fn client_names_derive_from_config() {
        let config = Config::from_toml_str(
            "[engine]\nbackend = \"sampler\"\nclient_name = \"gig\"\n",
        )
        .unwrap();
        assert_eq!(build_sound_engine(&config).client_names(), vec!["gig_LS".to_string()]);
    }

    #[test]
    fn rig_takes_master_gain_and_loads() {
        let config = Config::from_toml_str("[engine]\nmaster_gain = 0.5\n").unwrap();
        let mut project = Project::new("Gig");
        let patch = project.add_patch("Empty");
        let mut rig = Rig::from_config(&config, project).unwrap();

        assert_eq!(rig.engine.master_gain(), 0.5);
        assert_eq!(rig.engine.our_client_names(), vec!["stagepatch_plugins".to_string()]);
        assert!(rig.engine.load_patch(patch).unwrap().is_complete());
        assert_eq!(rig.mix.dropped(), 0);
    }
}
