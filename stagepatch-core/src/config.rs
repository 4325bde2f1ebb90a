use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    plugin_host: PluginHostConfig,
    #[serde(default)]
    bridge: BridgeConfig,
    #[serde(default)]
    sampler: SamplerConfig,
}

#[derive(Deserialize, Default)]
struct EngineConfig {
    backend: Option<String>,
    client_name: Option<String>,
    master_gain: Option<f32>,
}

#[derive(Deserialize, Default)]
struct PluginHostConfig {
    settle_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct BridgeConfig {
    exe_path: Option<String>,
    max_restarts: Option<u32>,
    poll_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct SamplerConfig {
    host: Option<String>,
    port: Option<u16>,
    connect_timeout_ms: Option<u64>,
}

/// Which sound engine hosts SFZ/GIG layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    PluginHost,
    Bridge,
    Sampler,
}

pub struct Config {
    engine: EngineConfig,
    plugin_host: PluginHostConfig,
    bridge: BridgeConfig,
    sampler: SamplerConfig,
}

impl Config {
    /// Embedded defaults, overridden by the user's config file if present.
    pub fn load() -> Self {
        let mut base = embedded_defaults();

        if let Some(path) = user_config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                        Ok(user) => merge(&mut base, user),
                        Err(e) => {
                            log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                        }
                    },
                    Err(e) => {
                        log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                    }
                }
            }
        }

        Self::from_file(base)
    }

    /// Embedded defaults overridden by `contents`.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        let mut base = embedded_defaults();
        merge(&mut base, toml::from_str(contents)?);
        Ok(Self::from_file(base))
    }

    fn from_file(file: ConfigFile) -> Self {
        Config {
            engine: file.engine,
            plugin_host: file.plugin_host,
            bridge: file.bridge,
            sampler: file.sampler,
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.engine
            .backend
            .as_deref()
            .and_then(parse_backend)
            .unwrap_or(BackendKind::PluginHost)
    }

    pub fn client_name(&self) -> String {
        self.engine
            .client_name
            .clone()
            .unwrap_or_else(|| "stagepatch".to_string())
    }

    /// Master gain in [0, 1].
    pub fn master_gain(&self) -> f32 {
        self.engine.master_gain.unwrap_or(0.8).clamp(0.0, 1.0)
    }

    /// Settle window after the plugin host instantiates its first instrument.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.plugin_host.settle_ms.unwrap_or(500).min(10_000))
    }

    pub fn bridge_exe(&self) -> PathBuf {
        PathBuf::from(self.bridge.exe_path.as_deref().unwrap_or("sfizz_jack"))
    }

    pub fn bridge_max_restarts(&self) -> u32 {
        self.bridge.max_restarts.unwrap_or(5)
    }

    /// How often the bridge checks its sub-processes (clamped to 10ms..60s).
    pub fn bridge_poll_interval(&self) -> Duration {
        Duration::from_millis(self.bridge.poll_ms.unwrap_or(500).clamp(10, 60_000))
    }

    pub fn sampler_addr(&self) -> String {
        format!(
            "{}:{}",
            self.sampler.host.as_deref().unwrap_or("127.0.0.1"),
            self.sampler.port.unwrap_or(8888)
        )
    }

    pub fn sampler_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.sampler.connect_timeout_ms.unwrap_or(1000))
    }
}

fn embedded_defaults() -> ConfigFile {
    toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|e| {
        log::error!(target: "config", "embedded config.toml is invalid: {}", e);
        ConfigFile::default()
    })
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("stagepatch").join("config.toml"))
}

fn merge(base: &mut ConfigFile, user: ConfigFile) {
    if user.engine.backend.is_some() {
        base.engine.backend = user.engine.backend;
    }
    if user.engine.client_name.is_some() {
        base.engine.client_name = user.engine.client_name;
    }
    if user.engine.master_gain.is_some() {
        base.engine.master_gain = user.engine.master_gain;
    }
    if user.plugin_host.settle_ms.is_some() {
        base.plugin_host.settle_ms = user.plugin_host.settle_ms;
    }
    if user.bridge.exe_path.is_some() {
        base.bridge.exe_path = user.bridge.exe_path;
    }
    if user.bridge.max_restarts.is_some() {
        base.bridge.max_restarts = user.bridge.max_restarts;
    }
    if user.bridge.poll_ms.is_some() {
        base.bridge.poll_ms = user.bridge.poll_ms;
    }
    if user.sampler.host.is_some() {
        base.sampler.host = user.sampler.host;
    }
    if user.sampler.port.is_some() {
        base.sampler.port = user.sampler.port;
    }
    if user.sampler.connect_timeout_ms.is_some() {
        base.sampler.connect_timeout_ms = user.sampler.connect_timeout_ms;
    }
}

fn parse_backend(s: &str) -> Option<BackendKind> {
    match s {
        "plugin_host" | "carla" => Some(BackendKind::PluginHost),
        "bridge" => Some(BackendKind::Bridge),
        "sampler" | "linuxsampler" => Some(BackendKind::Sampler),
        _ => {
            log::warn!(target: "config", "unknown backend '{}'", s);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_parse() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.backend(), BackendKind::PluginHost);
        assert_eq!(config.client_name(), "stagepatch");
        assert_eq!(config.settle_delay(), Duration::from_millis(500));
        assert_eq!(config.sampler_addr(), "127.0.0.1:8888");
    }

    #[test]
    fn user_values_override_defaults() {
        let config = Config::from_toml_str(
            "[engine]\nbackend = \"bridge\"\nmaster_gain = 3.0\n[bridge]\nmax_restarts = 2\n",
        )
        .unwrap();
        assert_eq!(config.backend(), BackendKind::Bridge);
        assert_eq!(config.master_gain(), 1.0);
        assert_eq!(config.bridge_max_restarts(), 2);
        assert_eq!(config.bridge_exe(), PathBuf::from("sfizz_jack"));
    }

    #[test]
    fn unknown_backend_falls_back() {
        let config = Config::from_toml_str("[engine]\nbackend = \"nope\"\n").unwrap();
        assert_eq!(config.backend(), BackendKind::PluginHost);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::from_toml_str("[engine\n").is_err());
    }
}
