use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::audio::{
    AudioBackendConfig, CAPTURE_BLOCK_SIZE, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE,
    SPEAKING_THRESHOLD,
};
use crate::error::{MeetError, Result};
use crate::recommendations::PollerConfig;
use crate::session::{SessionConfig, StreamConfig};

/// Default config file, looked up with any extension the `config` crate knows
pub const DEFAULT_CONFIG_PATH: &str = "config/homeconnect-meet";

const ENV_PREFIX: &str = "HOMECONNECT";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoints: EndpointsConfig,
    pub stream: StreamSection,
    pub audio: AudioConfig,
    pub recommendations: RecommendationsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    /// WebSocket base for the live conversation
    pub live_url: String,
    /// HTTP base for recommendations
    pub server_url: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            live_url: "ws://localhost:8000/ws".to_string(),
            server_url: "http://localhost:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    pub voice: String,
    pub google_search: bool,
    pub allow_interruptions: bool,
    pub language: String,
    pub role: String,
}

impl Default for StreamSection {
    fn default() -> Self {
        let defaults = StreamConfig::default();
        Self {
            voice: defaults.voice,
            google_search: defaults.google_search,
            allow_interruptions: defaults.allow_interruptions,
            language: defaults.language,
            role: defaults.role,
        }
    }
}

impl From<StreamSection> for StreamConfig {
    fn from(section: StreamSection) -> Self {
        StreamConfig {
            voice: section.voice,
            google_search: section.google_search,
            allow_interruptions: section.allow_interruptions,
            language: section.language,
            role: section.role,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub block_size: usize,
    pub speaking_threshold: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            block_size: CAPTURE_BLOCK_SIZE,
            speaking_threshold: SPEAKING_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecommendationsConfig {
    pub enabled: bool,
    pub success_delay_secs: u64,
    pub failure_delay_secs: u64,
}

impl Default for RecommendationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            success_delay_secs: 5,
            failure_delay_secs: 10,
        }
    }
}

impl Config {
    /// Load defaults, then the optional file at `path`, then the environment
    ///
    /// Nothing is validated here; call [`Config::validate`] once command
    /// line overrides are in.
    pub fn load(path: &str) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`Config::load`] but reads variables from `env` instead of the
    /// process environment
    pub fn load_with_env(path: &str, env: Option<HashMap<String, String>>) -> Result<Self> {
        let lookup = |key: &str| match &env {
            Some(vars) => vars.get(key).cloned(),
            None => std::env::var(key).ok(),
        };

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(env.clone()),
            );

        // Plain variables injected at deploy time win over everything but flags
        for (var, key) in [
            ("LIVE_URL", "endpoints.live_url"),
            ("SERVER_URL", "endpoints.server_url"),
        ] {
            if let Some(value) = lookup(var) {
                builder = builder
                    .set_override(key, value)
                    .map_err(|e| MeetError::Config(e.to_string()))?;
            }
        }

        let settings = builder
            .build()
            .map_err(|e| MeetError::Config(e.to_string()))?;
        let config: Config = settings
            .try_deserialize()
            .map_err(|e| MeetError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let live = self.endpoints.live_url.as_str();
        if !(live.starts_with("ws://") || live.starts_with("wss://")) {
            return Err(MeetError::Config(format!(
                "live_url must be a ws:// or wss:// URL, got {:?}",
                live
            )));
        }
        if self.audio.block_size == 0 {
            return Err(MeetError::Config("audio.block_size must be positive".to_string()));
        }
        if self.audio.capture_sample_rate == 0 || self.audio.playback_sample_rate == 0 {
            return Err(MeetError::Config("sample rates must be positive".to_string()));
        }
        Ok(())
    }

    pub fn poller_config(&self) -> Option<PollerConfig> {
        self.recommendations.enabled.then(|| PollerConfig {
            success_delay: Duration::from_secs(self.recommendations.success_delay_secs),
            failure_delay: Duration::from_secs(self.recommendations.failure_delay_secs),
        })
    }

    pub fn backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            sample_rate: self.audio.capture_sample_rate,
            block_size: self.audio.block_size,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            live_url: self.endpoints.live_url.clone(),
            stream: self.stream.clone().into(),
            speaking_threshold: self.audio.speaking_threshold,
            playback_sample_rate: self.audio.playback_sample_rate,
            recommendations: self.poller_config(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults_without_file() {
        let config = Config::load_with_env("does/not/exist", env(&[])).unwrap();

        assert_eq!(config.endpoints.live_url, "ws://localhost:8000/ws");
        assert_eq!(config.audio.block_size, 512);
        assert_eq!(config.audio.capture_sample_rate, 16000);
        assert_eq!(config.audio.playback_sample_rate, 24000);
        assert!(config.recommendations.enabled);
        assert_eq!(config.stream.voice, "Puck");
    }

    #[test]
    fn test_file_then_env_layering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meet.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[endpoints]\nlive_url = \"wss://file.example/ws\"\nserver_url = \"https://file.example\"\n\n[stream]\nvoice = \"Kore\"\n\n[recommendations]\nsuccess_delay_secs = 7"
        )
        .unwrap();

        let path_str = path.to_str().unwrap();
        let config = Config::load_with_env(
            path_str,
            env(&[
                ("HOMECONNECT__STREAM__VOICE", "Charon"),
                ("SERVER_URL", "https://env.example"),
            ]),
        )
        .unwrap();

        assert_eq!(config.endpoints.live_url, "wss://file.example/ws");
        assert_eq!(config.endpoints.server_url, "https://env.example");
        assert_eq!(config.stream.voice, "Charon");

        let poller = config.poller_config().unwrap();
        assert_eq!(poller.success_delay, Duration::from_secs(7));
        assert_eq!(poller.failure_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_disabled_recommendations() {
        let config = Config::load_with_env(
            "does/not/exist",
            env(&[("HOMECONNECT__RECOMMENDATIONS__ENABLED", "false")]),
        )
        .unwrap();

        assert!(config.poller_config().is_none());
        assert!(config.session_config().recommendations.is_none());
    }

    #[test]
    fn test_rejects_http_live_url() {
        let config = Config::load_with_env(
            "does/not/exist",
            env(&[("LIVE_URL", "http://localhost:8000/ws")]),
        )
        .unwrap();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, MeetError::Config(_)));
    }

    #[test]
    fn test_later_override_repairs_bad_live_url() {
        let mut config = Config::load_with_env(
            "does/not/exist",
            env(&[("LIVE_URL", "http://localhost:8000/ws")]),
        )
        .unwrap();

        // What a --live-url flag does before validation
        config.endpoints.live_url = "wss://live.example/ws".to_string();
        config.validate().unwrap();
    }
}
