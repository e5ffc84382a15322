use serde::{Deserialize, Serialize};

use crate::audio::{PLAYBACK_SAMPLE_RATE, SPEAKING_THRESHOLD};
use crate::recommendations::PollerConfig;

/// Settings sent to the live endpoint as the first frame of every stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    /// Synthesized voice (e.g. "Puck")
    pub voice: String,

    /// Let the assistant ground answers with web search
    pub google_search: bool,

    /// Whether the user may barge in while the assistant is speaking
    pub allow_interruptions: bool,

    /// BCP 47 language tag of the user
    pub language: String,

    /// Role of this participant
    pub role: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            voice: "Puck".to_string(),
            google_search: true,
            allow_interruptions: false,
            language: detect_language(),
            role: "user".to_string(),
        }
    }
}

/// Language tag from the process locale (`LC_ALL`, `LC_MESSAGES`, `LANG`)
pub fn detect_language() -> String {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find_map(|locale| locale_to_tag(&locale))
        .unwrap_or_else(|| "en-US".to_string())
}

/// `en_US.UTF-8` → `en-US`; `C` and `POSIX` carry no language
pub fn locale_to_tag(locale: &str) -> Option<String> {
    let base = locale.split(['.', '@']).next().unwrap_or("").trim();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return None;
    }
    Some(base.replace('_', "-"))
}

/// Configuration for a Meet session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the live endpoint; the session id is appended as a path segment
    pub live_url: String,

    /// Stream settings announced on connect
    pub stream: StreamConfig,

    /// Normalized level above which the user counts as speaking
    pub speaking_threshold: f32,

    /// Sample rate of inbound synthesized speech
    pub playback_sample_rate: u32,

    /// Recommendation polling; `None` runs the voice chat alone
    pub recommendations: Option<PollerConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            live_url: "ws://localhost:8000/ws".to_string(),
            stream: StreamConfig::default(),
            speaking_threshold: SPEAKING_THRESHOLD,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            recommendations: Some(PollerConfig::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_to_tag() {
        assert_eq!(locale_to_tag("en_US.UTF-8").as_deref(), Some("en-US"));
        assert_eq!(locale_to_tag("hi_IN").as_deref(), Some("hi-IN"));
        assert_eq!(locale_to_tag("de_DE@euro").as_deref(), Some("de-DE"));
        assert_eq!(locale_to_tag("C.UTF-8"), None);
        assert_eq!(locale_to_tag("POSIX"), None);
        assert_eq!(locale_to_tag(""), None);
    }

    #[test]
    fn test_stream_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.voice, "Puck");
        assert!(config.google_search);
        assert!(!config.allow_interruptions);
        assert_eq!(config.role, "user");
        assert!(!config.language.is_empty());
    }
}
