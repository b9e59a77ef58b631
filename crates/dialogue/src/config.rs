//! Session configuration.
//!
//! Loaded from an optional TOML file, then overridden from the environment,
//! then by command-line flags in the binary.
//!
//! | Env | Overrides |
//! |-----|-----------|
//! | APOLLOLYTICS_ENDPOINT | `endpoint` |
//! | APOLLOLYTICS_MODE | `mode` |
//! | APOLLOLYTICS_PROLIFIC_ID | `prolific_id` |

use crate::{DialogueError, Result};
use apollolytics_audio::AudioFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws/conversation";
pub const ENDPOINT_ENV: &str = "APOLLOLYTICS_ENDPOINT";
pub const MODE_ENV: &str = "APOLLOLYTICS_MODE";
pub const PROLIFIC_ID_ENV: &str = "APOLLOLYTICS_PROLIFIC_ID";

/// Persona the backend adopts for the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DialogueMode {
    /// Challenges the article's framing.
    #[default]
    Critical,
    /// Agrees with the article's framing.
    Supportive,
    Positive,
    Negative,
    Socratic,
    NegativeSocratic,
}

impl DialogueMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogueMode::Critical => "critical",
            DialogueMode::Supportive => "supportive",
            DialogueMode::Positive => "positive",
            DialogueMode::Negative => "negative",
            DialogueMode::Socratic => "socratic",
            DialogueMode::NegativeSocratic => "negative-socratic",
        }
    }
}

impl fmt::Display for DialogueMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DialogueMode {
    type Err = DialogueError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(DialogueMode::Critical),
            "supportive" => Ok(DialogueMode::Supportive),
            "positive" => Ok(DialogueMode::Positive),
            "negative" => Ok(DialogueMode::Negative),
            "socratic" => Ok(DialogueMode::Socratic),
            "negative-socratic" | "negative_socratic" => Ok(DialogueMode::NegativeSocratic),
            other => Err(DialogueError::Config(format!("unknown dialogue mode: {other}"))),
        }
    }
}

/// How the participant's turns are captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoicePreference {
    /// Microphone pipeline when a device is present, text otherwise.
    #[default]
    Auto,
    Audio,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    pub endpoint: String,
    pub mode: DialogueMode,
    pub enable_voice_recording: bool,
    pub enable_confetti_on_end: bool,
    pub voice: VoicePreference,
    /// Input device name; the host default when unset.
    pub input_device: Option<String>,
    pub capture: AudioFormat,
    /// Layout assumed for raw PCM fragments without a WAV header.
    pub playback: AudioFormat,
    pub origin_url: Option<String>,
    pub prolific_id: Option<String>,
    pub journal_path: Option<PathBuf>,
    pub journal_max_entries: usize,
    pub drain_poll_interval_ms: u64,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            mode: DialogueMode::default(),
            enable_voice_recording: true,
            enable_confetti_on_end: false,
            voice: VoicePreference::default(),
            input_device: None,
            capture: AudioFormat::default(),
            playback: AudioFormat::default(),
            origin_url: None,
            prolific_id: None,
            journal_path: None,
            journal_max_entries: 1000,
            drain_poll_interval_ms: 20,
        }
    }
}

impl DialogueConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            DialogueError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), "loaded dialogue config");
        Ok(config)
    }

    /// Apply `APOLLOLYTICS_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(endpoint) = get(ENDPOINT_ENV) {
            self.endpoint = endpoint;
        }
        if let Some(mode) = get(MODE_ENV) {
            self.mode = mode.parse()?;
        }
        if let Some(id) = get(PROLIFIC_ID_ENV) {
            self.prolific_id = Some(id);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(DialogueError::Config(format!(
                "endpoint must be a ws:// or wss:// url, got {}",
                self.endpoint
            )));
        }
        if self.capture.sample_rate == 0 || self.playback.sample_rate == 0 {
            return Err(DialogueError::Config("sample rate must be positive".into()));
        }
        if self.journal_max_entries == 0 {
            return Err(DialogueError::Config("journal_max_entries must be positive".into()));
        }
        if self.drain_poll_interval_ms == 0 {
            return Err(DialogueError::Config("drain_poll_interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Configured journal path, or `<data dir>/apollolytics/journal.json`.
    pub fn journal_path(&self) -> Option<PathBuf> {
        self.journal_path.clone().or_else(|| {
            dirs::data_local_dir().map(|d| d.join("apollolytics").join("journal.json"))
        })
    }
}
