//! Daemon configuration.
//!
//! Loaded from `$XDG_CONFIG_HOME/hyprvoice/config.toml`. Every field has a
//! default so a missing file or a partial file always yields a usable
//! configuration; `validate()` clamps numeric ranges and reports the
//! misconfigurations that must fail startup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::providers;

/// Application name used for XDG directory scoping.
pub const APP_NAME: &str = "hyprvoice";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot determine config directory")]
    NoConfigDir,

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Configuration error: {0}")]
    Invalid(String),
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recording: RecordingConfig,
    pub transcription: TranscriptionConfig,
    pub llm: LlmSection,
    pub injection: InjectionConfig,
    pub daemon: DaemonConfig,
}

/// Audio capture settings for the `pw-record` subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Capture tool invoked for raw PCM on stdout.
    pub tool: String,
    /// Optional PipeWire target device (`--target`).
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Bytes read per frame from the capture subprocess.
    pub buffer_size: usize,
    /// Sample format string passed to the capture tool (`s16` = PCM 16-bit LE).
    pub format: String,
    /// Capacity of the recorder → transcriber frame queue.
    pub queue_capacity: usize,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            tool: "pw-record".to_string(),
            device: None,
            sample_rate: 16_000,
            channels: 1,
            // 100 ms of 16 kHz mono s16 audio per frame.
            buffer_size: 3200,
            format: "s16".to_string(),
            queue_capacity: 32,
        }
    }
}

/// Transcription backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub provider: String,
    pub model: String,
    /// BCP-47 language code; empty means auto-detect.
    pub language: String,
    /// API key; falls back to the provider's environment variable when empty.
    pub api_key: String,
    /// Bias keywords forwarded to providers that support prompting.
    pub keywords: Vec<String>,
    /// Prefer the live WebSocket path when the model supports it.
    pub streaming: bool,
    /// Thread count for local whisper inference.
    pub cpu_threads: Option<u16>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "whisper-1".to_string(),
            language: String::new(),
            api_key: String::new(),
            keywords: Vec::new(),
            streaming: false,
            cpu_threads: None,
        }
    }
}

impl TranscriptionConfig {
    /// Resolve the API key, falling back to the provider's conventional
    /// environment variable when the config omits it.
    pub fn resolve_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }
        let base = providers::base_provider_name(&self.provider);
        providers::env_var_for_provider(base)
            .and_then(|var| std::env::var(var).ok())
            .unwrap_or_default()
    }
}

/// Optional LLM rewrite stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub enabled: bool,
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub remove_stutters: bool,
    pub add_punctuation: bool,
    pub fix_grammar: bool,
    pub remove_filler_words: bool,
    pub custom_prompt: Option<String>,
    pub keywords: Vec<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "openai".to_string(),
            model: String::new(),
            api_key: String::new(),
            remove_stutters: true,
            add_punctuation: true,
            fix_grammar: false,
            remove_filler_words: true,
            custom_prompt: None,
            keywords: Vec::new(),
        }
    }
}

impl LlmSection {
    pub fn resolve_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }
        let base = providers::base_provider_name(&self.provider);
        providers::env_var_for_provider(base)
            .and_then(|var| std::env::var(var).ok())
            .unwrap_or_default()
    }
}

/// Text injection backends, tried in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionConfig {
    pub backends: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            backends: vec![
                "ydotool".to_string(),
                "wtype".to_string(),
                "clipboard".to_string(),
            ],
            timeout_ms: 5000,
        }
    }
}

impl InjectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Daemon-level knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Hard cap on a single session; the pipeline returns to idle when hit.
    pub max_session_secs: u64,
    /// Send desktop notifications for pipeline errors.
    pub notifications: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            max_session_secs: 300,
            notifications: true,
        }
    }
}

impl DaemonConfig {
    pub fn max_session(&self) -> Duration {
        Duration::from_secs(self.max_session_secs)
    }
}

/// Path of the configuration file.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(dir.join(APP_NAME).join("config.toml"))
}

/// Load the configuration, treating a missing file as defaults.
pub fn load() -> Result<Config, ConfigError> {
    let path = config_path()?;
    load_from(&path)
}

pub fn load_from(path: &std::path::Path) -> Result<Config, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        Err(e) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let mut config: Config = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Clamp numeric fields to safe ranges and reject configurations the
    /// daemon cannot start with. Construction-time failures never reach the
    /// pipeline error channel.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.recording.sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "recording.sample_rate must be positive".to_string(),
            ));
        }
        if self.recording.channels == 0 {
            return Err(ConfigError::Invalid(
                "recording.channels must be positive".to_string(),
            ));
        }
        if self.recording.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "recording.buffer_size must be positive".to_string(),
            ));
        }
        if self.recording.format.is_empty() {
            return Err(ConfigError::Invalid(
                "recording.format must not be empty".to_string(),
            ));
        }
        if self.transcription.provider.is_empty() {
            return Err(ConfigError::Invalid(
                "transcription.provider must not be empty".to_string(),
            ));
        }

        self.recording.queue_capacity = self.recording.queue_capacity.clamp(1, 1024);
        self.daemon.max_session_secs = self.daemon.max_session_secs.clamp(5, 3600);
        self.injection.timeout_ms = self.injection.timeout_ms.clamp(100, 60_000);
        if self.injection.backends.is_empty() {
            self.injection.backends = InjectionConfig::default().backends;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.recording.sample_rate, 16_000);
        assert_eq!(config.recording.buffer_size, 3200);
        assert_eq!(config.daemon.max_session_secs, 300);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let raw = r#"
            [transcription]
            provider = "deepgram"
            model = "nova-2"
            streaming = true
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.transcription.provider, "deepgram");
        assert!(config.transcription.streaming);
        assert_eq!(config.recording.tool, "pw-record");
        assert_eq!(config.injection.backends.len(), 3);
    }

    #[test]
    fn test_validate_rejects_zero_sample_rate() {
        let mut config = Config::default();
        config.recording.sample_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_clamps_ranges() {
        let mut config = Config::default();
        config.daemon.max_session_secs = 999_999;
        config.injection.timeout_ms = 1;
        config.validate().unwrap();
        assert_eq!(config.daemon.max_session_secs, 3600);
        assert_eq!(config.injection.timeout_ms, 100);
    }

    #[test]
    fn test_load_from_missing_file_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.transcription.provider, "openai");
    }

    #[test]
    fn test_load_from_bad_toml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not [valid").unwrap();
        assert!(matches!(load_from(&path), Err(ConfigError::Parse { .. })));
    }
}
