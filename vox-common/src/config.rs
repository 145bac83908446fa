//! Configuration management for the Vox services.
//!
//! Configuration lives in a single file at `~/.vox/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Explicit config file values
//! 2. Environment variables (VOX_* prefix, plus vendor API key variables)
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `VOX_PORT` → server.port
//! - `VOX_BIND_ADDRESS` → server.bind
//! - `VOX_LOG_LEVEL` → logging.level
//! - `VOX_LOG_FORMAT` → logging.format
//! - `VOX_LLM_PROVIDER` → llm.provider
//! - `VOX_LLM_MODEL` → llm.model
//! - `DEEPGRAM_API_KEY` → secrets.deepgram
//! - `ANTHROPIC_API_KEY` / `OPENAI_API_KEY` / `GROQ_API_KEY` / `XAI_API_KEY`
//!   (or `GROK_API_KEY`) → secrets.llm.*

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".vox"),
        |dirs| dirs.home_dir().join(".vox"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Server Configuration
// ============================================================================

/// Listen address for the voice gateway.
///
/// Default bind is `127.0.0.1` (local only). Set to `0.0.0.0` to allow
/// remote clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the WebSocket/HTTP listener.
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

const fn default_port() -> u16 {
    8080
}

// ============================================================================
// LLM Configuration
// ============================================================================

/// Language model provider selection and sampling options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "grok", "groq", "openai", or "anthropic".
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// Model identifier. When absent, the provider default applies.
    #[serde(default)]
    pub model: Option<String>,

    /// Base URL override for OpenAI-compatible providers.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Sampling temperature for conversational turns.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Response token cap. Kept small so answers stay speakable.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl LlmConfig {
    /// Model identifier with the per-provider default applied.
    pub fn effective_model(&self) -> String {
        if let Some(ref model) = self.model {
            return model.clone();
        }
        match self.provider.as_str() {
            "groq" => "llama-3.3-70b-versatile",
            "openai" => "gpt-4o",
            "anthropic" => "claude-sonnet-4-20250514",
            _ => "grok-3",
        }
        .to_string()
    }

    /// Base URL with the per-provider default applied.
    pub fn effective_base_url(&self) -> String {
        if let Some(ref url) = self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.provider.as_str() {
            "groq" => "https://api.groq.com/openai/v1",
            "openai" => "https://api.openai.com/v1",
            "anthropic" => "https://api.anthropic.com",
            _ => "https://api.x.ai/v1",
        }
        .to_string()
    }
}

fn default_llm_provider() -> String {
    "grok".into()
}

const fn default_temperature() -> f32 {
    0.7
}

const fn default_max_tokens() -> u32 {
    300
}

// ============================================================================
// Speech Configuration
// ============================================================================

/// Speech recognition and synthesis settings.
///
/// Audio is raw PCM end to end: linear16 at 16 kHz from the client, linear16
/// at 24 kHz back out. No transcoding happens in this service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Speech-to-text provider name.
    #[serde(default = "default_speech_provider")]
    pub stt_provider: String,

    /// Streaming recognition model.
    #[serde(default = "default_stt_model")]
    pub stt_model: String,

    /// Inbound audio encoding.
    #[serde(default = "default_encoding")]
    pub input_encoding: String,

    /// Inbound audio sample rate in Hz.
    #[serde(default = "default_input_sample_rate")]
    pub input_sample_rate: u32,

    /// Text-to-speech provider name.
    #[serde(default = "default_speech_provider")]
    pub tts_provider: String,

    /// Synthesis voice model.
    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,

    /// Outbound audio encoding.
    #[serde(default = "default_encoding")]
    pub output_encoding: String,

    /// Outbound audio sample rate in Hz.
    #[serde(default = "default_output_sample_rate")]
    pub output_sample_rate: u32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            stt_provider: default_speech_provider(),
            stt_model: default_stt_model(),
            input_encoding: default_encoding(),
            input_sample_rate: default_input_sample_rate(),
            tts_provider: default_speech_provider(),
            tts_voice: default_tts_voice(),
            output_encoding: default_encoding(),
            output_sample_rate: default_output_sample_rate(),
        }
    }
}

fn default_speech_provider() -> String {
    "deepgram".into()
}

fn default_stt_model() -> String {
    "nova-2".into()
}

fn default_tts_voice() -> String {
    "aura-asteria-en".into()
}

fn default_encoding() -> String {
    "linear16".into()
}

const fn default_input_sample_rate() -> u32 {
    16_000
}

const fn default_output_sample_rate() -> u32 {
    24_000
}

// ============================================================================
// Memory Configuration
// ============================================================================

/// Conversation history bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum retained messages in sliding-window mode.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Compact with LLM summarization instead of plain truncation.
    #[serde(default)]
    pub use_summarization: bool,

    /// Message count that triggers summarization.
    #[serde(default = "default_summarize_after")]
    pub summarize_after: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            use_summarization: false,
            summarize_after: default_summarize_after(),
        }
    }
}

const fn default_max_messages() -> usize {
    20
}

const fn default_summarize_after() -> usize {
    15
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Secrets
// ============================================================================

/// API keys, normally supplied via environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Deepgram API key (STT and TTS).
    #[serde(default)]
    pub deepgram: Option<String>,

    /// Per-provider LLM API keys.
    #[serde(default)]
    pub llm: LlmSecretsConfig,
}

/// LLM API keys per provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmSecretsConfig {
    #[serde(default)]
    pub anthropic: Option<String>,
    #[serde(default)]
    pub openai: Option<String>,
    #[serde(default)]
    pub groq: Option<String>,
    #[serde(default)]
    pub xai: Option<String>,
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration for the Vox services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoxConfig {
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Language model settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Speech recognition/synthesis settings
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Conversation memory bounds
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// API keys
    #[serde(default)]
    pub secrets: SecretsConfig,
}

impl VoxConfig {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable fallbacks.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("VOX_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        if let Ok(bind) = std::env::var("VOX_BIND_ADDRESS") {
            self.server.bind = bind;
        }

        if let Ok(level) = std::env::var("VOX_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = std::env::var("VOX_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(provider) = std::env::var("VOX_LLM_PROVIDER") {
            self.llm.provider = provider;
        }

        if let Ok(model) = std::env::var("VOX_LLM_MODEL") {
            self.llm.model = Some(model);
        }

        if let Ok(key) = std::env::var("DEEPGRAM_API_KEY") {
            self.secrets.deepgram = Some(key);
        }

        self.apply_llm_env_fallbacks();
    }

    /// Apply LLM API key environment variable fallbacks.
    fn apply_llm_env_fallbacks(&mut self) {
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            self.secrets.llm.anthropic = Some(key);
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.secrets.llm.openai = Some(key);
        }
        if let Ok(key) = std::env::var("GROQ_API_KEY") {
            self.secrets.llm.groq = Some(key);
        }
        if let Ok(key) = std::env::var("XAI_API_KEY").or_else(|_| std::env::var("GROK_API_KEY")) {
            self.secrets.llm.xai = Some(key);
        }
    }

    /// API key for the configured LLM provider, if any.
    pub fn llm_api_key(&self) -> Option<&str> {
        match self.llm.provider.as_str() {
            "anthropic" => self.secrets.llm.anthropic.as_deref(),
            "openai" => self.secrets.llm.openai.as_deref(),
            "groq" => self.secrets.llm.groq.as_deref(),
            _ => self.secrets.llm.xai.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = VoxConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.llm.provider, "grok");
        assert_eq!(config.llm.max_tokens, 300);
        assert_eq!(config.speech.stt_model, "nova-2");
        assert_eq!(config.speech.input_sample_rate, 16_000);
        assert_eq!(config.speech.output_sample_rate, 24_000);
        assert_eq!(config.memory.max_messages, 20);
        assert!(!config.memory.use_summarization);
        assert_eq!(config.memory.summarize_after, 15);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_effective_model_per_provider() {
        let mut llm = LlmConfig::default();
        assert_eq!(llm.effective_model(), "grok-3");

        llm.provider = "groq".into();
        assert_eq!(llm.effective_model(), "llama-3.3-70b-versatile");

        llm.provider = "openai".into();
        assert_eq!(llm.effective_model(), "gpt-4o");

        llm.provider = "anthropic".into();
        assert_eq!(llm.effective_model(), "claude-sonnet-4-20250514");

        llm.model = Some("my-tuned-model".into());
        assert_eq!(llm.effective_model(), "my-tuned-model");
    }

    #[test]
    fn test_effective_base_url() {
        let mut llm = LlmConfig::default();
        assert_eq!(llm.effective_base_url(), "https://api.x.ai/v1");

        llm.provider = "groq".into();
        assert_eq!(llm.effective_base_url(), "https://api.groq.com/openai/v1");

        llm.base_url = Some("http://localhost:9999/v1/".into());
        assert_eq!(llm.effective_base_url(), "http://localhost:9999/v1");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"server": {{"port": 9090}}, "memory": {{"use_summarization": true}}}}"#
        )
        .unwrap();

        let config = VoxConfig::load_from(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert!(config.memory.use_summarization);
        assert_eq!(config.memory.summarize_after, 15);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        assert!(VoxConfig::load_from(&file.path().to_path_buf()).is_err());
    }

    #[test]
    fn test_llm_api_key_selection() {
        let mut config = VoxConfig::default();
        config.secrets.llm.xai = Some("xai-key".into());
        config.secrets.llm.groq = Some("groq-key".into());

        assert_eq!(config.llm_api_key(), Some("xai-key"));
        config.llm.provider = "groq".into();
        assert_eq!(config.llm_api_key(), Some("groq-key"));
        config.llm.provider = "anthropic".into();
        assert_eq!(config.llm_api_key(), None);
    }
}
