//! Server configuration loading from file and environment variables.

use cadence_pipeline::SAFETY_APOLOGY;
use cadence_types::AudioFormat;
use cadence_voice::{CannedIntent, GenerationConfig, SttConfig, TtsConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Turn processing settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Collaborator adapters.
    #[serde(default)]
    pub voice: VoiceConfig,

    /// Canned answers.
    #[serde(default)]
    pub routing: RoutingSection,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest inbound WebSocket message accepted, in bytes. Audio and image
    /// turns arrive base64-encoded in a single message.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "cadence_pipeline=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Turn processing settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of each turn's delivery queue, in chunks.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Target length of speakable units once the first unit is out.
    #[serde(default = "default_min_sentence_length")]
    pub min_sentence_length: usize,

    #[serde(default = "default_routing_timeout_ms")]
    pub routing_timeout_ms: u64,

    /// Routing hits below this confidence fall through to generation.
    #[serde(default = "default_routing_confidence_threshold")]
    pub routing_confidence_threshold: f32,

    /// Conversations idle for longer than this are forgotten.
    #[serde(default = "default_conversation_ttl_secs")]
    pub conversation_ttl_secs: u64,

    /// How often idle conversations are swept. Zero disables the sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Messages of recent history sent along with each generation request.
    #[serde(default = "default_memory_window")]
    pub memory_window: usize,

    #[serde(default)]
    pub default_output_format: AudioFormat,

    /// Spoken instead of an answer the model refused to give.
    #[serde(default = "default_safety_apology")]
    pub safety_apology: String,
}

/// Collaborator adapter settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VoiceConfig {
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Keyword routing table and where its recorded answers live.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingSection {
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: String,
    #[serde(default)]
    pub intents: Vec<CannedIntent>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_max_message_bytes() -> usize {
    crate::DEFAULT_MAX_MESSAGE_BYTES
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_queue_capacity() -> usize {
    cadence_pipeline::queue::DEFAULT_QUEUE_CAPACITY
}

fn default_min_sentence_length() -> usize {
    cadence_pipeline::segmenter::DEFAULT_MIN_LENGTH
}

fn default_routing_timeout_ms() -> u64 {
    800
}

fn default_routing_confidence_threshold() -> f32 {
    0.85
}

fn default_conversation_ttl_secs() -> u64 {
    6 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_memory_window() -> usize {
    cadence_pipeline::memory::DEFAULT_MEMORY_WINDOW
}

fn default_safety_apology() -> String {
    SAFETY_APOLOGY.to_string()
}

fn default_artifacts_dir() -> String {
    "assets/answers".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            min_sentence_length: default_min_sentence_length(),
            routing_timeout_ms: default_routing_timeout_ms(),
            routing_confidence_threshold: default_routing_confidence_threshold(),
            conversation_ttl_secs: default_conversation_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            memory_window: default_memory_window(),
            default_output_format: AudioFormat::default(),
            safety_apology: default_safety_apology(),
        }
    }
}

impl PipelineConfig {
    pub fn routing_timeout(&self) -> Duration {
        Duration::from_millis(self.routing_timeout_ms)
    }

    pub fn conversation_ttl(&self) -> Duration {
        Duration::from_secs(self.conversation_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            artifacts_dir: default_artifacts_dir(),
            intents: Vec::new(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides (see [`apply_env_overrides`]).
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies environment variable overrides read through `lookup`.
///
/// - `CADENCE_HOST` overrides `server.host`
/// - `CADENCE_PORT` overrides `server.port`
/// - `CADENCE_LOG_LEVEL` overrides `logging.level`
/// - `CADENCE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `CADENCE_QUEUE_CAPACITY` overrides `pipeline.queue_capacity`
/// - `CADENCE_MIN_SENTENCE_LENGTH` overrides `pipeline.min_sentence_length`
/// - `CADENCE_GENERATION_URL` overrides `voice.generation.base_url`
/// - `CADENCE_GENERATION_API_KEY` overrides `voice.generation.api_key`
/// - `CADENCE_GENERATION_MODEL` overrides `voice.generation.model`
///
/// Values that fail to parse are ignored with a warning.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("CADENCE_HOST") {
        match host.parse() {
            Ok(parsed) => config.server.host = parsed,
            Err(_) => tracing::warn!(value = %host, "ignoring invalid CADENCE_HOST"),
        }
    }
    if let Some(port) = lookup("CADENCE_PORT") {
        match port.parse() {
            Ok(parsed) => config.server.port = parsed,
            Err(_) => tracing::warn!(value = %port, "ignoring invalid CADENCE_PORT"),
        }
    }
    if let Some(level) = lookup("CADENCE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("CADENCE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(capacity) = lookup("CADENCE_QUEUE_CAPACITY") {
        match capacity.parse::<usize>() {
            Ok(parsed) if parsed > 0 => config.pipeline.queue_capacity = parsed,
            _ => tracing::warn!(value = %capacity, "ignoring invalid CADENCE_QUEUE_CAPACITY"),
        }
    }
    if let Some(length) = lookup("CADENCE_MIN_SENTENCE_LENGTH") {
        match length.parse() {
            Ok(parsed) => config.pipeline.min_sentence_length = parsed,
            Err(_) => {
                tracing::warn!(value = %length, "ignoring invalid CADENCE_MIN_SENTENCE_LENGTH")
            }
        }
    }
    if let Some(url) = lookup("CADENCE_GENERATION_URL") {
        config.voice.generation.base_url = url;
    }
    if let Some(key) = lookup("CADENCE_GENERATION_API_KEY") {
        config.voice.generation.api_key = key;
    }
    if let Some(model) = lookup("CADENCE_GENERATION_MODEL") {
        config.voice.generation.model = model;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.pipeline.queue_capacity, 300);
        assert_eq!(config.pipeline.min_sentence_length, 15);
        assert_eq!(config.pipeline.routing_timeout(), Duration::from_millis(800));
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9001

[pipeline]
queue_capacity = 32
default_output_format = "wav"

[voice.generation]
base_url = "http://llm.local/v1"
model = "small"

[[routing.intents]]
category = "greeting"
phrases = ["hello", "hi there"]
answer_text = "Hello! Nice to hear you."
"#
        )
        .unwrap();

        let mut config: Config =
            toml::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        apply_env_overrides(&mut config, no_env);

        assert_eq!(config.server.port, 9001);
        assert_eq!(config.pipeline.queue_capacity, 32);
        assert_eq!(config.pipeline.default_output_format, AudioFormat::Wav);
        assert_eq!(config.pipeline.memory_window, 12);
        assert_eq!(config.voice.generation.base_url, "http://llm.local/v1");
        assert_eq!(config.voice.generation.model, "small");
        assert_eq!(config.routing.intents.len(), 1);
        assert_eq!(config.routing.intents[0].phrases, vec!["hello", "hi there"]);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        let err = load_config(file.path().to_str()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("CADENCE_HOST", "0.0.0.0"),
            ("CADENCE_PORT", "8088"),
            ("CADENCE_LOG_LEVEL", "debug"),
            ("CADENCE_LOG_JSON", "1"),
            ("CADENCE_QUEUE_CAPACITY", "64"),
            ("CADENCE_MIN_SENTENCE_LENGTH", "20"),
            ("CADENCE_GENERATION_URL", "https://api.example.test/v1"),
            ("CADENCE_GENERATION_API_KEY", "sk-test"),
            ("CADENCE_GENERATION_MODEL", "large"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.pipeline.queue_capacity, 64);
        assert_eq!(config.pipeline.min_sentence_length, 20);
        assert_eq!(config.voice.generation.base_url, "https://api.example.test/v1");
        assert_eq!(config.voice.generation.api_key, "sk-test");
        assert_eq!(config.voice.generation.model, "large");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| match key {
            "CADENCE_PORT" => Some("not-a-port".to_string()),
            "CADENCE_QUEUE_CAPACITY" => Some("0".to_string()),
            _ => None,
        });
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.pipeline.queue_capacity, 300);
    }
}
