use cadence_types::voice::VoiceProfile;
use cadence_types::AudioFormat;
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_stt_binary() -> String {
    "whisper-cli".to_string()
}

fn default_stt_model() -> String {
    "models/ggml-base.bin".to_string()
}

fn default_tts_binary() -> String {
    "piper".to_string()
}

fn default_voices_dir() -> String {
    "assets/voices".to_string()
}

fn default_generation_url() -> String {
    "http://127.0.0.1:8080/v1".to_string()
}

fn default_generation_model() -> String {
    "default".to_string()
}

fn default_system_prompt() -> String {
    "You are a warm, concise voice companion. Answer in short spoken sentences without markdown."
        .to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// Speech-to-text adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// whisper.cpp-compatible binary that reads audio on stdin.
    #[serde(default = "default_stt_binary")]
    pub binary_path: String,
    #[serde(default = "default_stt_model")]
    pub model_path: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            binary_path: default_stt_binary(),
            model_path: default_stt_model(),
        }
    }
}

/// Text-to-speech adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// piper-compatible binary that reads text on stdin and writes raw PCM.
    #[serde(default = "default_tts_binary")]
    pub binary_path: String,
    #[serde(default = "default_voices_dir")]
    pub voices_dir: String,
    #[serde(default)]
    pub profile: VoiceProfile,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            binary_path: default_tts_binary(),
            voices_dir: default_voices_dir(),
            profile: VoiceProfile::default(),
        }
    }
}

/// OpenAI-compatible streaming chat completions endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Base URL up to and including the version segment, e.g. `https://host/v1`.
    #[serde(default = "default_generation_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Per-request deadline; long answers keep streaming as long as the
    /// whole response finishes within it.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_generation_url(),
            api_key: String::new(),
            model: default_generation_model(),
            system_prompt: default_system_prompt(),
            request_timeout_secs: default_request_timeout_secs(),
            temperature: None,
            max_tokens: None,
        }
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// One canned intent: trigger phrases and what to answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CannedIntent {
    pub category: String,
    pub phrases: Vec<String>,
    /// Text answer, synthesized like any generated sentence.
    #[serde(default)]
    pub answer_text: Option<String>,
    /// Pre-recorded answer, streamed without synthesis. Takes precedence
    /// over `answer_text` when both are set.
    #[serde(default)]
    pub audio_path: Option<String>,
    #[serde(default)]
    pub audio_format: AudioFormat,
}

/// Keyword routing table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub intents: Vec<CannedIntent>,
}
