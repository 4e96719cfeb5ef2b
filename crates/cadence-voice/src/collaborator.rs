//! Contracts the conversation pipeline consumes.
//!
//! The orchestrator only talks to these traits. The adapters in this crate
//! implement them against local binaries and an OpenAI-compatible HTTP
//! endpoint; tests implement them with in-memory fakes.

use crate::error::VoiceError;
use async_trait::async_trait;
use cadence_types::AudioFormat;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result of transcribing one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    /// Engine confidence in `[0, 1]`, when the engine reports one.
    pub confidence: Option<f32>,
    /// Wall-clock processing cost.
    pub cost: Duration,
}

/// Pre-answered intent.
#[derive(Debug, Clone, PartialEq)]
pub enum CannedAnswer {
    /// Answer text that still needs to be synthesized.
    Text(String),
    /// A pre-recorded audio artifact streamed as-is.
    Audio { bytes: Vec<u8>, format: AudioFormat },
}

/// A routing hit.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    pub category: String,
    pub answer: CannedAnswer,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Content of one chat message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    /// An image (raw bytes) with an optional accompanying question.
    Image {
        bytes: Vec<u8>,
        mime: String,
        prompt: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }
}

/// One item of a generation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    /// Incremental answer text.
    Delta(String),
    /// Explicit end of the answer.
    End,
}

/// Lazily produced answer text.
pub type GenerationStream = BoxStream<'static, Result<GenerationEvent, VoiceError>>;

/// Synthesized speech for one sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub audio: Vec<u8>,
    pub format: AudioFormat,
    pub sample_rate_hz: u32,
    pub cost: Duration,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: &[u8],
        format: AudioFormat,
    ) -> Result<Transcription, VoiceError>;
}

#[async_trait]
pub trait IntentRouter: Send + Sync {
    /// Looks the user's text up against known intents. `Ok(None)` means no
    /// match; callers bound the call with their own timeout.
    async fn route(&self, text: &str) -> Result<Option<RouteMatch>, VoiceError>;
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Opens a token stream for the given conversation window.
    ///
    /// A safety refusal is reported as [`VoiceError::ContentBlocked`],
    /// either from this call or as an item of the stream.
    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<GenerationStream, VoiceError>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        format: AudioFormat,
    ) -> Result<SynthesizedAudio, VoiceError>;
}
