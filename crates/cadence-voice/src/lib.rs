//! Voice collaborators for the Cadence pipeline.
//!
//! Defines the four contracts the conversation orchestrator depends on
//! (transcription, intent routing, answer generation, speech synthesis)
//! and ships one adapter for each: a whisper.cpp-style subprocess, a
//! keyword table, an OpenAI-compatible streaming endpoint, and a
//! piper/espeak-ng subprocess.
//!
//! The orchestrator never sees the adapters, only the traits, so vendor
//! clients can be swapped without touching the pipeline.

pub mod collaborator;
pub mod config;
pub mod engine;
pub mod error;
pub mod generation;
pub mod router;
pub mod sse;
pub mod stt;
pub mod tts;
pub mod wav;

pub use collaborator::{
    CannedAnswer, ChatMessage, ChatRole, GenerationEvent, GenerationStream, Generator,
    IntentRouter, MessageContent, RouteMatch, SynthesizedAudio, Synthesizer, Transcriber,
    Transcription,
};
pub use config::{CannedIntent, GenerationConfig, RoutingConfig, SttConfig, TtsConfig};
pub use error::VoiceError;
pub use generation::HttpGenerator;
pub use router::KeywordRouter;
pub use stt::SttService;
pub use tts::TtsService;
