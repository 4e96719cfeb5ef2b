//! Shared types, error kinds, and wire envelopes for the Cadence pipeline.
//!
//! Every crate in the workspace takes its cross-cutting definitions from
//! here: conversation and turn identifiers, input modalities, the audio
//! chunk that flows through a turn's delivery queue, and the stable error
//! codes the client sees. Keeping them in one leaf crate keeps the
//! dependency graph acyclic.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

mod chunk;
pub mod envelope;
mod turn;
pub mod voice;

pub use chunk::{AudioChunk, AudioFormat, STREAM_END_SEQ};
pub use turn::{Turn, TurnPayload};

/// Identifier of a conversation (one device session, many turns).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a single turn within a conversation.
///
/// Turn ids are issued by the client and are expected to be time-ordered.
/// Ordering is aware of the two formats seen in practice: when both ids
/// are plain decimal numbers (millisecond timestamps, counters) they are
/// compared numerically; anything else (UUIDv7, ULID, padded timestamps)
/// is compared lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(String);

impl TurnId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_numeric(&self) -> bool {
        !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_digit())
    }
}

impl Ord for TurnId {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.is_numeric() && other.is_numeric() {
            let a = self.0.trim_start_matches('0');
            let b = other.0.trim_start_matches('0');
            a.len()
                .cmp(&b.len())
                .then_with(|| a.cmp(b))
                .then_with(|| self.0.cmp(&other.0))
        } else {
            self.0.cmp(&other.0)
        }
    }
}

impl PartialOrd for TurnId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TurnId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for TurnId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

/// Input modality of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Recorded user speech.
    Audio,
    /// A camera frame, optionally with a spoken or typed prompt.
    Image,
    /// Typed text.
    Text,
}

impl Modality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Text => "text",
        }
    }
}

/// Error taxonomy of a turn.
///
/// Each kind maps to a stable wire code. Kinds that are recovered or
/// swallowed inside the pipeline (`RoutingTimeout`, `ContentSafetyBlocked`,
/// `Cancelled`, `Superseded`) still have a kind so they can be logged
/// consistently, but they never reach the client as an error frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidRequest,
    EmptyInput,
    NoSpeechDetected,
    TranscriptionFailed,
    RoutingTimeout,
    GenerationFailed,
    ContentSafetyBlocked,
    SynthesisFailed,
    Cancelled,
    Superseded,
}

impl ErrorKind {
    /// Wire code carried in the response envelope. Zero means "no error".
    pub fn code(self) -> u32 {
        match self {
            Self::InvalidRequest => 4000,
            Self::EmptyInput => 4001,
            Self::NoSpeechDetected => 4002,
            Self::ContentSafetyBlocked => 4510,
            Self::TranscriptionFailed => 5001,
            Self::RoutingTimeout => 5002,
            Self::GenerationFailed => 5003,
            Self::SynthesisFailed => 5004,
            Self::Cancelled | Self::Superseded => 0,
        }
    }

    /// Whether this kind is ever delivered to the client as an error frame.
    pub fn is_surfaced(self) -> bool {
        !matches!(
            self,
            Self::RoutingTimeout | Self::ContentSafetyBlocked | Self::Cancelled | Self::Superseded
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::EmptyInput => "EMPTY_INPUT",
            Self::NoSpeechDetected => "NO_SPEECH_DETECTED",
            Self::TranscriptionFailed => "TRANSCRIPTION_FAILED",
            Self::RoutingTimeout => "ROUTING_TIMEOUT",
            Self::GenerationFailed => "GENERATION_FAILED",
            Self::ContentSafetyBlocked => "CONTENT_SAFETY_BLOCKED",
            Self::SynthesisFailed => "SYNTHESIS_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Superseded => "SUPERSEDED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_turn_ids_compare_by_value() {
        assert!(TurnId::from(100) < TurnId::from(101));
        assert!(TurnId::from(99) < TurnId::from(100));
        assert!(TurnId::new("1700000000999") < TurnId::new("1700000001000"));
        assert!(TurnId::new("0099") < TurnId::new("100"));
    }

    #[test]
    fn non_numeric_turn_ids_compare_lexicographically() {
        let a = TurnId::new("01HZX3K9Q0AAAA");
        let b = TurnId::new("01HZX3K9Q0AAAB");
        assert!(a < b);
        assert!(TurnId::new("msg-2") > TurnId::new("msg-10"));
    }

    #[test]
    fn equal_turn_ids_are_equal_in_ordering() {
        assert_eq!(TurnId::from(42).cmp(&TurnId::new("42")), Ordering::Equal);
    }

    #[test]
    fn surfaced_kinds_have_nonzero_codes() {
        for kind in [
            ErrorKind::InvalidRequest,
            ErrorKind::EmptyInput,
            ErrorKind::NoSpeechDetected,
            ErrorKind::TranscriptionFailed,
            ErrorKind::GenerationFailed,
            ErrorKind::SynthesisFailed,
        ] {
            assert!(kind.is_surfaced());
            assert_ne!(kind.code(), 0);
        }
        assert!(!ErrorKind::Superseded.is_surfaced());
        assert!(!ErrorKind::ContentSafetyBlocked.is_surfaced());
        assert_eq!(ErrorKind::Cancelled.code(), 0);
    }

    #[test]
    fn modality_serializes_snake_case() {
        let json = serde_json::to_string(&Modality::Audio).unwrap();
        assert_eq!(json, "\"audio\"");
        let parsed: Modality = serde_json::from_str("\"image\"").unwrap();
        assert_eq!(parsed, Modality::Image);
    }
}
