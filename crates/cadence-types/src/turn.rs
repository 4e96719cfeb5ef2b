//! The unit of work accepted from a client.

use crate::{AudioFormat, ConversationId, Modality, TurnId};
use chrono::{DateTime, Utc};

/// Decoded input of a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnPayload {
    Audio(Vec<u8>),
    Image {
        bytes: Vec<u8>,
        mime: String,
        /// Optional question that accompanies the image.
        prompt: Option<String>,
    },
    Text(String),
}

impl TurnPayload {
    /// Whether the payload carries nothing to work with.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Audio(bytes) => bytes.is_empty(),
            Self::Image { bytes, .. } => bytes.is_empty(),
            Self::Text(text) => text.trim().is_empty(),
        }
    }
}

/// One user input and everything needed to answer it.
///
/// Immutable once constructed; shared by reference between the
/// orchestrator and the delivery side.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub conversation_id: ConversationId,
    pub turn_id: TurnId,
    pub payload: TurnPayload,
    /// Desired output encoding; `None` uses the server default.
    pub output_format: Option<AudioFormat>,
    pub received_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(
        conversation_id: impl Into<ConversationId>,
        turn_id: impl Into<TurnId>,
        payload: TurnPayload,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            turn_id: turn_id.into(),
            payload,
            output_format: None,
            received_at: Utc::now(),
        }
    }

    pub fn text(
        conversation_id: impl Into<ConversationId>,
        turn_id: impl Into<TurnId>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(conversation_id, turn_id, TurnPayload::Text(text.into()))
    }

    pub fn with_output_format(mut self, format: AudioFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn modality(&self) -> Modality {
        match self.payload {
            TurnPayload::Audio(_) => Modality::Audio,
            TurnPayload::Image { .. } => Modality::Image,
            TurnPayload::Text(_) => Modality::Text,
        }
    }
}
