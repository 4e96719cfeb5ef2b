//! JSON envelopes exchanged over the client connection.
//!
//! Requests carry one turn (or a cancel) per message; responses stream one
//! envelope per audio chunk, the last one with `stream_seq = -1`.

use crate::{
    AudioChunk, AudioFormat, ConversationId, ErrorKind, Modality, Turn, TurnId, TurnPayload,
};
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol version spoken by this server.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Wire code for a cancel request that named no live turn.
pub const CODE_NOT_FOUND: u32 = 4040;

/// Requested operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Start a new turn.
    Chat,
    /// Cancel the turn named by `turn_id`.
    Cancel,
}

/// Inbound message.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestEnvelope {
    #[serde(default)]
    pub version: Option<String>,
    pub method: Method,
    pub conversation_id: ConversationId,
    pub turn_id: TurnId,
    /// Client-side send time (milliseconds since the epoch); informational.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub data: Option<RequestData>,
}

/// Turn content of a `chat` request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestData {
    pub modality: Modality,
    /// UTF-8 text for `text`, base64 for `audio` and `image`.
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub audio_format: Option<AudioFormat>,
    /// MIME type of an image payload.
    #[serde(default)]
    pub mime: Option<String>,
    /// Prompt accompanying an image payload.
    #[serde(default)]
    pub text: Option<String>,
}

/// Reasons a request envelope cannot become a turn.
#[derive(Debug, Error, PartialEq)]
pub enum EnvelopeError {
    #[error("chat request is missing `data`")]
    MissingData,

    #[error("payload is not valid base64: {0}")]
    InvalidBase64(String),

    #[error("request is not a chat request")]
    NotChat,
}

impl EnvelopeError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidRequest
    }
}

impl RequestEnvelope {
    /// Decodes a `chat` request into a [`Turn`].
    ///
    /// Empty payloads are accepted here; the orchestrator reports them as
    /// `EMPTY_INPUT` through the normal error path so the client still gets
    /// a sentinel-terminated stream for the turn.
    pub fn into_turn(self) -> Result<Turn, EnvelopeError> {
        if self.method != Method::Chat {
            return Err(EnvelopeError::NotChat);
        }
        let data = self.data.ok_or(EnvelopeError::MissingData)?;
        let payload = match data.modality {
            Modality::Text => TurnPayload::Text(data.payload),
            Modality::Audio => TurnPayload::Audio(decode_base64(&data.payload)?),
            Modality::Image => TurnPayload::Image {
                bytes: decode_base64(&data.payload)?,
                mime: data.mime.unwrap_or_else(|| "image/jpeg".to_string()),
                prompt: data.text.filter(|t| !t.trim().is_empty()),
            },
        };
        Ok(Turn {
            conversation_id: self.conversation_id,
            turn_id: self.turn_id,
            payload,
            output_format: data.audio_format,
            received_at: Utc::now(),
        })
    }
}

fn decode_base64(s: &str) -> Result<Vec<u8>, EnvelopeError> {
    base64::engine::general_purpose::STANDARD
        .decode(s.trim())
        .map_err(|e| EnvelopeError::InvalidBase64(e.to_string()))
}

/// Outbound message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    pub conversation_id: ConversationId,
    pub turn_id: TurnId,
    pub code: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<ResponseData>,
}

/// Audio payload of a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseData {
    pub audio_format: AudioFormat,
    /// Base64 audio; absent on the sentinel and on error frames.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub audio_data: Option<String>,
    pub stream_seq: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub text: Option<String>,
}

impl ResponseEnvelope {
    /// Builds the wire form of one queued chunk.
    pub fn from_chunk(conversation_id: &ConversationId, chunk: &AudioChunk) -> Self {
        let audio_data = (!chunk.audio.is_empty())
            .then(|| base64::engine::general_purpose::STANDARD.encode(&chunk.audio));
        Self {
            conversation_id: conversation_id.clone(),
            turn_id: chunk.turn_id.clone(),
            code: chunk.error_code,
            message: chunk.error_message.clone(),
            data: Some(ResponseData {
                audio_format: chunk.format,
                audio_data,
                stream_seq: chunk.stream_seq,
                text: chunk.text.clone(),
            }),
        }
    }

    /// A bare status frame (cancel acknowledgements, invalid requests).
    pub fn status(
        conversation_id: ConversationId,
        turn_id: TurnId,
        code: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            turn_id,
            code,
            message: Some(message.into()),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_request_becomes_text_turn() {
        let raw = json!({
            "version": "1.0",
            "method": "chat",
            "conversation_id": "conv-1",
            "turn_id": "1700000000000",
            "timestamp": 1700000000000_i64,
            "data": { "modality": "text", "payload": "hello there", "audio_format": "wav" }
        });
        let envelope: RequestEnvelope = serde_json::from_value(raw).unwrap();
        let turn = envelope.into_turn().unwrap();
        assert_eq!(turn.conversation_id.as_str(), "conv-1");
        assert_eq!(turn.modality(), Modality::Text);
        assert_eq!(turn.payload, TurnPayload::Text("hello there".into()));
        assert_eq!(turn.output_format, Some(AudioFormat::Wav));
    }

    #[test]
    fn audio_request_decodes_base64() {
        let raw = json!({
            "method": "chat",
            "conversation_id": "c",
            "turn_id": "1",
            "data": { "modality": "audio", "payload": "AAEC" }
        });
        let envelope: RequestEnvelope = serde_json::from_value(raw).unwrap();
        let turn = envelope.into_turn().unwrap();
        assert_eq!(turn.payload, TurnPayload::Audio(vec![0, 1, 2]));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let raw = json!({
            "method": "chat",
            "conversation_id": "c",
            "turn_id": "1",
            "data": { "modality": "image", "payload": "not base64!!" }
        });
        let envelope: RequestEnvelope = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            envelope.into_turn(),
            Err(EnvelopeError::InvalidBase64(_))
        ));
    }

    #[test]
    fn chat_without_data_is_rejected() {
        let raw = json!({ "method": "chat", "conversation_id": "c", "turn_id": "1" });
        let envelope: RequestEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.into_turn(), Err(EnvelopeError::MissingData));
    }

    #[test]
    fn sentinel_frame_has_no_audio_data() {
        let chunk = AudioChunk::sentinel(TurnId::from(7));
        let env = ResponseEnvelope::from_chunk(&ConversationId::from("c"), &chunk);
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["data"]["stream_seq"], -1);
        assert!(value["data"].get("audio_data").is_none());
        assert_eq!(value["code"], 0);
    }

    #[test]
    fn audio_frame_is_base64_encoded() {
        let chunk = AudioChunk::audio(
            TurnId::from(7),
            1,
            vec![0, 1, 2],
            AudioFormat::Pcm,
            Some("Hi.".into()),
        );
        let env = ResponseEnvelope::from_chunk(&ConversationId::from("c"), &chunk);
        let data = env.data.unwrap();
        assert_eq!(data.audio_data.as_deref(), Some("AAEC"));
        assert_eq!(data.stream_seq, 1);
        assert_eq!(data.text.as_deref(), Some("Hi."));
    }
}
