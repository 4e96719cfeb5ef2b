//! Audio chunks delivered through a turn's queue.

use crate::{ErrorKind, TurnId};
use serde::{Deserialize, Serialize};

/// `stream_seq` value reserved for the end-of-stream sentinel.
pub const STREAM_END_SEQ: i64 = -1;

/// Encoding of synthesized audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// Raw signed 16-bit little-endian mono PCM.
    #[default]
    Pcm,
    /// PCM wrapped in a RIFF/WAVE container.
    Wav,
}

impl AudioFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pcm => "pcm",
            Self::Wav => "wav",
        }
    }
}

/// One unit of a turn's response stream.
///
/// A turn produces audio chunks numbered 1, 2, 3, … followed by exactly one
/// sentinel whose `stream_seq` is [`STREAM_END_SEQ`]. A failed turn carries
/// one error chunk (non-zero `error_code`) right before the sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub turn_id: TurnId,
    pub stream_seq: i64,
    pub audio: Vec<u8>,
    pub format: AudioFormat,
    /// Text that was spoken in this chunk, if any.
    pub text: Option<String>,
    pub error_code: u32,
    pub error_message: Option<String>,
}

impl AudioChunk {
    pub fn audio(
        turn_id: TurnId,
        stream_seq: i64,
        audio: Vec<u8>,
        format: AudioFormat,
        text: Option<String>,
    ) -> Self {
        Self {
            turn_id,
            stream_seq,
            audio,
            format,
            text,
            error_code: 0,
            error_message: None,
        }
    }

    pub fn error(turn_id: TurnId, stream_seq: i64, kind: ErrorKind, message: String) -> Self {
        Self {
            turn_id,
            stream_seq,
            audio: Vec::new(),
            format: AudioFormat::default(),
            text: None,
            error_code: kind.code(),
            error_message: Some(message),
        }
    }

    pub fn sentinel(turn_id: TurnId) -> Self {
        Self {
            turn_id,
            stream_seq: STREAM_END_SEQ,
            audio: Vec::new(),
            format: AudioFormat::default(),
            text: None,
            error_code: 0,
            error_message: None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.stream_seq == STREAM_END_SEQ
    }

    pub fn is_error(&self) -> bool {
        self.error_code != 0
    }
}
