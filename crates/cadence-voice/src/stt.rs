//! Speech recognition through a whisper.cpp-compatible binary.

use crate::collaborator::{Transcriber, Transcription};
use crate::engine;
use crate::error::VoiceError;
use crate::wav;
use async_trait::async_trait;
use cadence_types::AudioFormat;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Largest utterance accepted, in bytes.
const MAX_UTTERANCE_BYTES: usize = 10 * 1024 * 1024;

/// Per-utterance engine deadline.
const UTTERANCE_TIMEOUT: Duration = Duration::from_secs(60);

/// Sample rate assumed for raw PCM uploads (what whisper models expect).
const INPUT_SAMPLE_RATE_HZ: u32 = 16_000;

#[derive(Debug, Clone)]
pub struct SttService {
    model_path: PathBuf,
    binary_path: PathBuf,
}

impl SttService {
    pub fn new(model_path: impl Into<PathBuf>, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            binary_path: binary_path.into(),
        }
    }

    /// Transcribes one utterance given as WAV, or as raw 16 kHz s16le PCM.
    pub async fn transcribe_utterance(&self, audio: &[u8]) -> Result<String, VoiceError> {
        if audio.len() > MAX_UTTERANCE_BYTES {
            return Err(VoiceError::Stt(format!(
                "utterance exceeds maximum size: {} bytes (limit: {} bytes)",
                audio.len(),
                MAX_UTTERANCE_BYTES
            )));
        }

        let input = if wav::is_wav(audio) {
            audio.to_vec()
        } else {
            wav::wrap_pcm(audio, INPUT_SAMPLE_RATE_HZ)
                .map_err(|e| VoiceError::Stt(e.to_string()))?
        };

        // `-f -` reads WAV from stdin; `-nt -np` leave only the transcript on stdout.
        let mut command = Command::new(&self.binary_path);
        command
            .arg("-m")
            .arg(&self.model_path)
            .args(["-f", "-", "-nt", "-np"]);

        let stdout = engine::run(command, input, UTTERANCE_TIMEOUT)
            .await
            .map_err(|e| VoiceError::Stt(e.describe("whisper")))?;
        Ok(clean_transcript(&String::from_utf8_lossy(&stdout)))
    }
}

#[async_trait]
impl Transcriber for SttService {
    async fn transcribe(
        &self,
        audio: &[u8],
        _format: AudioFormat,
    ) -> Result<Transcription, VoiceError> {
        let started = Instant::now();
        let text = self.transcribe_utterance(audio).await?;
        Ok(Transcription {
            text,
            confidence: None,
            cost: started.elapsed(),
        })
    }
}

/// Strips whisper's non-speech markers (`[BLANK_AUDIO]`, `(music)`) and
/// joins output lines into one transcript.
fn clean_transcript(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty()
                && !(line.starts_with('[') && line.ends_with(']'))
                && !(line.starts_with('(') && line.ends_with(')'))
        })
        .collect::<Vec<_>>()
        .join(" ")
}
