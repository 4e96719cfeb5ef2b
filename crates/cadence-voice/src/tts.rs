//! Speech synthesis through a local engine.
//!
//! Piper is the normal voice; `espeak-ng` is the fallback for devices
//! without a neural voice installed. Either way the engine is run once per
//! sentence and its output normalized to s16le mono PCM before it is
//! optionally wrapped as WAV for the client.

use crate::collaborator::{SynthesizedAudio, Synthesizer};
use crate::engine::{self, EngineFailure};
use crate::error::VoiceError;
use crate::wav;
use async_trait::async_trait;
use cadence_types::voice::{VoiceModel, VoiceProfile};
use cadence_types::AudioFormat;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Longest sentence accepted for synthesis, in bytes.
const MAX_SENTENCE_BYTES: usize = 64 * 1024;

/// Per-sentence engine deadline.
const SENTENCE_TIMEOUT: Duration = Duration::from_secs(30);

const ESPEAK_BINARY: &str = "espeak-ng";

#[derive(Debug, Clone)]
pub struct TtsService {
    profile: VoiceProfile,
    voices_dir: PathBuf,
    piper_binary: PathBuf,
}

impl TtsService {
    pub fn new(
        profile: VoiceProfile,
        voices_dir: impl AsRef<Path>,
        piper_binary: impl AsRef<Path>,
    ) -> Self {
        Self {
            profile,
            voices_dir: voices_dir.as_ref().to_path_buf(),
            piper_binary: piper_binary.as_ref().to_path_buf(),
        }
    }

    pub fn profile(&self) -> &VoiceProfile {
        &self.profile
    }

    /// Speaks one sentence. Returns raw s16le PCM and its sample rate.
    pub async fn speak_pcm(&self, sentence: &str) -> Result<(Vec<u8>, u32), VoiceError> {
        if sentence.len() > MAX_SENTENCE_BYTES {
            return Err(VoiceError::Tts(format!(
                "sentence exceeds maximum size: {} bytes (limit: {} bytes)",
                sentence.len(),
                MAX_SENTENCE_BYTES
            )));
        }
        let sentence = sentence.trim();
        if sentence.is_empty() {
            return Ok((Vec::new(), self.profile.sample_rate_hz));
        }

        match self.profile.model {
            VoiceModel::Piper => {
                let command = self.piper_command()?;
                let pcm = engine::run(command, sentence.as_bytes().to_vec(), SENTENCE_TIMEOUT)
                    .await
                    .map_err(|e| engine_error("piper", e))?;
                Ok((pcm, self.profile.sample_rate_hz))
            }
            VoiceModel::System => {
                let mut command = Command::new(ESPEAK_BINARY);
                command.arg("--stdin").arg("--stdout");
                let wav_bytes =
                    engine::run(command, sentence.as_bytes().to_vec(), SENTENCE_TIMEOUT)
                        .await
                        .map_err(|e| engine_error(ESPEAK_BINARY, e))?;
                wav::unwrap_pcm(&wav_bytes)
            }
        }
    }

    fn voice_file(&self, path: &str) -> PathBuf {
        if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.voices_dir.join(path)
        }
    }

    fn piper_command(&self) -> Result<Command, VoiceError> {
        let profile = &self.profile;
        profile.validate().map_err(VoiceError::Config)?;
        let model = self.voice_file(&profile.model_path);
        if !model.exists() {
            return Err(VoiceError::Tts(format!(
                "Model file not found: {}",
                model.display()
            )));
        }

        let mut command = Command::new(&self.piper_binary);
        command
            .arg("--model")
            .arg(model)
            .arg("--output_raw")
            .arg("--length_scale")
            .arg(profile.length_scale().to_string());
        if let Some(config) = &profile.config_path {
            command.arg("--config").arg(self.voice_file(config));
        }
        if let Some(speaker) = profile.speaker_id {
            command.arg("--speaker").arg(speaker.to_string());
        }
        Ok(command)
    }
}

fn engine_error(engine: &str, failure: EngineFailure) -> VoiceError {
    VoiceError::Tts(failure.describe(engine))
}

#[async_trait]
impl Synthesizer for TtsService {
    async fn synthesize(
        &self,
        text: &str,
        format: AudioFormat,
    ) -> Result<SynthesizedAudio, VoiceError> {
        let started = Instant::now();
        let (pcm, sample_rate_hz) = self.speak_pcm(text).await?;
        let audio = match format {
            AudioFormat::Pcm => pcm,
            AudioFormat::Wav => wav::wrap_pcm(&pcm, sample_rate_hz)?,
        };
        tracing::debug!(
            voice = %self.profile.id,
            bytes = audio.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sentence synthesized"
        );
        Ok(SynthesizedAudio {
            audio,
            format,
            sample_rate_hz,
            cost: started.elapsed(),
        })
    }
}
