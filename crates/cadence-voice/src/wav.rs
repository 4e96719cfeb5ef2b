//! RIFF/WAVE helpers shared by the transcription and synthesis adapters.

use crate::error::VoiceError;
use std::io::Cursor;

/// Whether `bytes` already starts with a RIFF/WAVE header.
pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Wraps raw s16le mono PCM in a WAV container.
pub fn wrap_pcm(pcm: &[u8], sample_rate_hz: u32) -> Result<Vec<u8>, VoiceError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sample_rate_hz,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut out = Vec::with_capacity(pcm.len() + 44);
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut out), spec)
            .map_err(|e| VoiceError::Tts(format!("failed to start WAV writer: {}", e)))?;
        for frame in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([frame[0], frame[1]]))
                .map_err(|e| VoiceError::Tts(format!("failed to write WAV sample: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| VoiceError::Tts(format!("failed to finalize WAV: {}", e)))?;
    }
    Ok(out)
}

/// Reads a 16-bit WAV container back to raw s16le PCM and its sample rate.
pub fn unwrap_pcm(bytes: &[u8]) -> Result<(Vec<u8>, u32), VoiceError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| VoiceError::Tts(format!("invalid WAV from engine: {}", e)))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(VoiceError::Tts(format!(
            "unsupported WAV sample format: {} bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    let mut pcm = Vec::with_capacity(bytes.len());
    for sample in reader.into_samples::<i16>() {
        match sample {
            Ok(sample) => pcm.extend_from_slice(&sample.to_le_bytes()),
            // Engines writing to a pipe cannot seek back to fix the data
            // length, so the header may promise more than was written.
            Err(hound::Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => return Err(VoiceError::Tts(format!("invalid WAV from engine: {}", e))),
        }
    }
    Ok((pcm, spec.sample_rate))
}
