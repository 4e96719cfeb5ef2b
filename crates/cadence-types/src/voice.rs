//! The companion's voice: which engine speaks and how.

use serde::{Deserialize, Serialize};

/// Supported local TTS engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceModel {
    /// Piper TTS (ONNX-based, fast, local).
    #[default]
    Piper,
    /// `espeak-ng`, used when no neural voice is installed.
    System,
}

/// How the companion's voice sounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceProfile {
    pub id: String,
    pub model: VoiceModel,
    /// Voice model file, relative to the voices directory unless absolute.
    pub model_path: String,
    pub config_path: Option<String>,
    /// 1.0 is the model's natural pace.
    pub speed: f32,
    /// Speaker within a multi-speaker model.
    pub speaker_id: Option<u32>,
    /// Sample rate of the raw PCM the engine produces.
    pub sample_rate_hz: u32,
}

/// Accepted range of [`VoiceProfile::speed`].
pub const SPEED_RANGE: std::ops::RangeInclusive<f32> = 0.1..=10.0;

impl VoiceProfile {
    /// Piper's `--length_scale`: the inverse of speed.
    pub fn length_scale(&self) -> f32 {
        1.0 / self.speed
    }

    /// Checks the settings an engine cannot recover from at synthesis time.
    pub fn validate(&self) -> Result<(), String> {
        if !SPEED_RANGE.contains(&self.speed) {
            return Err(format!(
                "Speed must be between {} and {} (voice {} has {})",
                SPEED_RANGE.start(),
                SPEED_RANGE.end(),
                self.id,
                self.speed
            ));
        }
        if self.sample_rate_hz == 0 {
            return Err(format!("voice {} has a zero sample rate", self.id));
        }
        Ok(())
    }
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            model: VoiceModel::Piper,
            model_path: "zh_CN-huayan-medium.onnx".to_string(),
            config_path: Some("zh_CN-huayan-medium.onnx.json".to_string()),
            speed: 1.0,
            speaker_id: None,
            sample_rate_hz: 22_050,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_is_valid() {
        let profile = VoiceProfile::default();
        assert!(profile.validate().is_ok());
        assert_eq!(profile.length_scale(), 1.0);
    }

    #[test]
    fn out_of_range_speed_is_rejected() {
        let profile = VoiceProfile {
            speed: 0.0,
            ..Default::default()
        };
        assert!(profile.validate().unwrap_err().contains("Speed must be between"));
    }

    #[test]
    fn partial_profile_fills_defaults() {
        let profile: VoiceProfile =
            serde_json::from_str(r#"{"id":"calm","model":"system","speed":0.5}"#).unwrap();
        assert_eq!(profile.model, VoiceModel::System);
        assert_eq!(profile.sample_rate_hz, 22_050);
        assert_eq!(profile.length_scale(), 2.0);
    }
}
