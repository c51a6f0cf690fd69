//! Encoding defaults shared by the renderers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// H.264 via libx264
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
pub const DEFAULT_PRESET: &str = "medium";
/// Default CRF (Constant Rate Factor), visually lossless for most sources
pub const DEFAULT_CRF: u8 = 18;
pub const DEFAULT_AUDIO_BITRATE: &str = "192k";

/// Frame rate every re-encoded output is normalized to.
pub const NORMALIZED_FPS: u32 = 30;
/// Audio sample rate every re-encoded output is normalized to.
pub const NORMALIZED_SAMPLE_RATE: u32 = 48_000;

/// Frame size used when probing fails and for the last-resort concat.
pub const FALLBACK_WIDTH: u32 = 1920;
pub const FALLBACK_HEIGHT: u32 = 1080;

/// Encoder settings for one output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EncodingConfig {
    pub codec: String,
    pub preset: String,
    /// Constant Rate Factor (0-51, lower is better)
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: DEFAULT_PRESET.to_string(),
            crf: DEFAULT_CRF,
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
        }
    }
}

impl EncodingConfig {
    /// Returns a new config with updated CRF.
    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = crf;
        self
    }

    /// Video encoder arguments, including `+faststart` for progressive playback.
    pub fn video_args(&self) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            self.codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
        ]
    }

    /// Audio encoder arguments.
    pub fn audio_args(&self) -> Vec<String> {
        vec![
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EncodingConfig::default();
        assert_eq!(config.codec, "libx264");
        assert_eq!(config.crf, 18);
        assert_eq!(config.audio_bitrate, "192k");
    }

    #[test]
    fn test_video_args_carry_crf() {
        let args = EncodingConfig::default().with_crf(23).video_args();
        let crf_pos = args.iter().position(|a| a == "-crf").unwrap();
        assert_eq!(args[crf_pos + 1], "23");
        assert!(args.contains(&"+faststart".to_string()));
        assert!(!args.contains(&"-c:a".to_string()));
    }
}
