//! FFprobe media information.

use std::path::Path;
use std::process::Stdio;

use reclip_models::encoding::{FALLBACK_HEIGHT, FALLBACK_WIDTH};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// What the renderers need to know about a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaInfo {
    pub duration_ms: u64,
    pub width: u32,
    pub height: u32,
    pub has_audio: bool,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
}

/// Probe a media file.
pub async fn probe_media(path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe failed for {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_probe_output(&output.stdout)
}

fn parse_probe_output(raw: &[u8]) -> MediaResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(raw)?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::InvalidVideo("No video stream found".to_string()))?;

    let duration_ms = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as u64)
        .unwrap_or(0);

    Ok(MediaInfo {
        duration_ms,
        width: video.width.unwrap_or(FALLBACK_WIDTH),
        height: video.height.unwrap_or(FALLBACK_HEIGHT),
        has_audio: probe.streams.iter().any(|s| s.codec_type == "audio"),
    })
}

/// Probe, falling back to a 1920x1080 clip of unknown length when the file
/// cannot be read. Renderers treat an unknown duration as "skip the check".
pub async fn probe_or_default(path: &Path) -> MediaInfo {
    match probe_media(path).await {
        Ok(info) => info,
        Err(e) => {
            debug!("Probe failed for {}: {}", path.display(), e);
            MediaInfo {
                duration_ms: 0,
                width: FALLBACK_WIDTH,
                height: FALLBACK_HEIGHT,
                has_audio: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        let raw = br#"{
            "streams": [
                {"codec_type": "video", "width": 1080, "height": 1920},
                {"codec_type": "audio"}
            ],
            "format": {"duration": "12.480000"}
        }"#;
        let info = parse_probe_output(raw).unwrap();
        assert_eq!(info.duration_ms, 12480);
        assert_eq!((info.width, info.height), (1080, 1920));
        assert!(info.has_audio);
    }

    #[test]
    fn test_parse_probe_output_without_video() {
        let raw = br#"{"streams": [{"codec_type": "audio"}], "format": {}}"#;
        assert!(matches!(parse_probe_output(raw), Err(MediaError::InvalidVideo(_))));
    }

    #[test]
    fn test_parse_probe_output_missing_fields() {
        let raw = br#"{"streams": [{"codec_type": "video"}]}"#;
        let info = parse_probe_output(raw).unwrap();
        assert_eq!(info.duration_ms, 0);
        assert_eq!((info.width, info.height), (1920, 1080));
        assert!(!info.has_audio);
    }
}
