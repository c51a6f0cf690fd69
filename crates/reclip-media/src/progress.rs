//! FFmpeg `-progress` output parsing.

use serde::{Deserialize, Serialize};

/// Snapshot of FFmpeg's machine-readable progress block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FfmpegProgress {
    pub frame: u64,
    /// Output position in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed relative to realtime
    pub speed: f64,
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Percentage of `total_duration_ms` encoded so far.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).min(100.0)
    }
}

/// Whether `line` is a `key=value` entry of the progress block rather than
/// ordinary stderr output.
pub fn is_progress_line(line: &str) -> bool {
    matches!(
        line.trim().split_once('=').map(|(k, _)| k),
        Some(
            "frame" | "fps" | "stream_0_0_q" | "bitrate" | "total_size" | "out_time_us"
                | "out_time_ms" | "out_time" | "dup_frames" | "drop_frames" | "speed" | "progress"
        )
    )
}

/// Fold one progress line into `current`. Returns a snapshot at the end of
/// each block (`progress=continue|end`).
pub fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        // out_time_ms is misnamed by FFmpeg and carries microseconds too
        "out_time_us" | "out_time_ms" => {
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_ms = us / 1000;
            }
        }
        "frame" => {
            if let Ok(frame) = value.parse() {
                current.frame = frame;
            }
        }
        "speed" => {
            if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                current.speed = speed;
            }
        }
        "progress" => {
            current.is_complete = value == "end";
            return Some(current.clone());
        }
        _ => {}
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_block() {
        let mut progress = FfmpegProgress::default();

        assert!(parse_progress_line("frame=120", &mut progress).is_none());
        parse_progress_line("out_time_us=4000000", &mut progress);
        parse_progress_line("speed=1.5x", &mut progress);
        parse_progress_line("speed=N/A", &mut progress);

        let snapshot = parse_progress_line("progress=continue", &mut progress).unwrap();
        assert_eq!(snapshot.frame, 120);
        assert_eq!(snapshot.out_time_ms, 4000);
        assert!((snapshot.speed - 1.5).abs() < 0.01);
        assert!(!snapshot.is_complete);

        let last = parse_progress_line("progress=end", &mut progress).unwrap();
        assert!(last.is_complete);
        assert!((last.percentage(8000) - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_is_progress_line() {
        assert!(is_progress_line("out_time=00:00:01.000000"));
        assert!(is_progress_line("progress=end"));
        assert!(!is_progress_line("[concat @ 0x55] Impossible to open 'a.mp4'"));
        assert!(!is_progress_line("Error while decoding stream #0:1"));
    }
}
