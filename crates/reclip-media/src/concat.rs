//! Pairwise concatenation of matched A/B clips.
//!
//! Each pair is attempted with a stream copy through the concat demuxer
//! first, then with a normalizing re-encode, then with a fixed 1920x1080
//! re-encode. Each re-encode tries with audio before falling back to video
//! only. A failed pair is counted and skipped; it never fails the job.

use std::path::{Path, PathBuf};

use reclip_models::encoding::{FALLBACK_HEIGHT, FALLBACK_WIDTH, NORMALIZED_FPS, NORMALIZED_SAMPLE_RATE};
use reclip_models::{ConcatParams, EncodingConfig, JobType, OverlayConfig, Summary};
use serde_json::json;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::matching::{find_matches, VideoPair};
use crate::overlay::overlay_command;
use crate::probe::probe_or_default;
use crate::render::{record_item, ProgressReporter, RenderOutput};

/// Smallest allowed gap between expected and actual stream-copy duration.
const MIN_DURATION_TOLERANCE_MS: u64 = 2_000;

/// A stream copy is accepted when its duration is within
/// `max(2s, 5%)` of the inputs' combined duration. Unknown durations pass.
pub fn duration_within_tolerance(actual_ms: u64, expected_ms: u64) -> bool {
    if actual_ms == 0 || expected_ms == 0 {
        return true;
    }
    let tolerance = MIN_DURATION_TOLERANCE_MS.max(expected_ms / 20);
    actual_ms.abs_diff(expected_ms) <= tolerance
}

/// Concat demuxer list entry, quoting single quotes the way the demuxer expects.
fn concat_list_entry(path: &Path) -> String {
    format!("file '{}'\n", path.to_string_lossy().replace('\'', "'\\''"))
}

fn audio_chain(input: usize) -> String {
    format!(
        "[{input}:a]aresample={NORMALIZED_SAMPLE_RATE},aformat=sample_fmts=fltp:channel_layouts=stereo[a{input}]"
    )
}

/// Re-encode graph that keeps each clip's frame size (rounded to even).
pub fn normalize_graph(with_audio: bool) -> String {
    let video = |i: usize| {
        format!("[{i}:v]fps={NORMALIZED_FPS},format=yuv420p,scale=trunc(iw/2)*2:trunc(ih/2)*2[v{i}]")
    };
    join_graph(video(0), video(1), with_audio)
}

/// Re-encode graph that letterboxes both clips into 1920x1080.
pub fn letterbox_graph(with_audio: bool) -> String {
    let (w, h) = (FALLBACK_WIDTH, FALLBACK_HEIGHT);
    let video = |i: usize| {
        format!(
            "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={NORMALIZED_FPS}[v{i}]"
        )
    };
    join_graph(video(0), video(1), with_audio)
}

fn join_graph(v0: String, v1: String, with_audio: bool) -> String {
    if with_audio {
        format!(
            "{v0};{v1};{};{};[v0][a0][v1][a1]concat=n=2:v=1:a=1[outv][outa]",
            audio_chain(0),
            audio_chain(1)
        )
    } else {
        format!("{v0};{v1};[v0][v1]concat=n=2:v=1:a=0[outv]")
    }
}

/// Two-input re-encode of `first` then `second` through `graph`.
pub fn reencode_command(
    first: &Path,
    second: &Path,
    output: &Path,
    graph: String,
    with_audio: bool,
    encoding: &EncodingConfig,
) -> FfmpegCommand {
    let cmd = FfmpegCommand::new(output)
        .input(first)
        .input(second)
        .filter_complex(graph)
        .map("[outv]");
    if with_audio {
        cmd.map("[outa]").encode(encoding)
    } else {
        cmd.encode_video_only(encoding)
    }
}

/// Renders a concat job.
pub struct ConcatRenderer<'a> {
    runner: &'a FfmpegRunner,
    params: &'a ConcatParams,
    scratch_dir: &'a Path,
    reporter: &'a dyn ProgressReporter,
    encoding: EncodingConfig,
}

impl<'a> ConcatRenderer<'a> {
    pub fn new(
        runner: &'a FfmpegRunner,
        params: &'a ConcatParams,
        scratch_dir: &'a Path,
        reporter: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            runner,
            params,
            scratch_dir,
            reporter,
            encoding: EncodingConfig::default().with_crf(params.crf),
        }
    }

    fn log(&self, line: impl AsRef<str>) {
        self.reporter.log(line.as_ref());
    }

    pub async fn render(
        &self,
        files_a: &[PathBuf],
        files_b: &[PathBuf],
        output_dir: &Path,
    ) -> MediaResult<RenderOutput> {
        let matches = find_matches(files_a, files_b);

        let mut summary = Summary::new();
        summary.insert("matched".into(), json!(matches.pairs.len()));
        summary.insert("only_a".into(), json!(matches.only_a.len()));
        summary.insert("only_b".into(), json!(matches.only_b.len()));

        self.log(format!(
            "Matched {} pairs ({} only in A, {} only in B)",
            matches.pairs.len(),
            matches.only_a.len(),
            matches.only_b.len()
        ));

        let total = matches.pairs.len() as u32;
        if total == 0 {
            self.log("No matched pairs to process.");
            summary.insert("success".into(), json!(0));
            summary.insert("failed".into(), json!(0));
            return Ok(RenderOutput {
                outputs: Vec::new(),
                summary,
                items: 0,
            });
        }

        self.log(format!("Starting concat for {} matched pairs...", total));
        self.log(format!(
            "Order: {}, CRF: {}, Fast copy: {}",
            self.params.order.as_str(),
            self.params.crf,
            self.params.try_fast_copy
        ));

        let mut outputs = Vec::new();
        let (mut success, mut failed) = (0u32, 0u32);

        for (idx, pair) in (1u32..).zip(matches.pairs.iter()) {
            self.reporter.progress(idx, total);

            let output = output_dir.join(idx.to_string()).join(format!("{}.mp4", pair.stem));
            match self.process_pair(idx, pair, &output).await {
                Ok(()) => {
                    success += 1;
                    record_item(JobType::Concat, true);
                    self.log(format!("  Success! Output: {}/{}.mp4", idx, pair.stem));
                    outputs.push(output);
                }
                Err(e) => {
                    failed += 1;
                    record_item(JobType::Concat, false);
                    self.log(format!("  FAILED: {}", e));
                    if let Some(tail) = e.stderr_tail(300) {
                        self.log(format!("  {}", tail));
                    }
                }
            }
        }

        self.log(format!("COMPLETE: {} success, {} failed", success, failed));
        summary.insert("success".into(), json!(success));
        summary.insert("failed".into(), json!(failed));

        Ok(RenderOutput {
            outputs,
            summary,
            items: total,
        })
    }

    async fn process_pair(&self, idx: u32, pair: &VideoPair, output: &Path) -> MediaResult<()> {
        self.log(format!("Processing: {}", pair.stem));
        self.log(format!("  Video A: {}", file_name(&pair.a)));
        self.log(format!("  Video B: {}", file_name(&pair.b)));

        let work = self.scratch_dir.join("concat").join(idx.to_string());
        tokio::fs::create_dir_all(&work).await?;

        let overlay_a = enabled(self.params.overlay_a.as_ref());
        let overlay_b = enabled(self.params.overlay_b.as_ref());

        let file_a = match overlay_a {
            Some(cfg) => self.apply_overlay(&pair.a, &work.join("a_overlay.mp4"), cfg, "A").await?,
            None => pair.a.clone(),
        };
        let file_b = match overlay_b {
            Some(cfg) => self.apply_overlay(&pair.b, &work.join("b_overlay.mp4"), cfg, "B").await?,
            None => pair.b.clone(),
        };

        let mut fast_copy = self.params.try_fast_copy;
        if fast_copy && (overlay_a.is_some() || overlay_b.is_some()) {
            self.log("  Text overlays active; disabling fast copy.");
            fast_copy = false;
        }

        let (first, second) = self.params.order.arrange(&file_a, &file_b);
        self.log(format!("  First: {}", file_name(first)));
        self.log(format!("  Second: {}", file_name(second)));

        if fast_copy {
            if self.try_stream_copy(first, second, output, &work).await {
                self.log("  Fast copy succeeded!");
                return Ok(());
            }
            self.log("  Falling back to re-encode...");
        }

        self.log(format!(
            "  Re-encoding: {} CRF={}, AAC {}, {}fps, {}Hz",
            self.encoding.codec, self.encoding.crf, self.encoding.audio_bitrate, NORMALIZED_FPS,
            NORMALIZED_SAMPLE_RATE
        ));
        match self.reencode(first, second, output, normalize_graph).await {
            Ok(()) => return Ok(()),
            Err(e) => self.log(format!("  Re-encode failed: {}", e)),
        }

        self.log(format!("  Trying simple concat: {}x{}", FALLBACK_WIDTH, FALLBACK_HEIGHT));
        self.reencode(first, second, output, letterbox_graph).await
    }

    async fn apply_overlay(
        &self,
        input: &Path,
        output: &Path,
        overlay: &OverlayConfig,
        side: &str,
    ) -> MediaResult<PathBuf> {
        let span = if overlay.duration > 0.0 {
            format!("{}s", overlay.duration)
        } else {
            "full length".to_string()
        };
        self.log(format!("  Overlay {}: '{}' for {}", side, overlay.text.trim(), span));

        let cmd = overlay_command(input, output, overlay, &self.encoding);
        self.runner.run(&cmd).await.map_err(|e| {
            self.log(format!("  FAILED overlay for Video {}", side));
            e
        })?;
        Ok(output.to_path_buf())
    }

    /// Stream copy through the concat demuxer. Any failure, including a
    /// suspicious output duration, just means "re-encode instead".
    async fn try_stream_copy(&self, first: &Path, second: &Path, output: &Path, work: &Path) -> bool {
        let list = work.join("concat.txt");
        let entries = format!("{}{}", concat_list_entry(first), concat_list_entry(second));
        if let Err(e) = tokio::fs::write(&list, entries).await {
            self.log(format!("  Fast copy skipped: {}", e));
            return false;
        }

        self.log("  Trying fast copy: ffmpeg -f concat -c copy ...");
        let cmd = FfmpegCommand::new(output)
            .input_with(["-f", "concat", "-safe", "0"], &list)
            .stream_copy();
        if let Err(e) = self.runner.run(&cmd).await {
            self.log(format!("  Fast copy failed: {}", e));
            return false;
        }

        let expected = probe_or_default(first).await.duration_ms + probe_or_default(second).await.duration_ms;
        let actual = probe_or_default(output).await.duration_ms;
        if !duration_within_tolerance(actual, expected) {
            self.log(format!(
                "  Fast copy duration mismatch (expected ~{:.2}s, got {:.2}s).",
                expected as f64 / 1000.0,
                actual as f64 / 1000.0
            ));
            let _ = tokio::fs::remove_file(output).await;
            return false;
        }
        true
    }

    async fn reencode(
        &self,
        first: &Path,
        second: &Path,
        output: &Path,
        graph: fn(bool) -> String,
    ) -> MediaResult<()> {
        let with_audio = reencode_command(first, second, output, graph(true), true, &self.encoding);
        let err = match self.runner.run(&with_audio).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        self.log("  Audio concat failed, trying video-only fallback...");
        if let Some(tail) = err.stderr_tail(200) {
            self.log(format!("  Error was: {}", tail));
        }

        let video_only = reencode_command(first, second, output, graph(false), false, &self.encoding);
        self.runner.run(&video_only).await?;
        self.log("  Note: Output has no audio (source videos lacked compatible audio)");
        Ok(())
    }
}

fn enabled(overlay: Option<&OverlayConfig>) -> Option<&OverlayConfig> {
    overlay.filter(|o| o.is_enabled())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_tolerance() {
        assert!(duration_within_tolerance(10_000, 11_900));
        assert!(!duration_within_tolerance(10_000, 12_500));
        // 5% of 100s is 5s, wider than the 2s floor
        assert!(duration_within_tolerance(96_000, 100_000));
        assert!(!duration_within_tolerance(94_000, 100_000));
        assert!(duration_within_tolerance(0, 10_000));
    }

    #[test]
    fn test_concat_list_entry() {
        assert_eq!(concat_list_entry(Path::new("/in/a.mp4")), "file '/in/a.mp4'\n");
        assert_eq!(
            concat_list_entry(Path::new("/in/it's.mp4")),
            "file '/in/it'\\''s.mp4'\n"
        );
    }

    #[test]
    fn test_normalize_graph() {
        let graph = normalize_graph(true);
        assert!(graph.starts_with("[0:v]fps=30,format=yuv420p,scale=trunc(iw/2)*2:trunc(ih/2)*2[v0];"));
        assert!(graph.contains("[1:a]aresample=48000,aformat=sample_fmts=fltp:channel_layouts=stereo[a1]"));
        assert!(graph.ends_with("[v0][a0][v1][a1]concat=n=2:v=1:a=1[outv][outa]"));

        let silent = normalize_graph(false);
        assert!(!silent.contains(":a]"));
        assert!(silent.ends_with("[v0][v1]concat=n=2:v=1:a=0[outv]"));
    }

    #[test]
    fn test_letterbox_graph() {
        let graph = letterbox_graph(false);
        assert!(graph.contains(
            "[0:v]scale=1920:1080:force_original_aspect_ratio=decrease,pad=1920:1080:(ow-iw)/2:(oh-ih)/2,setsar=1,fps=30[v0]"
        ));
    }

    #[test]
    fn test_reencode_command_maps() {
        let encoding = EncodingConfig::default();
        let args = reencode_command(
            Path::new("b.mp4"),
            Path::new("a.mp4"),
            Path::new("out/1/x.mp4"),
            normalize_graph(false),
            false,
            &encoding,
        )
        .build_args();

        let joined = args.join(" ");
        assert!(joined.contains("-i b.mp4 -i a.mp4"));
        assert!(joined.contains("-map [outv] -c:v libx264"));
        assert!(!joined.contains("[outa]"));
        assert!(joined.ends_with("-an out/1/x.mp4"));
    }
}
