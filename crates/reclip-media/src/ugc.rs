//! UGC composition: trim, caption, layer overlays, append an end clip.
//!
//! Layer order over the trimmed clip, bottom to top: burned-in captions,
//! the looping video overlay (`add2`) blended at `add2_opacity`, then the
//! image overlay (`add1`) scaled 1.3x at (`add1_x`, `add1_y`). The end clip
//! is appended untouched by the overlays.

use std::path::{Path, PathBuf};

use reclip_models::encoding::{NORMALIZED_FPS, NORMALIZED_SAMPLE_RATE};
use reclip_models::{EncodingConfig, JobType, Summary, UgcParams};
use serde_json::json;

use crate::captions::{words_before, CaptionClient};
use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::matching::sorted_videos;
use crate::probe::probe_or_default;
use crate::render::{record_item, ProgressReporter, RenderOutput};
use crate::subtitles::{build_ass, escape_filter_path};

/// Seconds cut from the end of every clip; the end clip replaces them.
pub const END_TRIM_SECS: f64 = 2.8;

/// Scale applied to the image overlay.
const ADD1_SCALE: f64 = 1.3;

/// Optional layers, already resolved to existing local files.
#[derive(Debug, Clone, Default)]
pub struct UgcAssets {
    pub add1: Option<PathBuf>,
    pub add2: Option<PathBuf>,
    pub clip_end: Option<PathBuf>,
}

/// Inputs to the overlay filter graph. Input 0 is always the main clip.
#[derive(Debug, Clone)]
pub struct LayerPlan {
    /// Escaped path of the `.ass` file
    pub captions: Option<String>,
    pub add2_input: Option<usize>,
    pub add1_input: Option<usize>,
    pub width: u32,
    pub height: u32,
    pub add2_opacity: f64,
    pub add1_x: i32,
    pub add1_y: i32,
}

/// Build the overlay graph, ending in `[vout]`.
pub fn layer_graph(plan: &LayerPlan) -> String {
    let mut parts = Vec::new();
    let mut current = "0:v".to_string();

    if let Some(ass) = &plan.captions {
        parts.push(format!("[{}]ass='{}'[captioned]", current, ass));
        current = "captioned".to_string();
    }
    if let Some(input) = plan.add2_input {
        parts.push(format!(
            "[{input}:v]scale={}:{},format=rgba,colorchannelmixer=aa={}[add2_alpha];\
             [{current}][add2_alpha]overlay=0:0:shortest=1[with_add2]",
            plan.width, plan.height, plan.add2_opacity
        ));
        current = "with_add2".to_string();
    }
    if let Some(input) = plan.add1_input {
        parts.push(format!(
            "[{input}:v]scale=iw*{ADD1_SCALE}:ih*{ADD1_SCALE}[add1_scaled];\
             [{current}][add1_scaled]overlay={}:{}[with_add1]",
            plan.add1_x, plan.add1_y
        ));
        current = "with_add1".to_string();
    }

    if parts.is_empty() {
        return "[0:v]copy[vout]".to_string();
    }
    format!("{};[{}]copy[vout]", parts.join(";"), current)
}

/// Graph appending input 1 (scaled and padded to `width`x`height`) to input 0.
pub fn end_clip_graph(width: u32, height: u32, with_audio: bool) -> String {
    let video = format!(
        "[0:v]fps={NORMALIZED_FPS},format=yuv420p[v0];\
         [1:v]scale={width}:{height}:force_original_aspect_ratio=decrease,\
         pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,fps={NORMALIZED_FPS},format=yuv420p[v1]"
    );
    if with_audio {
        let audio = |i: usize| {
            format!("[{i}:a]aresample={NORMALIZED_SAMPLE_RATE},aformat=sample_fmts=fltp:channel_layouts=stereo[a{i}]")
        };
        format!(
            "{video};{};{};[v0][a0][v1][a1]concat=n=2:v=1:a=1[outv][outa]",
            audio(0),
            audio(1)
        )
    } else {
        format!("{video};[v0][v1]concat=n=2:v=1:a=0[outv]")
    }
}

/// Renders a UGC job.
pub struct UgcRenderer<'a> {
    runner: &'a FfmpegRunner,
    captions: &'a CaptionClient,
    params: &'a UgcParams,
    scratch_dir: &'a Path,
    reporter: &'a dyn ProgressReporter,
    encoding: EncodingConfig,
}

impl<'a> UgcRenderer<'a> {
    pub fn new(
        runner: &'a FfmpegRunner,
        captions: &'a CaptionClient,
        params: &'a UgcParams,
        scratch_dir: &'a Path,
        reporter: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            runner,
            captions,
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
        files: &[PathBuf],
        assets: &UgcAssets,
        output_dir: &Path,
    ) -> MediaResult<RenderOutput> {
        let videos = sorted_videos(files);
        let total = videos.len() as u32;

        let mut summary = Summary::new();
        if total == 0 {
            self.log("No UGC videos to process.");
            summary.insert("success".into(), json!(0));
            summary.insert("failed".into(), json!(0));
            return Ok(RenderOutput {
                outputs: Vec::new(),
                summary,
                items: 0,
            });
        }

        let api_key = if self.params.enable_captions {
            let key = self
                .captions
                .config()
                .resolve_key(self.params.api_key.as_deref())
                .ok_or(MediaError::MissingApiKey)?;
            Some(key)
        } else {
            None
        };

        self.log(format!("Starting UGC processing of {} videos...", total));
        self.log(format!(
            "Captions: {}",
            if api_key.is_some() { "Enabled" } else { "Disabled" }
        ));
        self.log(format!(
            "Overlay 1: {} at ({}, {})",
            describe(assets.add1.as_deref()),
            self.params.add1_x,
            self.params.add1_y
        ));
        self.log(format!(
            "Overlay 2: {} at {:.0}% opacity",
            describe(assets.add2.as_deref()),
            self.params.add2_opacity * 100.0
        ));
        self.log(format!("End clip: {}", describe(assets.clip_end.as_deref())));

        let mut outputs = Vec::new();
        let (mut success, mut failed) = (0u32, 0u32);

        for (idx, video) in (1u32..).zip(videos.iter()) {
            self.reporter.progress(idx, total);

            let stem = video
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| format!("clip_{}", idx));
            let output = output_dir.join(format!("{}_processed.mp4", stem));

            match self.process_clip(idx, video, assets, api_key.as_deref(), &output).await {
                Ok(()) => {
                    success += 1;
                    record_item(JobType::Ugc, true);
                    self.log(format!("  Success! Output: {}", file_name(&output)));
                    outputs.push(output);
                }
                Err(e) => {
                    failed += 1;
                    record_item(JobType::Ugc, false);
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

    async fn process_clip(
        &self,
        idx: u32,
        video: &Path,
        assets: &UgcAssets,
        api_key: Option<&str>,
        output: &Path,
    ) -> MediaResult<()> {
        self.log(format!("Processing: {}", file_name(video)));

        let work = self.scratch_dir.join("ugc").join(idx.to_string());
        tokio::fs::create_dir_all(&work).await?;

        let info = probe_or_default(video).await;
        let duration_secs = info.duration_ms as f64 / 1000.0;
        let trimmed_secs = (info.duration_ms > 0).then(|| (duration_secs - END_TRIM_SECS).max(0.0));

        self.log(format!(
            "  Video: {}x{}, {:.1}s",
            info.width, info.height, duration_secs
        ));
        if let Some(trimmed) = trimmed_secs {
            self.log(format!(
                "  Trimming last {}s -> {:.1}s + end clip",
                END_TRIM_SECS, trimmed
            ));
        }

        let captions = match api_key {
            Some(key) => {
                let limit_ms = trimmed_secs.map(|s| (s * 1000.0) as u64).unwrap_or(u64::MAX);
                self.write_captions(video, key, limit_ms, info.width, info.height, &work)
                    .await
            }
            None => {
                self.log("  Captions disabled, skipping transcription");
                None
            }
        };

        self.log("  Applying overlays to trimmed video...");
        let mut cmd = FfmpegCommand::new(work.join("intermediate.mp4"));
        cmd = match trimmed_secs {
            Some(secs) => cmd.input_with(["-t".to_string(), format!("{:.3}", secs)], video),
            None => cmd.input(video),
        };

        let mut plan = LayerPlan {
            captions: captions.map(|p| escape_filter_path(&p.to_string_lossy())),
            add2_input: None,
            add1_input: None,
            width: info.width,
            height: info.height,
            add2_opacity: self.params.add2_opacity,
            add1_x: self.params.add1_x,
            add1_y: self.params.add1_y,
        };
        if let Some(add2) = &assets.add2 {
            plan.add2_input = Some(cmd.input_count());
            cmd = cmd.input_with(["-stream_loop", "-1"], add2);
        }
        if let Some(add1) = &assets.add1 {
            plan.add1_input = Some(cmd.input_count());
            cmd = cmd.input(add1);
        }

        let cmd = cmd
            .filter_complex(layer_graph(&plan))
            .map("[vout]")
            .map("0:a?")
            .encode(&self.encoding);
        self.runner.run(&cmd).await?;
        let intermediate = cmd.output().to_path_buf();

        match &assets.clip_end {
            Some(clip_end) => {
                self.log("  Appending end clip...");
                self.append_end_clip(&intermediate, clip_end, output).await
            }
            None => {
                if let Some(parent) = output.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(&intermediate, output).await?;
                Ok(())
            }
        }
    }

    /// Transcribe and write the `.ass` file. Transcription problems are
    /// logged and the clip continues without captions.
    async fn write_captions(
        &self,
        video: &Path,
        api_key: &str,
        limit_ms: u64,
        width: u32,
        height: u32,
        work: &Path,
    ) -> Option<PathBuf> {
        self.log("  Transcribing audio...");
        let words = match self.captions.transcribe(video, api_key).await {
            Ok(words) => words,
            Err(e) => {
                self.log(format!("  Transcription error: {}", e));
                return None;
            }
        };
        self.log(format!("  Transcription complete: {} words", words.len()));

        let words = words_before(words, limit_ms);
        if words.is_empty() {
            self.log("  Warning: No words transcribed, continuing without captions");
            return None;
        }

        self.log(format!(
            "  Generating captions ({} words within trimmed duration)...",
            words.len()
        ));
        let path = work.join("captions.ass");
        match tokio::fs::write(&path, build_ass(&words, width, height)).await {
            Ok(()) => Some(path),
            Err(e) => {
                self.log(format!("  Could not write captions: {}", e));
                None
            }
        }
    }

    async fn append_end_clip(&self, main: &Path, clip_end: &Path, output: &Path) -> MediaResult<()> {
        let info = probe_or_default(main).await;

        let with_audio = FfmpegCommand::new(output)
            .input(main)
            .input(clip_end)
            .filter_complex(end_clip_graph(info.width, info.height, true))
            .map("[outv]")
            .map("[outa]")
            .encode(&self.encoding);
        if self.runner.run(&with_audio).await.is_ok() {
            return Ok(());
        }

        self.log("  Audio concat failed, trying video-only...");
        let video_only = FfmpegCommand::new(output)
            .input(main)
            .input(clip_end)
            .filter_complex(end_clip_graph(info.width, info.height, false))
            .map("[outv]")
            .encode_video_only(&self.encoding);
        self.runner.run(&video_only).await
    }
}

fn describe(path: Option<&Path>) -> String {
    path.map(file_name).unwrap_or_else(|| "none".to_string())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> LayerPlan {
        LayerPlan {
            captions: None,
            add2_input: None,
            add1_input: None,
            width: 1080,
            height: 1920,
            add2_opacity: 0.5,
            add1_x: 190,
            add1_y: 890,
        }
    }

    #[test]
    fn test_layer_graph_without_layers() {
        assert_eq!(layer_graph(&plan()), "[0:v]copy[vout]");
    }

    #[test]
    fn test_layer_graph_all_layers() {
        let graph = layer_graph(&LayerPlan {
            captions: Some("/tmp/job/captions.ass".into()),
            add2_input: Some(1),
            add1_input: Some(2),
            ..plan()
        });

        assert_eq!(
            graph,
            "[0:v]ass='/tmp/job/captions.ass'[captioned];\
             [1:v]scale=1080:1920,format=rgba,colorchannelmixer=aa=0.5[add2_alpha];\
             [captioned][add2_alpha]overlay=0:0:shortest=1[with_add2];\
             [2:v]scale=iw*1.3:ih*1.3[add1_scaled];\
             [with_add2][add1_scaled]overlay=190:890[with_add1];\
             [with_add1]copy[vout]"
        );
    }

    #[test]
    fn test_layer_graph_image_only() {
        let graph = layer_graph(&LayerPlan {
            add1_input: Some(1),
            ..plan()
        });
        assert!(graph.starts_with("[1:v]scale=iw*1.3:ih*1.3[add1_scaled];[0:v][add1_scaled]overlay=190:890"));
        assert!(graph.ends_with("[with_add1]copy[vout]"));
    }

    #[test]
    fn test_end_clip_graph() {
        let graph = end_clip_graph(1080, 1920, true);
        assert!(graph.contains("[1:v]scale=1080:1920:force_original_aspect_ratio=decrease,pad=1080:1920:(ow-iw)/2:(oh-ih)/2,fps=30,format=yuv420p[v1]"));
        assert!(graph.ends_with("concat=n=2:v=1:a=1[outv][outa]"));
        assert!(end_clip_graph(720, 1280, false).ends_with("[v0][v1]concat=n=2:v=1:a=0[outv]"));
    }
}
