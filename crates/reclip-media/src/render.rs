//! Render function contract and the FFmpeg-backed implementation.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reclip_models::{ConcatParams, JobId, JobType, Summary, UgcParams};
use tracing::info;

use crate::captions::{CaptionClient, CaptionConfig};
use crate::command::{check_ffmpeg, check_ffprobe, FfmpegRunner};
use crate::concat::ConcatRenderer;
use crate::error::MediaResult;
use crate::ugc::UgcRenderer;

/// Sink for progress and log lines emitted while rendering.
///
/// Implementations must not block: renderers call these from the hot path
/// between FFmpeg invocations.
pub trait ProgressReporter: Send + Sync {
    /// Work item `current` of `total` has started.
    fn progress(&self, current: u32, total: u32);

    /// Append one human-readable log line.
    fn log(&self, line: &str);
}

/// Job parameters with every upload already staged to a local path.
#[derive(Debug, Clone)]
pub enum RenderJob {
    Concat {
        params: ConcatParams,
        files_a: Vec<PathBuf>,
        files_b: Vec<PathBuf>,
    },
    Ugc {
        params: UgcParams,
        files: Vec<PathBuf>,
        add1: Option<PathBuf>,
        add2: Option<PathBuf>,
        clip_end: Option<PathBuf>,
    },
}

impl RenderJob {
    pub fn job_type(&self) -> JobType {
        match self {
            RenderJob::Concat { .. } => JobType::Concat,
            RenderJob::Ugc { .. } => JobType::Ugc,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub job_id: JobId,
    pub job: RenderJob,
    /// Every produced file must land under this directory
    pub output_dir: PathBuf,
    /// Intermediate files; removed by the caller when the job ends
    pub scratch_dir: PathBuf,
}

/// What a successful render produced.
#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    /// Absolute paths under `output_dir`, in production order
    pub outputs: Vec<PathBuf>,
    pub summary: Summary,
    /// Work items attempted; zero means there was nothing to do
    pub items: u32,
}

/// Renders a staged job into output files.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        request: RenderRequest,
        reporter: &dyn ProgressReporter,
    ) -> MediaResult<RenderOutput>;
}

/// Renderer configuration.
#[derive(Debug, Clone, Default)]
pub struct RendererConfig {
    pub captions: CaptionConfig,
    /// Upper bound on a single FFmpeg invocation
    pub ffmpeg_timeout: Option<Duration>,
}

impl RendererConfig {
    pub fn from_env() -> Self {
        Self {
            captions: CaptionConfig::from_env(),
            ffmpeg_timeout: std::env::var("FFMPEG_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs),
        }
    }
}

/// Renderer that shells out to `ffmpeg` and `ffprobe`.
pub struct FfmpegRenderer {
    runner: FfmpegRunner,
    captions: CaptionClient,
}

impl FfmpegRenderer {
    pub fn new(config: RendererConfig) -> MediaResult<Self> {
        let runner = match config.ffmpeg_timeout {
            Some(timeout) => FfmpegRunner::new().with_timeout(timeout),
            None => FfmpegRunner::new(),
        };
        Ok(Self {
            runner,
            captions: CaptionClient::new(config.captions)?,
        })
    }
}

#[async_trait]
impl Renderer for FfmpegRenderer {
    async fn render(
        &self,
        request: RenderRequest,
        reporter: &dyn ProgressReporter,
    ) -> MediaResult<RenderOutput> {
        let ffmpeg = check_ffmpeg()?;
        check_ffprobe()?;
        reporter.log(&format!("FFmpeg: {}", ffmpeg.display()));

        tokio::fs::create_dir_all(&request.output_dir).await?;
        tokio::fs::create_dir_all(&request.scratch_dir).await?;

        let job_type = request.job.job_type();
        let started = Instant::now();

        let output = match request.job {
            RenderJob::Concat {
                params,
                files_a,
                files_b,
            } => {
                ConcatRenderer::new(&self.runner, &params, &request.scratch_dir, reporter)
                    .render(&files_a, &files_b, &request.output_dir)
                    .await?
            }
            RenderJob::Ugc {
                params,
                files,
                add1,
                add2,
                clip_end,
            } => {
                let assets = crate::ugc::UgcAssets {
                    add1: existing(add1),
                    add2: existing(add2),
                    clip_end: existing(clip_end),
                };
                UgcRenderer::new(&self.runner, &self.captions, &params, &request.scratch_dir, reporter)
                    .render(&files, &assets, &request.output_dir)
                    .await?
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        metrics::histogram!("reclip_render_duration_seconds", "job_type" => job_type.as_str())
            .record(elapsed);
        info!(
            job_id = %request.job_id,
            job_type = job_type.as_str(),
            outputs = output.outputs.len(),
            items = output.items,
            "Render completed in {:.1}s",
            elapsed
        );
        Ok(output)
    }
}

fn existing(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|p| Path::new(p).is_file())
}

/// Count one finished work item.
pub(crate) fn record_item(job_type: JobType, success: bool) {
    metrics::counter!(
        "reclip_render_items_total",
        "job_type" => job_type.as_str(),
        "result" => if success { "success" } else { "failed" }
    )
    .increment(1);
}
