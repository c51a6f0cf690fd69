//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use reclip_models::EncodingConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::{is_progress_line, parse_progress_line, FfmpegProgress};

/// Lines of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 30;

/// One `-i` input with the options that precede it.
#[derive(Debug, Clone)]
struct FfmpegInput {
    args: Vec<String>,
    path: PathBuf,
}

/// Builder for FFmpeg commands with any number of inputs.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<FfmpegInput>,
    output: PathBuf,
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add a plain input.
    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.input_with(std::iter::empty::<String>(), path)
    }

    /// Add an input preceded by per-input options (`-t`, `-stream_loop`, `-f`).
    pub fn input_with<I, S>(mut self, args: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(FfmpegInput {
            args: args.into_iter().map(Into::into).collect(),
            path: path.as_ref().to_path_buf(),
        });
        self
    }

    /// Number of inputs added so far; the next input gets this index.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Select a stream or filter label for the output.
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    /// Copy all streams without re-encoding.
    pub fn stream_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Encode video with `encoding` and audio with its AAC settings.
    pub fn encode(self, encoding: &EncodingConfig) -> Self {
        self.output_args(encoding.video_args())
            .output_args(encoding.audio_args())
    }

    /// Encode video only and drop audio.
    pub fn encode_video_only(self, encoding: &EncodingConfig) -> Self {
        self.output_args(encoding.video_args()).output_arg("-an")
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push("-v".to_string());
        args.push(self.log_level.clone());
        args.push("-nostdin".to_string());
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().to_string());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// Runs FFmpeg commands, capturing the stderr tail for error reports.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRunner {
    timeout: Option<Duration>,
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run `cmd` to completion. Succeeds only if FFmpeg exits cleanly and
    /// the output file exists and is non-empty; otherwise the partial output
    /// is removed.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        if let Some(parent) = cmd.output().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr was not captured"))?;

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut progress = FfmpegProgress::default();
            let mut last = None;
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

            while let Ok(Some(line)) = lines.next_line().await {
                if is_progress_line(&line) {
                    if let Some(snapshot) = parse_progress_line(&line, &mut progress) {
                        last = Some(snapshot);
                    }
                } else if !line.trim().is_empty() {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            (last, Vec::from(tail).join("\n"))
        });

        let waited = self.wait(&mut child).await;
        let (last, stderr_tail) = reader.await.unwrap_or_default();

        let outcome = match waited {
            Ok(status) if status.success() => match tokio::fs::metadata(cmd.output()).await {
                Ok(meta) if meta.len() > 0 => Ok(()),
                _ => Err(MediaError::ffmpeg_failed(
                    "FFmpeg produced no output",
                    Some(stderr_tail),
                    status.code(),
                )),
            },
            Ok(status) => Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some(stderr_tail),
                status.code(),
            )),
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(()) => {
                if let Some(progress) = last {
                    debug!(
                        out_time_ms = progress.out_time_ms,
                        speed = progress.speed,
                        "FFmpeg finished {}",
                        cmd.output().display()
                    );
                }
            }
            Err(_) => {
                let _ = tokio::fs::remove_file(cmd.output()).await;
            }
        }
        outcome
    }

    async fn wait(&self, child: &mut Child) -> MediaResult<std::process::ExitStatus> {
        match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => Ok(status?),
                Err(_) => {
                    warn!("FFmpeg timed out after {:?}, killing process", timeout);
                    let _ = child.kill().await;
                    Err(MediaError::Timeout(timeout.as_secs()))
                }
            },
            None => Ok(child.wait().await?),
        }
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs_keep_their_options() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input_with(["-t", "7.200"], "main.mp4")
            .input_with(["-stream_loop", "-1"], "loop.mov")
            .input("badge.png")
            .filter_complex("[0:v]copy[vout]")
            .map("[vout]")
            .map("0:a?");

        let args = cmd.build_args();
        let pos = |needle: &str| args.iter().position(|a| a == needle).unwrap();

        assert_eq!(args[0], "-y");
        assert!(pos("-t") < pos("main.mp4"));
        assert!(pos("main.mp4") < pos("-stream_loop"));
        assert!(pos("-stream_loop") < pos("loop.mov"));
        assert!(pos("loop.mov") < pos("badge.png"));
        assert!(pos("badge.png") < pos("-filter_complex"));
        assert_eq!(args.last().unwrap(), "out.mp4");
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 3);
        assert_eq!(cmd.input_count(), 3);
    }

    #[test]
    fn test_encode_args() {
        let encoding = EncodingConfig::default().with_crf(23);
        let args = FfmpegCommand::new("o.mp4").input("i.mp4").encode(&encoding).build_args();
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libx264 -preset medium -crf 23 -movflags +faststart"));
        assert!(joined.contains("-c:a aac -b:a 192k"));

        let video_only = FfmpegCommand::new("o.mp4")
            .input("i.mp4")
            .encode_video_only(&encoding)
            .build_args();
        assert!(video_only.contains(&"-an".to_string()));
        assert!(!video_only.contains(&"-c:a".to_string()));
    }
}
