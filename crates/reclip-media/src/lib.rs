//! Render function for reclip jobs.
//!
//! Workers hand a [`RenderRequest`] with staged input paths to a
//! [`Renderer`] and receive the produced files plus a summary. The shipped
//! [`FfmpegRenderer`] drives the `ffmpeg`/`ffprobe` command-line tools:
//!
//! - `concat`: pairs A/B clips by file stem and joins each pair, trying a
//!   stream copy before re-encoding
//! - `ugc`: trims each clip, burns word-level captions, layers image and
//!   video overlays, then appends an end clip

pub mod captions;
pub mod command;
pub mod concat;
pub mod error;
pub mod matching;
pub mod overlay;
pub mod probe;
pub mod progress;
pub mod render;
pub mod subtitles;
pub mod ugc;

pub use captions::{CaptionClient, CaptionConfig, TranscriptWord};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use matching::{find_matches, natural_cmp, MatchSet, VideoPair};
pub use probe::{probe_media, MediaInfo};
pub use progress::FfmpegProgress;
pub use render::{
    FfmpegRenderer, ProgressReporter, RenderJob, RenderOutput, RenderRequest, Renderer,
    RendererConfig,
};
