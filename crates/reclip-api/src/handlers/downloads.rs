//! Output and archive downloads.

use std::path::Path as FsPath;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;
use tracing::debug;

use reclip_models::JobId;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// GET /api/jobs/:id/download/*path
pub async fn download_output(
    State(state): State<AppState>,
    Path((job_id, path)): Path<(String, String)>,
) -> ApiResult<Response> {
    let job_id = JobId::from_string(job_id);
    let file = state.service.output_path(&job_id, &path).await?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.clone());

    debug!(job_id = %job_id, path = %path, "Serving output");
    stream_file(&file, &name).await
}

/// GET /api/jobs/:id/download-zip
pub async fn download_archive(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    serve_archive(&state, job_id, None).await
}

/// GET /api/jobs/:id/download-zip/:variant
pub async fn download_archive_variant(
    State(state): State<AppState>,
    Path((job_id, variant)): Path<(String, String)>,
) -> ApiResult<Response> {
    serve_archive(&state, job_id, Some(variant)).await
}

async fn serve_archive(state: &AppState, job_id: String, variant: Option<String>) -> ApiResult<Response> {
    let job_id = JobId::from_string(job_id);
    let (path, name) = state.service.archive(&job_id, variant.as_deref()).await?;
    stream_file(&path, &name).await
}

async fn stream_file(path: &FsPath, download_name: &str) -> ApiResult<Response> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::not_found(format!("{} not found", download_name))
        } else {
            ApiError::internal(e.to_string())
        }
    })?;
    let size = file
        .metadata()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .len();

    let headers = [
        (header::CONTENT_TYPE, content_type(path).to_string()),
        (header::CONTENT_LENGTH, size.to_string()),
        (header::CONTENT_DISPOSITION, content_disposition(download_name)),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

fn content_type(path: &FsPath) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "srt" => "application/x-subrip",
        "json" => "application/json",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// `attachment` with an ASCII fallback name and an RFC 5987 UTF-8 name.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| if c.is_ascii_graphic() && c != '"' && c != '\\' { c } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(FsPath::new("1/out.MP4")), "video/mp4");
        assert_eq!(content_type(FsPath::new("flat.zip")), "application/zip");
        assert_eq!(content_type(FsPath::new("notes")), "application/octet-stream");
    }

    #[test]
    fn test_content_disposition_escapes_name() {
        assert_eq!(
            content_disposition("abc_outputs.zip"),
            "attachment; filename=\"abc_outputs.zip\"; filename*=UTF-8''abc_outputs.zip"
        );
        let value = content_disposition("clip \"é\".mp4");
        assert!(value.starts_with("attachment; filename=\"clip____.mp4\""));
        assert!(value.ends_with("clip%20%22%C3%A9%22.mp4"));
    }
}
