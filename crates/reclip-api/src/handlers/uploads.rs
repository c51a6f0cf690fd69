//! Upload handler.

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::info;

use reclip_models::upload::DEFAULT_UPLOAD_NAME;
use reclip_models::Upload;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl From<Upload> for UploadResponse {
    fn from(upload: Upload) -> Self {
        Self {
            id: upload.id.0,
            name: upload.original_name,
            size: upload.size,
            role: upload.role,
        }
    }
}

/// POST /api/uploads
///
/// Multipart form with a `file` part and an optional `role` text part.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let mut file: Option<(String, axum::body::Bytes)> = None;
    let mut role: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                let name = field.file_name().unwrap_or(DEFAULT_UPLOAD_NAME).to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                file = Some((name, data));
            }
            "role" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                let text = text.trim();
                if !text.is_empty() {
                    role = Some(text.to_string());
                }
            }
            _ => {}
        }
    }

    let (name, data) = file.ok_or_else(|| ApiError::validation("missing multipart field: file"))?;
    let mut reader: &[u8] = &data;
    let upload = state.service.upload(&mut reader, &name, role).await?;

    info!(upload_id = %upload.id, size = upload.size, "Stored upload");
    Ok((StatusCode::CREATED, Json(upload.into())))
}
