use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use storage_domain::FileId;
use tokio_util::io::{ReaderStream, StreamReader};
use uuid::Uuid;

use crate::consistency::{check_consistency, cleanup_expired_entries, rebuild_cache_full, rebuild_cache_incremental};
use crate::error::SeError;
use crate::state::AppState;

fn parse_file_id(raw: &str) -> Result<FileId, SeError> {
    Uuid::parse_str(raw).map(FileId).map_err(|_| SeError::FileNotFound(raw.to_string()))
}

#[derive(Serialize)]
struct UploadResponse {
    file_id: String,
    file_size: u64,
    checksum_sha256: String,
}

/// `POST /api/v1/files/upload`: a multipart body with a required `file`
/// field and optional `original_name`/`uploaded_by`/`content_type`/
/// `expected_size`/`custom_attributes` (JSON object) fields, mirroring the
/// original service's upload form.
pub async fn upload_file(State(state): State<AppState>, mut multipart: Multipart) -> Result<Response, SeError> {
    let mut original_name: Option<String> = None;
    let mut uploaded_by: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut expected_size: Option<u64> = None;
    let mut custom_attributes: HashMap<String, String> = HashMap::new();
    let mut outcome = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| SeError::Internal(e.to_string()))? {
        match field.name().unwrap_or_default() {
            "original_name" => {
                original_name = Some(field.text().await.map_err(|e| SeError::Internal(e.to_string()))?);
            }
            "uploaded_by" => {
                uploaded_by = Some(field.text().await.map_err(|e| SeError::Internal(e.to_string()))?);
            }
            "content_type" => {
                content_type = Some(field.text().await.map_err(|e| SeError::Internal(e.to_string()))?);
            }
            "expected_size" => {
                let raw = field.text().await.map_err(|e| SeError::Internal(e.to_string()))?;
                expected_size = Some(raw.parse().map_err(|_| SeError::Internal("expected_size must be an integer".to_string()))?);
            }
            "custom_attributes" => {
                let raw = field.text().await.map_err(|e| SeError::Internal(e.to_string()))?;
                custom_attributes = serde_json::from_str(&raw)
                    .map_err(|_| SeError::Internal("custom_attributes must be a JSON object of strings".to_string()))?;
            }
            "file" => {
                let name = field.file_name().map(|s| s.to_string());
                let content_type_header = field.content_type().map(|s| s.to_string());
                let stream = field.map(|r| r.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
                let reader = Box::pin(StreamReader::new(stream));
                let result = state
                    .file_service
                    .create_file(
                        original_name.as_deref().or(name.as_deref()).unwrap_or("upload.bin"),
                        uploaded_by.as_deref().unwrap_or("unknown"),
                        content_type.clone().or(content_type_header),
                        expected_size,
                        custom_attributes.clone(),
                        reader,
                    )
                    .await?;
                outcome = Some(result);
            }
            _ => {}
        }
    }

    let outcome = outcome.ok_or_else(|| SeError::Internal("multipart body is missing a 'file' field".to_string()))?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(UploadResponse {
            file_id: outcome.file_id.to_string(),
            file_size: outcome.file_size,
            checksum_sha256: outcome.checksum_sha256,
        }),
    )
        .into_response())
}

/// `GET /api/v1/files/{id}/download`: streams the body straight from the
/// backend without buffering, using the same chunked-copy boundary the
/// backend itself writes with.
pub async fn download_file(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, SeError> {
    let file_id = parse_file_id(&id)?;
    let (row, reader) = state.file_service.read_file(&file_id).await?;
    let body = Body::from_stream(ReaderStream::new(reader));
    let response = Response::builder()
        .status(axum::http::StatusCode::OK)
        .header(axum::http::header::CONTENT_LENGTH, row.size_bytes)
        .header(axum::http::header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", row.storage_filename))
        .body(body)
        .map_err(|e| SeError::Internal(e.to_string()))?;
    Ok(response)
}

#[derive(Serialize)]
pub struct MetadataResponse {
    file_id: String,
    storage_filename: String,
    size_bytes: u64,
    checksum_sha256: String,
    cached_at: chrono::DateTime<chrono::Utc>,
    expires_at: chrono::DateTime<chrono::Utc>,
}

pub async fn get_metadata(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<MetadataResponse>, SeError> {
    let file_id = parse_file_id(&id)?;
    let row = state.file_service.metadata(&file_id).await?;
    Ok(Json(MetadataResponse {
        file_id: row.file_id.to_string(),
        storage_filename: row.storage_filename,
        size_bytes: row.size_bytes,
        checksum_sha256: row.checksum_sha256,
        cached_at: row.cached_at,
        expires_at: row.expires_at,
    }))
}

#[derive(Deserialize)]
pub struct UpdateMetadataRequest {
    content_type: Option<String>,
    #[serde(default)]
    custom_attributes: HashMap<String, String>,
}

pub async fn update_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateMetadataRequest>,
) -> Result<Json<MetadataResponse>, SeError> {
    let file_id = parse_file_id(&id)?;
    let row = state.file_service.update_metadata(&file_id, body.content_type, body.custom_attributes).await?;
    Ok(Json(MetadataResponse {
        file_id: row.file_id.to_string(),
        storage_filename: row.storage_filename,
        size_bytes: row.size_bytes,
        checksum_sha256: row.checksum_sha256,
        cached_at: row.cached_at,
        expires_at: row.expires_at,
    }))
}

pub async fn delete_file(State(state): State<AppState>, Path(id): Path<String>) -> Result<axum::http::StatusCode, SeError> {
    let file_id = parse_file_id(&id)?;
    state.file_service.delete_file(&file_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// `GET /api/v1/capacity`: the capacity record this SE reports to the
/// ingester's capacity monitor.
pub async fn get_capacity(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.file_service.capacity_record())
}

pub async fn get_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "se_id": state.file_service.se_id.to_string(),
        "mode": state.file_service.mode().to_string(),
        "priority": state.file_service.priority,
    }))
}

#[derive(Deserialize)]
pub struct ModeTransitionRequest {
    mode: storage_domain::SeMode,
}

#[derive(Serialize)]
pub struct ModeTransitionResponse {
    mode: String,
}

/// `PATCH /api/v1/mode`: advances this SE forward along the EDIT -> RW ->
/// RO -> AR lattice, driven by Admin's operator-facing mode-change flow.
/// 409 if the requested mode is not reachable from the current one.
pub async fn patch_mode(
    State(state): State<AppState>,
    Json(body): Json<ModeTransitionRequest>,
) -> Result<Json<ModeTransitionResponse>, SeError> {
    let mode = state.file_service.transition_mode(body.mode)?;
    Ok(Json(ModeTransitionResponse { mode: mode.to_string() }))
}

pub async fn get_consistency(State(state): State<AppState>) -> Result<impl IntoResponse, SeError> {
    let report = check_consistency(state.file_service.backend().as_ref(), state.file_service.cache()).await?;
    Ok(Json(report))
}

#[derive(Serialize)]
pub struct RebuildResponse {
    rows_affected: usize,
}

pub async fn post_rebuild_full(State(state): State<AppState>) -> Result<Json<RebuildResponse>, SeError> {
    let rows_affected = rebuild_cache_full(
        state.file_service.backend().as_ref(),
        state.file_service.cache(),
        state.file_service.lock_mgr(),
        state.file_service.mode().cache_ttl_hours(),
    )
    .await?;
    Ok(Json(RebuildResponse { rows_affected }))
}

pub async fn post_rebuild_incremental(State(state): State<AppState>) -> Result<Json<RebuildResponse>, SeError> {
    let rows_affected = rebuild_cache_incremental(
        state.file_service.backend().as_ref(),
        state.file_service.cache(),
        state.file_service.lock_mgr(),
        state.file_service.mode().cache_ttl_hours(),
    )
    .await?;
    Ok(Json(RebuildResponse { rows_affected }))
}

pub async fn post_cleanup_expired(State(state): State<AppState>) -> Result<Json<RebuildResponse>, SeError> {
    let rows_affected = cleanup_expired_entries(state.file_service.cache(), state.file_service.lock_mgr()).await?;
    Ok(Json(RebuildResponse { rows_affected }))
}
