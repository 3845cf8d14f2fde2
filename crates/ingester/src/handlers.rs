use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storage_domain::{FileId, FinalizeTransaction, RetentionPolicy, SeId};
use uuid::Uuid;

use crate::error::IngestError;
use crate::selector::{SelectionError, MAX_SELECTION_RETRIES};
use crate::state::AppState;

#[derive(Deserialize)]
struct SeMetadataLookup {
    storage_filename: String,
}

/// How long a TEMPORARY upload is retained before GC's TTL-expiry strategy
/// sweeps it, absent a finalize call promoting it to PERMANENT first.
const TEMPORARY_FILE_TTL_HOURS: i64 = 24;

async fn fetch_storage_filename(state: &AppState, base_url: &str, file_id: FileId) -> Option<String> {
    let url = format!("{}/api/v1/files/{file_id}/metadata", base_url.trim_end_matches('/'));
    let resp = state.http_client.get(&url).bearer_auth(&state.auth_token).send().await.ok()?;
    if !resp.status().is_success() {
        return None;
    }
    resp.json::<SeMetadataLookup>().await.ok().map(|m| m.storage_filename)
}

fn parse_file_id(raw: &str) -> Result<FileId, IngestError> {
    Uuid::parse_str(raw).map(FileId).map_err(|_| IngestError::BadRequest(format!("invalid file id: {raw}")))
}

/// `POST /api/v1/files/upload`: buffers the uploaded field, picks a target
/// storage element via [`crate::selector::StorageSelector`], and forwards a
/// fresh multipart request to it. On a 507 from the chosen SE it triggers a
/// lazy re-poll for that SE and retries against a different one, bounded by
/// [`MAX_SELECTION_RETRIES`].
pub async fn upload_file(State(state): State<AppState>, mut multipart: Multipart) -> Result<Response, IngestError> {
    let mut original_name: Option<String> = None;
    let mut uploaded_by: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut custom_attributes: Option<String> = None;
    let mut retention_policy = RetentionPolicy::Permanent;
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| IngestError::BadRequest(e.to_string()))? {
        match field.name().unwrap_or_default() {
            "original_name" => original_name = Some(field.text().await.map_err(|e| IngestError::BadRequest(e.to_string()))?),
            "uploaded_by" => uploaded_by = Some(field.text().await.map_err(|e| IngestError::BadRequest(e.to_string()))?),
            "content_type" => content_type = Some(field.text().await.map_err(|e| IngestError::BadRequest(e.to_string()))?),
            "custom_attributes" => {
                custom_attributes = Some(field.text().await.map_err(|e| IngestError::BadRequest(e.to_string()))?)
            }
            "retention_policy" => {
                let raw = field.text().await.map_err(|e| IngestError::BadRequest(e.to_string()))?;
                retention_policy = match raw.to_uppercase().as_str() {
                    "TEMPORARY" => RetentionPolicy::Temporary,
                    _ => RetentionPolicy::Permanent,
                };
            }
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                file_bytes = Some(field.bytes().await.map_err(|e| IngestError::BadRequest(e.to_string()))?.to_vec());
            }
            _ => {}
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| IngestError::BadRequest("multipart body is missing a 'file' field".to_string()))?;
    let upload_size = file_bytes.len() as u64;

    let mut excluded = Vec::new();
    for _ in 0..MAX_SELECTION_RETRIES {
        let se_id = state.selector.select(retention_policy, &excluded, upload_size).await?;
        let base_url = state
            .capacity_monitor
            .resolve_url(&se_id)
            .await
            .ok_or_else(|| IngestError::UnknownStorageElement(se_id.to_string()))?;
        let upload_url = format!("{}/api/v1/files/upload", base_url.trim_end_matches('/'));

        let mut form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(file_bytes.clone()).file_name(file_name.clone().unwrap_or_else(|| "upload.bin".to_string())),
        );
        if let Some(n) = &original_name {
            form = form.text("original_name", n.clone());
        }
        if let Some(u) = &uploaded_by {
            form = form.text("uploaded_by", u.clone());
        }
        if let Some(ct) = &content_type {
            form = form.text("content_type", ct.clone());
        }
        if let Some(ca) = &custom_attributes {
            form = form.text("custom_attributes", ca.clone());
        }

        let resp = state.http_client.post(&upload_url).bearer_auth(&state.auth_token).multipart(form).send().await?;

        if resp.status().as_u16() == 507 {
            state.capacity_monitor.trigger_lazy_update(&se_id, &base_url).await;
            excluded.push(se_id);
            continue;
        }
        if !resp.status().is_success() {
            return Err(IngestError::BadRequest(format!("storage element returned {}", resp.status())));
        }

        let mut body: Value = resp.json().await?;
        body["storage_element_id"] = Value::String(se_id.to_string());

        if let (Some(raw_id), Some(checksum), Some(size)) =
            (body["file_id"].as_str(), body["checksum_sha256"].as_str(), body["file_size"].as_u64())
        {
            if let Ok(file_id) = Uuid::parse_str(raw_id).map(FileId) {
                let storage_filename = fetch_storage_filename(&state, &base_url, file_id).await.unwrap_or_else(|| raw_id.to_string());
                let ttl_expires_at = if retention_policy == RetentionPolicy::Temporary {
                    Some(Utc::now() + chrono::Duration::hours(TEMPORARY_FILE_TTL_HOURS))
                } else {
                    None
                };
                state
                    .admin_client
                    .register_file(
                        file_id,
                        original_name.clone().unwrap_or_else(|| "upload.bin".to_string()),
                        storage_filename,
                        se_id.to_string(),
                        retention_policy,
                        size,
                        checksum.to_string(),
                        uploaded_by.clone().unwrap_or_else(|| "unknown".to_string()),
                        ttl_expires_at,
                    )
                    .await;
            }
        }

        return Ok((StatusCode::CREATED, Json(body)).into_response());
    }

    Err(SelectionError::NoAvailableStorage.into())
}

#[derive(Deserialize)]
pub struct FinalizeRequest {
    source_se: String,
}

#[derive(Serialize)]
pub struct FinalizeResponse {
    transaction_id: Uuid,
    file_id: String,
    source_se: String,
    target_se: String,
    status: String,
    progress_percent: u8,
    checksum_source: String,
    checksum_target: Option<String>,
}

impl From<&FinalizeTransaction> for FinalizeResponse {
    fn from(tx: &FinalizeTransaction) -> Self {
        FinalizeResponse {
            transaction_id: tx.transaction_id,
            file_id: tx.file_id.to_string(),
            source_se: tx.source_se.to_string(),
            target_se: tx.target_se.to_string(),
            status: format!("{:?}", tx.status).to_uppercase(),
            progress_percent: tx.status.progress_percent(),
            checksum_source: tx.checksum_source.clone(),
            checksum_target: tx.checksum_target.clone(),
        }
    }
}

/// `POST /api/v1/finalize/{file_id}`: copies a file off its (TEMPORARY-mode)
/// source SE onto a selected RW-mode target and runs it through the
/// two-phase finalize pipeline.
pub async fn finalize_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<FinalizeRequest>,
) -> Result<Json<FinalizeResponse>, IngestError> {
    let file_id = parse_file_id(&id)?;
    let source_se = SeId::new(body.source_se);
    let source_url = state
        .capacity_monitor
        .resolve_url(&source_se)
        .await
        .ok_or_else(|| IngestError::UnknownStorageElement(source_se.to_string()))?;

    let min_free_bytes = state.admin_client.file_size(file_id).await.unwrap_or(0);

    let mut excluded = vec![source_se.clone()];
    let mut target: Option<(SeId, String)> = None;
    for _ in 0..MAX_SELECTION_RETRIES {
        let candidate = state.selector.select(RetentionPolicy::Permanent, &excluded, min_free_bytes).await?;
        if let Some(url) = state.capacity_monitor.resolve_url(&candidate).await {
            target = Some((candidate, url));
            break;
        }
        excluded.push(candidate);
    }
    let (target_se, target_url) = target.ok_or(SelectionError::NoAvailableStorage)?;

    let tx = state.finalize_service.run(file_id, source_se, &source_url, target_se, &target_url).await;
    if tx.status == storage_domain::FinalizeStatus::Completed {
        let finalized_at = tx.completed_at.unwrap_or_else(Utc::now);
        state.admin_client.mark_finalized(file_id, finalized_at).await;
    }
    Ok(Json(FinalizeResponse::from(&tx)))
}

/// `GET /api/v1/finalize/status/{transaction_id}`.
pub async fn finalize_status(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<FinalizeResponse>, IngestError> {
    let tx_id = Uuid::parse_str(&id).map_err(|_| IngestError::TransactionNotFound(id.clone()))?;
    let tx = state.finalize_service.status(tx_id).await.ok_or(IngestError::TransactionNotFound(id))?;
    Ok(Json(FinalizeResponse::from(&tx)))
}
