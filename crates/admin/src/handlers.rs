use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use http_api::{Claims, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storage_domain::{FileEvent, FileId, FileRecord, RetentionPolicy, SeId, SeMode};
use uuid::Uuid;

use admin_store::FileListFilter;

use crate::error::AdminError;
use crate::state::AppState;

fn parse_file_id(raw: &str) -> Result<FileId, AdminError> {
    Uuid::parse_str(raw).map(FileId).map_err(|_| AdminError::BadRequest(format!("invalid file id: {raw}")))
}

fn require_admin(claims: &Claims) -> Result<(), AdminError> {
    if claims.role == Role::Admin {
        Ok(())
    } else {
        Err(AdminError::Forbidden)
    }
}

#[derive(Deserialize)]
pub struct RegisterFileRequest {
    /// The id the owning storage element already generated for this file
    /// (`storage-element::FileService::create_file`); Admin's registry keeps
    /// the same id rather than minting its own so the two stay addressable
    /// by one identifier end to end.
    pub file_id: Uuid,
    pub original_name: String,
    pub storage_filename: String,
    pub storage_element_id: String,
    pub retention_policy: RetentionPolicy,
    pub size_bytes: u64,
    pub checksum_sha256: String,
    pub uploaded_by: String,
    pub ttl_expires_at: Option<chrono::DateTime<Utc>>,
}

/// `POST /api/v1/files`: registers a file record produced by a storage
/// element upload. 400 if `file_id` collides with an existing record (the
/// caller is expected to generate a fresh id per upload, so a collision
/// means a retried request or a caller bug).
pub async fn register_file(
    State(state): State<AppState>,
    Json(body): Json<RegisterFileRequest>,
) -> Result<Response, AdminError> {
    let file_id = FileId(body.file_id);
    if state.registry.get_file(&file_id).await?.is_some() {
        return Err(AdminError::BadRequest(format!("file already registered: {file_id}")));
    }

    let record = FileRecord {
        file_id,
        original_name: body.original_name,
        storage_filename: body.storage_filename,
        storage_element_id: SeId::new(body.storage_element_id),
        retention_policy: body.retention_policy,
        size_bytes: body.size_bytes,
        checksum_sha256: body.checksum_sha256,
        uploaded_by: body.uploaded_by,
        created_at: Utc::now(),
        finalized_at: None,
        ttl_expires_at: body.ttl_expires_at,
        deleted_at: None,
    };

    state.registry.upsert_file(&record).await?;
    let _ = state
        .registry
        .append_event(&admin_store::AdminAuditEvent::FileRegistered {
            id: Uuid::new_v4(),
            at: Utc::now(),
            file_id: record.file_id,
            storage_element_id: record.storage_element_id.clone(),
        })
        .await;
    state
        .events
        .publish(&FileEvent::Created {
            file_id: record.file_id,
            storage_element_id: record.storage_element_id.clone(),
            metadata: None,
            timestamp: record.created_at,
        })
        .await;

    Ok((StatusCode::CREATED, Json(record)).into_response())
}

/// `GET /api/v1/files/{id}`.
pub async fn get_file(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<FileRecord>, AdminError> {
    let file_id = parse_file_id(&id)?;
    let record = state.registry.get_file(&file_id).await?.ok_or_else(|| AdminError::FileNotFound(id))?;
    Ok(Json(record))
}

#[derive(Deserialize)]
pub struct UpdateFileRequest {
    pub retention_policy: Option<RetentionPolicy>,
    pub ttl_expires_at: Option<chrono::DateTime<Utc>>,
    pub finalized_at: Option<chrono::DateTime<Utc>>,
}

/// `PUT /api/v1/files/{id}`: a PERMANENT file can never be demoted back to
/// TEMPORARY, since finalization is a one-way trip off the ingest-staging
/// storage element.
pub async fn update_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateFileRequest>,
) -> Result<Json<FileRecord>, AdminError> {
    let file_id = parse_file_id(&id)?;
    let mut record = state.registry.get_file(&file_id).await?.ok_or_else(|| AdminError::FileNotFound(id))?;

    if let Some(policy) = body.retention_policy {
        if record.retention_policy == RetentionPolicy::Permanent && policy == RetentionPolicy::Temporary {
            return Err(AdminError::IrreversibleRetention);
        }
        record.retention_policy = policy;
    }
    if let Some(ttl) = body.ttl_expires_at {
        record.ttl_expires_at = Some(ttl);
    }
    if let Some(finalized_at) = body.finalized_at {
        record.finalized_at = Some(finalized_at);
    }

    state.registry.upsert_file(&record).await?;
    state
        .events
        .publish(&FileEvent::Updated {
            file_id: record.file_id,
            storage_element_id: record.storage_element_id.clone(),
            metadata: None,
            timestamp: Utc::now(),
        })
        .await;
    Ok(Json(record))
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    pub deletion_reason: Option<String>,
}

/// `DELETE /api/v1/files/{id}?deletion_reason=`: soft delete only — the row
/// keeps `deleted_at` set and the bytes are reclaimed later by the garbage
/// collector, never synchronously here. Admin-role only since it's the first
/// step of irreversibly reclaiming a file's storage.
pub async fn delete_file(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, AdminError> {
    require_admin(&claims)?;
    let file_id = parse_file_id(&id)?;
    let record = state.registry.get_file(&file_id).await?.ok_or_else(|| AdminError::FileNotFound(id))?;

    let now = Utc::now();
    state.registry.mark_file_deleted(&file_id, now).await?;
    let _ = state
        .registry
        .append_event(&admin_store::AdminAuditEvent::CleanupEnqueued { id: Uuid::new_v4(), at: now, file_id })
        .await;
    let reason = query.deletion_reason.unwrap_or_else(|| "manual".to_string());
    state
        .events
        .publish(&FileEvent::Deleted {
            file_id,
            storage_element_id: record.storage_element_id,
            metadata: Some(serde_json::json!({ "deletion_reason": reason })),
            timestamp: now,
        })
        .await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ListFilesQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub retention_policy: Option<String>,
    pub storage_element_id: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Serialize)]
pub struct ListFilesResponse {
    pub files: Vec<FileRecord>,
    pub page: u32,
    pub page_size: u32,
}

/// `GET /api/v1/files?page=&page_size=&retention_policy=&storage_element_id=&include_deleted=`.
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListFilesQuery>,
) -> Result<Json<ListFilesResponse>, AdminError> {
    let retention_policy = query
        .retention_policy
        .map(|raw| parse_retention_policy(&raw))
        .transpose()?;
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(50);

    let filter = FileListFilter {
        retention_policy,
        storage_element_id: query.storage_element_id.map(SeId::new),
        include_deleted: query.include_deleted,
        page,
        page_size,
    };
    let files = state.registry.list_files(&filter).await?;
    Ok(Json(ListFilesResponse { files, page, page_size }))
}

fn parse_retention_policy(raw: &str) -> Result<RetentionPolicy, AdminError> {
    serde_json::from_value(Value::String(raw.to_uppercase()))
        .map_err(|_| AdminError::BadRequest(format!("invalid retention_policy: {raw}")))
}

fn parse_se_mode(raw: &str) -> Result<SeMode, AdminError> {
    serde_json::from_value(Value::String(raw.to_uppercase()))
        .map_err(|_| AdminError::BadRequest(format!("invalid mode: {raw}")))
}

#[derive(Deserialize)]
pub struct AvailableQuery {
    pub mode: String,
    #[serde(default)]
    pub min_free_bytes: u64,
}

#[derive(Serialize)]
pub struct AvailableSeResponse {
    pub storage_elements: Vec<String>,
}

/// `GET /api/v1/internal/storage-elements/available?mode=&min_free_bytes=`:
/// the fallback path [`ingester::selector::StorageSelector`] queries once its
/// own adaptive view has nothing that fits. 503 if nothing qualifies.
pub async fn available_storage_elements(
    State(state): State<AppState>,
    Query(query): Query<AvailableQuery>,
) -> Result<Json<AvailableSeResponse>, AdminError> {
    let mode = parse_se_mode(&query.mode)?;
    let candidates = state.se_registry.available(mode, query.min_free_bytes).await;
    if candidates.is_empty() {
        return Err(AdminError::NoStorageAvailable(format!("mode={}", query.mode)));
    }
    Ok(Json(AvailableSeResponse { storage_elements: candidates.into_iter().map(|id| id.to_string()).collect() }))
}

#[derive(Serialize, Deserialize)]
pub struct ModeTransitionRequest {
    pub mode: SeMode,
}

#[derive(Serialize, Deserialize)]
pub struct ModeTransitionResponse {
    pub mode: String,
}

/// `PATCH /api/v1/storage-elements/{se_id}/mode`: forwards the operator's
/// requested mode transition to the storage element itself, which owns the
/// lattice check ([`storage_domain::SeMode::can_transition_to`]) against its
/// own current mode. Admin-role only, since moving an SE forward in the
/// lattice is irreversible.
pub async fn patch_storage_element_mode(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(se_id): Path<String>,
    Json(body): Json<ModeTransitionRequest>,
) -> Result<Json<ModeTransitionResponse>, AdminError> {
    require_admin(&claims)?;
    let se_id = SeId::new(se_id);
    let base_url = state
        .se_registry
        .resolve_url(&se_id)
        .await
        .ok_or_else(|| AdminError::NoStorageAvailable(se_id.to_string()))?;

    let url = format!("{}/api/v1/mode", base_url.trim_end_matches('/'));
    let resp = state
        .http_client
        .patch(&url)
        .bearer_auth(&state.auth_token)
        .json(&body)
        .send()
        .await
        .map_err(|e| AdminError::BadRequest(format!("storage element unreachable: {e}")))?;

    if !resp.status().is_success() {
        return Err(AdminError::BadRequest(format!("storage element rejected mode transition: {}", resp.status())));
    }
    resp.json::<ModeTransitionResponse>()
        .await
        .map(Json)
        .map_err(|e| AdminError::BadRequest(format!("malformed mode transition response: {e}")))
}

#[derive(Serialize)]
pub struct GcRunResponse {
    pub cleaned: usize,
    pub enqueued: usize,
    pub skipped_offline: usize,
    pub errors: Vec<String>,
}

/// `POST /api/v1/gc/run`: triggers an out-of-band collection pass in
/// addition to the periodic background one, useful for operator-driven
/// cleanup after an incident. Admin-role only.
pub async fn run_gc(State(state): State<AppState>, Extension(claims): Extension<Claims>) -> Result<Json<GcRunResponse>, AdminError> {
    require_admin(&claims)?;
    let report = state.gc.run_once().await;
    Ok(Json(GcRunResponse {
        cleaned: report.cleaned,
        enqueued: report.enqueued,
        skipped_offline: report.skipped_offline,
        errors: report.errors,
    }))
}

#[derive(Deserialize)]
pub struct OrphanCheckRequest {
    pub file_ids_on_storage: Vec<Uuid>,
}

/// `POST /api/v1/gc/orphans/{se_id}`: strategy 4 of the garbage collector
/// is on-demand rather than periodic, since it depends on a storage
/// element's own directory listing rather than anything Admin tracks.
/// Admin-role only.
pub async fn detect_orphans(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(se_id): Path<String>,
    Json(body): Json<OrphanCheckRequest>,
) -> Result<Json<GcRunResponse>, AdminError> {
    require_admin(&claims)?;
    let ids: Vec<FileId> = body.file_ids_on_storage.into_iter().map(FileId).collect();
    let report = state.gc.detect_orphans(&SeId::new(se_id), &ids).await;
    Ok(Json(GcRunResponse {
        cleaned: report.cleaned,
        enqueued: report.enqueued,
        skipped_offline: report.skipped_offline,
        errors: report.errors,
    }))
}
