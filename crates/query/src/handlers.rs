use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use storage_domain::FileId;
use uuid::Uuid;

use crate::error::QueryError;
use crate::state::AppState;

fn parse_file_id(raw: &str) -> Result<FileId, QueryError> {
    Uuid::parse_str(raw).map(FileId).map_err(|_| QueryError::BadRequest(format!("invalid file id: {raw}")))
}

#[derive(Serialize)]
pub struct FileView {
    pub file_id: FileId,
    pub storage_element_id: String,
    pub metadata: Option<serde_json::Value>,
    pub deleted: bool,
}

/// `GET /api/v1/files/{id}`: resolved entirely from the local event-synced
/// cache — Query never calls Admin for a read, only for the events that
/// built the cache in the first place.
pub async fn get_file(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<FileView>, QueryError> {
    let file_id = parse_file_id(&id)?;
    let entry = state.cache.get(&file_id).await.ok_or_else(|| QueryError::FileNotFound(id))?;
    Ok(Json(FileView {
        file_id: entry.file_id,
        storage_element_id: entry.storage_element_id.to_string(),
        metadata: entry.metadata,
        deleted: entry.deleted,
    }))
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub storage_element_id: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
}

/// `GET /api/v1/files`: a read-only scan of the cache, filtered by SE and
/// deletion state. There is no pagination here since the cache is expected
/// to be small enough to hold entirely in memory.
pub async fn search_files(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Json<Vec<FileView>> {
    let views = state
        .cache
        .all()
        .await
        .into_iter()
        .filter(|e| query.include_deleted || !e.deleted)
        .filter(|e| query.storage_element_id.as_deref().map_or(true, |se| e.storage_element_id.as_str() == se))
        .map(|entry| FileView {
            file_id: entry.file_id,
            storage_element_id: entry.storage_element_id.to_string(),
            metadata: entry.metadata,
            deleted: entry.deleted,
        })
        .collect();
    Json(views)
}

/// `GET /api/v1/files/{id}/download`: resolves `file_id → (se_id, base_url)`
/// via the cache and [`crate::se_resolver::SeResolver`], then streams the
/// SE's response straight through without buffering, the same boundary
/// `storage-element::handlers::download_file` reads at.
pub async fn download_file(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, QueryError> {
    let file_id = parse_file_id(&id)?;
    let entry = state.cache.get(&file_id).await.ok_or_else(|| QueryError::FileNotFound(id.clone()))?;
    if entry.deleted {
        return Err(QueryError::FileNotFound(id));
    }

    let base_url = state
        .se_resolver
        .resolve(&entry.storage_element_id)
        .await
        .ok_or_else(|| QueryError::UnknownStorageElement(entry.storage_element_id.to_string()))?;

    let url = format!("{}/api/v1/files/{}/download", base_url.trim_end_matches('/'), file_id);
    let upstream = state.http_client.get(&url).bearer_auth(&state.auth_token).send().await?;

    if !upstream.status().is_success() {
        return Err(QueryError::FileNotFound(file_id.to_string()));
    }

    let content_disposition = upstream.headers().get(axum::http::header::CONTENT_DISPOSITION).cloned();
    let content_type = upstream.headers().get(axum::http::header::CONTENT_TYPE).cloned();
    let body = Body::from_stream(upstream.bytes_stream());

    let mut builder = Response::builder().status(StatusCode::OK);
    if let Some(cd) = content_disposition {
        builder = builder.header(axum::http::header::CONTENT_DISPOSITION, cd);
    }
    if let Some(ct) = content_type {
        builder = builder.header(axum::http::header::CONTENT_TYPE, ct);
    }
    let response = builder.body(body).map_err(|e| QueryError::BadRequest(e.to_string()))?;
    Ok(response.into_response())
}
