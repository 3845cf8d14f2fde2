use chrono::{DateTime, Utc};
use serde::Serialize;
use storage_domain::{FileId, RetentionPolicy};
use tracing::warn;
use uuid::Uuid;

/// Best-effort HTTP client for Admin's file registry. The Ingester's own
/// request must never fail because Admin is slow or unreachable, so every
/// method here logs and swallows its own errors rather than returning them.
pub struct AdminClient {
    client: reqwest::Client,
    base_url: String,
    auth_token: String,
}

#[derive(Serialize)]
struct RegisterFileRequest {
    file_id: Uuid,
    original_name: String,
    storage_filename: String,
    storage_element_id: String,
    retention_policy: RetentionPolicy,
    size_bytes: u64,
    checksum_sha256: String,
    uploaded_by: String,
    ttl_expires_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct UpdateFileRequest {
    finalized_at: Option<DateTime<Utc>>,
}

#[derive(serde::Deserialize)]
pub struct FileSizeLookup {
    pub size_bytes: u64,
}

impl AdminClient {
    pub fn new(base_url: String, auth_token: String) -> Self {
        AdminClient { client: reqwest::Client::new(), base_url, auth_token }
    }

    /// Registers a freshly uploaded file so Admin's [`admin_store::DurableRegistry`]
    /// knows it exists. Failure is logged and otherwise ignored — the upload
    /// already succeeded on the storage element, and GC's orphan-detection
    /// strategy exists precisely to reconcile gaps like this one.
    #[allow(clippy::too_many_arguments)]
    pub async fn register_file(
        &self,
        file_id: FileId,
        original_name: String,
        storage_filename: String,
        storage_element_id: String,
        retention_policy: RetentionPolicy,
        size_bytes: u64,
        checksum_sha256: String,
        uploaded_by: String,
        ttl_expires_at: Option<DateTime<Utc>>,
    ) {
        let url = format!("{}/api/v1/files", self.base_url.trim_end_matches('/'));
        let body = RegisterFileRequest {
            file_id: file_id.0,
            original_name,
            storage_filename,
            storage_element_id,
            retention_policy,
            size_bytes,
            checksum_sha256,
            uploaded_by,
            ttl_expires_at,
        };
        match self.client.post(&url).bearer_auth(&self.auth_token).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!(%file_id, status = %resp.status(), "admin file registration returned a non-success status"),
            Err(e) => warn!(%file_id, error = %e, "admin file registration request failed"),
        }
    }

    /// Marks a file finalized once its two-phase copy to a permanent SE has
    /// completed. Best-effort for the same reason as [`Self::register_file`].
    pub async fn mark_finalized(&self, file_id: FileId, finalized_at: DateTime<Utc>) {
        let url = format!("{}/api/v1/files/{file_id}", self.base_url.trim_end_matches('/'));
        let body = UpdateFileRequest { finalized_at: Some(finalized_at) };
        match self.client.put(&url).bearer_auth(&self.auth_token).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!(%file_id, status = %resp.status(), "admin finalize update returned a non-success status"),
            Err(e) => warn!(%file_id, error = %e, "admin finalize update request failed"),
        }
    }

    /// The size Admin has on record for a file, used to size-filter the
    /// finalize target selection. `None` on any failure, in which case the
    /// selector falls back to treating the size as unknown.
    pub async fn file_size(&self, file_id: FileId) -> Option<u64> {
        let url = format!("{}/api/v1/files/{file_id}", self.base_url.trim_end_matches('/'));
        let resp = self.client.get(&url).bearer_auth(&self.auth_token).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        resp.json::<FileSizeLookup>().await.ok().map(|r| r.size_bytes)
    }
}
