use std::sync::Arc;

use admin_store::DurableRegistry;
use chrono::Utc;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use storage_domain::{FileId, FinalizeStatus, FinalizeTransaction, SeId};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Deserialize)]
struct UploadResponse {
    file_id: String,
    checksum_sha256: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Two-phase finalization: copies a file from its source SE to a
/// target SE, verifies the checksum round-tripped, and either completes or
/// rolls back. Transaction state is persisted through [`DurableRegistry`] as
/// each phase advances, so GC's finalized-source cleanup strategy and any
/// later resumption logic see the same record the request handler does.
pub struct FinalizeService {
    client: reqwest::Client,
    auth_token: String,
    registry: Arc<dyn DurableRegistry>,
}

impl FinalizeService {
    pub fn new(auth_token: String, registry: Arc<dyn DurableRegistry>) -> Self {
        FinalizeService { client: reqwest::Client::new(), auth_token, registry }
    }

    pub async fn status(&self, tx_id: Uuid) -> Option<FinalizeTransaction> {
        self.registry.get_finalize_tx(tx_id).await.ok().flatten()
    }

    async fn set_status(&self, tx_id: Uuid, status: FinalizeStatus) {
        let Some(mut tx) = self.status(tx_id).await else { return };
        tx.status = status;
        if matches!(status, FinalizeStatus::Completed | FinalizeStatus::Failed | FinalizeStatus::RolledBack) {
            tx.completed_at = Some(Utc::now());
        }
        if let Err(e) = self.registry.upsert_finalize_tx(&tx).await {
            warn!(%tx_id, error = %e, "failed to persist finalize transaction status");
        }
    }

    /// Runs the full copy/verify pipeline against source and target base
    /// URLs and returns the finished transaction. A non-2xx download,
    /// upload, or checksum mismatch ends in `Failed` or `RolledBack` rather
    /// than an `Err` — the transaction record itself is the result.
    pub async fn run(
        &self,
        file_id: FileId,
        source_se: SeId,
        source_base_url: &str,
        target_se: SeId,
        target_base_url: &str,
    ) -> FinalizeTransaction {
        let tx_id = Uuid::new_v4();
        let tx = FinalizeTransaction {
            transaction_id: tx_id,
            file_id,
            source_se: source_se.clone(),
            target_se: target_se.clone(),
            status: FinalizeStatus::Copying,
            checksum_source: String::new(),
            checksum_target: None,
            retry_count: 0,
            created_at: Utc::now(),
            completed_at: None,
        };
        if let Err(e) = self.registry.upsert_finalize_tx(&tx).await {
            warn!(%tx_id, error = %e, "failed to persist newly created finalize transaction");
        }

        let download_url = format!("{}/api/v1/files/{file_id}/download", source_base_url.trim_end_matches('/'));
        let bytes = match self.client.get(&download_url).bearer_auth(&self.auth_token).send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(b) => b,
                Err(e) => return self.fail(tx_id, &format!("reading source body: {e}")).await,
            },
            Ok(resp) => return self.fail(tx_id, &format!("source download returned {}", resp.status())).await,
            Err(e) => return self.fail(tx_id, &format!("source download failed: {e}")).await,
        };

        let checksum_source = sha256_hex(&bytes);
        if let Some(mut tx) = self.status(tx_id).await {
            tx.checksum_source = checksum_source.clone();
            if let Err(e) = self.registry.upsert_finalize_tx(&tx).await {
                warn!(%tx_id, error = %e, "failed to persist finalize transaction source checksum");
            }
        }

        let upload_url = format!("{}/api/v1/files/upload", target_base_url.trim_end_matches('/'));
        let part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(file_id.to_string());
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("original_name", file_id.to_string())
            .text("uploaded_by", "finalize-service");

        let upload = match self.client.post(&upload_url).bearer_auth(&self.auth_token).multipart(form).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => return self.fail(tx_id, &format!("target upload returned {}", resp.status())).await,
            Err(e) => return self.fail(tx_id, &format!("target upload failed: {e}")).await,
        };
        self.set_status(tx_id, FinalizeStatus::Copied).await;

        let parsed: UploadResponse = match upload.json().await {
            Ok(p) => p,
            Err(e) => return self.fail(tx_id, &format!("decoding target upload response: {e}")).await,
        };

        self.set_status(tx_id, FinalizeStatus::Verifying).await;

        if parsed.checksum_sha256 == checksum_source {
            if let Some(mut tx) = self.status(tx_id).await {
                tx.checksum_target = Some(parsed.checksum_sha256.clone());
                if let Err(e) = self.registry.upsert_finalize_tx(&tx).await {
                    warn!(%tx_id, error = %e, "failed to persist finalize transaction target checksum");
                }
            }
            self.set_status(tx_id, FinalizeStatus::Completed).await;
            info!(%tx_id, %file_id, "finalize completed");
        } else {
            warn!(%tx_id, %file_id, expected = %checksum_source, actual = %parsed.checksum_sha256, "finalize checksum mismatch, rolling back");
            self.rollback(tx_id, target_base_url, &parsed.file_id).await;
        }

        self.status(tx_id).await.expect("transaction was just inserted")
    }

    /// Best-effort DELETE of the partial copy on the target SE before
    /// marking the transaction rolled back, so a checksum mismatch never
    /// leaves orphaned bytes sitting on the target SE.
    async fn rollback(&self, tx_id: Uuid, target_base_url: &str, target_file_id: &str) {
        let delete_url = format!("{}/api/v1/files/{target_file_id}", target_base_url.trim_end_matches('/'));
        if let Err(e) = self.client.delete(&delete_url).bearer_auth(&self.auth_token).send().await {
            warn!(%tx_id, error = %e, "rollback delete on target SE failed, leaving cleanup to GC");
        }
        self.set_status(tx_id, FinalizeStatus::RolledBack).await;
    }

    async fn fail(&self, tx_id: Uuid, message: &str) -> FinalizeTransaction {
        warn!(%tx_id, %message, "finalize failed");
        self.set_status(tx_id, FinalizeStatus::Failed).await;
        self.status(tx_id).await.expect("transaction was just inserted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn successful_copy_completes_and_matches_checksum() {
        let source = MockServer::start().await;
        let target = MockServer::start().await;
        let file_id = FileId::new();

        Mock::given(method("GET"))
            .and(path(format!("/api/v1/files/{file_id}/download")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello world".to_vec()))
            .mount(&source)
            .await;

        let checksum = sha256_hex(b"hello world");
        Mock::given(method("POST"))
            .and(path("/api/v1/files/upload"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "file_id": Uuid::new_v4().to_string(),
                "file_size": 11,
                "checksum_sha256": checksum,
            })))
            .mount(&target)
            .await;

        let service = FinalizeService::new("secret".into(), Arc::new(admin_store::InMemoryRegistry::new()));
        let tx = service.run(file_id, SeId::new("se-edit"), &source.uri(), SeId::new("se-rw"), &target.uri()).await;

        assert_eq!(tx.status, FinalizeStatus::Completed);
        assert_eq!(tx.checksum_target, Some(checksum));
    }

    #[tokio::test]
    async fn checksum_mismatch_rolls_back_and_deletes_target_copy() {
        let source = MockServer::start().await;
        let target = MockServer::start().await;
        let file_id = FileId::new();
        let target_file_id = Uuid::new_v4().to_string();

        Mock::given(method("GET"))
            .and(path(format!("/api/v1/files/{file_id}/download")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello world".to_vec()))
            .mount(&source)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v1/files/upload"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "file_id": target_file_id,
                "file_size": 11,
                "checksum_sha256": "wrong-checksum",
            })))
            .mount(&target)
            .await;

        Mock::given(method("DELETE"))
            .and(path(format!("/api/v1/files/{target_file_id}")))
            .respond_with(ResponseTemplate::new(204))
            .mount(&target)
            .await;

        let service = FinalizeService::new("secret".into(), Arc::new(admin_store::InMemoryRegistry::new()));
        let tx = service.run(file_id, SeId::new("se-edit"), &source.uri(), SeId::new("se-rw"), &target.uri()).await;

        assert_eq!(tx.status, FinalizeStatus::RolledBack);
    }

    #[tokio::test]
    async fn source_download_failure_marks_transaction_failed() {
        let source = MockServer::start().await;
        let file_id = FileId::new();
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/files/{file_id}/download")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&source)
            .await;

        let service = FinalizeService::new("secret".into(), Arc::new(admin_store::InMemoryRegistry::new()));
        let tx = service.run(file_id, SeId::new("se-edit"), &source.uri(), SeId::new("se-rw"), "http://127.0.0.1:1").await;
        assert_eq!(tx.status, FinalizeStatus::Failed);
    }

    #[tokio::test]
    async fn status_returns_none_for_unknown_transaction() {
        let service = FinalizeService::new("secret".into(), Arc::new(admin_store::InMemoryRegistry::new()));
        assert!(service.status(Uuid::new_v4()).await.is_none());
    }
}
