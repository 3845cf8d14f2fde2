use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storage_domain::{FileId, SeId};
use uuid::Uuid;

/// Administrative audit trail, distinct from the `file-events` stream
/// consumed by the query module: this one records what Admin itself did
/// (finalization lifecycle, GC runs), for operator-facing history rather
/// than cache invalidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AdminAuditEvent {
    FileRegistered {
        id: Uuid,
        at: DateTime<Utc>,
        file_id: FileId,
        storage_element_id: SeId,
    },
    FinalizeStarted {
        id: Uuid,
        at: DateTime<Utc>,
        transaction_id: Uuid,
        file_id: FileId,
    },
    FinalizeCompleted {
        id: Uuid,
        at: DateTime<Utc>,
        transaction_id: Uuid,
        file_id: FileId,
    },
    FinalizeFailed {
        id: Uuid,
        at: DateTime<Utc>,
        transaction_id: Uuid,
        file_id: FileId,
        message: String,
    },
    CleanupEnqueued {
        id: Uuid,
        at: DateTime<Utc>,
        file_id: FileId,
    },
    CleanupCompleted {
        id: Uuid,
        at: DateTime<Utc>,
        file_id: FileId,
    },
    GcRunStarted {
        id: Uuid,
        at: DateTime<Utc>,
    },
    GcRunCompleted {
        id: Uuid,
        at: DateTime<Utc>,
        cleaned: usize,
        errors: usize,
    },
}

impl AdminAuditEvent {
    pub fn file_id(&self) -> Option<FileId> {
        match self {
            AdminAuditEvent::FileRegistered { file_id, .. }
            | AdminAuditEvent::FinalizeStarted { file_id, .. }
            | AdminAuditEvent::FinalizeCompleted { file_id, .. }
            | AdminAuditEvent::FinalizeFailed { file_id, .. }
            | AdminAuditEvent::CleanupEnqueued { file_id, .. }
            | AdminAuditEvent::CleanupCompleted { file_id, .. } => Some(*file_id),
            AdminAuditEvent::GcRunStarted { .. } | AdminAuditEvent::GcRunCompleted { .. } => None,
        }
    }
}
