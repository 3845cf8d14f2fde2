use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(pub Uuid);

impl FileId {
    pub fn new() -> Self {
        FileId(Uuid::new_v4())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeId(pub String);

impl SeId {
    pub fn new(s: impl Into<String>) -> Self {
        SeId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Retention policy ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RetentionPolicy {
    Temporary,
    Permanent,
}

impl std::fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetentionPolicy::Temporary => write!(f, "TEMPORARY"),
            RetentionPolicy::Permanent => write!(f, "PERMANENT"),
        }
    }
}

impl RetentionPolicy {
    /// The only SE mode a file with this retention policy may land on at upload time.
    pub fn upload_mode(&self) -> SeMode {
        match self {
            RetentionPolicy::Temporary => SeMode::Edit,
            RetentionPolicy::Permanent => SeMode::Rw,
        }
    }
}

// ── SE mode lattice: EDIT -> RW -> RO -> AR, irreversible ───────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SeMode {
    Edit,
    Rw,
    Ro,
    Ar,
}

impl SeMode {
    fn rank(&self) -> u8 {
        match self {
            SeMode::Edit => 0,
            SeMode::Rw => 1,
            SeMode::Ro => 2,
            SeMode::Ar => 3,
        }
    }

    /// Whether transitioning from `self` to `next` is legal under the lattice.
    /// Only forward moves (including staying put) are legal; the lattice never
    /// goes backward.
    pub fn can_transition_to(&self, next: SeMode) -> bool {
        next.rank() >= self.rank()
    }

    pub fn cache_ttl_hours(&self) -> i64 {
        match self {
            SeMode::Edit | SeMode::Rw => 24,
            SeMode::Ro | SeMode::Ar => 168,
        }
    }

    pub fn accepts_writes(&self) -> bool {
        matches!(self, SeMode::Edit | SeMode::Rw)
    }

    pub fn accepts_deletes(&self) -> bool {
        matches!(self, SeMode::Edit)
    }
}

impl std::fmt::Display for SeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SeMode::Edit => "EDIT",
            SeMode::Rw => "RW",
            SeMode::Ro => "RO",
            SeMode::Ar => "AR",
        };
        write!(f, "{}", s)
    }
}

/// Canonical SE lifecycle/health status values, distinct from the mode lattice.
/// Uses the migration-era names, per the resolved Open Question in DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SeLifecycleStatus {
    Initializing,
    Ready,
    Upgrading,
    Degraded,
    Offline,
}

impl std::fmt::Display for SeLifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SeLifecycleStatus::Initializing => "INITIALIZING",
            SeLifecycleStatus::Ready => "READY",
            SeLifecycleStatus::Upgrading => "UPGRADING",
            SeLifecycleStatus::Degraded => "DEGRADED",
            SeLifecycleStatus::Offline => "OFFLINE",
        };
        write!(f, "{}", s)
    }
}

// ── Storage filename ─────────────────────────────────────────────────────────

const MAX_STORAGE_FILENAME_LEN: usize = 200;

/// Generate the on-disk filename for a freshly uploaded file.
///
/// Format: `{stem}_{uploader}_{YYYYMMDDThhmmss}_{uuid32}{ext}`, truncated so the
/// whole name never exceeds 200 characters. `uuid32` has no hyphens.
pub fn generate_storage_filename(
    original_name: &str,
    uploader: &str,
    now: DateTime<Utc>,
) -> String {
    let (stem, ext) = split_ext(original_name);
    let ts = now.format("%Y%m%dT%H%M%S").to_string();
    let uuid32 = Uuid::new_v4().simple().to_string();

    let mut name = format!("{stem}_{uploader}_{ts}_{uuid32}{ext}");
    if name.len() > MAX_STORAGE_FILENAME_LEN {
        let overflow = name.len() - MAX_STORAGE_FILENAME_LEN;
        let keep = stem.len().saturating_sub(overflow);
        name = format!("{}_{uploader}_{ts}_{uuid32}{ext}", &stem[..keep]);
    }
    name
}

fn split_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

/// Parsed components of a generated storage filename. Inverse of
/// [`generate_storage_filename`] modulo the stem truncation performed at
/// generation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStorageFilename {
    pub stem: String,
    pub uploader: String,
    pub timestamp: DateTime<Utc>,
    pub uuid: Uuid,
    pub ext: String,
}

pub fn parse_storage_filename(name: &str) -> Result<ParsedStorageFilename, DomainError> {
    let (base, ext) = split_ext(name);
    let parts: Vec<&str> = base.rsplitn(4, '_').collect();
    if parts.len() != 4 {
        return Err(DomainError::InvalidStorageFilename(name.to_string()));
    }
    // rsplitn yields [uuid32, ts, uploader, stem] in reverse order.
    let uuid_part = parts[0];
    let ts_part = parts[1];
    let uploader = parts[2];
    let stem = parts[3];

    let uuid = Uuid::parse_str(uuid_part)
        .map_err(|_| DomainError::InvalidStorageFilename(name.to_string()))?;
    let timestamp = chrono::NaiveDateTime::parse_from_str(ts_part, "%Y%m%dT%H%M%S")
        .map_err(|_| DomainError::InvalidStorageFilename(name.to_string()))?
        .and_utc();

    Ok(ParsedStorageFilename {
        stem: stem.to_string(),
        uploader: uploader.to_string(),
        timestamp,
        uuid,
        ext: ext.to_string(),
    })
}

// ── File record ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: FileId,
    pub original_name: String,
    pub storage_filename: String,
    pub storage_element_id: SeId,
    pub retention_policy: RetentionPolicy,
    pub size_bytes: u64,
    pub checksum_sha256: String,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
    /// Set only once two-phase finalization completes; PERMANENT files must
    /// eventually carry one (invariant 1 in the testable-properties list).
    pub finalized_at: Option<DateTime<Utc>>,
    /// TEMPORARY files only; must be strictly after `created_at`.
    pub ttl_expires_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn is_finalized(&self) -> bool {
        self.finalized_at.is_some()
    }
}

// ── Attribute sidecar ────────────────────────────────────────────────────────

pub const SIDECAR_MAX_BYTES: usize = 4096;
pub const SIDECAR_SCHEMA_VERSION_CURRENT: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSidecar {
    pub schema_version: u32,
    pub file_id: FileId,
    pub original_name: String,
    pub content_type: Option<String>,
    pub checksum_sha256: String,
    pub size_bytes: u64,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
    /// Added at schema v2; absent (defaulted to empty) on v1 sidecars until migrated.
    #[serde(default)]
    pub custom_attributes: HashMap<String, String>,
}

impl AttributeSidecar {
    /// Migrate a sidecar in place to the current schema version. A no-op if
    /// already current. v1 -> v2 adds an empty `custom_attributes` map while
    /// preserving every other field verbatim.
    pub fn migrate_to_current(&mut self) {
        if self.schema_version < 2 {
            self.schema_version = 2;
            // custom_attributes already defaults to empty via serde(default)
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, DomainError> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| DomainError::InvalidConfig(e.to_string()))?;
        if bytes.len() > SIDECAR_MAX_BYTES {
            return Err(DomainError::SidecarTooLarge { size: bytes.len() });
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DomainError> {
        let mut sidecar: AttributeSidecar = serde_json::from_slice(bytes)
            .map_err(|e| DomainError::InvalidConfig(e.to_string()))?;
        sidecar.migrate_to_current();
        Ok(sidecar)
    }
}

// ── SE metadata cache row ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeMetadataCacheRow {
    pub file_id: FileId,
    pub storage_path: String,
    pub storage_filename: String,
    pub size_bytes: u64,
    pub checksum_sha256: String,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SeMetadataCacheRow {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ── Capacity record ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CapacityStatus {
    Ok,
    Warning,
    Critical,
    Full,
}

impl std::fmt::Display for CapacityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CapacityStatus::Ok => "OK",
            CapacityStatus::Warning => "WARNING",
            CapacityStatus::Critical => "CRITICAL",
            CapacityStatus::Full => "FULL",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityRecord {
    pub se_id: SeId,
    pub mode: SeMode,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub priority: u32,
    pub updated_at: DateTime<Utc>,
    pub health: SeLifecycleStatus,
    pub backend: String,
    pub location: Option<String>,
    pub endpoint: Option<String>,
    pub last_poll: DateTime<Utc>,
}

impl CapacityRecord {
    pub fn available_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.used_bytes)
    }

    pub fn percent_used(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.used_bytes as f64 / self.total_bytes as f64) * 100.0
    }

    pub fn status(&self) -> CapacityStatus {
        let pct = self.percent_used();
        if pct >= 98.0 {
            CapacityStatus::Full
        } else if pct >= 92.0 {
            CapacityStatus::Critical
        } else if pct >= 85.0 {
            CapacityStatus::Warning
        } else {
            CapacityStatus::Ok
        }
    }

    pub fn is_writable(&self) -> bool {
        self.mode.accepts_writes() && self.status() != CapacityStatus::Full
    }

    pub fn can_accept_file(&self, size_bytes: u64) -> bool {
        self.is_writable() && self.available_bytes() >= size_bytes
    }
}

// ── WAL ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WalOperation {
    Upload,
    Delete,
    UpdateMetadata,
    Create,
    Rotate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WalStatus {
    Pending,
    InProgress,
    Committed,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub transaction_id: Uuid,
    pub operation: WalOperation,
    pub status: WalStatus,
    pub payload: serde_json::Value,
    pub compensation_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
}

impl WalEntry {
    pub fn begin(operation: WalOperation, payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        WalEntry {
            transaction_id: Uuid::new_v4(),
            operation,
            status: WalStatus::Pending,
            payload,
            compensation_data: None,
            created_at: now,
            committed_at: None,
        }
    }
}

// ── Two-phase finalization ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FinalizeStatus {
    Copying,
    Copied,
    Verifying,
    Completed,
    Failed,
    RolledBack,
}

impl FinalizeStatus {
    /// Progress percentage per `GET /finalize/status/{tx}`.
    pub fn progress_percent(&self) -> u8 {
        match self {
            FinalizeStatus::Copying => 25,
            FinalizeStatus::Copied => 50,
            FinalizeStatus::Verifying => 75,
            FinalizeStatus::Completed => 100,
            FinalizeStatus::Failed | FinalizeStatus::RolledBack => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeTransaction {
    pub transaction_id: Uuid,
    pub file_id: FileId,
    pub source_se: SeId,
    pub target_se: SeId,
    pub status: FinalizeStatus,
    pub checksum_source: String,
    pub checksum_target: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ── Cleanup queue ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupReason {
    TtlExpired,
    Finalized,
    Orphaned,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CleanupPriority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupQueueEntry {
    pub id: Uuid,
    pub file_id: FileId,
    pub storage_element_id: SeId,
    pub reason: CleanupReason,
    pub priority: CleanupPriority,
    pub scheduled_at: DateTime<Utc>,
    pub retry_count: u32,
}

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum FileEvent {
    #[serde(rename = "file:created")]
    Created {
        file_id: FileId,
        storage_element_id: SeId,
        metadata: Option<serde_json::Value>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "file:updated")]
    Updated {
        file_id: FileId,
        storage_element_id: SeId,
        metadata: Option<serde_json::Value>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "file:deleted")]
    Deleted {
        file_id: FileId,
        storage_element_id: SeId,
        metadata: Option<serde_json::Value>,
        timestamp: DateTime<Utc>,
    },
}

impl FileEvent {
    pub fn file_id(&self) -> FileId {
        match self {
            FileEvent::Created { file_id, .. }
            | FileEvent::Updated { file_id, .. }
            | FileEvent::Deleted { file_id, .. } => *file_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            FileEvent::Created { timestamp, .. }
            | FileEvent::Updated { timestamp, .. }
            | FileEvent::Deleted { timestamp, .. } => *timestamp,
        }
    }

    /// Idempotency key per the at-least-once delivery guarantee: handlers must
    /// dedupe on `(event_type, file_id, timestamp)`.
    pub fn dedup_key(&self) -> String {
        let kind = match self {
            FileEvent::Created { .. } => "created",
            FileEvent::Updated { .. } => "updated",
            FileEvent::Deleted { .. } => "deleted",
        };
        format!("{kind}:{}:{}", self.file_id(), self.timestamp().timestamp_micros())
    }
}
