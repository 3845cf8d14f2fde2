use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;
use storage_backend::StorageBackend;
use storage_domain::{AttributeSidecar, SeMetadataCacheRow};

use crate::cache::MetadataCache;
use crate::error::SeError;
use crate::lock::{CacheLockManager, LockPriority};

/// Result of a dry-run consistency check: every sidecar on the
/// backend is compared against the in-memory cache without mutating either
/// side.
#[derive(Debug, Serialize)]
pub struct ConsistencyReport {
    pub attr_file_count: usize,
    pub cache_row_count: usize,
    pub orphan_cache_entries: Vec<String>,
    pub orphan_attr_files: Vec<String>,
    pub expired_cache_entries: usize,
    pub consistency_pct: f64,
}

fn cache_key_for_attr(attr_path: &str) -> String {
    attr_path.trim_end_matches(".attr.json").to_string()
}

/// Lists every sidecar path on the backend and every row in the cache,
/// reporting drift both ways without acquiring a lock or mutating anything.
pub async fn check_consistency(
    backend: &dyn StorageBackend,
    cache: &MetadataCache,
) -> Result<ConsistencyReport, SeError> {
    let attr_paths = backend.list_attr_paths().await?;
    let attr_storage_paths: HashSet<String> = attr_paths.iter().map(|p| cache_key_for_attr(p)).collect();

    let rows = cache.all().await;
    let cached_storage_paths: HashSet<String> = rows.iter().map(|r| r.storage_path.clone()).collect();

    let orphan_cache_entries: Vec<String> = rows
        .iter()
        .filter(|r| !attr_storage_paths.contains(&r.storage_path))
        .map(|r| r.file_id.to_string())
        .collect();
    let orphan_attr_files: Vec<String> = attr_paths
        .iter()
        .filter(|p| !cached_storage_paths.contains(&cache_key_for_attr(p)))
        .cloned()
        .collect();
    let expired_cache_entries = cache.expired(Utc::now()).await.len();

    let total = attr_paths.len().max(rows.len());
    let mismatched = orphan_cache_entries.len() + orphan_attr_files.len();
    let consistency_pct = if total == 0 { 100.0 } else { 100.0 * (1.0 - mismatched as f64 / total as f64) };

    Ok(ConsistencyReport {
        attr_file_count: attr_paths.len(),
        cache_row_count: rows.len(),
        orphan_cache_entries,
        orphan_attr_files,
        expired_cache_entries,
        consistency_pct,
    })
}

async fn row_from_attr_path(backend: &dyn StorageBackend, attr_path: &str, cache_ttl_hours: i64) -> Option<SeMetadataCacheRow> {
    let bytes = backend.read_attr_file(attr_path).await.ok()?;
    let sidecar = AttributeSidecar::decode(&bytes).ok()?;
    let storage_path = cache_key_for_attr(attr_path);
    let storage_filename = storage_path.rsplit('/').next().unwrap_or(&storage_path).to_string();
    let now = Utc::now();
    Some(SeMetadataCacheRow {
        file_id: sidecar.file_id,
        storage_path,
        storage_filename,
        size_bytes: sidecar.size_bytes,
        checksum_sha256: sidecar.checksum_sha256,
        cached_at: now,
        expires_at: now + chrono::Duration::hours(cache_ttl_hours),
    })
}

/// Full rebuild: truncates the cache and reinserts a row for every
/// sidecar found on the backend. Acquires [`LockPriority::ManualRebuild`],
/// the highest priority, since it invalidates reads for the whole SE while
/// running.
pub async fn rebuild_cache_full(
    backend: &dyn StorageBackend,
    cache: &MetadataCache,
    lock_mgr: &CacheLockManager,
    cache_ttl_hours: i64,
) -> Result<usize, SeError> {
    let _guard = lock_mgr.try_acquire(LockPriority::ManualRebuild).await.ok_or(SeError::LockContention)?;
    let attr_paths = backend.list_attr_paths().await?;
    cache.truncate().await;
    let mut rebuilt = 0;
    for attr_path in &attr_paths {
        if let Some(row) = row_from_attr_path(backend, attr_path, cache_ttl_hours).await {
            cache.insert(row).await;
            rebuilt += 1;
        }
    }
    Ok(rebuilt)
}

/// Incremental rebuild: inserts a row for every sidecar not already
/// cached, without removing anything. Never observes a lower-priority
/// acquirer, so callers can schedule this more aggressively than the full
/// rebuild.
pub async fn rebuild_cache_incremental(
    backend: &dyn StorageBackend,
    cache: &MetadataCache,
    lock_mgr: &CacheLockManager,
    cache_ttl_hours: i64,
) -> Result<usize, SeError> {
    let _guard = lock_mgr.try_acquire(LockPriority::ManualCheck).await.ok_or(SeError::LockContention)?;
    let attr_paths = backend.list_attr_paths().await?;
    let cached: HashSet<String> = cache.all().await.into_iter().map(|r| r.storage_path).collect();
    let mut inserted = 0;
    for attr_path in &attr_paths {
        let storage_path = cache_key_for_attr(attr_path);
        if cached.contains(&storage_path) {
            continue;
        }
        if let Some(row) = row_from_attr_path(backend, attr_path, cache_ttl_hours).await {
            cache.insert(row).await;
            inserted += 1;
        }
    }
    Ok(inserted)
}

/// Background cleanup: drops cache rows whose `expires_at` has
/// already passed. The bytes and sidecar are untouched; a later read simply
/// triggers a lazy rebuild.
pub async fn cleanup_expired_entries(cache: &MetadataCache, lock_mgr: &CacheLockManager) -> Result<usize, SeError> {
    let _guard = lock_mgr.try_acquire(LockPriority::BackgroundCleanup).await.ok_or(SeError::LockContention)?;
    let expired = cache.expired(Utc::now()).await;
    for file_id in &expired {
        cache.remove(file_id).await;
    }
    Ok(expired.len())
}
