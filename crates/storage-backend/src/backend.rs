use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::StorageBackendError;

/// Boxed streaming source for a file body. Callers hand over ownership of
/// the reader; backends drain it in fixed-size chunks rather than buffering
/// the whole file in memory.
pub type FileSource<'a> = Pin<Box<dyn AsyncRead + Send + Sync + 'a>>;

/// Durable byte storage for file bodies and their attribute sidecars. One
/// storage element is backed by exactly one implementation, chosen by its
/// configuration at startup.
///
/// Implementations must make `write_file` atomic from the point of view of
/// any concurrent `read_file`/`file_exists` call: a reader must never observe
/// a partially-written body.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write `source` to `path`, replacing any existing body atomically.
    /// Returns the number of bytes written.
    async fn write_file<'a>(&self, path: &str, source: FileSource<'a>) -> Result<u64, StorageBackendError>;

    /// Open `path` for streaming read. Errors with
    /// [`StorageBackendError::NotFound`] if it does not exist.
    async fn read_file(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>, StorageBackendError>;

    async fn delete_file(&self, path: &str) -> Result<(), StorageBackendError>;

    async fn file_exists(&self, path: &str) -> Result<bool, StorageBackendError>;

    async fn get_file_size(&self, path: &str) -> Result<u64, StorageBackendError>;

    /// Attribute sidecars are small (<= 4096 bytes per [`storage_domain::AttributeSidecar`])
    /// so these take/return whole buffers rather than streams.
    async fn write_attr_file(&self, path: &str, contents: &[u8]) -> Result<(), StorageBackendError>;

    async fn read_attr_file(&self, path: &str) -> Result<Vec<u8>, StorageBackendError>;

    async fn delete_attr_file(&self, path: &str) -> Result<(), StorageBackendError>;

    /// Cheap liveness probe used by health reporting.
    async fn health_check(&self) -> Result<(), StorageBackendError>;

    /// List every attribute sidecar path under the partition tree, used by
    /// the consistency check and full/incremental cache rebuilds.
    /// Ordering is unspecified; callers must not rely on it.
    async fn list_attr_paths(&self) -> Result<Vec<String>, StorageBackendError>;
}

/// Convenience alias kept narrow on purpose: nothing outside this crate
/// needs `AsyncWrite`, but destination-side helpers (chunked copy in
/// `local.rs`) use it internally.
#[allow(dead_code)]
pub(crate) type FileSink = Pin<Box<dyn AsyncWrite + Send>>;
