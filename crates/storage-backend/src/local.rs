use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::backend::{FileSource, StorageBackend};
use crate::error::StorageBackendError;

const COPY_CHUNK_BYTES: usize = 8 * 1024 * 1024;

/// Filesystem-backed [`StorageBackend`]. Writes go to a `.tmp_`-prefixed
/// sibling file, fsynced, then renamed into place so a concurrent reader
/// never observes a partial body -- the same protocol the original's
/// `LocalStorageService` uses for local disk targets.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn tmp_path_for(dest: &Path) -> PathBuf {
        let file_name = dest.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        dest.with_file_name(format!(".tmp_{file_name}"))
    }

    async fn write_atomic<'a>(&self, path: &str, mut source: Pin<Box<dyn AsyncRead + Send + 'a>>) -> Result<u64, StorageBackendError> {
        let dest = self.resolve(path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = Self::tmp_path_for(&dest);

        let mut written: u64 = 0;
        {
            let mut tmp_file = fs::File::create(&tmp).await?;
            let mut buf = vec![0u8; COPY_CHUNK_BYTES];
            loop {
                let n = tokio::io::AsyncReadExt::read(&mut source, &mut buf).await?;
                if n == 0 {
                    break;
                }
                tmp_file.write_all(&buf[..n]).await?;
                written += n as u64;
            }
            tmp_file.flush().await?;
            tmp_file.sync_all().await?;
        }
        fs::rename(&tmp, &dest).await?;
        Ok(written)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn write_file<'a>(&self, path: &str, source: FileSource<'a>) -> Result<u64, StorageBackendError> {
        self.write_atomic(path, source).await
    }

    async fn read_file(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>, StorageBackendError> {
        let dest = self.resolve(path);
        let file = fs::File::open(&dest).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageBackendError::NotFound(path.to_string())
            } else {
                StorageBackendError::Io(e)
            }
        })?;
        Ok(Box::pin(file))
    }

    async fn delete_file(&self, path: &str) -> Result<(), StorageBackendError> {
        let dest = self.resolve(path);
        match fs::remove_file(&dest).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn file_exists(&self, path: &str) -> Result<bool, StorageBackendError> {
        Ok(fs::metadata(self.resolve(path)).await.is_ok())
    }

    async fn get_file_size(&self, path: &str) -> Result<u64, StorageBackendError> {
        let meta = fs::metadata(self.resolve(path)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageBackendError::NotFound(path.to_string())
            } else {
                StorageBackendError::Io(e)
            }
        })?;
        Ok(meta.len())
    }

    async fn write_attr_file(&self, path: &str, contents: &[u8]) -> Result<(), StorageBackendError> {
        let dest = self.resolve(path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = Self::tmp_path_for(&dest);
        let mut tmp_file = fs::File::create(&tmp).await?;
        tmp_file.write_all(contents).await?;
        tmp_file.flush().await?;
        tmp_file.sync_all().await?;
        fs::rename(&tmp, &dest).await?;
        Ok(())
    }

    async fn read_attr_file(&self, path: &str) -> Result<Vec<u8>, StorageBackendError> {
        fs::read(self.resolve(path)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageBackendError::NotFound(path.to_string())
            } else {
                StorageBackendError::Io(e)
            }
        })
    }

    async fn delete_attr_file(&self, path: &str) -> Result<(), StorageBackendError> {
        self.delete_file(path).await
    }

    async fn health_check(&self) -> Result<(), StorageBackendError> {
        fs::metadata(&self.root).await?;
        Ok(())
    }

    async fn list_attr_paths(&self) -> Result<Vec<String>, StorageBackendError> {
        let mut out = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut rd = match fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = rd.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if path.to_string_lossy().ends_with(".attr.json") {
                    let rel = path
                        .strip_prefix(&self.root)
                        .unwrap_or(&path)
                        .to_string_lossy()
                        .replace(std::path::MAIN_SEPARATOR, "/");
                    out.push(rel);
                }
            }
        }
        Ok(out)
    }
}
