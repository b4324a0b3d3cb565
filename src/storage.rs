// src/storage.rs

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::models::StorageCheckResult;

/// Existence and size of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileInfo {
    pub exists: bool,
    pub size: u64,
}

/// The local filesystem operations the manager needs.
#[async_trait]
pub trait Filesystem: Send + Sync {
    async fn exists(&self, path: &Path) -> io::Result<FileInfo>;

    /// Removing a missing file is not an error.
    async fn delete(&self, path: &Path) -> io::Result<()>;

    /// Bytes available to an unprivileged user on the volume holding `path`.
    async fn free_space(&self, path: &Path) -> io::Result<u64>;
}

/// [`Filesystem`] backed by `tokio::fs` and `fs2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFilesystem;

#[async_trait]
impl Filesystem for TokioFilesystem {
    async fn exists(&self, path: &Path) -> io::Result<FileInfo> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(FileInfo {
                exists: true,
                size: meta.len(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FileInfo::default()),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn free_space(&self, path: &Path) -> io::Result<u64> {
        let ancestor = existing_ancestor(path);
        tokio::task::spawn_blocking(move || fs2::available_space(&ancestor))
            .await
            .map_err(io::Error::other)?
    }
}

/// `fs2` needs a path that exists; walk up until one does.
fn existing_ancestor(path: &Path) -> PathBuf {
    let mut current = path;
    loop {
        if current.exists() {
            return current.to_path_buf();
        }
        match current.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => current = parent,
            _ => return PathBuf::from("."),
        }
    }
}

/// Space needed for an artifact of `expected_size` bytes with `margin` headroom.
pub fn required_bytes(expected_size: u64, margin: f64) -> u64 {
    (expected_size as f64 * margin).ceil() as u64
}

/// Builds the preflight result. A failed free-space query counts as no space.
pub fn evaluate(available: io::Result<u64>, required_bytes: u64) -> StorageCheckResult {
    match available {
        Ok(available_bytes) => StorageCheckResult {
            has_space: available_bytes >= required_bytes,
            available_bytes,
            required_bytes,
        },
        Err(e) => {
            tracing::warn!("free space query failed: {}", e);
            StorageCheckResult {
                has_space: false,
                available_bytes: 0,
                required_bytes,
            }
        }
    }
}
