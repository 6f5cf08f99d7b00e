//! Local-disk filesystem implementation.
//!
//! Maps sync paths onto the host filesystem under a base directory.
//! Leading separators are stripped so absolute sync paths land inside the
//! base directory; there is no sandboxing beyond that.

use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
#[cfg(unix)]
use tracing::debug;

use radb_core::error::Result;

use super::{Dirent, FileReader, FileStat, FileSystem, FileWriter};

pub struct LocalFileSystem {
    base_dir: PathBuf,
}

impl LocalFileSystem {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Rooted at the process's current working directory.
    pub fn current_dir() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let trimmed = path.trim_start_matches(['/', '\\']);
        normalize(&self.base_dir.join(trimmed))
    }
}

/// Normalize a path by dropping `.` and resolving `..` lexically, without
/// touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

fn metadata_to_stat(meta: &std::fs::Metadata) -> FileStat {
    FileStat {
        mode: file_mode(meta),
        size: meta.len().min(u32::MAX as u64) as u32,
        mtime: mtime_secs(meta),
    }
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    if meta.is_dir() {
        0o040755
    } else {
        0o100644
    }
}

fn mtime_secs(meta: &std::fs::Metadata) -> u32 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs().min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        let resolved = self.resolve(path);
        match tokio::fs::metadata(&resolved).await {
            Ok(meta) => Ok(Some(metadata_to_stat(&meta))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<Dirent>> {
        let resolved = self.resolve(path);
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&resolved).await?;
        while let Some(entry) = dir.next_entry().await? {
            // An entry can vanish between listing and stat; skip it.
            let meta = match tokio::fs::symlink_metadata(entry.path()).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            entries.push(Dirent {
                name: entry.file_name().to_string_lossy().into_owned(),
                mode: file_mode(&meta),
                size: meta.len().min(u32::MAX as u64) as u32,
                mtime: mtime_secs(&meta),
            });
        }
        Ok(entries)
    }

    async fn open_for_read(&self, path: &str) -> Result<FileReader> {
        let file = tokio::fs::File::open(self.resolve(path)).await?;
        Ok(Box::new(file))
    }

    async fn open_for_write(&self, path: &str, mode: u32) -> Result<FileWriter> {
        let resolved = self.resolve(path);
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&resolved).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(mode & 0o7777);
            if let Err(e) = tokio::fs::set_permissions(&resolved, perms).await {
                debug!(path = %resolved.display(), error = %e, "chmod failed");
            }
        }
        #[cfg(not(unix))]
        let _ = mode;

        Ok(Box::new(file))
    }

    async fn set_mtime(&self, path: &str, mtime: u32) -> Result<()> {
        let resolved = self.resolve(path);
        let when = UNIX_EPOCH + Duration::from_secs(u64::from(mtime));
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let file = std::fs::OpenOptions::new().write(true).open(&resolved)?;
            file.set_modified(when)
        })
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))??;
        Ok(())
    }

    async fn makedirs(&self, path: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.resolve(path)).await?;
        Ok(())
    }
}

impl std::fmt::Debug for LocalFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFileSystem")
            .field("base_dir", &self.base_dir)
            .finish()
    }
}
