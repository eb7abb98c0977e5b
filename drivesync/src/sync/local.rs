use std::io;
use std::path::{Path, PathBuf};

use md5::Context;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::io::AsyncReadExt;

use super::conflict::conflict_path;
use super::transfer::is_partial;
use crate::tree::Stamp;

#[derive(Debug, Error)]
pub enum LocalError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0} is not valid UTF-8")]
    NonUtf8Name(PathBuf),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> LocalError + '_ {
    move |source| LocalError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What the local filesystem holds at a resource's path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStat {
    pub is_folder: bool,
    pub stamp: Stamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub name: String,
    pub is_folder: bool,
}

/// Filesystem primitives used by the sync pass. Names in `ignored` (the
/// state file) and in-flight `.partial` downloads are invisible to scans.
#[derive(Debug, Clone, Default)]
pub struct LocalFs {
    ignored: Vec<String>,
}

impl LocalFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignoring(mut self, name: impl Into<String>) -> Self {
        self.ignored.push(name.into());
        self
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        is_partial(name) || self.ignored.iter().any(|ignored| ignored == name)
    }

    /// `None` when nothing exists at `path`. Files are hashed; folders carry
    /// only their modification time.
    pub async fn stat(&self, path: &Path) -> Result<Option<LocalStat>, LocalError> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(path)(err)),
        };
        let modified = meta
            .modified()
            .map(|at| OffsetDateTime::from(at).unix_timestamp())
            .unwrap_or_default();

        if meta.is_dir() {
            return Ok(Some(LocalStat {
                is_folder: true,
                stamp: Stamp {
                    modified,
                    md5: None,
                    size: None,
                },
            }));
        }

        Ok(Some(LocalStat {
            is_folder: false,
            stamp: Stamp {
                modified,
                md5: Some(self.md5(path).await?),
                size: Some(meta.len()),
            },
        }))
    }

    pub async fn md5(&self, path: &Path) -> Result<String, LocalError> {
        let mut file = tokio::fs::File::open(path).await.map_err(io_err(path))?;
        let mut ctx = Context::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buf).await.map_err(io_err(path))?;
            if read == 0 {
                break;
            }
            ctx.consume(&buf[..read]);
        }
        Ok(format!("{:x}", ctx.compute()))
    }

    /// Creates the directory, replacing a plain file standing in its way.
    pub async fn create_dir(&self, path: &Path) -> Result<(), LocalError> {
        if let Ok(meta) = tokio::fs::metadata(path).await
            && meta.is_file()
        {
            tokio::fs::remove_file(path).await.map_err(io_err(path))?;
        }
        tokio::fs::create_dir_all(path).await.map_err(io_err(path))
    }

    /// Removes a file or a whole directory. Missing paths are not an error.
    pub async fn remove(&self, path: &Path) -> Result<(), LocalError> {
        let meta = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(io_err(path)(err)),
        };
        let removed = if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        removed.map_err(io_err(path))
    }

    /// Moves a local file out of the way of a conflicting download and
    /// returns where it went.
    pub async fn rename_aside(&self, path: &Path, stamp: i64) -> Result<PathBuf, LocalError> {
        let target = conflict_path(path, stamp);
        tokio::fs::rename(path, &target)
            .await
            .map_err(io_err(path))?;
        Ok(target)
    }

    /// Follows a rename or move made on the remote side.
    pub async fn move_to(&self, from: &Path, to: &Path) -> Result<(), LocalError> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err(parent))?;
        }
        tokio::fs::rename(from, to).await.map_err(io_err(from))
    }

    /// Entries of a directory, sorted by name.
    pub async fn list_dir(&self, path: &Path) -> Result<Vec<LocalEntry>, LocalError> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(path).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(entries),
            Err(err) => return Err(io_err(path)(err)),
        };
        while let Some(entry) = dir.next_entry().await.map_err(io_err(path))? {
            let name = entry
                .file_name()
                .into_string()
                .map_err(|_| LocalError::NonUtf8Name(entry.path()))?;
            if self.is_ignored(&name) {
                continue;
            }
            let is_folder = entry
                .file_type()
                .await
                .map_err(io_err(&entry.path()))?
                .is_dir();
            entries.push(LocalEntry { name, is_folder });
        }
        entries.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(entries)
    }
}
