use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tokio::fs;
use tokio::io::ErrorKind;

use crate::config::{MAX_NAME_PROBES, TEMP_PREFIX};

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Validates a client-supplied file name and joins it to the root.
    ///
    /// Every request that carries a file name goes through here; nothing
    /// else in the crate builds a filesystem path from client input. The
    /// name must reduce to exactly one normal path segment: separators,
    /// `.`/`..`, absolute prefixes, NUL bytes, and hidden names (which
    /// include the upload temp namespace) are all rejected.
    pub fn resolve_name(&self, raw: &str) -> Result<PathBuf, StorageError> {
        let trimmed = raw.trim().trim_start_matches(['/', '\\']);
        if trimmed.is_empty() || trimmed.contains('\0') || trimmed.contains('\\') {
            return Err(StorageError::InvalidPath);
        }

        let mut components = Path::new(trimmed).components();
        let segment = match (components.next(), components.next()) {
            (Some(Component::Normal(segment)), None) => segment,
            _ => return Err(StorageError::InvalidPath),
        };
        let name = segment.to_str().ok_or(StorageError::InvalidPath)?;
        if name != trimmed || name.starts_with('.') {
            return Err(StorageError::InvalidPath);
        }

        let target = self.root.join(name);
        if target.parent() != Some(self.root.as_path()) {
            return Err(StorageError::InvalidPath);
        }
        Ok(target)
    }

    /// Picks the final path for `desired`, appending ` (n)` before the
    /// extension until an unused name is found. The caller must hold the
    /// name lock for `desired` so concurrent uploads cannot agree on the
    /// same candidate.
    pub async fn next_free_name(&self, desired: &str) -> Result<PathBuf, StorageError> {
        let first = self.resolve_name(desired)?;
        if !fs::try_exists(&first).await? {
            return Ok(first);
        }

        let desired = desired.trim().trim_start_matches(['/', '\\']);
        let (stem, ext) = match desired.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (desired, None),
        };
        for n in 1..=MAX_NAME_PROBES {
            let candidate = match ext {
                Some(ext) => format!("{stem} ({n}).{ext}"),
                None => format!("{stem} ({n})"),
            };
            let target = self.resolve_name(&candidate)?;
            if !fs::try_exists(&target).await? {
                return Ok(target);
            }
        }
        Err(StorageError::Io(io::Error::other(format!(
            "no free name for {desired:?} after {MAX_NAME_PROBES} probes"
        ))))
    }

    /// Lists the root directory, newest first. Re-reads the filesystem on
    /// every call so externally added or removed files show up; hidden
    /// entries, temp artifacts, and subdirectories are skipped.
    pub async fn list_dir(&self) -> Result<Vec<FileEntry>, StorageError> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || name.starts_with(TEMP_PREFIX) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                // entry may vanish between read_dir and stat
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::Io(err)),
            };
            if !metadata.is_file() {
                continue;
            }
            entries.push(self.entry_for(name, &metadata));
        }

        entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    pub fn entry_for(&self, name: String, metadata: &std::fs::Metadata) -> FileEntry {
        let modified = metadata
            .modified()
            .ok()
            .and_then(|ts| ts.duration_since(UNIX_EPOCH).ok());
        FileEntry {
            name,
            size: metadata.len(),
            modified: modified.map(|d| d.as_secs()).unwrap_or(0),
            modified_text: modified.map(format_timestamp),
        }
    }
}

fn format_timestamp(duration: Duration) -> String {
    let timestamp = UNIX_EPOCH + duration;
    let datetime: DateTime<Utc> = timestamp.into();
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    QuotaExceeded,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub modified: u64,
    pub modified_text: Option<String>,
}
