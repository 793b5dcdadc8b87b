//! File Store: the directory of generated `.docx` artifacts.
//!
//! Artifacts are addressed by an [`ArtifactName`] of the form
//! `{stem}_{uuid}.docx`. The UUID is the access key; there is no index or
//! database, the directory listing *is* the state.
//!
//! - [`FileStore::save`] writes to a hidden temporary file and renames it
//!   into place, so a reader never sees a partial artifact.
//! - [`FileStore::cleanup_older_than`] deletes artifacts whose modification
//!   time is strictly before the cutoff. Entries that disappear during the
//!   scan are skipped. Repeating a cleanup with the same cutoff deletes
//!   nothing more.

use chrono::{DateTime, Utc};
use std::fmt;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use uuid::Uuid;

pub const ARTIFACT_EXTENSION: &str = ".docx";
/// Suffix of the hidden file a save writes before renaming into place.
const TEMP_SUFFIX: &str = ".tmp";
const DEFAULT_STEM: &str = "document";
const MAX_STEM_CHARS: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("File not found")]
    NotFound,
    #[error("invalid artifact name: {0}")]
    InvalidName(String),
    #[error("storage I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A validated artifact file name: `{stem}_{uuid}.docx`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactName {
    name: String,
}

impl ArtifactName {
    /// Allocate a fresh name. `stem` is sanitised; `None` gives `document`.
    pub fn generate(stem: Option<&str>) -> Self {
        let stem = stem.map(sanitize_stem).filter(|s| !s.is_empty());
        let stem = stem.as_deref().unwrap_or(DEFAULT_STEM);
        let id = Uuid::new_v4();
        Self {
            name: format!("{}_{}{}", stem, id, ARTIFACT_EXTENSION),
        }
    }

    /// Validate a name received from a client.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidName(raw.to_string());
        if raw.contains(['/', '\\', '\0']) || raw.contains("..") || raw.starts_with('.') {
            return Err(invalid());
        }
        let base = raw.strip_suffix(ARTIFACT_EXTENSION).ok_or_else(invalid)?;
        let (stem, id) = base.rsplit_once('_').ok_or_else(invalid)?;
        if stem.is_empty() || sanitize_stem(stem) != stem {
            return Err(invalid());
        }
        Uuid::parse_str(id).map_err(|_| invalid())?;
        Ok(Self {
            name: raw.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Reduce a user-supplied file name to `[A-Za-z0-9_-]`, without extension.
fn sanitize_stem(raw: &str) -> String {
    let raw = raw.trim();
    let raw = raw
        .strip_suffix(ARTIFACT_EXTENSION)
        .or_else(|| raw.strip_suffix(".DOCX"))
        .unwrap_or(raw);
    let mut out = String::new();
    for c in raw.chars() {
        if out.chars().count() >= MAX_STEM_CHARS {
            break;
        }
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            out.push(c);
        } else if c.is_whitespace() || c == '.' {
            out.push('-');
        }
    }
    out.trim_matches(['-', '_']).to_string()
}

/// One stored artifact, as reported by [`FileStore::list`].
#[derive(Debug, Clone)]
pub struct ArtifactInfo {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open the store, creating the directory if it does not exist.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &ArtifactName) -> PathBuf {
        self.dir.join(name.as_str())
    }

    /// Persist `bytes` under `name`, atomically.
    pub async fn save(&self, name: &ArtifactName, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?;

        let final_path = self.path_for(name);
        let tmp_path = self.dir.join(format!(".{}{}", name.as_str(), TEMP_SUFFIX));

        if let Err(e) = tokio::fs::write(&tmp_path, bytes).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StoreError::io(&tmp_path, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StoreError::io(&final_path, e));
        }
        Ok(final_path)
    }

    /// Read an artifact. Malformed and unknown names are both `NotFound`.
    pub async fn fetch(&self, raw_name: &str) -> Result<(ArtifactName, Vec<u8>), StoreError> {
        let name = ArtifactName::parse(raw_name).map_err(|_| StoreError::NotFound)?;
        let path = self.path_for(&name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok((name, bytes)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Delete artifacts older than `max_age`. Returns the number deleted.
    pub async fn cleanup(&self, max_age: Duration) -> Result<usize, StoreError> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.cleanup_older_than(cutoff).await
    }

    /// Delete artifacts whose mtime is strictly before `cutoff`.
    ///
    /// Temp files left behind by an interrupted [`FileStore::save`] are
    /// removed under the same rule but not counted.
    pub async fn cleanup_older_than(&self, cutoff: SystemTime) -> Result<usize, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };

        let mut deleted = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?
        {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let leftover = file_name.starts_with('.') && file_name.ends_with(TEMP_SUFFIX);
            let artifact = !file_name.starts_with('.') && file_name.ends_with(ARTIFACT_EXTENSION);
            if !leftover && !artifact {
                continue;
            }

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) if e.kind() == IoErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(&entry.path(), e)),
            };
            if modified >= cutoff {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) if leftover => {
                    tracing::debug!(file = file_name, "deleted stale temp file");
                }
                Ok(()) => {
                    deleted += 1;
                    tracing::debug!(artifact = file_name, "deleted expired artifact");
                }
                Err(e) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&entry.path(), e)),
            }
        }
        Ok(deleted)
    }

    /// Stored artifacts, newest first.
    pub async fn list(&self) -> Result<Vec<ArtifactInfo>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if ArtifactName::parse(&name).is_err() {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            out.push(ArtifactInfo {
                name,
                size: meta.len(),
                modified,
            });
        }
        out.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(out)
    }
}
