//! Common types used across spool

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SpoolError};

/// Snapshot of an input file taken when it was discovered.
///
/// Sizes and timestamps are not refreshed afterwards; the selector re-lists the
/// directory from scratch on every refill, so a stale snapshot never outlives
/// one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Absolute path of the file
    pub path: PathBuf,

    /// Path relative to the input root (equal to `name` for flat layouts)
    pub relative_path: PathBuf,

    /// File name including extension
    pub name: String,

    /// Length in bytes
    pub length: u64,

    /// Last modification time
    pub last_modified: DateTime<Utc>,
}

impl FileMetadata {
    /// Read metadata for `path`, computing its position relative to `root`.
    pub fn from_path(path: impl AsRef<Path>, root: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path)?;
        let modified = meta.modified()?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| SpoolError::config(format!("'{}' has no file name", path.display())))?;

        let relative_path = path
            .strip_prefix(root.as_ref())
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(&name));

        Ok(Self {
            path: path.to_path_buf(),
            relative_path,
            name,
            length: meta.len(),
            last_modified: DateTime::<Utc>::from(modified),
        })
    }

    /// File name with the final extension removed (`users.csv.gz` -> `users.csv`)
    pub fn name_without_extension(&self) -> &str {
        match self.name.rfind('.') {
            Some(0) | None => &self.name,
            Some(idx) => &self.name[..idx],
        }
    }

    /// Name of the directory containing the file, if any
    pub fn parent_dir_name(&self) -> Option<String> {
        self.path
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Directory portion of `relative_path` (empty for files at the root)
    pub fn relative_parent(&self) -> &Path {
        self.relative_path.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Calendar date (UTC) of the last modification
    pub fn modified_date(&self) -> NaiveDate {
        self.last_modified.date_naive()
    }
}
