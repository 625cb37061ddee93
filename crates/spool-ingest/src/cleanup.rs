//! What happens to an input file after its session ends

use chrono::Utc;
use spool_common::{FileMetadata, Result};
use std::path::{Path, PathBuf};

use crate::config::{CleanupPolicyKind, SpoolConfig};

/// Where a file ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Moved(PathBuf),
    MovedByDate(PathBuf),
    Deleted,
    /// Left in the input directory
    Retained,
    /// Moved into the error directory
    Errored(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Cleanup {
    policy: CleanupPolicyKind,
    finished_path: PathBuf,
    error_path: PathBuf,
    maintain_relative_path: bool,
}

impl Cleanup {
    pub fn from_config(config: &SpoolConfig) -> Self {
        Self {
            policy: config.cleanup_policy,
            finished_path: config.finished_path.clone(),
            error_path: config.error_path.clone(),
            maintain_relative_path: config.cleanup_maintain_relative_path,
        }
    }

    pub fn policy(&self) -> CleanupPolicyKind {
        self.policy
    }

    /// Dispose of a fully processed file according to the policy
    pub fn on_success(&self, file: &FileMetadata) -> Result<CleanupOutcome> {
        let outcome = match self.policy {
            CleanupPolicyKind::Move => {
                CleanupOutcome::Moved(self.relocate(file, &self.finished_path)?)
            }
            CleanupPolicyKind::MoveByDate => {
                let dated = self
                    .finished_path
                    .join(file.modified_date().format("%Y-%m-%d").to_string());
                match std::fs::create_dir_all(&dated) {
                    Ok(()) => CleanupOutcome::MovedByDate(self.relocate(file, &dated)?),
                    Err(e) => {
                        tracing::warn!(
                            dir = %dated.display(),
                            error = %e,
                            "Cannot create dated directory, moving to finished root"
                        );
                        CleanupOutcome::Moved(self.relocate(file, &self.finished_path)?)
                    }
                }
            }
            CleanupPolicyKind::Delete => {
                std::fs::remove_file(&file.path)?;
                CleanupOutcome::Deleted
            }
            CleanupPolicyKind::None => CleanupOutcome::Retained,
        };

        tracing::info!(file = %file.path.display(), outcome = ?outcome, "Cleaned up finished file");
        Ok(outcome)
    }

    /// Move a failed file into the error directory, whatever the policy
    pub fn on_error(&self, file: &FileMetadata) -> Result<CleanupOutcome> {
        let dest = self.relocate(file, &self.error_path)?;
        tracing::warn!(file = %file.path.display(), dest = %dest.display(), "Moved file to error directory");
        Ok(CleanupOutcome::Errored(dest))
    }

    fn relocate(&self, file: &FileMetadata, root: &Path) -> Result<PathBuf> {
        let dir = if self.maintain_relative_path {
            root.join(file.relative_parent())
        } else {
            root.to_path_buf()
        };
        std::fs::create_dir_all(&dir)?;

        let dest = unique_destination(&dir, &file.name);
        if dest.file_name() != Some(std::ffi::OsStr::new(&file.name)) {
            tracing::warn!(
                file = %file.path.display(),
                dest = %dest.display(),
                "Destination already holds a file with this name, renaming"
            );
        }
        move_file(&file.path, &dest)?;
        Ok(dest)
    }
}

/// `dir/name`, or `dir/<stem>.<utc timestamp>[-n]<.ext>` when that is taken
fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let plain = dir.join(name);
    if !plain.exists() {
        return plain;
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f").to_string();

    let mut attempt = 0u32;
    loop {
        let suffix = match attempt {
            0 => stamp.clone(),
            n => format!("{}-{}", stamp, n),
        };
        let candidate = dir.join(format!("{}.{}{}", stem, suffix, ext));
        if !candidate.exists() {
            return candidate;
        }
        attempt += 1;
    }
}

/// Rename, falling back to copy and delete across filesystems
fn move_file(src: &Path, dest: &Path) -> Result<()> {
    if let Err(rename_err) = std::fs::rename(src, dest) {
        if !src.exists() {
            return Err(rename_err.into());
        }
        tracing::debug!(src = %src.display(), error = %rename_err, "Rename failed, copying instead");
        std::fs::copy(src, dest)?;
        std::fs::remove_file(src)?;
    }
    Ok(())
}
