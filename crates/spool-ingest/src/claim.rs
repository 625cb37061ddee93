//! Claim markers
//!
//! A claim is a zero-byte sibling file `<name><extension>` created with
//! create-if-absent semantics. Whoever creates it owns the input file until
//! the marker is removed. Markers left behind by a crashed worker are not
//! reclaimed automatically; an operator removes them.

use spool_common::{Result, SpoolError};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Marker path for `file` with the given processing extension
pub fn marker_path(file: &Path, extension: &str) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(extension);
    PathBuf::from(name)
}

/// A claim held by this worker
#[derive(Debug, PartialEq, Eq)]
pub struct ClaimMarker {
    path: PathBuf,
}

impl ClaimMarker {
    /// Atomically claim `file`.
    ///
    /// Returns `Ok(None)` when another worker already holds the claim.
    pub fn acquire(file: &Path, extension: &str) -> Result<Option<Self>> {
        let path = marker_path(file, extension);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                tracing::debug!(marker = %path.display(), "Claim marker created");
                Ok(Some(Self { path }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(SpoolError::Claim(format!(
                "cannot create claim marker '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the marker, releasing the claim
    pub fn release(self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            // Already gone is the desired end state
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(marker = %self.path.display(), "Claim marker vanished before release");
                Ok(())
            }
            Err(e) => Err(SpoolError::Claim(format!(
                "cannot remove claim marker '{}': {}",
                self.path.display(),
                e
            ))),
        }
    }
}
