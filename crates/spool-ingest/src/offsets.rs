//! Durable resume offsets
//!
//! The engine only ever reads offsets (once per file open). Sinks write them
//! after records have been delivered, so a crash between delivery and commit
//! replays records rather than losing them.

use serde::{Deserialize, Serialize};
use spool_common::{Result, SpoolError};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::emitter::SourcePartition;

pub trait OffsetStore: Send + Sync {
    /// Last committed offset of `partition`, if any
    fn load(&self, partition: &SourcePartition) -> Result<Option<u64>>;

    fn commit(&self, partition: &SourcePartition, offset: u64) -> Result<()>;

    /// Commit several partitions at once
    fn commit_all(&self, offsets: &[(SourcePartition, u64)]) -> Result<()> {
        for (partition, offset) in offsets {
            self.commit(partition, *offset)?;
        }
        Ok(())
    }
}

fn poisoned<T>(_: T) -> SpoolError {
    SpoolError::OffsetStore("offset store lock poisoned".to_string())
}

/// Offsets kept in process memory
#[derive(Debug, Default)]
pub struct MemoryOffsetStore {
    offsets: Mutex<HashMap<String, u64>>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OffsetStore for MemoryOffsetStore {
    fn load(&self, partition: &SourcePartition) -> Result<Option<u64>> {
        let offsets = self.offsets.lock().map_err(poisoned)?;
        Ok(offsets.get(&partition.file_name).copied())
    }

    fn commit(&self, partition: &SourcePartition, offset: u64) -> Result<()> {
        let mut offsets = self.offsets.lock().map_err(poisoned)?;
        offsets.insert(partition.file_name.clone(), offset);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct StoredOffset {
    offset: u64,
}

/// Offsets persisted as `{"<fileName>": {"offset": n}}`
///
/// Every commit rewrites the whole document through a temporary file in the
/// same directory followed by a rename.
#[derive(Debug)]
pub struct FileOffsetStore {
    path: PathBuf,
    offsets: Mutex<BTreeMap<String, StoredOffset>>,
}

impl FileOffsetStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let offsets = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                SpoolError::OffsetStore(format!("corrupt offset file '{}': {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), partitions = offsets.len(), "Loaded offsets");
        Ok(Self {
            path,
            offsets: Mutex::new(offsets),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, offsets: &BTreeMap<String, StoredOffset>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, offsets)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| {
            SpoolError::OffsetStore(format!("cannot replace '{}': {}", self.path.display(), e))
        })?;
        Ok(())
    }
}

impl OffsetStore for FileOffsetStore {
    fn load(&self, partition: &SourcePartition) -> Result<Option<u64>> {
        let offsets = self.offsets.lock().map_err(poisoned)?;
        Ok(offsets.get(&partition.file_name).map(|o| o.offset))
    }

    fn commit(&self, partition: &SourcePartition, offset: u64) -> Result<()> {
        self.commit_all(&[(partition.clone(), offset)])
    }

    fn commit_all(&self, batch: &[(SourcePartition, u64)]) -> Result<()> {
        let mut offsets = self.offsets.lock().map_err(poisoned)?;
        for (partition, offset) in batch {
            offsets.insert(partition.file_name.clone(), StoredOffset { offset: *offset });
        }
        self.persist(&offsets)
    }
}
