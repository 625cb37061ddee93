//! Downstream record sinks
//!
//! A sink delivers a batch and only then commits the highest offset it saw
//! for each partition. Delivery is at-least-once: records sent before a crash
//! but not yet committed are read again after restart.

use async_trait::async_trait;
use spool_common::{Result, SpoolError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::emitter::{SourcePartition, SourceRecord};
use crate::offsets::OffsetStore;

#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Deliver `batch` and commit its offsets
    async fn send(&self, batch: Vec<SourceRecord>) -> Result<()>;
}

/// Last offset per partition, in first-seen order
fn last_offsets(batch: &[SourceRecord]) -> Vec<(SourcePartition, u64)> {
    let mut offsets: Vec<(SourcePartition, u64)> = Vec::new();
    for record in batch {
        match offsets.iter_mut().find(|(p, _)| p == &record.partition) {
            Some((_, offset)) => *offset = (*offset).max(record.offset.offset),
            None => offsets.push((record.partition.clone(), record.offset.offset)),
        }
    }
    offsets
}

/// Appends records as JSON lines to a file
pub struct JsonLinesSink {
    path: PathBuf,
    writer: tokio::sync::Mutex<BufWriter<tokio::fs::File>>,
    offsets: Arc<dyn OffsetStore>,
}

impl JsonLinesSink {
    pub async fn open(path: impl Into<PathBuf>, offsets: Arc<dyn OffsetStore>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| SpoolError::Sink(format!("cannot open '{}': {}", path.display(), e)))?;

        Ok(Self {
            path,
            writer: tokio::sync::Mutex::new(BufWriter::new(file)),
            offsets,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn send(&self, batch: Vec<SourceRecord>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for record in &batch {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        {
            let mut writer = self.writer.lock().await;
            writer
                .write_all(&buf)
                .await
                .map_err(|e| SpoolError::Sink(format!("write to '{}' failed: {}", self.path.display(), e)))?;
            writer
                .flush()
                .await
                .map_err(|e| SpoolError::Sink(format!("flush of '{}' failed: {}", self.path.display(), e)))?;
        }

        self.offsets.commit_all(&last_offsets(&batch))?;
        tracing::debug!(records = batch.len(), path = %self.path.display(), "Delivered batch");
        Ok(())
    }
}

/// Keeps delivered records in memory
pub struct MemorySink {
    records: Mutex<Vec<SourceRecord>>,
    offsets: Arc<dyn OffsetStore>,
}

impl MemorySink {
    pub fn new(offsets: Arc<dyn OffsetStore>) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            offsets,
        }
    }

    /// Everything delivered so far
    pub fn records(&self) -> Vec<SourceRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn send(&self, batch: Vec<SourceRecord>) -> Result<()> {
        let offsets = last_offsets(&batch);
        self.records
            .lock()
            .map_err(|_| SpoolError::Sink("memory sink lock poisoned".to_string()))?
            .extend(batch);
        self.offsets.commit_all(&offsets)
    }
}
