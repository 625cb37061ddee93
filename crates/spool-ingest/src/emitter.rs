//! Turns decoded records into source records
//!
//! Every emitted record carries its source partition (`fileName`) and the
//! offset reached once it is delivered. Committing that offset and later
//! skipping that many records resumes the file right after it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use spool_common::{FileMetadata, Result, SpoolError};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{MetadataLocation, SpoolConfig, TimestampMode};
use crate::schema::{FieldValue, Record, Schema};

pub const HEADER_FILE_PATH: &str = "file.path";
pub const HEADER_FILE_NAME: &str = "file.name";
pub const HEADER_FILE_NAME_WITHOUT_EXTENSION: &str = "file.name.without.extension";
pub const HEADER_FILE_RELATIVE_PATH: &str = "file.relative.path";
pub const HEADER_FILE_PARENT_DIR_NAME: &str = "file.parent.dir.name";
pub const HEADER_FILE_LENGTH: &str = "file.length";
pub const HEADER_FILE_LAST_MODIFIED: &str = "file.last.modified";
pub const HEADER_FILE_OFFSET: &str = "file.offset";

/// Resume offsets are keyed by this partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourcePartition {
    #[serde(rename = "fileName")]
    pub file_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceOffset {
    pub offset: u64,
}

/// A record ready for the sink
#[derive(Debug, Clone, Serialize)]
pub struct SourceRecord {
    pub topic: String,
    pub partition: SourcePartition,
    pub offset: SourceOffset,
    #[serde(skip)]
    pub key_schema: Option<Arc<Schema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Record>,
    #[serde(skip)]
    pub value_schema: Arc<Schema>,
    pub value: Record,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// How each record's timestamp is chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampPolicy {
    Field(String),
    FileTime,
    ProcessTime,
}

impl TimestampPolicy {
    pub fn from_config(config: &SpoolConfig) -> Self {
        match config.timestamp_mode {
            TimestampMode::Field => {
                TimestampPolicy::Field(config.timestamp_field.clone().unwrap_or_default())
            }
            TimestampMode::FileTime => TimestampPolicy::FileTime,
            TimestampMode::ProcessTime => TimestampPolicy::ProcessTime,
        }
    }

    fn resolve(&self, file: &FileMetadata, offset: u64, value: &Record) -> Result<DateTime<Utc>> {
        match self {
            TimestampPolicy::Field(name) => value
                .get(name)
                .and_then(FieldValue::as_timestamp)
                .ok_or_else(|| {
                    SpoolError::decode(
                        &file.name,
                        offset,
                        format!("timestamp field '{}' is missing or null", name),
                    )
                }),
            TimestampPolicy::FileTime => Ok(file.last_modified),
            TimestampPolicy::ProcessTime => Ok(Utc::now()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordEmitter {
    topic: String,
    metadata_location: MetadataLocation,
    metadata_field: String,
    timestamp: TimestampPolicy,
}

impl RecordEmitter {
    pub fn from_config(config: &SpoolConfig) -> Self {
        Self {
            topic: config.topic.clone(),
            metadata_location: config.metadata_location,
            metadata_field: config.metadata_field.clone(),
            timestamp: TimestampPolicy::from_config(config),
        }
    }

    /// Wrap `value` read from `file`; `offset` is the position after it
    pub fn emit(
        &self,
        file: &FileMetadata,
        offset: u64,
        key_schema: Option<Arc<Schema>>,
        key: Option<Record>,
        value_schema: Arc<Schema>,
        mut value: Record,
    ) -> Result<SourceRecord> {
        let timestamp = self.timestamp.resolve(file, offset.saturating_sub(1), &value)?;

        let headers = match self.metadata_location {
            MetadataLocation::Headers => file_metadata(file, offset),
            MetadataLocation::Field => {
                value.put(&self.metadata_field, FieldValue::Map(file_metadata(file, offset)))?;
                BTreeMap::new()
            }
            MetadataLocation::None => BTreeMap::new(),
        };

        Ok(SourceRecord {
            topic: self.topic.clone(),
            partition: SourcePartition {
                file_name: file.name.clone(),
            },
            offset: SourceOffset { offset },
            key_schema,
            key,
            value_schema,
            value,
            timestamp: Some(timestamp),
            headers,
        })
    }
}

fn file_metadata(file: &FileMetadata, offset: u64) -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();
    meta.insert(HEADER_FILE_PATH.to_string(), file.path.display().to_string());
    meta.insert(HEADER_FILE_NAME.to_string(), file.name.clone());
    meta.insert(
        HEADER_FILE_NAME_WITHOUT_EXTENSION.to_string(),
        file.name_without_extension().to_string(),
    );
    meta.insert(
        HEADER_FILE_RELATIVE_PATH.to_string(),
        file.relative_path.display().to_string(),
    );
    if let Some(parent) = file.parent_dir_name() {
        meta.insert(HEADER_FILE_PARENT_DIR_NAME.to_string(), parent);
    }
    meta.insert(HEADER_FILE_LENGTH.to_string(), file.length.to_string());
    meta.insert(HEADER_FILE_LAST_MODIFIED.to_string(), file.last_modified.to_rfc3339());
    meta.insert(HEADER_FILE_OFFSET.to_string(), offset.to_string());
    meta
}
