//! Error types for the spool workspace
//!
//! Errors are grouped by how the engine reacts to them:
//!
//! - **Startup** (`Config`, `SchemaDrift`, `SchemaInference`): abort before any
//!   file is claimed.
//! - **Per-file** (`Decode`, `Conversion`): the file is routed to the error
//!   directory; fatal to the worker only when halt-on-error is set.
//! - **Transient** (`Io` while listing or opening): logged and retried on the
//!   next poll.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for spool operations
pub type Result<T> = std::result::Result<T, SpoolError>;

/// Main error type for spool
#[derive(Error, Debug)]
pub enum SpoolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema drift detected across {} sampled schema(s):\n{}", .groups.len(), SchemaGroups(.groups))]
    SchemaDrift { groups: Vec<SchemaGroup> },

    #[error("Schema inference failed: {0}")]
    SchemaInference(String),

    #[error("Failed to decode '{file}' at record offset {offset}: {message}")]
    Decode {
        file: String,
        offset: u64,
        message: String,
    },

    #[error("Cannot convert field '{field}' value '{value}' to {expected}")]
    Conversion {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Claim error: {0}")]
    Claim(String),

    #[error("Offset store error: {0}")]
    OffsetStore(String),

    #[error("Sink error: {0}")]
    Sink(String),
}

impl SpoolError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a decode error for a file at a record offset
    pub fn decode(file: impl Into<String>, offset: u64, msg: impl Into<String>) -> Self {
        Self::Decode {
            file: file.into(),
            offset,
            message: msg.into(),
        }
    }

    /// Create a conversion error
    pub fn conversion(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::Conversion {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    /// True for errors that abort startup rather than a single file
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            SpoolError::Config(_) | SpoolError::SchemaDrift { .. } | SpoolError::SchemaInference(_)
        )
    }
}

/// Sampled files that share one serialized value schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaGroup {
    /// Serialized value schema shared by every member
    pub fingerprint: String,
    /// Files whose inferred schema serialized to `fingerprint`
    pub files: Vec<PathBuf>,
}

struct SchemaGroups<'a>(&'a [SchemaGroup]);

impl fmt::Display for SchemaGroups<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, group) in self.0.iter().enumerate() {
            let files: Vec<String> = group.files.iter().map(|p| p.display().to_string()).collect();
            writeln!(f, "  [{}] {}", i + 1, group.fingerprint)?;
            writeln!(f, "      files: {}", files.join(", "))?;
        }
        Ok(())
    }
}
