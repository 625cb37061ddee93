//! Worker configuration
//!
//! A `SpoolConfig` is read from a TOML file, optionally overridden by `SPOOL_*`
//! environment variables (a `.env` file is honoured), and validated before the
//! worker touches any input file. Validation fails fast: a missing directory,
//! a malformed pattern or an unsupported partitioner is a startup error, never
//! a silently applied default.

use regex::Regex;
use serde::{Deserialize, Serialize};
use spool_common::logging::LogConfig;
use spool_common::{Result, SpoolError};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::schema::{FieldType, Schema, SchemaPair};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default suffix of claim marker files.
pub const DEFAULT_PROCESSING_FILE_EXTENSION: &str = ".PROCESSING";

/// Default maximum number of records returned by one poll.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default wait after an empty poll, in milliseconds.
pub const DEFAULT_EMPTY_POLL_WAIT_MS: u64 = 500;

/// Default read buffer for input files (128 KiB).
pub const DEFAULT_FILE_BUFFER_SIZE_BYTES: usize = 128 * 1024;

/// Default topic attached to emitted records.
pub const DEFAULT_TOPIC: &str = "spool";

/// Default name of the value field carrying file metadata.
pub const DEFAULT_METADATA_FIELD: &str = "metadata";

/// Default generated key schema name.
pub const DEFAULT_KEY_SCHEMA_NAME: &str = "spool.Key";

/// Default generated value schema name.
pub const DEFAULT_VALUE_SCHEMA_NAME: &str = "spool.Value";

/// What happens to a file once it has been fully read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicyKind {
    /// Move into the finished directory
    #[default]
    Move,
    /// Move into `finished/<yyyy-MM-dd>/` using the file's modification date
    MoveByDate,
    /// Delete the file
    Delete,
    /// Leave the file where it is. Nothing prevents it from being selected
    /// again after a restart.
    None,
}

/// Source of the timestamp attached to each record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimestampMode {
    /// Read from `timestamp_field` of the value
    Field,
    /// Last-modified time of the input file
    FileTime,
    /// Wall clock at emission
    #[default]
    ProcessTime,
}

/// How files are assigned to workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// Hash of the file name modulo the worker count
    #[default]
    ByName,
    /// No partitioning; only valid for a single worker
    None,
}

/// One link of the file ordering chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSortAttribute {
    NameAsc,
    NameDesc,
    LengthAsc,
    LengthDesc,
    LastModifiedAsc,
    LastModifiedDesc,
}

/// Where file metadata is attached to emitted records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetadataLocation {
    #[default]
    Headers,
    /// A `map` field of the value schema named by `metadata_field`
    Field,
    None,
}

/// Record format of the input files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    #[default]
    Csv,
    /// One JSON object per line
    Json,
    /// One record per line, stored in a single `value` string field
    Line,
}

/// CSV dialect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvConfig {
    pub separator: char,
    pub quote: char,
    /// Use the first (non-skipped) row as the field names
    pub first_row_as_header: bool,
    /// Lines to discard before the header or first record
    pub skip_lines: usize,
    /// Treat empty cells of optional fields as null
    pub empty_as_null: bool,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            separator: ',',
            quote: '"',
            first_row_as_header: true,
            skip_lines: 0,
            empty_as_null: true,
        }
    }
}

/// Schema inference settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaGenerationConfig {
    pub enabled: bool,
    /// Value fields projected into the key schema
    pub key_fields: Vec<String>,
    pub key_name: String,
    pub value_name: String,
}

impl Default for SchemaGenerationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key_fields: Vec::new(),
            key_name: DEFAULT_KEY_SCHEMA_NAME.to_string(),
            value_name: DEFAULT_VALUE_SCHEMA_NAME.to_string(),
        }
    }
}

/// Full worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoolConfig {
    /// Directory watched for input files
    pub input_path: PathBuf,
    /// Destination of successfully processed files
    pub finished_path: PathBuf,
    /// Destination of files that failed to decode
    pub error_path: PathBuf,

    /// Regular expression that must match the whole file name
    #[serde(default = "default_file_pattern")]
    pub input_file_pattern: String,
    #[serde(default)]
    pub input_path_walk_recursively: bool,
    /// Recreate the sub-directory of a file below the finished/error root
    #[serde(default)]
    pub cleanup_maintain_relative_path: bool,
    /// Files modified more recently than this are left alone
    #[serde(default)]
    pub file_minimum_age_ms: u64,
    #[serde(default = "default_processing_file_extension")]
    pub processing_file_extension: String,

    /// Records per poll; 0 reads each file to the end in one poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_empty_poll_wait_ms")]
    pub empty_poll_wait_ms: u64,
    /// Upper bound of the empty-poll back-off; defaults to `empty_poll_wait_ms`
    #[serde(default)]
    pub empty_poll_max_wait_ms: Option<u64>,
    #[serde(default = "default_file_buffer_size")]
    pub file_buffer_size_bytes: usize,

    #[serde(default)]
    pub cleanup_policy: CleanupPolicyKind,
    #[serde(default = "default_true")]
    pub halt_on_error: bool,

    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default)]
    pub timestamp_mode: TimestampMode,
    #[serde(default)]
    pub timestamp_field: Option<String>,
    /// chrono format strings tried in order when parsing timestamps
    #[serde(default = "default_timestamp_formats")]
    pub timestamp_formats: Vec<String>,

    #[serde(default)]
    pub key_schema: Option<Schema>,
    #[serde(default)]
    pub value_schema: Option<Schema>,
    #[serde(default)]
    pub schema_generation: SchemaGenerationConfig,

    #[serde(default)]
    pub task_index: u32,
    #[serde(default = "default_task_count")]
    pub task_count: u32,
    #[serde(default)]
    pub task_partitioner: PartitionStrategy,
    #[serde(default = "default_sort_attributes")]
    pub files_sort_attributes: Vec<FileSortAttribute>,

    #[serde(default)]
    pub metadata_location: MetadataLocation,
    #[serde(default = "default_metadata_field")]
    pub metadata_field: String,

    #[serde(default)]
    pub format: InputFormat,
    #[serde(default)]
    pub csv: CsvConfig,

    /// Offset store document used by the bundled sink
    #[serde(default)]
    pub offsets_path: Option<PathBuf>,
    /// JSON-lines output of the bundled sink
    #[serde(default)]
    pub output_path: Option<PathBuf>,

    #[serde(default)]
    pub logging: LogConfig,
}

fn default_file_pattern() -> String {
    ".*".to_string()
}

fn default_processing_file_extension() -> String {
    DEFAULT_PROCESSING_FILE_EXTENSION.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_empty_poll_wait_ms() -> u64 {
    DEFAULT_EMPTY_POLL_WAIT_MS
}

fn default_file_buffer_size() -> usize {
    DEFAULT_FILE_BUFFER_SIZE_BYTES
}

fn default_true() -> bool {
    true
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_timestamp_formats() -> Vec<String> {
    vec![
        "%Y-%m-%dT%H:%M:%S%.f%:z".to_string(),
        "%Y-%m-%dT%H:%M:%S%.fZ".to_string(),
        "%Y-%m-%d %H:%M:%S%.f".to_string(),
        "%Y-%m-%d".to_string(),
    ]
}

fn default_task_count() -> u32 {
    1
}

fn default_sort_attributes() -> Vec<FileSortAttribute> {
    vec![FileSortAttribute::NameAsc]
}

fn default_metadata_field() -> String {
    DEFAULT_METADATA_FIELD.to_string()
}

impl SpoolConfig {
    /// Configuration with every optional setting at its default
    pub fn new(
        input_path: impl Into<PathBuf>,
        finished_path: impl Into<PathBuf>,
        error_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            finished_path: finished_path.into(),
            error_path: error_path.into(),
            input_file_pattern: default_file_pattern(),
            input_path_walk_recursively: false,
            cleanup_maintain_relative_path: false,
            file_minimum_age_ms: 0,
            processing_file_extension: default_processing_file_extension(),
            batch_size: DEFAULT_BATCH_SIZE,
            empty_poll_wait_ms: DEFAULT_EMPTY_POLL_WAIT_MS,
            empty_poll_max_wait_ms: None,
            file_buffer_size_bytes: DEFAULT_FILE_BUFFER_SIZE_BYTES,
            cleanup_policy: CleanupPolicyKind::default(),
            halt_on_error: true,
            topic: default_topic(),
            timestamp_mode: TimestampMode::default(),
            timestamp_field: None,
            timestamp_formats: default_timestamp_formats(),
            key_schema: None,
            value_schema: None,
            schema_generation: SchemaGenerationConfig::default(),
            task_index: 0,
            task_count: 1,
            task_partitioner: PartitionStrategy::default(),
            files_sort_attributes: default_sort_attributes(),
            metadata_location: MetadataLocation::default(),
            metadata_field: default_metadata_field(),
            format: InputFormat::default(),
            csv: CsvConfig::default(),
            offsets_path: None,
            output_path: None,
            logging: LogConfig::default(),
        }
    }

    /// Read, override from the environment, and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_toml_file(path)?.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file without validating it
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SpoolError::config(format!("Cannot read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| SpoolError::config(format!("'{}': {}", path.display(), e)))
    }

    /// Parse TOML config content without validating it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SpoolError::config(format!("Invalid config: {}", e)))
    }

    /// Apply `SPOOL_*` deployment overrides
    ///
    /// - `SPOOL_INPUT_PATH`, `SPOOL_FINISHED_PATH`, `SPOOL_ERROR_PATH`
    /// - `SPOOL_TASK_INDEX`, `SPOOL_TASK_COUNT`
    /// - `SPOOL_BATCH_SIZE`, `SPOOL_HALT_ON_ERROR`
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(path) = std::env::var("SPOOL_INPUT_PATH") {
            self.input_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("SPOOL_FINISHED_PATH") {
            self.finished_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("SPOOL_ERROR_PATH") {
            self.error_path = PathBuf::from(path);
        }
        if let Some(index) = parse_env("SPOOL_TASK_INDEX")? {
            self.task_index = index;
        }
        if let Some(count) = parse_env("SPOOL_TASK_COUNT")? {
            self.task_count = count;
        }
        if let Some(size) = parse_env("SPOOL_BATCH_SIZE")? {
            self.batch_size = size;
        }
        if let Some(halt) = parse_env("SPOOL_HALT_ON_ERROR")? {
            self.halt_on_error = halt;
        }
        self.logging = self
            .logging
            .with_env_overrides()
            .map_err(|e| SpoolError::config(e.to_string()))?;
        Ok(self)
    }

    /// Validate everything that does not depend on the resolved schemas
    pub fn validate(&self) -> Result<()> {
        check_directory("input_path", &self.input_path)?;
        check_directory("finished_path", &self.finished_path)?;
        check_directory("error_path", &self.error_path)?;

        self.file_pattern()?;

        if self.processing_file_extension.is_empty() {
            return Err(SpoolError::config("processing_file_extension cannot be empty"));
        }
        if self
            .processing_file_extension
            .chars()
            .any(std::path::is_separator)
        {
            return Err(SpoolError::config(format!(
                "processing_file_extension '{}' cannot contain a path separator",
                self.processing_file_extension
            )));
        }

        if self.task_count == 0 {
            return Err(SpoolError::config("task_count must be greater than 0"));
        }
        if self.task_index >= self.task_count {
            return Err(SpoolError::config(format!(
                "task_index ({}) must be less than task_count ({})",
                self.task_index, self.task_count
            )));
        }
        if self.task_partitioner == PartitionStrategy::None && self.task_count > 1 {
            return Err(SpoolError::config(format!(
                "task_partitioner 'none' cannot distribute files across {} workers",
                self.task_count
            )));
        }

        if self.files_sort_attributes.is_empty() {
            return Err(SpoolError::config("files_sort_attributes cannot be empty"));
        }

        if self.file_buffer_size_bytes == 0 {
            return Err(SpoolError::config("file_buffer_size_bytes must be greater than 0"));
        }

        if let Some(max) = self.empty_poll_max_wait_ms {
            if max < self.empty_poll_wait_ms {
                return Err(SpoolError::config(format!(
                    "empty_poll_max_wait_ms ({}) cannot be less than empty_poll_wait_ms ({})",
                    max, self.empty_poll_wait_ms
                )));
            }
        }

        if self.value_schema.is_none() && !self.schema_generation.enabled {
            if self.format != InputFormat::Line {
                return Err(SpoolError::config(
                    "value_schema is required when schema_generation.enabled is false",
                ));
            }
        }
        if self.value_schema.is_some() && self.schema_generation.enabled {
            tracing::warn!("value_schema is configured; schema generation will be skipped");
        }
        if !self.schema_generation.enabled && !self.schema_generation.key_fields.is_empty() {
            tracing::warn!("schema_generation.key_fields ignored because generation is disabled");
        }

        if self.timestamp_mode == TimestampMode::Field
            && self.timestamp_field.as_deref().map_or(true, str::is_empty)
        {
            return Err(SpoolError::config(
                "timestamp_field is required when timestamp_mode is 'field'",
            ));
        }

        if self.metadata_location == MetadataLocation::Field && self.metadata_field.is_empty() {
            return Err(SpoolError::config(
                "metadata_field cannot be empty when metadata_location is 'field'",
            ));
        }

        if self.csv.separator == self.csv.quote {
            return Err(SpoolError::config("csv.separator and csv.quote must differ"));
        }
        if !self.csv.separator.is_ascii() || !self.csv.quote.is_ascii() {
            return Err(SpoolError::config("csv.separator and csv.quote must be ASCII"));
        }

        Ok(())
    }

    /// Checks that reference fields of the resolved schema pair
    pub fn validate_schemas(&self, schemas: &SchemaPair) -> Result<()> {
        if self.timestamp_mode == TimestampMode::Field {
            let name = self.timestamp_field.as_deref().unwrap_or_default();
            let field = schemas.value.field(name).ok_or_else(|| {
                SpoolError::config(format!(
                    "timestamp_field '{}' does not exist in the value schema",
                    name
                ))
            })?;
            if field.field_type != FieldType::Timestamp || field.optional {
                return Err(SpoolError::config(format!(
                    "timestamp_field '{}' must be a non-optional timestamp field",
                    name
                )));
            }
        }

        if self.metadata_location == MetadataLocation::Field {
            let field = schemas.value.field(&self.metadata_field).ok_or_else(|| {
                SpoolError::config(format!(
                    "metadata_field '{}' does not exist in the value schema",
                    self.metadata_field
                ))
            })?;
            if field.field_type != FieldType::Map {
                return Err(SpoolError::config(format!(
                    "metadata_field '{}' must be a map field",
                    self.metadata_field
                )));
            }
        }

        if let Some(ref key) = schemas.key {
            for field in &key.fields {
                if schemas.value.field(&field.name).is_none() {
                    return Err(SpoolError::config(format!(
                        "key field '{}' does not exist in the value schema",
                        field.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// The file name pattern, anchored so it must match the whole name
    pub fn file_pattern(&self) -> Result<Regex> {
        Regex::new(&format!("^(?:{})$", self.input_file_pattern)).map_err(|e| {
            SpoolError::config(format!(
                "input_file_pattern '{}' is not a valid regular expression: {}",
                self.input_file_pattern, e
            ))
        })
    }

    pub fn file_minimum_age(&self) -> Duration {
        Duration::from_millis(self.file_minimum_age_ms)
    }

    pub fn empty_poll_wait(&self) -> Duration {
        Duration::from_millis(self.empty_poll_wait_ms)
    }

    pub fn empty_poll_max_wait(&self) -> Duration {
        Duration::from_millis(self.empty_poll_max_wait_ms.unwrap_or(self.empty_poll_wait_ms))
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SpoolError::config(format!("{} has an invalid value '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

fn check_directory(option: &str, path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(SpoolError::config(format!(
            "{} '{}' does not exist or is not a directory",
            option,
            path.display()
        )));
    }

    tempfile::NamedTempFile::new_in(path).map_err(|e| {
        SpoolError::config(format!(
            "{} '{}' is not writable: {}",
            option,
            path.display(),
            e
        ))
    })?;

    Ok(())
}
