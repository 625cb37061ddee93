//! Record decoders
//!
//! A decoder owns the open reader of one input file and hands out typed
//! records one at a time. The offset it reports is the number of records
//! consumed so far (header and skipped preamble lines do not count), which is
//! exactly what is committed as the resume offset. Re-opening a file and
//! skipping `offset` records therefore lands on the first undelivered record.

pub mod compression;
pub mod delimited;
pub mod json_lines;
pub mod lines;

pub use delimited::CsvDecoder;
pub use json_lines::JsonLinesDecoder;
pub use lines::LineDecoder;

use spool_common::{FileMetadata, Result};
use std::path::Path;
use std::sync::Arc;

use crate::config::{CsvConfig, InputFormat, SpoolConfig};
use crate::schema::{Record, Schema, ValueParser};

/// Name of the single field produced by the line decoder
pub const LINE_VALUE_FIELD: &str = "value";

/// Stream of typed records read from one file
pub trait RecordDecoder: Send {
    /// Discard up to `n` records without converting them.
    ///
    /// Returns how many were actually skipped; fewer than `n` means the file
    /// ended first.
    fn skip(&mut self, n: u64) -> Result<u64>;

    /// Next record, or `None` at end of file
    fn next_record(&mut self) -> Result<Option<Record>>;

    /// Records consumed so far, skipped ones included
    fn offset(&self) -> u64;
}

/// Builds decoders for the configured input format
#[derive(Debug, Clone)]
pub struct DecoderFactory {
    format: InputFormat,
    csv: CsvConfig,
    parser: ValueParser,
    buffer_size: usize,
}

impl DecoderFactory {
    pub fn from_config(config: &SpoolConfig) -> Self {
        Self {
            format: config.format,
            csv: config.csv.clone(),
            parser: ValueParser::new(config.timestamp_formats.clone(), config.csv.empty_as_null),
            buffer_size: config.file_buffer_size_bytes,
        }
    }

    pub fn format(&self) -> InputFormat {
        self.format
    }

    /// Open `file` and position the decoder at its first record
    pub fn open(&self, file: &FileMetadata, schema: Arc<Schema>) -> Result<Box<dyn RecordDecoder>> {
        let reader = compression::open_reader(&file.path, self.buffer_size)?;

        let decoder: Box<dyn RecordDecoder> = match self.format {
            InputFormat::Csv => Box::new(CsvDecoder::new(
                reader,
                &file.name,
                &self.csv,
                schema,
                self.parser.clone(),
            )?),
            InputFormat::Json => Box::new(JsonLinesDecoder::new(
                reader,
                &file.name,
                schema,
                self.parser.clone(),
            )),
            InputFormat::Line => Box::new(LineDecoder::new(reader, &file.name, schema)?),
        };
        Ok(decoder)
    }

    /// Field names a file would produce, used for schema inference
    pub fn sample_field_names(&self, path: &Path) -> Result<Vec<String>> {
        match self.format {
            InputFormat::Csv => {
                let reader = compression::open_reader(path, self.buffer_size)?;
                delimited::field_names(reader, &file_label(path), &self.csv)
            }
            InputFormat::Json => {
                let reader = compression::open_reader(path, self.buffer_size)?;
                json_lines::field_names(reader, &file_label(path))
            }
            InputFormat::Line => Ok(vec![LINE_VALUE_FIELD.to_string()]),
        }
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldType, FieldValue};

    fn users_schema() -> Arc<Schema> {
        Arc::new(Schema::new(
            None,
            vec![
                Field::optional("id", FieldType::String),
                Field::optional("name", FieldType::String),
            ],
        ))
    }

    #[test]
    fn test_factory_opens_configured_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, "{\"id\":\"1\",\"name\":\"ada\"}\n{\"id\":\"2\",\"name\":\"bob\"}\n")
            .unwrap();

        let mut config = SpoolConfig::new(dir.path(), dir.path(), dir.path());
        config.format = InputFormat::Json;
        let factory = DecoderFactory::from_config(&config);

        let file = FileMetadata::from_path(&path, dir.path()).unwrap();
        let mut decoder = factory.open(&file, users_schema()).unwrap();

        assert_eq!(decoder.skip(1).unwrap(), 1);
        let record = decoder.next_record().unwrap().unwrap();
        assert_eq!(record.get("name"), Some(&FieldValue::String("bob".to_string())));
        assert_eq!(decoder.offset(), 2);
        assert!(decoder.next_record().unwrap().is_none());

        assert_eq!(
            factory.sample_field_names(&path).unwrap(),
            vec!["id".to_string(), "name".to_string()]
        );
    }

    #[test]
    fn test_line_format_samples_value_field() {
        let config = SpoolConfig {
            format: InputFormat::Line,
            ..SpoolConfig::new("/in", "/done", "/err")
        };
        let factory = DecoderFactory::from_config(&config);
        assert_eq!(
            factory.sample_field_names(Path::new("/does/not/matter.log")).unwrap(),
            vec![LINE_VALUE_FIELD.to_string()]
        );
    }
}
