//! CSV decoding

use csv::{ByteRecord, ReaderBuilder, StringRecord};
use spool_common::{Result, SpoolError};
use std::io::BufRead;
use std::sync::Arc;

use super::RecordDecoder;
use crate::config::CsvConfig;
use crate::schema::{Record, Schema, ValueParser};

type Reader = csv::Reader<Box<dyn BufRead + Send>>;

/// CSV decoder mapping columns to schema fields by header name, or by
/// position when the file has no header row
pub struct CsvDecoder {
    reader: Reader,
    file: String,
    schema: Arc<Schema>,
    /// Column index for each schema field
    columns: Vec<Option<usize>>,
    parser: ValueParser,
    row: StringRecord,
    skipped: ByteRecord,
    offset: u64,
}

impl CsvDecoder {
    pub fn new(
        mut input: Box<dyn BufRead + Send>,
        file: &str,
        config: &CsvConfig,
        schema: Arc<Schema>,
        parser: ValueParser,
    ) -> Result<Self> {
        skip_preamble(&mut input, config.skip_lines)?;
        let mut reader = build_reader(input, config);

        let columns = if config.first_row_as_header {
            let mut header = StringRecord::new();
            let has_header = reader
                .read_record(&mut header)
                .map_err(|e| SpoolError::decode(file, 0, format!("invalid header: {}", e)))?;

            let mut columns = Vec::with_capacity(schema.fields.len());
            for field in &schema.fields {
                let column = header.iter().position(|h| h.trim() == field.name);
                if column.is_none() && has_header && !field.optional {
                    return Err(SpoolError::decode(
                        file,
                        0,
                        format!("required column '{}' is missing from the header", field.name),
                    ));
                }
                columns.push(column);
            }
            columns
        } else {
            (0..schema.fields.len()).map(Some).collect()
        };

        Ok(Self {
            reader,
            file: file.to_string(),
            schema,
            columns,
            parser,
            row: StringRecord::new(),
            skipped: ByteRecord::new(),
            offset: 0,
        })
    }
}

impl RecordDecoder for CsvDecoder {
    fn skip(&mut self, n: u64) -> Result<u64> {
        let mut skipped = 0;
        while skipped < n {
            let more = self
                .reader
                .read_byte_record(&mut self.skipped)
                .map_err(|e| SpoolError::decode(&self.file, self.offset, e.to_string()))?;
            if !more {
                break;
            }
            skipped += 1;
            self.offset += 1;
        }
        Ok(skipped)
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        let more = self
            .reader
            .read_record(&mut self.row)
            .map_err(|e| SpoolError::decode(&self.file, self.offset, e.to_string()))?;
        if !more {
            return Ok(None);
        }

        let mut record = Record::new(Arc::clone(&self.schema));
        for (field, column) in self.schema.fields.iter().zip(&self.columns) {
            let raw = column.and_then(|c| self.row.get(c)).unwrap_or("");
            let value = self
                .parser
                .parse_str(field, raw)
                .map_err(|e| SpoolError::decode(&self.file, self.offset, e.to_string()))?;
            record.put(&field.name, value)?;
        }

        self.offset += 1;
        Ok(Some(record))
    }

    fn offset(&self) -> u64 {
        self.offset
    }
}

/// Column names of a CSV file: its header, or `column_1..column_N`
pub fn field_names(
    mut input: Box<dyn BufRead + Send>,
    file: &str,
    config: &CsvConfig,
) -> Result<Vec<String>> {
    skip_preamble(&mut input, config.skip_lines)?;
    let mut reader = build_reader(input, config);

    let mut first = StringRecord::new();
    let has_row = reader
        .read_record(&mut first)
        .map_err(|e| SpoolError::decode(file, 0, e.to_string()))?;
    if !has_row {
        return Ok(Vec::new());
    }

    if config.first_row_as_header {
        Ok(first.iter().map(|h| h.trim().to_string()).collect())
    } else {
        Ok((1..=first.len()).map(|i| format!("column_{}", i)).collect())
    }
}

fn build_reader(input: Box<dyn BufRead + Send>, config: &CsvConfig) -> Reader {
    ReaderBuilder::new()
        .delimiter(config.separator as u8)
        .quote(config.quote as u8)
        .has_headers(false)
        .from_reader(input)
}

fn skip_preamble(input: &mut Box<dyn BufRead + Send>, lines: usize) -> Result<()> {
    let mut discard = Vec::new();
    for _ in 0..lines {
        discard.clear();
        if input.read_until(b'\n', &mut discard)? == 0 {
            break;
        }
    }
    Ok(())
}
