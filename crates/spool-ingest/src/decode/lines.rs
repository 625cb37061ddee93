//! Plain text decoding, one record per line

use spool_common::{Result, SpoolError};
use std::io::BufRead;
use std::sync::Arc;

use super::{RecordDecoder, LINE_VALUE_FIELD};
use crate::schema::{FieldType, FieldValue, Record, Schema};

pub struct LineDecoder {
    reader: Box<dyn BufRead + Send>,
    file: String,
    schema: Arc<Schema>,
    buf: Vec<u8>,
    offset: u64,
}

impl LineDecoder {
    pub fn new(reader: Box<dyn BufRead + Send>, file: &str, schema: Arc<Schema>) -> Result<Self> {
        match schema.field(LINE_VALUE_FIELD) {
            Some(field) if field.field_type == FieldType::String => {}
            _ => {
                return Err(SpoolError::config(format!(
                    "line input needs a string field named '{}' in the value schema",
                    LINE_VALUE_FIELD
                )))
            }
        }

        Ok(Self {
            reader,
            file: file.to_string(),
            schema,
            buf: Vec::new(),
            offset: 0,
        })
    }

    fn read_line(&mut self) -> Result<bool> {
        self.buf.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .map_err(|e| SpoolError::decode(&self.file, self.offset, e.to_string()))?;
        Ok(read > 0)
    }
}

impl RecordDecoder for LineDecoder {
    fn skip(&mut self, n: u64) -> Result<u64> {
        let mut skipped = 0;
        while skipped < n && self.read_line()? {
            skipped += 1;
            self.offset += 1;
        }
        Ok(skipped)
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        if !self.read_line()? {
            return Ok(None);
        }

        let mut text = String::from_utf8_lossy(&self.buf).into_owned();
        if text.ends_with('\n') {
            text.pop();
            if text.ends_with('\r') {
                text.pop();
            }
        }

        let mut record = Record::new(Arc::clone(&self.schema));
        record.put(LINE_VALUE_FIELD, FieldValue::String(text))?;

        self.offset += 1;
        Ok(Some(record))
    }

    fn offset(&self) -> u64 {
        self.offset
    }
}

/// Value schema used for line input when none is configured
pub fn default_schema(name: Option<String>) -> Schema {
    Schema::new(
        name,
        vec![crate::schema::Field::required(LINE_VALUE_FIELD, FieldType::String)],
    )
}
