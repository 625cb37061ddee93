//! Newline-delimited JSON decoding

use serde_json::{Map, Value};
use spool_common::{Result, SpoolError};
use std::io::BufRead;
use std::sync::Arc;

use super::RecordDecoder;
use crate::schema::{Record, Schema, ValueParser};

/// One JSON object per line; blank lines are ignored and never counted
pub struct JsonLinesDecoder {
    reader: Box<dyn BufRead + Send>,
    file: String,
    schema: Arc<Schema>,
    parser: ValueParser,
    line: String,
    offset: u64,
}

impl JsonLinesDecoder {
    pub fn new(
        reader: Box<dyn BufRead + Send>,
        file: &str,
        schema: Arc<Schema>,
        parser: ValueParser,
    ) -> Self {
        Self {
            reader,
            file: file.to_string(),
            schema,
            parser,
            line: String::new(),
            offset: 0,
        }
    }

    /// Advance to the next non-blank line; false at end of file
    fn read_line(&mut self) -> Result<bool> {
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_line(&mut self.line)
                .map_err(|e| SpoolError::decode(&self.file, self.offset, e.to_string()))?;
            if read == 0 {
                return Ok(false);
            }
            if !self.line.trim().is_empty() {
                return Ok(true);
            }
        }
    }
}

impl RecordDecoder for JsonLinesDecoder {
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

        let object = parse_object(&self.line)
            .map_err(|message| SpoolError::decode(&self.file, self.offset, message))?;

        let mut record = Record::new(Arc::clone(&self.schema));
        for field in &self.schema.fields {
            let value = match object.get(&field.name) {
                Some(raw) => self.parser.from_json(field, raw),
                None => self.parser.from_json(field, &Value::Null),
            }
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

fn parse_object(line: &str) -> std::result::Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(format!("expected a JSON object, found {}", json_kind(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Keys of the first object in the file
pub fn field_names(reader: Box<dyn BufRead + Send>, file: &str) -> Result<Vec<String>> {
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let object = parse_object(&line).map_err(|message| SpoolError::decode(file, 0, message))?;
        return Ok(object.keys().cloned().collect());
    }
    Ok(Vec::new())
}
