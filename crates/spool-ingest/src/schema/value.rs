//! Typed record values and text-to-value conversion

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use spool_common::{Result, SpoolError};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Field, FieldType, Schema};

/// A single typed value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Map(BTreeMap<String, String>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

/// Values laid out according to a schema
///
/// Serializes as a JSON object keyed by field name, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<FieldValue>,
}

impl Record {
    /// Record with every field set to null
    pub fn new(schema: Arc<Schema>) -> Self {
        let values = vec![FieldValue::Null; schema.fields.len()];
        Self { schema, values }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.schema.index_of(name).map(|i| &self.values[i])
    }

    pub fn put(&mut self, name: &str, value: FieldValue) -> Result<()> {
        let idx = self
            .schema
            .index_of(name)
            .ok_or_else(|| SpoolError::config(format!("Field '{}' is not part of the schema", name)))?;
        self.values[idx] = value;
        Ok(())
    }

    /// Copy the fields of `schema` out of this record
    pub fn project(&self, schema: Arc<Schema>) -> Record {
        let values = schema
            .fields
            .iter()
            .map(|f| self.get(&f.name).cloned().unwrap_or(FieldValue::Null))
            .collect();
        Record { schema, values }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&Field, &FieldValue)> {
        self.schema.fields.iter().zip(self.values.iter())
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (field, value) in self.fields() {
            map.serialize_entry(&field.name, value)?;
        }
        map.end()
    }
}

/// Converts raw cell text or JSON values into typed field values
#[derive(Debug, Clone)]
pub struct ValueParser {
    timestamp_formats: Vec<String>,
    empty_as_null: bool,
}

impl ValueParser {
    pub fn new(timestamp_formats: Vec<String>, empty_as_null: bool) -> Self {
        Self {
            timestamp_formats,
            empty_as_null,
        }
    }

    /// Convert a text cell according to `field`
    pub fn parse_str(&self, field: &Field, raw: &str) -> Result<FieldValue> {
        if raw.is_empty() && field.optional && self.empty_as_null {
            return Ok(FieldValue::Null);
        }

        let fail = || SpoolError::conversion(&field.name, raw, field.field_type.as_str());
        let trimmed = raw.trim();

        let value = match field.field_type {
            FieldType::String => FieldValue::String(raw.to_string()),
            FieldType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" => FieldValue::Boolean(true),
                "false" => FieldValue::Boolean(false),
                _ => return Err(fail()),
            },
            FieldType::Int32 => FieldValue::Int32(trimmed.parse().map_err(|_| fail())?),
            FieldType::Int64 => FieldValue::Int64(trimmed.parse().map_err(|_| fail())?),
            FieldType::Float32 => FieldValue::Float32(trimmed.parse().map_err(|_| fail())?),
            FieldType::Float64 => FieldValue::Float64(trimmed.parse().map_err(|_| fail())?),
            FieldType::Timestamp => match trimmed.parse::<i64>() {
                Ok(millis) => FieldValue::Timestamp(from_epoch_millis(millis).ok_or_else(fail)?),
                Err(_) => FieldValue::Timestamp(self.parse_timestamp(trimmed).ok_or_else(fail)?),
            },
            FieldType::Map => FieldValue::Map(
                serde_json::from_str::<serde_json::Value>(raw)
                    .ok()
                    .and_then(|v| json_to_map(&v))
                    .ok_or_else(fail)?,
            ),
        };
        Ok(value)
    }

    /// Convert a JSON value according to `field`
    pub fn from_json(&self, field: &Field, value: &serde_json::Value) -> Result<FieldValue> {
        use serde_json::Value;

        if value.is_null() {
            return if field.optional {
                Ok(FieldValue::Null)
            } else {
                Err(SpoolError::conversion(&field.name, "null", field.field_type.as_str()))
            };
        }

        // Strings go through the same path as CSV cells
        if let Value::String(s) = value {
            return self.parse_str(field, s);
        }

        let fail = || SpoolError::conversion(&field.name, value.to_string(), field.field_type.as_str());

        let converted = match field.field_type {
            FieldType::String => FieldValue::String(value.to_string()),
            FieldType::Boolean => FieldValue::Boolean(value.as_bool().ok_or_else(fail)?),
            FieldType::Int32 => FieldValue::Int32(
                value
                    .as_i64()
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(fail)?,
            ),
            FieldType::Int64 => FieldValue::Int64(value.as_i64().ok_or_else(fail)?),
            FieldType::Float32 => FieldValue::Float32(value.as_f64().ok_or_else(fail)? as f32),
            FieldType::Float64 => FieldValue::Float64(value.as_f64().ok_or_else(fail)?),
            FieldType::Timestamp => FieldValue::Timestamp(
                value
                    .as_i64()
                    .and_then(from_epoch_millis)
                    .ok_or_else(fail)?,
            ),
            FieldType::Map => FieldValue::Map(json_to_map(value).ok_or_else(fail)?),
        };
        Ok(converted)
    }

    /// Parse a timestamp using RFC 3339 first, then each configured format
    pub fn parse_timestamp(&self, raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }

        for format in &self.timestamp_formats {
            if let Ok(ts) = DateTime::parse_from_str(raw, format) {
                return Some(ts.with_timezone(&Utc));
            }
            if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
                return Some(ts.and_utc());
            }
            if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
                if let Some(ts) = date.and_hms_opt(0, 0, 0) {
                    return Some(ts.and_utc());
                }
            }
        }
        None
    }
}

fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

fn json_to_map(value: &serde_json::Value) -> Option<BTreeMap<String, String>> {
    let object = value.as_object()?;
    Some(
        object
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect(),
    )
}
