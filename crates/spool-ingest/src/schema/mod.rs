//! Record schemas and typed values
//!
//! Schemas are deliberately small: a flat list of named, typed fields. They
//! serialize to JSON in a stable field order, and that serialized form doubles
//! as the fingerprint used to detect schema drift between sampled files.

pub mod inference;
pub mod value;

pub use inference::SchemaGenerator;
pub use value::{FieldValue, Record, ValueParser};

use serde::{Deserialize, Serialize};
use spool_common::Result;
use std::sync::Arc;

/// Primitive type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Timestamp,
    /// String to string map
    Map,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Float32 => "float32",
            FieldType::Float64 => "float64",
            FieldType::String => "string",
            FieldType::Timestamp => "timestamp",
            FieldType::Map => "map",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub optional: bool,
}

impl Field {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            optional: true,
        }
    }
}

/// Ordered list of fields with an optional name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(name: Option<String>, fields: Vec<Field>) -> Self {
        Self { name, fields }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Serialized form used to compare schemas across files
    pub fn fingerprint(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Sub-schema made of `names`, in the order given.
    ///
    /// Returns the projection and the names that do not exist in `self`.
    pub fn project(&self, name: Option<String>, names: &[String]) -> (Schema, Vec<String>) {
        let mut fields = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for n in names {
            match self.field(n) {
                Some(field) => fields.push(field.clone()),
                None => missing.push(n.clone()),
            }
        }
        (Schema::new(name, fields), missing)
    }
}

/// Key and value schema used for every record of a worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaPair {
    pub key: Option<Arc<Schema>>,
    pub value: Arc<Schema>,
}

impl SchemaPair {
    pub fn new(key: Option<Arc<Schema>>, value: Arc<Schema>) -> Self {
        Self { key, value }
    }

    /// Key record projected out of a value record, when a key schema exists
    pub fn project_key(&self, value: &Record) -> Option<Record> {
        self.key.as_ref().map(|key| value.project(Arc::clone(key)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn users() -> Schema {
        Schema::new(
            Some("users".to_string()),
            vec![
                Field::optional("id", FieldType::String),
                Field::optional("name", FieldType::String),
                Field::required("age", FieldType::Int32),
            ],
        )
    }

    #[test]
    fn test_fingerprint_is_order_sensitive() {
        let a = users();
        let mut b = users();
        b.fields.swap(0, 1);

        assert_eq!(a.fingerprint().unwrap(), users().fingerprint().unwrap());
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn test_schema_deserializes_from_toml() {
        let schema: Schema = toml::from_str(
            r#"
            name = "users"
            fields = [
                { name = "id", type = "int64" },
                { name = "email", type = "string", optional = true },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(schema.fields[0], Field::required("id", FieldType::Int64));
        assert_eq!(schema.fields[1], Field::optional("email", FieldType::String));
    }

    #[test]
    fn test_project_reports_missing_fields() {
        let (key, missing) =
            users().project(None, &["age".to_string(), "nope".to_string(), "id".to_string()]);

        let names: Vec<&str> = key.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["age", "id"]);
        assert_eq!(missing, vec!["nope".to_string()]);
    }

    #[test]
    fn test_project_key_from_record() {
        let value_schema = Arc::new(users());
        let (key, _) = value_schema.project(None, &["id".to_string()]);
        let pair = SchemaPair::new(Some(Arc::new(key)), Arc::clone(&value_schema));

        let mut record = Record::new(value_schema);
        record.put("id", FieldValue::String("7".to_string())).unwrap();
        record.put("age", FieldValue::Int32(31)).unwrap();

        let key = pair.project_key(&record).unwrap();
        assert_eq!(key.get("id"), Some(&FieldValue::String("7".to_string())));
        assert_eq!(key.get("age"), None);

        let keyless = SchemaPair::new(None, Arc::new(users()));
        assert!(keyless.project_key(&record).is_none());
    }
}
