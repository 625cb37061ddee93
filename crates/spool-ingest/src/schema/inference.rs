//! Schema inference from sample input files
//!
//! Every sampled file yields a value schema of optional string fields named
//! after its columns. All samples must serialize to the same schema; when they
//! do not, startup fails with a drift error that lists each distinct schema
//! next to the files that produced it. Nothing is claimed or moved while
//! inferring, so a drift failure leaves the input directory untouched.

use spool_common::{FileMetadata, Result, SchemaGroup, SpoolError};
use std::sync::Arc;

use super::{Field, FieldType, Schema, SchemaPair};
use crate::config::{InputFormat, SpoolConfig};
use crate::decode::{lines, DecoderFactory};
use crate::selector::FileSelector;

/// Number of files sampled when inferring schemas
pub const SAMPLE_FILE_LIMIT: usize = 5;

pub struct SchemaGenerator {
    decoders: DecoderFactory,
    key_name: String,
    value_name: String,
}

impl SchemaGenerator {
    pub fn new(decoders: DecoderFactory, key_name: String, value_name: String) -> Self {
        Self {
            decoders,
            key_name,
            value_name,
        }
    }

    pub fn from_config(config: &SpoolConfig) -> Self {
        Self::new(
            DecoderFactory::from_config(config),
            config.schema_generation.key_name.clone(),
            config.schema_generation.value_name.clone(),
        )
    }

    /// Infer the schema pair shared by `sample_files`
    pub fn infer(&self, sample_files: &[FileMetadata], key_fields: &[String]) -> Result<SchemaPair> {
        if sample_files.is_empty() {
            return Err(SpoolError::SchemaInference(
                "no input files available to sample".to_string(),
            ));
        }

        let mut inferred: Option<Schema> = None;
        let mut groups: Vec<SchemaGroup> = Vec::new();

        for file in sample_files {
            let names = self.decoders.sample_field_names(&file.path).map_err(|e| {
                SpoolError::SchemaInference(format!("cannot sample '{}': {}", file.path.display(), e))
            })?;

            let schema = Schema::new(
                Some(self.value_name.clone()),
                names
                    .into_iter()
                    .map(|n| Field::optional(n, FieldType::String))
                    .collect(),
            );
            let fingerprint = schema.fingerprint()?;
            tracing::debug!(file = %file.path.display(), schema = %fingerprint, "Sampled schema");

            match groups.iter_mut().find(|g| g.fingerprint == fingerprint) {
                Some(group) => group.files.push(file.path.clone()),
                None => {
                    groups.push(SchemaGroup {
                        fingerprint,
                        files: vec![file.path.clone()],
                    });
                    inferred.get_or_insert(schema);
                }
            }
        }

        if groups.len() > 1 {
            return Err(SpoolError::SchemaDrift { groups });
        }

        let value = match inferred {
            Some(schema) => Arc::new(schema),
            None => {
                return Err(SpoolError::SchemaInference(
                    "no schema inferred from sample files".to_string(),
                ))
            }
        };

        let key = if key_fields.is_empty() {
            None
        } else {
            let (key, missing) = value.project(Some(self.key_name.clone()), key_fields);
            for name in &missing {
                tracing::warn!(field = %name, "Key field not found in inferred value schema, skipping");
            }
            if key.fields.is_empty() {
                None
            } else {
                Some(Arc::new(key))
            }
        };

        tracing::info!(
            files = sample_files.len(),
            fields = value.fields.len(),
            key_fields = key.as_ref().map_or(0, |k| k.fields.len()),
            "Inferred schemas from sample files"
        );

        Ok(SchemaPair::new(key, value))
    }
}

/// Schema pair a worker runs with: configured, inferred, or the line default
pub fn resolve_schemas(config: &SpoolConfig, selector: &FileSelector) -> Result<SchemaPair> {
    let pair = if let Some(ref value) = config.value_schema {
        SchemaPair::new(config.key_schema.clone().map(Arc::new), Arc::new(value.clone()))
    } else if config.schema_generation.enabled {
        let samples = selector.sample(SAMPLE_FILE_LIMIT)?;
        SchemaGenerator::from_config(config).infer(&samples, &config.schema_generation.key_fields)?
    } else if config.format == InputFormat::Line {
        SchemaPair::new(
            config.key_schema.clone().map(Arc::new),
            Arc::new(lines::default_schema(Some(config.schema_generation.value_name.clone()))),
        )
    } else {
        return Err(SpoolError::config(
            "value_schema is required when schema_generation.enabled is false",
        ));
    };

    config.validate_schemas(&pair)?;
    Ok(pair)
}
