// ABOUTME: YAML config file schema, loading and CLI-override merge
// ABOUTME: Unknown keys are rejected so typos in a config file fail loudly

use crate::config::{ExtractConfig, TableOverride, TraversalDirection};
use crate::errors::ExtractionError;
use crate::schema::VirtualForeignKey;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DbsliceConfigFile {
    #[serde(default)]
    pub database: Option<DatabaseSection>,
    #[serde(default)]
    pub extraction: Option<ExtractionSection>,
    #[serde(default)]
    pub anonymization: Option<AnonymizationSection>,
    #[serde(default)]
    pub output: Option<OutputSection>,
    #[serde(default)]
    pub tables: HashMap<String, TableOverrideSection>,
    #[serde(default)]
    pub virtual_foreign_keys: Vec<VirtualForeignKeySection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    pub url: Option<String>,
    pub schema: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ExtractionSection {
    pub seeds: Option<Vec<String>>,
    pub depth: Option<u32>,
    pub direction: Option<String>,
    pub exclude_tables: Option<Vec<String>>,
    pub passthrough_tables: Option<Vec<String>>,
    pub dry_run: Option<bool>,
    pub validate: Option<bool>,
    pub fail_on_validation_error: Option<bool>,
    pub profile: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AnonymizationSection {
    pub enabled: Option<bool>,
    pub seed: Option<String>,
    pub redact_fields: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    pub format: Option<String>,
    pub file: Option<String>,
    pub stream: Option<bool>,
    pub stream_threshold: Option<usize>,
    pub stream_chunk_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TableOverrideSection {
    #[serde(default)]
    pub skip: bool,
    pub max_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VirtualForeignKeySection {
    pub name: String,
    pub source_table: String,
    pub source_columns: Vec<String>,
    pub target_table: String,
    pub target_columns: Vec<String>,
    #[serde(default = "default_true")]
    pub is_nullable: bool,
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Loads and parses a YAML config file, rejecting unknown top-level and
/// section keys so a typo'd field fails the run instead of being silently
/// ignored.
pub fn load_config_file(path: &Path) -> Result<DbsliceConfigFile, ExtractionError> {
    let raw = std::fs::read_to_string(path).map_err(ExtractionError::Io)?;
    serde_yaml::from_str(&raw).map_err(|e| ExtractionError::Config(format!(
        "failed to parse config file {}: {}",
        path.display(),
        e
    )))
}

/// Merges a loaded config file into a CLI-provided `ExtractConfig`.
///
/// CLI flags always win over the config file for scalar fields. List fields
/// (`seeds`, `exclude_tables`, `passthrough_tables`, `redact_fields`) are
/// unioned when the CLI did not explicitly override them; `redact_fields`
/// is special-cased to always merge CLI and config values together, since
/// redaction should only ever grow more conservative.
pub fn merge_config_file(
    mut base: ExtractConfig,
    file: DbsliceConfigFile,
    cli_gave_exclude: bool,
    cli_gave_passthrough: bool,
) -> Result<ExtractConfig, ExtractionError> {
    if let Some(db) = file.database {
        if base.database_url.is_empty() {
            if let Some(url) = db.url {
                base.database_url = url;
            }
        }
        if base.schema.is_none() {
            base.schema = db.schema;
        }
    }

    if let Some(ext) = file.extraction {
        if base.seeds.is_empty() {
            if let Some(seeds) = ext.seeds {
                for s in seeds {
                    base.seeds.push(crate::seed::parse_seed(&s)?);
                }
            }
        }
        if let Some(depth) = ext.depth {
            base.depth = depth;
        }
        if let Some(dir) = ext.direction {
            base.direction = TraversalDirection::from_str(&dir)
                .map_err(ExtractionError::Config)?;
        }
        if !cli_gave_exclude {
            if let Some(exclude) = ext.exclude_tables {
                base.exclude_tables.extend(exclude);
            }
        }
        if !cli_gave_passthrough {
            if let Some(passthrough) = ext.passthrough_tables {
                base.passthrough_tables.extend(passthrough);
            }
        }
        if let Some(dry_run) = ext.dry_run {
            base.dry_run = base.dry_run || dry_run;
        }
        if let Some(validate) = ext.validate {
            base.validate = validate;
        }
        if let Some(fail) = ext.fail_on_validation_error {
            base.fail_on_validation_error = base.fail_on_validation_error || fail;
        }
        if let Some(profile) = ext.profile {
            base.profile = base.profile || profile;
        }
    }

    if let Some(anon) = file.anonymization {
        if let Some(enabled) = anon.enabled {
            base.anonymize = base.anonymize || enabled;
        }
        if let Some(seed) = anon.seed {
            base.anonymization_seed = seed;
        }
        if let Some(redact) = anon.redact_fields {
            let mut merged: HashSet<String> = base.redact_fields.drain(..).collect();
            merged.extend(redact);
            base.redact_fields = merged.into_iter().collect();
            base.redact_fields.sort();
        }
    }

    if let Some(out) = file.output {
        if let Some(format) = out.format {
            base.output_format = crate::config::OutputFormat::from_str(&format)
                .map_err(ExtractionError::Config)?;
        }
        if base.output_file.is_none() {
            base.output_file = out.file;
        }
        if let Some(stream) = out.stream {
            base.stream = base.stream || stream;
        }
        if let Some(threshold) = out.stream_threshold {
            base.streaming_threshold = threshold;
        }
        if let Some(chunk) = out.stream_chunk_size {
            base.streaming_chunk_size = chunk;
        }
    }

    for (table, overrides) in file.tables {
        if overrides.skip {
            base.exclude_tables.insert(table.clone());
        }
        base.table_overrides.insert(
            table,
            TableOverride {
                skip: overrides.skip,
                max_rows: overrides.max_rows,
            },
        );
    }

    for vfk in file.virtual_foreign_keys {
        base.virtual_foreign_keys.push(VirtualForeignKey {
            name: vfk.name,
            source_table: vfk.source_table,
            source_columns: vfk.source_columns,
            target_table: vfk.target_table,
            target_columns: vfk.target_columns,
            is_nullable: vfk.is_nullable,
            description: vfk.description,
        });
    }

    Ok(base)
}
