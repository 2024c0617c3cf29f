// ABOUTME: Extraction configuration: seeds, traversal depth/direction, output options
// ABOUTME: ExtractConfig is the single struct threaded through engine::extract

use crate::schema::VirtualForeignKey;
use std::collections::HashSet;
use std::fmt;

pub const DEFAULT_TRAVERSAL_DEPTH: u32 = 3;
pub const MIN_TRAVERSAL_DEPTH: u32 = 1;
pub const MAX_TRAVERSAL_DEPTH: u32 = 10;
pub const DEFAULT_STREAMING_THRESHOLD: usize = 50_000;
pub const DEFAULT_STREAMING_CHUNK_SIZE: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalDirection {
    Up,
    Down,
    Both,
}

impl fmt::Display for TraversalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TraversalDirection::Up => "up",
            TraversalDirection::Down => "down",
            TraversalDirection::Both => "both",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TraversalDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" => Ok(TraversalDirection::Up),
            "down" => Ok(TraversalDirection::Down),
            "both" => Ok(TraversalDirection::Both),
            other => Err(format!(
                "invalid traversal direction '{}': expected up, down or both",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Sql,
    Json,
    Csv,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sql" => Ok(OutputFormat::Sql),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(format!(
                "invalid output format '{}': expected sql, json or csv",
                other
            )),
        }
    }
}

/// A single extraction seed in one of two forms:
/// - `table.column=value` (equality match, identifier-validated)
/// - `table:WHERE_CLAUSE` (predicate, passed through the safety filter)
#[derive(Debug, Clone, PartialEq)]
pub enum SeedSpec {
    Equality {
        table: String,
        column: String,
        value: SeedValue,
    },
    Predicate {
        table: String,
        where_clause: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeedValue {
    Int(i64),
    Text(String),
}

impl fmt::Display for SeedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedValue::Int(i) => write!(f, "{}", i),
            SeedValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl SeedSpec {
    pub fn table(&self) -> &str {
        match self {
            SeedSpec::Equality { table, .. } => table,
            SeedSpec::Predicate { table, .. } => table,
        }
    }

    /// The WHERE clause used to fetch this seed's starting rows. Equality
    /// seeds are rendered as a single comparison; predicate seeds pass their
    /// (already safety-validated) clause through unchanged.
    pub fn to_where_clause(&self) -> String {
        match self {
            SeedSpec::Equality { column, value, .. } => match value {
                SeedValue::Int(i) => format!("{} = {}", column, i),
                SeedValue::Text(s) => format!("{} = '{}'", column, s.replace('\'', "''")),
            },
            SeedSpec::Predicate { where_clause, .. } => where_clause.clone(),
        }
    }
}

impl fmt::Display for SeedSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedSpec::Equality {
                table,
                column,
                value,
            } => write!(f, "{}.{}={}", table, column, value),
            SeedSpec::Predicate {
                table,
                where_clause,
            } => write!(f, "{}:{}", table, where_clause),
        }
    }
}

/// Per-table overrides loaded from the YAML config file (skip, row caps).
#[derive(Debug, Clone, Default)]
pub struct TableOverride {
    pub skip: bool,
    pub max_rows: Option<usize>,
}

/// Master configuration for a single extraction run.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub database_url: String,
    pub seeds: Vec<SeedSpec>,
    pub depth: u32,
    pub direction: TraversalDirection,
    pub output_format: OutputFormat,
    pub output_file: Option<String>,
    pub anonymize: bool,
    pub redact_fields: Vec<String>,
    pub exclude_tables: HashSet<String>,
    pub passthrough_tables: HashSet<String>,
    pub verbose: bool,
    pub dry_run: bool,
    pub no_progress: bool,
    pub validate: bool,
    pub fail_on_validation_error: bool,
    pub profile: bool,
    pub stream: bool,
    pub streaming_threshold: usize,
    pub streaming_chunk_size: usize,
    pub virtual_foreign_keys: Vec<VirtualForeignKey>,
    pub schema: Option<String>,
    pub anonymization_seed: String,
    pub table_overrides: std::collections::HashMap<String, TableOverride>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        ExtractConfig {
            database_url: String::new(),
            seeds: Vec::new(),
            depth: DEFAULT_TRAVERSAL_DEPTH,
            direction: TraversalDirection::Both,
            output_format: OutputFormat::Sql,
            output_file: None,
            anonymize: false,
            redact_fields: Vec::new(),
            exclude_tables: HashSet::new(),
            passthrough_tables: HashSet::new(),
            verbose: false,
            dry_run: false,
            no_progress: false,
            validate: true,
            fail_on_validation_error: false,
            profile: false,
            stream: false,
            streaming_threshold: DEFAULT_STREAMING_THRESHOLD,
            streaming_chunk_size: DEFAULT_STREAMING_CHUNK_SIZE,
            virtual_foreign_keys: Vec::new(),
            schema: None,
            anonymization_seed: "dbslice_default_seed".to_string(),
            table_overrides: std::collections::HashMap::new(),
        }
    }
}

impl ExtractConfig {
    pub fn validate_depth(&self) -> Result<(), String> {
        if !(MIN_TRAVERSAL_DEPTH..=MAX_TRAVERSAL_DEPTH).contains(&self.depth) {
            return Err(format!(
                "depth must be between {} and {}, got {}",
                MIN_TRAVERSAL_DEPTH, MAX_TRAVERSAL_DEPTH, self.depth
            ));
        }
        Ok(())
    }

    pub fn should_stream(&self, estimated_rows: usize) -> bool {
        self.output_file.is_some()
            && (self.stream || estimated_rows >= self.streaming_threshold)
    }
}
