// ABOUTME: Parses CLI/config seed strings into SeedSpec values
// ABOUTME: Equality seeds get identifier validation; predicate seeds go through safety::validate_where_clause

use crate::config::{SeedSpec, SeedValue};
use crate::errors::ExtractionError;
use crate::safety::{validate_column_name, validate_table_name, validate_where_clause};

/// Parses a single seed string.
///
/// Format detection:
/// - `table:WHERE_CLAUSE` when a colon appears before any `=` (predicate form)
/// - `table.column=value` when a dot is followed later by `=` (equality form)
pub fn parse_seed(seed_str: &str) -> Result<SeedSpec, ExtractionError> {
    let trimmed = seed_str.trim();
    if trimmed.is_empty() {
        return Err(ExtractionError::InvalidSeed {
            seed: seed_str.to_string(),
            reason: "seed cannot be empty".to_string(),
        });
    }

    let colon_idx = trimmed.find(':');
    let eq_idx = trimmed.find('=');

    let is_predicate = match (colon_idx, eq_idx) {
        (Some(c), Some(e)) => c < e,
        (Some(_), None) => true,
        (None, _) => false,
    };

    if is_predicate {
        parse_predicate_seed(trimmed, seed_str)
    } else {
        parse_equality_seed(trimmed, seed_str)
    }
}

fn parse_predicate_seed(trimmed: &str, original: &str) -> Result<SeedSpec, ExtractionError> {
    let (table, where_clause) = trimmed.split_once(':').ok_or_else(|| ExtractionError::InvalidSeed {
        seed: original.to_string(),
        reason: "predicate seed must be 'table:WHERE_CLAUSE'".to_string(),
    })?;

    let table = table.trim();
    let where_clause = where_clause.trim();

    if where_clause.is_empty() {
        return Err(ExtractionError::InvalidSeed {
            seed: original.to_string(),
            reason: "predicate seed must include a non-empty WHERE clause".to_string(),
        });
    }

    validate_table_name(table)?;
    validate_where_clause(where_clause, original)?;

    Ok(SeedSpec::Predicate {
        table: table.to_string(),
        where_clause: where_clause.to_string(),
    })
}

fn parse_equality_seed(trimmed: &str, original: &str) -> Result<SeedSpec, ExtractionError> {
    let (table_column, value_str) = trimmed.split_once('=').ok_or_else(|| ExtractionError::InvalidSeed {
        seed: original.to_string(),
        reason: "equality seed must be 'table.column=value'".to_string(),
    })?;

    let (table, column) = table_column.split_once('.').ok_or_else(|| ExtractionError::InvalidSeed {
        seed: original.to_string(),
        reason: "equality seed must be 'table.column=value'".to_string(),
    })?;

    let table = table.trim();
    let column = column.trim();
    let value_str = value_str.trim();

    if value_str.is_empty() {
        return Err(ExtractionError::InvalidSeed {
            seed: original.to_string(),
            reason: "equality seed value cannot be empty".to_string(),
        });
    }

    validate_table_name(table)?;
    validate_column_name(column)?;

    let value = parse_seed_value(value_str);

    Ok(SeedSpec::Equality {
        table: table.to_string(),
        column: column.to_string(),
        value,
    })
}

fn parse_seed_value(raw: &str) -> SeedValue {
    if let Ok(i) = raw.parse::<i64>() {
        return SeedValue::Int(i);
    }
    let unquoted = strip_matching_quotes(raw);
    SeedValue::Text(unquoted.to_string())
}

fn strip_matching_quotes(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'\'' && last == b'\'') || (first == b'"' && last == b'"') {
            return &raw[1..raw.len() - 1];
        }
    }
    raw
}
