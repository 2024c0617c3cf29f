// ABOUTME: Post-extraction referential-integrity validation
// ABOUTME: Confirms every non-broken FK in the extracted subset resolves to an included parent

use crate::schema::{ForeignKey, Row, RowKey, SchemaGraph, SqlValue};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A row whose foreign key points at a parent record that didn't make it
/// into the extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct OrphanedRecord {
    pub table: String,
    pub pk_columns: Vec<String>,
    pub pk_values: Vec<SqlValue>,
    pub fk_name: String,
    pub fk_columns: Vec<String>,
    pub fk_values: Vec<SqlValue>,
    pub parent_table: String,
    pub parent_pk_columns: Vec<String>,
}

impl fmt::Display for OrphanedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pk_str = self
            .pk_columns
            .iter()
            .zip(&self.pk_values)
            .map(|(c, v)| format!("{}={}", c, v))
            .collect::<Vec<_>>()
            .join(", ");
        let fk_str = self
            .fk_columns
            .iter()
            .zip(&self.fk_values)
            .map(|(c, v)| format!("{}={}", c, v))
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "{}({}) -> {}({}) via FK '{}' - parent not found",
            self.table, pk_str, self.parent_table, fk_str, self.fk_name
        )
    }
}

/// Result of validating an extracted subset for referential integrity.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub orphaned_records: Vec<OrphanedRecord>,
    pub broken_fks: Vec<ForeignKey>,
    pub total_records_checked: usize,
    pub total_fk_checks: usize,
}

impl ValidationReport {
    fn new(broken_fks: Vec<ForeignKey>) -> Self {
        ValidationReport {
            is_valid: true,
            broken_fks,
            ..Default::default()
        }
    }

    fn add_orphan(&mut self, orphan: OrphanedRecord) {
        self.orphaned_records.push(orphan);
        self.is_valid = false;
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(80))?;
        writeln!(f, "EXTRACTION VALIDATION REPORT")?;
        writeln!(f, "{}", "=".repeat(80))?;
        writeln!(f)?;
        writeln!(f, "Records checked: {}", self.total_records_checked)?;
        writeln!(f, "Foreign key checks performed: {}", self.total_fk_checks)?;
        writeln!(f)?;

        if !self.broken_fks.is_empty() {
            writeln!(f, "Intentionally broken FKs (for cycles): {}", self.broken_fks.len())?;
            for fk in &self.broken_fks {
                writeln!(
                    f,
                    "  - {}.{} -> {}.{} (FK: {})",
                    fk.source_table,
                    fk.source_columns.join(", "),
                    fk.target_table,
                    fk.target_columns.join(", "),
                    fk.name
                )?;
            }
            writeln!(f)?;
        }

        if self.is_valid {
            writeln!(f, "Status: VALID")?;
            write!(f, "All foreign key references point to included records.")
        } else {
            writeln!(f, "Status: INVALID")?;
            writeln!(f, "Found {} orphaned record(s):", self.orphaned_records.len())?;
            writeln!(f)?;

            let mut by_table: HashMap<&str, Vec<&OrphanedRecord>> = HashMap::new();
            for orphan in &self.orphaned_records {
                by_table.entry(orphan.table.as_str()).or_default().push(orphan);
            }
            let mut tables: Vec<&str> = by_table.keys().copied().collect();
            tables.sort();

            for table in tables {
                let orphans = &by_table[table];
                writeln!(f, "Table: {} ({} orphaned)", table, orphans.len())?;
                for orphan in orphans {
                    writeln!(f, "  - {}", orphan)?;
                }
                writeln!(f)?;
            }
            write!(f, "{}", "=".repeat(80))
        }
    }
}

/// Checks that every foreign key in an extracted subset (except ones
/// intentionally broken for cycle handling) resolves to a parent record
/// that is itself present in the subset.
pub struct ExtractionValidator<'a> {
    schema: &'a SchemaGraph,
}

impl<'a> ExtractionValidator<'a> {
    pub fn new(schema: &'a SchemaGraph) -> Self {
        tracing::debug!("ExtractionValidator initialized");
        ExtractionValidator { schema }
    }

    pub fn validate(
        &self,
        tables: &HashMap<String, Vec<Row>>,
        broken_fks: &[ForeignKey],
    ) -> ValidationReport {
        tracing::info!(
            table_count = tables.len(),
            broken_fk_count = broken_fks.len(),
            "starting extraction validation"
        );

        let mut report = ValidationReport::new(broken_fks.to_vec());
        let broken_fk_set: HashSet<&ForeignKey> = broken_fks.iter().collect();

        let pk_index = self.build_pk_index(tables);

        for (table_name, rows) in tables {
            let Some(table_info) = self.schema.get_table(table_name) else {
                tracing::warn!(table = %table_name, "table not found in schema during validation");
                continue;
            };

            report.total_records_checked += rows.len();
            let parents = self.schema.get_parents(table_name);

            for row in rows {
                let pk_values = extract_values(row, &table_info.primary_key);

                for fk in &parents {
                    if broken_fk_set.contains(fk) {
                        continue;
                    }

                    report.total_fk_checks += 1;
                    let fk_values = extract_values(row, &fk.source_columns);

                    if fk_values.iter().any(SqlValue::is_null) {
                        continue;
                    }

                    let key = RowKey::from_values(&fk_values);
                    let has_parent = pk_index
                        .get(&fk.target_table)
                        .map(|pks| pks.contains(&key))
                        .unwrap_or(false);

                    if !has_parent {
                        let orphan = OrphanedRecord {
                            table: table_name.clone(),
                            pk_columns: table_info.primary_key.clone(),
                            pk_values: pk_values.clone(),
                            fk_name: fk.name.clone(),
                            fk_columns: fk.source_columns.clone(),
                            fk_values,
                            parent_table: fk.target_table.clone(),
                            parent_pk_columns: fk.target_columns.clone(),
                        };
                        tracing::warn!(
                            table = %table_name,
                            parent_table = %fk.target_table,
                            fk_name = %fk.name,
                            "orphaned record detected"
                        );
                        report.add_orphan(orphan);
                    }
                }
            }
        }

        tracing::info!(
            is_valid = report.is_valid,
            orphaned_count = report.orphaned_records.len(),
            "validation complete"
        );

        report
    }

    fn build_pk_index(&self, tables: &HashMap<String, Vec<Row>>) -> HashMap<String, HashSet<RowKey>> {
        let mut index = HashMap::new();
        for (table_name, rows) in tables {
            let Some(table_info) = self.schema.get_table(table_name) else {
                continue;
            };
            let pks: HashSet<RowKey> = rows
                .iter()
                .map(|row| RowKey::from_values(&extract_values(row, &table_info.primary_key)))
                .collect();
            index.insert(table_name.clone(), pks);
        }
        index
    }
}

fn extract_values(row: &Row, columns: &[String]) -> Vec<SqlValue> {
    columns
        .iter()
        .map(|c| row.get(c).cloned().unwrap_or(SqlValue::Null))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Table;
    use std::collections::HashMap as Map;

    fn schema_with_fk() -> SchemaGraph {
        let fk = ForeignKey {
            name: "fk_orders_customer".into(),
            source_table: "orders".into(),
            source_columns: vec!["customer_id".into()],
            target_table: "customers".into(),
            target_columns: vec!["id".into()],
            is_nullable: false,
        };
        let mut tables = Map::new();
        tables.insert(
            "orders".to_string(),
            Table {
                name: "orders".into(),
                schema: "public".into(),
                columns: vec![],
                primary_key: vec!["id".into()],
                foreign_keys: vec![fk.clone()],
            },
        );
        tables.insert(
            "customers".to_string(),
            Table {
                name: "customers".into(),
                schema: "public".into(),
                columns: vec![],
                primary_key: vec!["id".into()],
                foreign_keys: vec![],
            },
        );
        SchemaGraph::new(tables, vec![fk])
    }

    fn row(pairs: &[(&str, SqlValue)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn detects_orphaned_fk_reference() {
        let schema = schema_with_fk();
        let validator = ExtractionValidator::new(&schema);

        let mut tables = Map::new();
        tables.insert(
            "orders".to_string(),
            vec![row(&[("id", SqlValue::I64(1)), ("customer_id", SqlValue::I64(99))])],
        );
        tables.insert("customers".to_string(), vec![]);

        let report = validator.validate(&tables, &[]);
        assert!(!report.is_valid);
        assert_eq!(report.orphaned_records.len(), 1);
        assert_eq!(report.orphaned_records[0].parent_table, "customers");
    }

    #[test]
    fn valid_when_parent_present() {
        let schema = schema_with_fk();
        let validator = ExtractionValidator::new(&schema);

        let mut tables = Map::new();
        tables.insert(
            "orders".to_string(),
            vec![row(&[("id", SqlValue::I64(1)), ("customer_id", SqlValue::I64(5))])],
        );
        tables.insert("customers".to_string(), vec![row(&[("id", SqlValue::I64(5))])]);

        let report = validator.validate(&tables, &[]);
        assert!(report.is_valid);
        assert_eq!(report.total_fk_checks, 1);
    }

    #[test]
    fn skips_null_fk_values() {
        let schema = schema_with_fk();
        let validator = ExtractionValidator::new(&schema);

        let mut tables = Map::new();
        tables.insert(
            "orders".to_string(),
            vec![row(&[("id", SqlValue::I64(1)), ("customer_id", SqlValue::Null)])],
        );
        tables.insert("customers".to_string(), vec![]);

        let report = validator.validate(&tables, &[]);
        assert!(report.is_valid);
    }

    #[test]
    fn broken_fks_are_exempt_from_validation() {
        let schema = schema_with_fk();
        let validator = ExtractionValidator::new(&schema);
        let broken = schema.edges.clone();

        let mut tables = Map::new();
        tables.insert(
            "orders".to_string(),
            vec![row(&[("id", SqlValue::I64(1)), ("customer_id", SqlValue::I64(99))])],
        );
        tables.insert("customers".to_string(), vec![]);

        let report = validator.validate(&tables, &broken);
        assert!(report.is_valid);
        assert_eq!(report.total_fk_checks, 0);
    }
}
