// ABOUTME: SQL INSERT/UPDATE generation for the extracted subset
// ABOUTME: Dialect-aware identifier quoting and literal formatting per target database

use crate::connection::DatabaseType;
use crate::cycles::DeferredUpdate;
use crate::schema::{Row, SchemaGraph, SqlValue, Table};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Configuration for a single SQL generation pass.
#[derive(Debug, Clone)]
pub struct SqlGenerator {
    pub db_type: DatabaseType,
    pub include_transaction: bool,
    pub include_truncate: bool,
    pub disable_fk_checks: bool,
}

impl SqlGenerator {
    pub fn new(db_type: DatabaseType) -> Self {
        SqlGenerator {
            db_type,
            include_transaction: true,
            include_truncate: false,
            disable_fk_checks: false,
        }
    }

    pub fn with_transaction(mut self, include: bool) -> Self {
        self.include_transaction = include;
        self
    }

    pub fn with_truncate(mut self, include: bool) -> Self {
        self.include_truncate = include;
        self
    }

    pub fn with_disable_fk_checks(mut self, disable: bool) -> Self {
        self.disable_fk_checks = disable;
        self
    }

    fn quote_identifier(&self, name: &str) -> String {
        match self.db_type {
            DatabaseType::MySql => format!("`{}`", name.replace('`', "``")),
            DatabaseType::PostgreSql | DatabaseType::Sqlite => {
                format!("\"{}\"", name.replace('"', "\"\""))
            }
        }
    }

    /// Generates the full SQL dump: an optional transaction/FK-check wrapper,
    /// one or more INSERT statements per table in `insert_order`, and a
    /// deferred-UPDATE section restoring any FK values that were NULLed out
    /// to break a cycle.
    pub fn generate(
        &self,
        tables_data: &std::collections::HashMap<String, Vec<Row>>,
        insert_order: &[String],
        tables_schema: &std::collections::HashMap<String, Table>,
        broken_fk_columns: &std::collections::HashMap<String, HashSet<String>>,
        deferred_updates: &[DeferredUpdate],
    ) -> String {
        let mut out = String::new();

        writeln!(out, "-- Generated by dbslice").unwrap();
        let total_rows: usize = tables_data.values().map(|v| v.len()).sum();
        writeln!(out, "-- Tables: {}, rows: {}", tables_data.len(), total_rows).unwrap();
        if !deferred_updates.is_empty() {
            writeln!(
                out,
                "-- Circular references detected: {} deferred UPDATE(s)",
                deferred_updates.len()
            )
            .unwrap();
        }
        out.push('\n');

        if self.disable_fk_checks && self.db_type == DatabaseType::MySql {
            out.push_str("SET FOREIGN_KEY_CHECKS=0;\n\n");
        }

        if self.include_transaction {
            out.push_str("BEGIN;\n\n");
        }

        if self.include_truncate {
            for table in insert_order.iter().rev() {
                if tables_data.contains_key(table) {
                    writeln!(out, "TRUNCATE TABLE {} CASCADE;", self.quote_identifier(table)).unwrap();
                }
            }
            out.push('\n');
        }

        for table in insert_order {
            let Some(rows) = tables_data.get(table) else {
                continue;
            };
            if rows.is_empty() {
                continue;
            }
            let Some(table_info) = tables_schema.get(table) else {
                continue;
            };

            writeln!(out, "-- {} ({} rows)", table, rows.len()).unwrap();
            let null_columns = broken_fk_columns.get(table);
            for row in rows {
                out.push_str(&self.generate_insert(table, row, table_info, null_columns));
                out.push('\n');
            }
            out.push('\n');
        }

        if !deferred_updates.is_empty() {
            out.push_str("-- Restore circular foreign key references\n");
            for update in deferred_updates {
                out.push_str(&self.generate_deferred_update(update, tables_schema));
                out.push('\n');
            }
            out.push('\n');
        }

        if self.include_transaction {
            out.push_str("COMMIT;\n");
        }

        if self.disable_fk_checks && self.db_type == DatabaseType::MySql {
            out.push_str("\nSET FOREIGN_KEY_CHECKS=1;\n");
        }

        out
    }

    /// Generates a single `INSERT` statement for `row`. Columns named in
    /// `null_columns` are emitted as `NULL` regardless of their actual value,
    /// used to break a circular FK reference pending a deferred UPDATE.
    pub fn generate_insert(
        &self,
        table: &str,
        row: &Row,
        table_info: &Table,
        null_columns: Option<&HashSet<String>>,
    ) -> String {
        let mut columns: Vec<&String> = row.keys().collect();
        columns.sort_by_key(|c| {
            table_info
                .columns
                .iter()
                .position(|col| &col.name == *c)
                .unwrap_or(usize::MAX)
        });

        let quoted_cols: Vec<String> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        let values: Vec<String> = columns
            .iter()
            .map(|c| {
                if null_columns.map(|n| n.contains(*c)).unwrap_or(false) {
                    "NULL".to_string()
                } else {
                    self.format_literal(row.get(*c).unwrap_or(&SqlValue::Null))
                }
            })
            .collect();

        format!(
            "INSERT INTO {} ({}) VALUES ({});",
            self.quote_identifier(table),
            quoted_cols.join(", "),
            values.join(", ")
        )
    }

    /// Generates the `UPDATE` statement that restores a single broken FK
    /// value once every table has been inserted.
    pub fn generate_deferred_update(
        &self,
        update: &DeferredUpdate,
        tables_schema: &std::collections::HashMap<String, Table>,
    ) -> String {
        let _ = tables_schema;
        let pk_conditions: Vec<String> = update
            .pk_columns
            .iter()
            .zip(&update.pk_values)
            .map(|(col, val)| format!("{} = {}", self.quote_identifier(col), self.format_literal(val)))
            .collect();

        format!(
            "UPDATE {} SET {} = {} WHERE {};",
            self.quote_identifier(&update.table),
            self.quote_identifier(&update.fk_column),
            self.format_literal(&update.fk_value),
            pk_conditions.join(" AND ")
        )
    }

    fn format_literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => match self.db_type {
                DatabaseType::Sqlite => if *b { "1".to_string() } else { "0".to_string() },
                _ => if *b { "TRUE".to_string() } else { "FALSE".to_string() },
            },
            SqlValue::I64(i) => i.to_string(),
            SqlValue::F64(f) => f.to_string(),
            SqlValue::Decimal(d) => d.clone(),
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            SqlValue::Bytes(b) => match self.db_type {
                DatabaseType::PostgreSql => format!("'\\x{}'", hex_encode(b)),
                DatabaseType::MySql => format!("X'{}'", hex_encode(b)),
                DatabaseType::Sqlite => format!("X'{}'", hex_encode(b)),
            },
            SqlValue::Timestamp(ts) => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            SqlValue::Time(t) => format!("'{}'", t.format("%H:%M:%S%.f")),
            SqlValue::Uuid(u) => format!("'{}'", u),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
