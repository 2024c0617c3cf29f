// ABOUTME: JSON output generation from extracted data
// ABOUTME: Ported from the original JSON generator's single/per-table modes and type encoder

use crate::schema::{Row, SqlValue};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonMode {
    Single,
    PerTable,
}

/// Generates JSON output from extracted data in two modes: a single document
/// with metadata and all tables, or one document per table.
pub struct JsonGenerator {
    pub mode: JsonMode,
    pub pretty: bool,
}

impl JsonGenerator {
    pub fn new(mode: JsonMode, pretty: bool) -> Self {
        JsonGenerator { mode, pretty }
    }

    pub fn generate_single(
        &self,
        tables_data: &HashMap<String, Vec<Row>>,
        insert_order: &[String],
        broken_fk_count: usize,
        deferred_update_count: usize,
    ) -> String {
        let total_rows: usize = tables_data.values().map(|v| v.len()).sum();
        let has_cycles = broken_fk_count > 0 || deferred_update_count > 0;

        let mut metadata = Map::new();
        metadata.insert("generated_by".to_string(), json!("dbslice"));
        metadata.insert("table_count".to_string(), json!(tables_data.len()));
        metadata.insert("total_rows".to_string(), json!(total_rows));
        metadata.insert("insert_order".to_string(), json!(insert_order));
        metadata.insert("has_cycles".to_string(), json!(has_cycles));
        if has_cycles {
            metadata.insert("broken_fks_count".to_string(), json!(broken_fk_count));
            metadata.insert(
                "deferred_updates_count".to_string(),
                json!(deferred_update_count),
            );
        }

        let mut tables = Map::new();
        for (table, rows) in tables_data {
            tables.insert(
                table.clone(),
                Value::Array(rows.iter().map(row_to_json).collect()),
            );
        }

        let output = json!({
            "metadata": Value::Object(metadata),
            "tables": Value::Object(tables),
        });

        self.render(&output)
    }

    pub fn generate_per_table(
        &self,
        tables_data: &HashMap<String, Vec<Row>>,
    ) -> HashMap<String, String> {
        tables_data
            .iter()
            .map(|(table, rows)| {
                let doc = json!({
                    "table": table,
                    "row_count": rows.len(),
                    "rows": rows.iter().map(row_to_json).collect::<Vec<_>>(),
                });
                (table.clone(), self.render(&doc))
            })
            .collect()
    }

    fn render(&self, value: &Value) -> String {
        if self.pretty {
            serde_json::to_string_pretty(value).expect("json value is always serializable")
        } else {
            serde_json::to_string(value).expect("json value is always serializable")
        }
    }
}

fn row_to_json(row: &Row) -> Value {
    let mut map = Map::new();
    for (column, value) in row {
        map.insert(column.clone(), sql_value_to_json(value));
    }
    Value::Object(map)
}

/// Mirrors the original encoder's type conversions: datetimes to ISO 8601,
/// decimals to numbers where representable, bytes to a hex string.
fn sql_value_to_json(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(b) => json!(b),
        SqlValue::I64(i) => json!(i),
        SqlValue::F64(f) => json!(f),
        SqlValue::Decimal(d) => match d.parse::<f64>() {
            Ok(f) => json!(f),
            Err(_) => json!(d),
        },
        SqlValue::Text(s) => json!(s),
        SqlValue::Bytes(b) => json!(hex_encode(b)),
        SqlValue::Timestamp(ts) => json!(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        SqlValue::Date(d) => json!(d.format("%Y-%m-%d").to_string()),
        SqlValue::Time(t) => json!(t.format("%H:%M:%S%.f").to_string()),
        SqlValue::Uuid(u) => json!(u.to_string()),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
