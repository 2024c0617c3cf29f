// ABOUTME: RFC 4180 CSV output generation from extracted data
// ABOUTME: Ported from the original CSV generator's single/per-table modes and value formatting

use crate::schema::{Row, SqlValue};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvMode {
    Single,
    PerTable,
}

/// Generates CSV output from extracted data, either as a single file with a
/// `table_name` column or as one file per table.
pub struct CsvGenerator {
    pub mode: CsvMode,
    pub delimiter: u8,
}

impl CsvGenerator {
    pub fn new(mode: CsvMode, delimiter: u8) -> Self {
        CsvGenerator { mode, delimiter }
    }

    /// Single CSV with every table interleaved, `table_name` as the first
    /// column, sorted columns after it so the header is stable across runs.
    pub fn generate_single(
        &self,
        tables_data: &HashMap<String, Vec<Row>>,
        insert_order: &[String],
    ) -> Result<String, csv::Error> {
        let mut all_columns: BTreeSet<String> = BTreeSet::new();
        for rows in tables_data.values() {
            if let Some(first) = rows.first() {
                all_columns.extend(first.keys().cloned());
            }
        }
        let sorted_columns: Vec<String> = all_columns.into_iter().collect();

        let mut fieldnames = vec!["table_name".to_string()];
        fieldnames.extend(sorted_columns.iter().cloned());

        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(Vec::new());
        writer.write_record(&fieldnames)?;

        for table in insert_order {
            let Some(rows) = tables_data.get(table) else {
                continue;
            };
            for row in rows {
                let mut record: Vec<String> = Vec::with_capacity(fieldnames.len());
                record.push(table.clone());
                for col in &sorted_columns {
                    record.push(
                        row.get(col)
                            .map(format_value)
                            .unwrap_or_default(),
                    );
                }
                writer.write_record(&record)?;
            }
        }

        let bytes = writer.into_inner().map_err(|e| e.into_error())?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// A separate CSV string per table, in the table's own column order.
    pub fn generate_per_table(
        &self,
        tables_data: &HashMap<String, Vec<Row>>,
    ) -> Result<HashMap<String, String>, csv::Error> {
        let mut result = HashMap::new();

        for (table, rows) in tables_data {
            if rows.is_empty() {
                result.insert(table.clone(), String::new());
                continue;
            }

            let fieldnames: Vec<String> = rows[0].keys().cloned().collect();
            let mut writer = csv::WriterBuilder::new()
                .delimiter(self.delimiter)
                .from_writer(Vec::new());
            writer.write_record(&fieldnames)?;

            for row in rows {
                let record: Vec<String> = fieldnames
                    .iter()
                    .map(|c| row.get(c).map(format_value).unwrap_or_default())
                    .collect();
                writer.write_record(&record)?;
            }

            let bytes = writer.into_inner().map_err(|e| e.into_error())?;
            result.insert(table.clone(), String::from_utf8_lossy(&bytes).into_owned());
        }

        Ok(result)
    }
}

/// NULL becomes an empty field per CSV convention; everything else renders
/// its natural textual form.
fn format_value(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => String::new(),
        SqlValue::Bool(b) => if *b { "true".to_string() } else { "false".to_string() },
        SqlValue::Bytes(b) => b.iter().map(|byte| format!("{:02x}", byte)).collect(),
        SqlValue::Timestamp(ts) => ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
        SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        SqlValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, SqlValue)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn single_mode_prefixes_table_name_column() {
        let generator = CsvGenerator::new(CsvMode::Single, b',');
        let mut tables_data = HashMap::new();
        tables_data.insert(
            "users".to_string(),
            vec![row(&[("id", SqlValue::I64(1)), ("email", SqlValue::Text("a@b.com".into()))])],
        );

        let csv_str = generator
            .generate_single(&tables_data, &["users".to_string()])
            .unwrap();
        let mut lines = csv_str.lines();
        assert_eq!(lines.next().unwrap(), "table_name,email,id");
        assert_eq!(lines.next().unwrap(), "users,a@b.com,1");
    }

    #[test]
    fn null_values_render_as_empty_field() {
        let generator = CsvGenerator::new(CsvMode::Single, b',');
        let mut tables_data = HashMap::new();
        tables_data.insert(
            "users".to_string(),
            vec![row(&[("id", SqlValue::I64(1)), ("nickname", SqlValue::Null)])],
        );
        let csv_str = generator
            .generate_single(&tables_data, &["users".to_string()])
            .unwrap();
        assert!(csv_str.contains("users,,1") || csv_str.contains("users,1,"));
    }

    #[test]
    fn per_table_mode_emits_one_csv_per_table() {
        let generator = CsvGenerator::new(CsvMode::PerTable, b',');
        let mut tables_data = HashMap::new();
        tables_data.insert("users".to_string(), vec![row(&[("id", SqlValue::I64(1))])]);
        tables_data.insert("orders".to_string(), vec![]);

        let result = generator.generate_per_table(&tables_data).unwrap();
        assert_eq!(result["users"].lines().count(), 2);
        assert_eq!(result["orders"], "");
    }

    #[test]
    fn boolean_values_render_lowercase() {
        let generator = CsvGenerator::new(CsvMode::Single, b',');
        let mut tables_data = HashMap::new();
        tables_data.insert(
            "flags".to_string(),
            vec![row(&[("active", SqlValue::Bool(true))])],
        );
        let csv_str = generator
            .generate_single(&tables_data, &["flags".to_string()])
            .unwrap();
        assert!(csv_str.contains("true"));
    }
}
