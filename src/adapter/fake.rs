// ABOUTME: In-memory DatabaseAdapter used by traversal/cycle unit tests
// ABOUTME: Assumes every seeded table's primary key column is named "id"

use crate::adapter::DatabaseAdapter;
use crate::errors::ExtractionError;
use crate::schema::{ForeignKey, Row, RowKey, SchemaGraph, SqlValue};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct FakeAdapter {
    tables: HashMap<String, Vec<Row>>,
}

impl FakeAdapter {
    pub fn new() -> Self {
        FakeAdapter::default()
    }

    pub fn seed_row(&mut self, table: &str, columns: Vec<(&str, SqlValue)>) {
        let row: Row = columns
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    fn row_id_key(row: &Row) -> RowKey {
        RowKey::from_values(std::slice::from_ref(row.get("id").unwrap_or(&SqlValue::Null)))
    }
}

#[async_trait]
impl DatabaseAdapter for FakeAdapter {
    async fn connect(&mut self) -> Result<(), ExtractionError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ExtractionError> {
        Ok(())
    }

    async fn get_schema(&mut self) -> Result<SchemaGraph, ExtractionError> {
        Ok(SchemaGraph::default())
    }

    async fn fetch_rows(
        &mut self,
        table: &str,
        _where_clause: &str,
    ) -> Result<Vec<Row>, ExtractionError> {
        Ok(self.tables.get(table).cloned().unwrap_or_default())
    }

    async fn fetch_by_pk(
        &mut self,
        table: &str,
        _pk_columns: &[String],
        pks: &HashSet<RowKey>,
    ) -> Result<Vec<Row>, ExtractionError> {
        Ok(self
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| pks.contains(&Self::row_id_key(r)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_fk_values(
        &mut self,
        fk: &ForeignKey,
        pks: &HashSet<RowKey>,
    ) -> Result<HashSet<RowKey>, ExtractionError> {
        let Some(rows) = self.tables.get(&fk.source_table) else {
            return Ok(HashSet::new());
        };
        let fk_col = &fk.source_columns[0];
        let mut result = HashSet::new();
        for row in rows {
            if pks.contains(&Self::row_id_key(row)) {
                if let Some(value) = row.get(fk_col) {
                    if !value.is_null() {
                        result.insert(RowKey::from_values(&[value.clone()]));
                    }
                }
            }
        }
        Ok(result)
    }

    async fn fetch_referencing_pks(
        &mut self,
        fk: &ForeignKey,
        parent_pks: &HashSet<RowKey>,
    ) -> Result<HashSet<RowKey>, ExtractionError> {
        let Some(rows) = self.tables.get(&fk.source_table) else {
            return Ok(HashSet::new());
        };
        let fk_col = &fk.source_columns[0];
        let mut result = HashSet::new();
        for row in rows {
            if let Some(value) = row.get(fk_col) {
                if !value.is_null() && parent_pks.contains(&RowKey::from_values(&[value.clone()])) {
                    result.insert(Self::row_id_key(row));
                }
            }
        }
        Ok(result)
    }

    async fn fetch_all_pks(
        &mut self,
        table: &str,
        _pk_columns: &[String],
    ) -> Result<HashSet<RowKey>, ExtractionError> {
        Ok(self
            .tables
            .get(table)
            .map(|rows| rows.iter().map(Self::row_id_key).collect())
            .unwrap_or_default())
    }

    async fn get_table_pk_columns(&mut self, _table: &str) -> Result<Vec<String>, ExtractionError> {
        Ok(vec!["id".to_string()])
    }

    async fn estimate_row_count(&mut self, table: &str) -> Result<usize, ExtractionError> {
        Ok(self.tables.get(table).map(|r| r.len()).unwrap_or(0))
    }

    async fn begin_snapshot(&mut self) -> Result<(), ExtractionError> {
        Ok(())
    }

    async fn end_snapshot(&mut self) -> Result<(), ExtractionError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeds_and_fetches_by_pk() {
        let mut adapter = FakeAdapter::new();
        adapter.seed_row("users", vec![("id", SqlValue::I64(1))]);
        let pks = HashSet::from([RowKey(vec!["1".to_string()])]);
        let rows = adapter
            .fetch_by_pk("users", &["id".to_string()], &pks)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
