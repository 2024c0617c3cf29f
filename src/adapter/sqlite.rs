// ABOUTME: SQLite adapter: PRAGMA-based introspection, in-process reads via rusqlite
// ABOUTME: Snapshot isolation uses a single read transaction for the whole extraction

use crate::adapter::sql_dialect::{batch_keys, effective_batch_size};
use crate::adapter::DatabaseAdapter;
use crate::connection::{parse_database_url, DatabaseConfig};
use crate::errors::ExtractionError;
use crate::config::SeedValue;
use crate::profiling::QueryProfiler;
use crate::schema::{Column, ForeignKey, Row, RowKey, SchemaGraph, SqlValue, Table};
use async_trait::async_trait;
use rusqlite::types::Value as LiteValue;
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

pub struct SqliteAdapter {
    config: DatabaseConfig,
    conn: Option<Connection>,
    profiler: Option<Arc<QueryProfiler>>,
}

impl SqliteAdapter {
    pub fn new(database_url: &str) -> Result<Self, ExtractionError> {
        let config = parse_database_url(database_url)?;
        Ok(SqliteAdapter {
            config,
            conn: None,
            profiler: None,
        })
    }

    pub fn with_profiler(mut self, profiler: Arc<QueryProfiler>) -> Self {
        self.profiler = Some(profiler);
        self
    }

    fn conn(&self) -> Result<&Connection, ExtractionError> {
        self.conn.as_ref().ok_or_else(|| ExtractionError::Connection {
            url_masked: self.config.masked_url(),
            reason: "not connected".to_string(),
        })
    }

    fn track(&self, table: &str, operation: &str, start: Instant, rows: usize) {
        if let Some(profiler) = &self.profiler {
            profiler.record(table, operation, start.elapsed(), rows);
        }
    }

    fn list_tables(&self) -> Result<Vec<String>, ExtractionError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
            .map_err(|e| ExtractionError::Schema(e.to_string()))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| ExtractionError::Schema(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ExtractionError::Schema(e.to_string()))?;
        Ok(names)
    }

    fn fetch_columns(&self, table: &str) -> Result<(Vec<Column>, Vec<String>), ExtractionError> {
        let conn = self.conn()?;
        let query = format!("PRAGMA table_info(\"{}\")", table);
        let mut stmt = conn
            .prepare(&query)
            .map_err(|e| ExtractionError::Schema(format!("failed to introspect {}: {}", table, e)))?;

        // columns: cid, name, type, notnull, dflt_value, pk
        let rows: Vec<(String, String, i64, Option<String>, i64)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })
            .map_err(|e| ExtractionError::Schema(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ExtractionError::Schema(e.to_string()))?;

        let mut columns = Vec::with_capacity(rows.len());
        let mut pk_with_order: Vec<(i64, String)> = Vec::new();
        for (name, data_type, notnull, default, pk) in rows {
            if pk > 0 {
                pk_with_order.push((pk, name.clone()));
            }
            columns.push(Column {
                name,
                data_type,
                nullable: notnull == 0,
                is_primary_key: pk > 0,
                default,
            });
        }
        pk_with_order.sort_by_key(|(ord, _)| *ord);
        let pk_columns = pk_with_order.into_iter().map(|(_, name)| name).collect();

        Ok((columns, pk_columns))
    }

    fn fetch_foreign_keys_for(&self, table: &str) -> Result<Vec<ForeignKey>, ExtractionError> {
        let conn = self.conn()?;
        let query = format!("PRAGMA foreign_key_list(\"{}\")", table);
        let mut stmt = conn
            .prepare(&query)
            .map_err(|e| ExtractionError::Schema(e.to_string()))?;

        // columns: id, seq, table, from, to, on_update, on_delete, match
        let rows: Vec<(i64, i64, String, String, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| ExtractionError::Schema(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ExtractionError::Schema(e.to_string()))?;

        let (columns, _pk_columns) = self.fetch_columns(table)?;
        let nullable_columns: HashSet<String> =
            columns.into_iter().filter(|c| c.nullable).map(|c| c.name).collect();

        let mut grouped: HashMap<i64, ForeignKey> = HashMap::new();
        let mut order = Vec::new();
        for (id, _seq, target_table, source_col, target_col) in rows {
            let entry = grouped.entry(id).or_insert_with(|| {
                order.push(id);
                ForeignKey {
                    name: format!("{}_fk_{}", table, id),
                    source_table: table.to_string(),
                    source_columns: Vec::new(),
                    target_table,
                    target_columns: Vec::new(),
                    is_nullable: true,
                }
            });
            entry.is_nullable = entry.is_nullable && nullable_columns.contains(&source_col);
            entry.source_columns.push(source_col);
            entry.target_columns.push(target_col);
        }

        Ok(order.into_iter().filter_map(|id| grouped.remove(&id)).collect())
    }

    fn row_to_values(row: &rusqlite::Row, column_names: &[String]) -> Result<Row, rusqlite::Error> {
        let mut result = Row::with_capacity(column_names.len());
        for (idx, name) in column_names.iter().enumerate() {
            let value: LiteValue = row.get(idx)?;
            result.insert(name.clone(), sqlite_value_to_sql(&value));
        }
        Ok(result)
    }

    fn pk_row_key(row: &Row, pk_columns: &[String]) -> RowKey {
        let values: Vec<SqlValue> = pk_columns
            .iter()
            .map(|c| row.get(c).cloned().unwrap_or(SqlValue::Null))
            .collect();
        RowKey::from_values(&values)
    }
}

fn sqlite_value_to_sql(value: &LiteValue) -> SqlValue {
    match value {
        LiteValue::Null => SqlValue::Null,
        LiteValue::Integer(i) => SqlValue::I64(*i),
        LiteValue::Real(f) => SqlValue::F64(*f),
        LiteValue::Text(s) => SqlValue::Text(s.clone()),
        LiteValue::Blob(b) => SqlValue::Bytes(b.clone()),
    }
}

fn sql_value_to_sqlite(value: &SqlValue) -> rusqlite::types::Value {
    match value {
        SqlValue::Null => LiteValue::Null,
        SqlValue::Bool(b) => LiteValue::Integer(*b as i64),
        SqlValue::I64(i) => LiteValue::Integer(*i),
        SqlValue::F64(f) => LiteValue::Real(*f),
        SqlValue::Decimal(d) => LiteValue::Text(d.clone()),
        SqlValue::Text(s) => LiteValue::Text(s.clone()),
        SqlValue::Bytes(b) => LiteValue::Blob(b.clone()),
        SqlValue::Timestamp(ts) => LiteValue::Text(ts.to_string()),
        SqlValue::Date(d) => LiteValue::Text(d.to_string()),
        SqlValue::Time(t) => LiteValue::Text(t.to_string()),
        SqlValue::Uuid(u) => LiteValue::Text(u.to_string()),
    }
}

#[async_trait]
impl DatabaseAdapter for SqliteAdapter {
    async fn connect(&mut self) -> Result<(), ExtractionError> {
        let conn = Connection::open(&self.config.database).map_err(|e| ExtractionError::Connection {
            url_masked: self.config.masked_url(),
            reason: e.to_string(),
        })?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| ExtractionError::Connection {
                url_masked: self.config.masked_url(),
                reason: e.to_string(),
            })?;
        self.conn = Some(conn);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ExtractionError> {
        self.conn = None;
        Ok(())
    }

    async fn get_schema(&mut self) -> Result<SchemaGraph, ExtractionError> {
        let table_names = self.list_tables()?;

        let mut tables = HashMap::new();
        let mut all_edges = Vec::new();
        for name in &table_names {
            let (columns, pk_columns) = self.fetch_columns(name)?;
            let fks = self.fetch_foreign_keys_for(name)?;
            all_edges.extend(fks.clone());
            tables.insert(
                name.clone(),
                Table {
                    name: name.clone(),
                    schema: "main".to_string(),
                    columns,
                    primary_key: pk_columns,
                    foreign_keys: fks,
                },
            );
        }

        Ok(SchemaGraph::new(tables, all_edges))
    }

    async fn fetch_rows(
        &mut self,
        table: &str,
        where_clause: &str,
    ) -> Result<Vec<Row>, ExtractionError> {
        let start = Instant::now();
        let query = format!("SELECT * FROM \"{}\" WHERE {}", table, where_clause);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&query).map_err(|e| ExtractionError::Extraction {
            table: table.to_string(),
            source: anyhow::anyhow!(e),
        })?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let rows = stmt
            .query_map([], |row| Self::row_to_values(row, &column_names))
            .map_err(|e| ExtractionError::Extraction {
                table: table.to_string(),
                source: anyhow::anyhow!(e),
            })?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ExtractionError::Extraction {
                table: table.to_string(),
                source: anyhow::anyhow!(e),
            })?;
        self.track(table, "fetch_rows", start, rows.len());
        Ok(rows)
    }

    async fn fetch_rows_by_equality(
        &mut self,
        table: &str,
        column: &str,
        value: &SeedValue,
    ) -> Result<Vec<Row>, ExtractionError> {
        let start = Instant::now();
        let query = format!(
            "SELECT * FROM \"{}\" WHERE \"{}\" = ?1",
            table,
            column.replace('"', "\"\"")
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&query).map_err(|e| ExtractionError::Extraction {
            table: table.to_string(),
            source: anyhow::anyhow!(e),
        })?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let to_extraction_err = |e: rusqlite::Error| ExtractionError::Extraction {
            table: table.to_string(),
            source: anyhow::anyhow!(e),
        };
        let rows: Vec<Row> = match value {
            SeedValue::Int(i) => stmt
                .query_map(rusqlite::params![i], |row| Self::row_to_values(row, &column_names))
                .map_err(to_extraction_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(to_extraction_err)?,
            SeedValue::Text(s) => stmt
                .query_map(rusqlite::params![s], |row| Self::row_to_values(row, &column_names))
                .map_err(to_extraction_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(to_extraction_err)?,
        };
        self.track(table, "fetch_rows_by_equality", start, rows.len());
        Ok(rows)
    }

    async fn fetch_by_pk(
        &mut self,
        table: &str,
        pk_columns: &[String],
        pks: &HashSet<RowKey>,
    ) -> Result<Vec<Row>, ExtractionError> {
        if pks.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let batch_size = effective_batch_size(1000, pk_columns.len());
        let mut all_rows = Vec::new();

        for batch in batch_keys(pks, pk_columns.len(), batch_size * pk_columns.len()) {
            let quoted_cols: Vec<String> = pk_columns.iter().map(|c| format!("\"{}\"", c)).collect();
            let (predicate, params): (String, Vec<rusqlite::types::Value>) = if pk_columns.len() == 1 {
                let placeholders = vec!["?"; batch.len()].join(", ");
                let params = batch
                    .iter()
                    .map(|k| sql_value_to_sqlite(&SqlValue::Text(k.0[0].clone())))
                    .collect();
                (format!("{} IN ({})", quoted_cols[0], placeholders), params)
            } else {
                let mut groups = Vec::with_capacity(batch.len());
                let mut params = Vec::new();
                for key in &batch {
                    let conds: Vec<String> = quoted_cols.iter().map(|c| format!("{} = ?", c)).collect();
                    groups.push(format!("({})", conds.join(" AND ")));
                    params.extend(key.0.iter().map(|v| sql_value_to_sqlite(&SqlValue::Text(v.clone()))));
                }
                (groups.join(" OR "), params)
            };

            let query = format!("SELECT * FROM \"{}\" WHERE {}", table, predicate);
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&query).map_err(|e| ExtractionError::Extraction {
                table: table.to_string(),
                source: anyhow::anyhow!(e),
            })?;
            let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
            let rows = stmt
                .query_map(params_refs.as_slice(), |row| Self::row_to_values(row, &column_names))
                .map_err(|e| ExtractionError::Extraction {
                    table: table.to_string(),
                    source: anyhow::anyhow!(e),
                })?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ExtractionError::Extraction {
                    table: table.to_string(),
                    source: anyhow::anyhow!(e),
                })?;
            all_rows.extend(rows);
        }

        self.track(table, "fetch_by_pk", start, all_rows.len());
        Ok(all_rows)
    }

    async fn fetch_fk_values(
        &mut self,
        fk: &ForeignKey,
        pks: &HashSet<RowKey>,
    ) -> Result<HashSet<RowKey>, ExtractionError> {
        let start = Instant::now();
        let rows = self.fetch_by_pk(&fk.source_table, &fk.source_columns, pks).await?;
        let result: HashSet<RowKey> = rows
            .iter()
            .filter_map(|row| {
                let values: Option<Vec<SqlValue>> =
                    fk.source_columns.iter().map(|c| row.get(c).cloned()).collect();
                let values = values?;
                if values.iter().any(|v| v.is_null()) {
                    None
                } else {
                    Some(RowKey::from_values(&values))
                }
            })
            .collect();
        self.track(&fk.target_table, "fetch_fk_values", start, result.len());
        Ok(result)
    }

    async fn fetch_referencing_pks(
        &mut self,
        fk: &ForeignKey,
        parent_pks: &HashSet<RowKey>,
    ) -> Result<HashSet<RowKey>, ExtractionError> {
        let start = Instant::now();
        if parent_pks.is_empty() {
            return Ok(HashSet::new());
        }
        let pk_columns = self.get_table_pk_columns(&fk.source_table).await?;
        let quoted_source_cols: Vec<String> =
            fk.source_columns.iter().map(|c| format!("\"{}\"", c)).collect();

        let mut all_pks = HashSet::new();
        let batch_size = effective_batch_size(1000, fk.source_columns.len());

        for batch in batch_keys(parent_pks, fk.source_columns.len(), batch_size * fk.source_columns.len())
        {
            let mut groups = Vec::with_capacity(batch.len());
            let mut params = Vec::new();
            for key in &batch {
                let conds: Vec<String> = quoted_source_cols.iter().map(|c| format!("{} = ?", c)).collect();
                groups.push(format!("({})", conds.join(" AND ")));
                params.extend(key.0.iter().map(|v| sql_value_to_sqlite(&SqlValue::Text(v.clone()))));
            }

            let query = format!("SELECT * FROM \"{}\" WHERE {}", fk.source_table, groups.join(" OR "));
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&query).map_err(|e| ExtractionError::Extraction {
                table: fk.source_table.clone(),
                source: anyhow::anyhow!(e),
            })?;
            let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
            let rows = stmt
                .query_map(params_refs.as_slice(), |row| Self::row_to_values(row, &column_names))
                .map_err(|e| ExtractionError::Extraction {
                    table: fk.source_table.clone(),
                    source: anyhow::anyhow!(e),
                })?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ExtractionError::Extraction {
                    table: fk.source_table.clone(),
                    source: anyhow::anyhow!(e),
                })?;

            for row in &rows {
                all_pks.insert(Self::pk_row_key(row, &pk_columns));
            }
        }

        self.track(&fk.source_table, "fetch_referencing_pks", start, all_pks.len());
        Ok(all_pks)
    }

    async fn fetch_all_pks(
        &mut self,
        table: &str,
        pk_columns: &[String],
    ) -> Result<HashSet<RowKey>, ExtractionError> {
        let start = Instant::now();
        let quoted_cols: Vec<String> = pk_columns.iter().map(|c| format!("\"{}\"", c)).collect();
        let query = format!("SELECT {} FROM \"{}\"", quoted_cols.join(", "), table);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&query).map_err(|e| ExtractionError::Extraction {
            table: table.to_string(),
            source: anyhow::anyhow!(e),
        })?;
        let pks = stmt
            .query_map([], |row| {
                let values: Result<Vec<SqlValue>, rusqlite::Error> = (0..pk_columns.len())
                    .map(|i| row.get::<_, LiteValue>(i).map(|v| sqlite_value_to_sql(&v)))
                    .collect();
                values.map(|v| RowKey::from_values(&v))
            })
            .map_err(|e| ExtractionError::Extraction {
                table: table.to_string(),
                source: anyhow::anyhow!(e),
            })?
            .collect::<Result<HashSet<_>, _>>()
            .map_err(|e| ExtractionError::Extraction {
                table: table.to_string(),
                source: anyhow::anyhow!(e),
            })?;
        self.track(table, "fetch_all_pks", start, pks.len());
        Ok(pks)
    }

    async fn get_table_pk_columns(&mut self, table: &str) -> Result<Vec<String>, ExtractionError> {
        let (_columns, pk_columns) = self.fetch_columns(table)?;
        Ok(pk_columns)
    }

    async fn estimate_row_count(&mut self, table: &str) -> Result<usize, ExtractionError> {
        let conn = self.conn()?;
        let query = format!("SELECT COUNT(*) FROM \"{}\"", table);
        let count: i64 = conn
            .query_row(&query, [], |row| row.get(0))
            .map_err(|e| ExtractionError::Extraction {
                table: table.to_string(),
                source: anyhow::anyhow!(e),
            })?;
        Ok(count.max(0) as usize)
    }

    async fn begin_snapshot(&mut self) -> Result<(), ExtractionError> {
        self.conn()?
            .execute_batch("BEGIN DEFERRED TRANSACTION;")
            .map_err(|e| ExtractionError::Connection {
                url_masked: self.config.masked_url(),
                reason: e.to_string(),
            })
    }

    async fn end_snapshot(&mut self) -> Result<(), ExtractionError> {
        self.conn()?
            .execute_batch("ROLLBACK;")
            .map_err(|e| ExtractionError::Connection {
                url_masked: self.config.masked_url(),
                reason: e.to_string(),
            })
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_adapter() -> SqliteAdapter {
        SqliteAdapter::new("sqlite:///:memory:").unwrap()
    }

    #[tokio::test]
    async fn introspects_tables_and_foreign_keys() {
        let mut adapter = memory_adapter();
        adapter.connect().await.unwrap();
        adapter
            .conn()
            .unwrap()
            .execute_batch(
                "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT);
                 CREATE TABLE orders (
                     id INTEGER PRIMARY KEY,
                     customer_id INTEGER,
                     FOREIGN KEY (customer_id) REFERENCES customers(id)
                 );
                 INSERT INTO customers (id, name) VALUES (1, 'Alice');
                 INSERT INTO orders (id, customer_id) VALUES (10, 1);",
            )
            .unwrap();

        let schema = adapter.get_schema().await.unwrap();
        assert!(schema.has_table("customers"));
        assert!(schema.has_table("orders"));
        assert_eq!(schema.get_parents("orders").len(), 1);
    }

    #[tokio::test]
    async fn fetches_rows_by_predicate() {
        let mut adapter = memory_adapter();
        adapter.connect().await.unwrap();
        adapter
            .conn()
            .unwrap()
            .execute_batch(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, active INTEGER);
                 INSERT INTO users (id, active) VALUES (1, 1), (2, 0);",
            )
            .unwrap();

        let rows = adapter.fetch_rows("users", "active = 1").await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
