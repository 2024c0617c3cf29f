// ABOUTME: DatabaseAdapter trait implemented by each supported backend
// ABOUTME: Owns schema introspection, batched fetches and snapshot-isolated reads

pub mod fake;
pub mod mysql;
pub mod postgres;
pub mod sql_dialect;
pub mod sqlite;

use crate::config::SeedValue;
use crate::connection::DatabaseType;
use crate::errors::ExtractionError;
use crate::profiling::QueryProfiler;
use crate::schema::{ForeignKey, Row, RowKey, SchemaGraph};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Backend-agnostic interface the traversal, validation and emission layers
/// drive. Every fetch method returns data already scoped to the requested
/// primary/foreign key values; adapters are responsible for batching large
/// key sets to stay under the backend's parameter-count limits.
#[async_trait]
pub trait DatabaseAdapter: Send {
    async fn connect(&mut self) -> Result<(), ExtractionError>;
    async fn close(&mut self) -> Result<(), ExtractionError>;
    async fn get_schema(&mut self) -> Result<SchemaGraph, ExtractionError>;

    /// Full rows for `table` matching a pre-validated WHERE clause.
    async fn fetch_rows(
        &mut self,
        table: &str,
        where_clause: &str,
    ) -> Result<Vec<Row>, ExtractionError>;

    /// Full rows for `table` where `column` equals `value`, bound as a true
    /// query parameter rather than interpolated into the predicate text.
    /// Equality seeds skip `fetch_rows`'s safety filter entirely (there's no
    /// free-form predicate to validate) but must never fall back to string
    /// interpolation for the value itself. The default renders the same
    /// `column = value` text `fetch_rows` would have before this method
    /// existed; real backends override it with a bound parameter.
    async fn fetch_rows_by_equality(
        &mut self,
        table: &str,
        column: &str,
        value: &SeedValue,
    ) -> Result<Vec<Row>, ExtractionError> {
        let where_clause = match value {
            SeedValue::Int(i) => format!("{} = {}", column, i),
            SeedValue::Text(s) => format!("{} = '{}'", column, s.replace('\'', "''")),
        };
        self.fetch_rows(table, &where_clause).await
    }

    /// Full rows for `table` whose primary key is in `pks`, one call.
    async fn fetch_by_pk(
        &mut self,
        table: &str,
        pk_columns: &[String],
        pks: &HashSet<RowKey>,
    ) -> Result<Vec<Row>, ExtractionError>;

    /// Same as `fetch_by_pk` but yielded in chunks of at most `chunk_size`,
    /// so callers (the streaming emitter) never hold the full row set.
    async fn fetch_by_pk_chunked(
        &mut self,
        table: &str,
        pk_columns: &[String],
        pks: &HashSet<RowKey>,
        chunk_size: usize,
    ) -> Result<Vec<Vec<Row>>, ExtractionError> {
        let rows = self.fetch_by_pk(table, pk_columns, pks).await?;
        Ok(rows
            .chunks(chunk_size.max(1))
            .map(|c| c.to_vec())
            .collect())
    }

    /// The parent-side PK values referenced by `fk` for the given child-side
    /// `pks` (an UP step: child -> parent).
    async fn fetch_fk_values(
        &mut self,
        fk: &ForeignKey,
        pks: &HashSet<RowKey>,
    ) -> Result<HashSet<RowKey>, ExtractionError>;

    /// The child-side PK values that reference `fk`'s target for the given
    /// parent-side `pks` (a DOWN step: parent -> child).
    async fn fetch_referencing_pks(
        &mut self,
        fk: &ForeignKey,
        parent_pks: &HashSet<RowKey>,
    ) -> Result<HashSet<RowKey>, ExtractionError>;

    /// Every primary key in `table`, used for passthrough tables.
    async fn fetch_all_pks(
        &mut self,
        table: &str,
        pk_columns: &[String],
    ) -> Result<HashSet<RowKey>, ExtractionError>;

    async fn get_table_pk_columns(&mut self, table: &str) -> Result<Vec<String>, ExtractionError>;

    /// Estimated row count for `table`, used for dry-run reporting and the
    /// streaming-threshold decision.
    async fn estimate_row_count(&mut self, table: &str) -> Result<usize, ExtractionError>;

    async fn begin_snapshot(&mut self) -> Result<(), ExtractionError>;
    async fn end_snapshot(&mut self) -> Result<(), ExtractionError>;

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// RAII-style helper for the snapshot-isolated read phase: begins on
/// construction, ends (always rolling back) on drop via [`end_snapshot`].
/// Callers must still `.await` the async `close()` explicitly since `Drop`
/// cannot run async code; this guard exists to make the intended scope
/// obvious at call sites, mirroring `adapters/base.py`'s context manager.
pub struct SnapshotGuard<'a> {
    adapter: &'a mut dyn DatabaseAdapter,
    ended: bool,
}

impl<'a> SnapshotGuard<'a> {
    pub async fn begin(adapter: &'a mut dyn DatabaseAdapter) -> Result<Self, ExtractionError> {
        adapter.begin_snapshot().await?;
        Ok(SnapshotGuard {
            adapter,
            ended: false,
        })
    }

    pub async fn end(mut self) -> Result<(), ExtractionError> {
        self.ended = true;
        self.adapter.end_snapshot().await
    }
}

impl<'a> Drop for SnapshotGuard<'a> {
    fn drop(&mut self) {
        if !self.ended {
            tracing::warn!(
                "snapshot transaction dropped without calling end() explicitly; \
                 the underlying read-only transaction may remain open until the \
                 connection is closed"
            );
        }
    }
}

/// Builds the adapter matching a database URL's scheme, wired to `profiler`
/// when profiling is enabled. `schema_name` is only meaningful for
/// PostgreSQL, where it selects a non-`public` schema to introspect.
pub fn build_adapter(
    database_url: &str,
    db_type: DatabaseType,
    schema_name: Option<String>,
    profiler: Option<Arc<QueryProfiler>>,
) -> Result<Box<dyn DatabaseAdapter>, ExtractionError> {
    match db_type {
        DatabaseType::PostgreSql => {
            let mut adapter = postgres::PostgresAdapter::new(database_url, schema_name)?;
            if let Some(p) = profiler {
                adapter = adapter.with_profiler(p);
            }
            Ok(Box::new(adapter))
        }
        DatabaseType::MySql => {
            let mut adapter = mysql::MysqlAdapter::new(database_url)?;
            if let Some(p) = profiler {
                adapter = adapter.with_profiler(p);
            }
            Ok(Box::new(adapter))
        }
        DatabaseType::Sqlite => {
            let mut adapter = sqlite::SqliteAdapter::new(database_url)?;
            if let Some(p) = profiler {
                adapter = adapter.with_profiler(p);
            }
            Ok(Box::new(adapter))
        }
    }
}
