// ABOUTME: ExtractionEngine orchestrator: schema introspection, seed traversal, fetch and emit
// ABOUTME: Owns the snapshot-transaction scope and the dry-run/streaming/in-memory decision

use crate::adapter::{build_adapter, DatabaseAdapter};
use crate::anonymize::DeterministicAnonymizer;
use crate::config::ExtractConfig;
use crate::connection::parse_database_url;
use crate::cycles::{self, CycleInfo, DeferredUpdate};
use crate::emit::sql::SqlGenerator;
use crate::emit::streaming::StreamingEmitter;
use crate::errors::ExtractionError;
use crate::profiling::QueryProfiler;
use crate::schema::{ForeignKey, Row, RowKey, SchemaGraph, SqlValue};
use crate::traverse::{GraphTraverser, TraversalConfig};
use crate::validate::{ExtractionValidator, ValidationReport};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// `(stage, message, current, total)`, called as extraction progresses.
/// `current`/`total` are both `0` for stage transitions with no meaningful
/// count (e.g. "starting streaming extraction").
pub type ProgressCallback = dyn Fn(&str, &str, usize, usize) + Send + Sync;

/// Everything produced by a single extraction run.
///
/// In streaming mode `tables` is empty (rows were written straight to disk)
/// and only `stats` carries the per-table row counts; callers should prefer
/// [`ExtractionResult::total_rows`] / [`ExtractionResult::table_count`] over
/// reading `tables`/`stats` directly so both modes report correctly.
#[derive(Debug)]
pub struct ExtractionResult {
    pub tables: HashMap<String, Vec<Row>>,
    pub insert_order: Vec<String>,
    pub stats: HashMap<String, usize>,
    pub traversal_path: Vec<String>,
    pub has_cycles: bool,
    pub broken_fks: Vec<ForeignKey>,
    pub deferred_updates: Vec<DeferredUpdate>,
    pub cycle_infos: Vec<CycleInfo>,
    pub validation_report: Option<ValidationReport>,
    pub profiler: Option<Arc<QueryProfiler>>,
}

impl ExtractionResult {
    pub fn total_rows(&self) -> usize {
        if !self.tables.is_empty() {
            self.tables.values().map(|v| v.len()).sum()
        } else {
            self.stats.values().sum()
        }
    }

    pub fn table_count(&self) -> usize {
        if !self.tables.is_empty() {
            self.tables.len()
        } else {
            self.stats.len()
        }
    }
}

/// Drives a single extraction end to end: connect, snapshot, traverse every
/// seed, topologically order the touched tables, then either short-circuit
/// for a dry run, stream rows straight to a file, or fetch everything into
/// memory for in-process output generation.
pub struct ExtractionEngine<'a> {
    config: &'a ExtractConfig,
    progress_callback: Option<&'a ProgressCallback>,
}

impl<'a> ExtractionEngine<'a> {
    pub fn new(config: &'a ExtractConfig, progress_callback: Option<&'a ProgressCallback>) -> Self {
        ExtractionEngine {
            config,
            progress_callback,
        }
    }

    fn log(&self, stage: &str, message: &str, current: usize, total: usize) {
        if let Some(cb) = self.progress_callback {
            cb(stage, message, current, total);
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn extract(&self) -> Result<(ExtractionResult, SchemaGraph), ExtractionError> {
        self.config.validate_depth().map_err(ExtractionError::Config)?;

        let db_config = parse_database_url(&self.config.database_url)?;
        tracing::info!(
            url = %db_config.masked_url(),
            db_type = %db_config.db_type,
            "starting extraction"
        );

        let profiler = if self.config.profile {
            Some(Arc::new(QueryProfiler::new(true)))
        } else {
            None
        };

        let mut adapter = build_adapter(
            &self.config.database_url,
            db_config.db_type,
            self.config.schema.clone(),
            profiler.clone(),
        )?;

        adapter.connect().await?;

        let outcome = self
            .do_extract(adapter.as_mut(), db_config.db_type, profiler.clone())
            .await;
        let close_result = adapter.close().await;

        let (result, schema) = outcome?;
        close_result?;

        if let Some(p) = &profiler {
            if p.enabled() {
                tracing::info!("{}", p.summary().format_summary());
            }
        }

        tracing::info!(
            table_count = result.table_count(),
            total_rows = result.total_rows(),
            "extraction complete"
        );

        Ok((result, schema))
    }

    async fn do_extract(
        &self,
        adapter: &mut dyn DatabaseAdapter,
        db_type: crate::connection::DatabaseType,
        profiler: Option<Arc<QueryProfiler>>,
    ) -> Result<(ExtractionResult, SchemaGraph), ExtractionError> {
        self.log("schema", "Introspecting schema...", 0, 0);
        let mut schema = adapter.get_schema().await?;
        for vfk in &self.config.virtual_foreign_keys {
            schema.add_virtual_fk(vfk.clone());
        }
        tracing::debug!(
            table_count = schema.tables.len(),
            fk_count = schema.edges.len(),
            virtual_fk_count = schema.virtual_edges.len(),
            "schema introspected"
        );

        let anonymizer = if self.config.anonymize || !self.config.redact_fields.is_empty() {
            let mut a = DeterministicAnonymizer::new(self.config.anonymization_seed.clone(), Some(&schema));
            a.configure(self.config.redact_fields.clone());
            Some(a)
        } else {
            None
        };

        adapter.begin_snapshot().await?;

        let mut records: HashMap<String, HashSet<RowKey>> = HashMap::new();
        let mut traversal_path: Vec<String> = Vec::new();

        for (idx, seed) in self.config.seeds.iter().enumerate() {
            self.log(
                "seed",
                &format!("Processing seed {}...", seed),
                idx + 1,
                self.config.seeds.len(),
            );
            let seed_result = self.process_seed(adapter, &schema, seed).await?;
            for (table, pks) in seed_result.records {
                records.entry(table).or_default().extend(pks);
            }
            traversal_path.extend(seed_result.traversal_path);
        }

        self.apply_row_caps(&mut records);

        let table_names: Vec<String> = {
            let mut names: Vec<String> = records.keys().cloned().collect();
            names.sort();
            names
        };
        let dependencies = build_dependencies(&schema, &table_names);

        if self.config.dry_run {
            let (order, broken_fks, cycle_infos) =
                cycles::topological_sort(&schema, &table_names, &dependencies)
                    .map_err(|report| ExtractionError::CircularReference { report })?;
            adapter.end_snapshot().await?;

            let stats: HashMap<String, usize> =
                records.iter().map(|(t, pks)| (t.clone(), pks.len())).collect();
            let result = ExtractionResult {
                tables: HashMap::new(),
                insert_order: order,
                stats,
                traversal_path,
                has_cycles: !broken_fks.is_empty(),
                broken_fks,
                deferred_updates: Vec::new(),
                cycle_infos,
                validation_report: None,
                profiler,
            };
            return Ok((result, schema));
        }

        let (order, broken_fks, cycle_infos) =
            cycles::topological_sort(&schema, &table_names, &dependencies)
                .map_err(|report| ExtractionError::CircularReference { report })?;

        let estimated_rows: usize = records.values().map(|pks| pks.len()).sum();

        if self.config.should_stream(estimated_rows) {
            let output_file = self.config.output_file.as_ref().ok_or_else(|| {
                ExtractionError::Config("streaming mode requires --output-file".to_string())
            })?;

            let broken_table_data =
                self.fetch_broken_fk_tables(adapter, &schema, &records, &broken_fks).await?;
            let deferred_updates = cycles::build_deferred_updates(&broken_fks, &broken_table_data, &schema);

            let sql_generator = SqlGenerator::new(db_type)
                .with_transaction(true)
                .with_truncate(false)
                .with_disable_fk_checks(false);

            let emitter = StreamingEmitter::new(
                self.config,
                &schema,
                &records,
                &order,
                &broken_fks,
                &deferred_updates,
                anonymizer.as_ref(),
                sql_generator,
                self.progress_callback,
                self.config.streaming_chunk_size,
            );
            let result = emitter.stream_to_file(adapter, output_file, cycle_infos).await?;
            adapter.end_snapshot().await?;
            let result = ExtractionResult {
                traversal_path,
                profiler,
                ..result
            };
            return Ok((result, schema));
        }

        let mut tables_data: HashMap<String, Vec<Row>> = HashMap::new();
        for (idx, table) in order.iter().enumerate() {
            let Some(pks) = records.get(table) else {
                continue;
            };
            if pks.is_empty() {
                continue;
            }
            let Some(table_info) = schema.get_table(table) else {
                continue;
            };
            self.log("fetch", &format!("Fetching {}...", table), idx + 1, order.len());

            let rows = adapter.fetch_by_pk(table, &table_info.primary_key, pks).await?;
            let rows = match &anonymizer {
                Some(a) => rows.iter().map(|r| a.anonymize_row(table, r)).collect(),
                None => rows,
            };
            tracing::debug!(table, row_count = rows.len(), "fetched table");
            tables_data.insert(table.clone(), rows);
        }

        adapter.end_snapshot().await?;

        let deferred_updates = cycles::build_deferred_updates(&broken_fks, &tables_data, &schema);

        let validation_report = if self.config.validate {
            self.log("validate", "Validating referential integrity...", 0, 0);
            let validator = ExtractionValidator::new(&schema);
            let report = validator.validate(&tables_data, &broken_fks);
            if !report.is_valid && self.config.fail_on_validation_error {
                return Err(ExtractionError::ValidationFailed { report });
            }
            Some(report)
        } else {
            None
        };

        let stats: HashMap<String, usize> =
            tables_data.iter().map(|(t, rows)| (t.clone(), rows.len())).collect();

        let result = ExtractionResult {
            tables: tables_data,
            insert_order: order,
            stats,
            traversal_path,
            has_cycles: !broken_fks.is_empty(),
            broken_fks,
            deferred_updates,
            cycle_infos,
            validation_report,
            profiler,
        };

        Ok((result, schema))
    }

    /// Truncates each table's discovered PK set to its configured
    /// `max_rows`, if any. Caps by sorted `RowKey` order rather than true
    /// discovery order, since records are accumulated in a `HashSet` — still
    /// deterministic across runs, just not insertion-ordered. This breaks
    /// referential closure for the capped table by design; the user opted
    /// into that tradeoff by setting the cap, so it's only logged, not an
    /// error.
    fn apply_row_caps(&self, records: &mut HashMap<String, HashSet<RowKey>>) {
        for (table, pks) in records.iter_mut() {
            let Some(max_rows) = self
                .config
                .table_overrides
                .get(table)
                .and_then(|o| o.max_rows)
            else {
                continue;
            };
            if pks.len() <= max_rows {
                continue;
            }
            let mut sorted: Vec<RowKey> = pks.iter().cloned().collect();
            sorted.sort();
            sorted.truncate(max_rows);
            tracing::warn!(
                table,
                discovered = pks.len(),
                capped_to = max_rows,
                "table row cap hit; referential closure may be incomplete for this table"
            );
            *pks = sorted.into_iter().collect();
        }
    }

    async fn process_seed(
        &self,
        adapter: &mut dyn DatabaseAdapter,
        schema: &SchemaGraph,
        seed: &crate::config::SeedSpec,
    ) -> Result<crate::traverse::TraversalResult, ExtractionError> {
        let table_info = schema.get_table(seed.table()).ok_or_else(|| ExtractionError::TableNotFound {
            table: seed.table().to_string(),
            suggestions: suggest_table_names(schema, seed.table()),
        })?;

        let rows = match seed {
            crate::config::SeedSpec::Equality { column, value, .. } => {
                adapter.fetch_rows_by_equality(seed.table(), column, value).await?
            }
            crate::config::SeedSpec::Predicate { where_clause, .. } => {
                adapter.fetch_rows(seed.table(), where_clause).await?
            }
        };
        if rows.is_empty() {
            return Err(ExtractionError::NoRowsFound {
                seed: seed.to_string(),
            });
        }

        let seed_pks: HashSet<RowKey> = rows
            .iter()
            .map(|row| {
                let values: Vec<SqlValue> = table_info
                    .primary_key
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(SqlValue::Null))
                    .collect();
                RowKey::from_values(&values)
            })
            .collect();

        tracing::info!(seed = %seed, row_count = seed_pks.len(), "seed rows fetched");

        let mut exclude_tables = self.config.exclude_tables.clone();
        exclude_tables.extend(
            self.config
                .table_overrides
                .iter()
                .filter(|(_, o)| o.skip)
                .map(|(table, _)| table.clone()),
        );

        let traversal_config = TraversalConfig {
            max_depth: self.config.depth,
            direction: self.config.direction,
            exclude_tables,
            passthrough_tables: self.config.passthrough_tables.clone(),
        };

        let mut traverser = GraphTraverser::new(schema, adapter);
        traverser.traverse(seed.table(), seed_pks, &traversal_config).await
    }

    /// Fetches only the rows of tables involved in a broken FK, rather than
    /// the full extracted subset, since that's all [`cycles::build_deferred_updates`]
    /// needs to compute the post-insert UPDATEs for streaming mode.
    async fn fetch_broken_fk_tables(
        &self,
        adapter: &mut dyn DatabaseAdapter,
        schema: &SchemaGraph,
        records: &HashMap<String, HashSet<RowKey>>,
        broken_fks: &[ForeignKey],
    ) -> Result<HashMap<String, Vec<Row>>, ExtractionError> {
        let mut tables_data = HashMap::new();
        for fk in broken_fks {
            if tables_data.contains_key(&fk.source_table) {
                continue;
            }
            let Some(pks) = records.get(&fk.source_table) else {
                continue;
            };
            let Some(table_info) = schema.get_table(&fk.source_table) else {
                continue;
            };
            let rows = adapter.fetch_by_pk(&fk.source_table, &table_info.primary_key, pks).await?;
            tables_data.insert(fk.source_table.clone(), rows);
        }
        Ok(tables_data)
    }
}

fn build_dependencies(schema: &SchemaGraph, table_names: &[String]) -> HashMap<String, HashSet<String>> {
    let name_set: HashSet<&String> = table_names.iter().collect();
    let mut dependencies: HashMap<String, HashSet<String>> =
        table_names.iter().map(|t| (t.clone(), HashSet::new())).collect();

    for table in table_names {
        for fk in schema.get_parents(table) {
            if name_set.contains(&fk.target_table) {
                dependencies.get_mut(table).unwrap().insert(fk.target_table);
            }
        }
    }
    dependencies
}

fn suggest_table_names(schema: &SchemaGraph, table: &str) -> Vec<String> {
    let table_lower = table.to_lowercase();
    schema
        .get_table_names()
        .into_iter()
        .filter(|t| t.to_lowercase().contains(&table_lower) || table_lower.contains(&t.to_lowercase()))
        .take(3)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Table};

    fn build_schema() -> SchemaGraph {
        let customers = Table {
            name: "customers".into(),
            schema: "public".into(),
            columns: vec![Column {
                name: "id".into(),
                data_type: "integer".into(),
                nullable: false,
                is_primary_key: true,
                default: None,
            }],
            primary_key: vec!["id".into()],
            foreign_keys: vec![],
        };
        let orders = Table {
            name: "orders".into(),
            schema: "public".into(),
            columns: vec![
                Column {
                    name: "id".into(),
                    data_type: "integer".into(),
                    nullable: false,
                    is_primary_key: true,
                    default: None,
                },
                Column {
                    name: "customer_id".into(),
                    data_type: "integer".into(),
                    nullable: false,
                    is_primary_key: false,
                    default: None,
                },
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![],
        };
        let mut tables = HashMap::new();
        tables.insert("customers".to_string(), customers);
        tables.insert("orders".to_string(), orders);
        let edges = vec![ForeignKey {
            name: "fk_orders_customer".into(),
            source_table: "orders".into(),
            source_columns: vec!["customer_id".into()],
            target_table: "customers".into(),
            target_columns: vec!["id".into()],
            is_nullable: false,
        }];
        SchemaGraph::new(tables, edges)
    }

    #[test]
    fn dependencies_only_include_tables_in_the_extracted_set() {
        let schema = build_schema();
        let tables = vec!["orders".to_string(), "customers".to_string()];
        let deps = build_dependencies(&schema, &tables);
        assert!(deps["orders"].contains("customers"));
        assert!(deps["customers"].is_empty());
    }

    #[test]
    fn dependencies_drop_edges_to_excluded_tables() {
        let schema = build_schema();
        let tables = vec!["orders".to_string()];
        let deps = build_dependencies(&schema, &tables);
        assert!(deps["orders"].is_empty());
    }

    #[test]
    fn extraction_result_falls_back_to_stats_when_tables_empty() {
        let mut stats = HashMap::new();
        stats.insert("orders".to_string(), 5);
        let result = ExtractionResult {
            tables: HashMap::new(),
            insert_order: vec!["orders".to_string()],
            stats,
            traversal_path: vec![],
            has_cycles: false,
            broken_fks: vec![],
            deferred_updates: vec![],
            cycle_infos: vec![],
            validation_report: None,
            profiler: None,
        };
        assert_eq!(result.total_rows(), 5);
        assert_eq!(result.table_count(), 1);
    }

    #[test]
    fn apply_row_caps_truncates_tables_with_a_configured_max() {
        use crate::config::TableOverride;

        let mut config = ExtractConfig::default();
        config.table_overrides.insert(
            "orders".to_string(),
            TableOverride {
                skip: false,
                max_rows: Some(1),
            },
        );
        let engine = ExtractionEngine::new(&config, None);

        let mut records: HashMap<String, HashSet<RowKey>> = HashMap::new();
        records.insert(
            "orders".to_string(),
            HashSet::from([
                RowKey(vec!["1".to_string()]),
                RowKey(vec!["2".to_string()]),
                RowKey(vec!["3".to_string()]),
            ]),
        );
        records.insert(
            "customers".to_string(),
            HashSet::from([RowKey(vec!["1".to_string()])]),
        );

        engine.apply_row_caps(&mut records);

        assert_eq!(records["orders"].len(), 1);
        assert!(records["orders"].contains(&RowKey(vec!["1".to_string()])));
        assert_eq!(records["customers"].len(), 1);
    }

    #[test]
    fn suggests_similarly_named_tables() {
        let schema = build_schema();
        let suggestions = suggest_table_names(&schema, "custmers");
        assert!(suggestions.is_empty() || suggestions.contains(&"customers".to_string()));
    }
}
