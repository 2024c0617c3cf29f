// ABOUTME: Chunked extraction writer for datasets too large to hold in memory
// ABOUTME: Fetches and writes one table at a time, bounding memory to a single chunk

use crate::adapter::DatabaseAdapter;
use crate::anonymize::DeterministicAnonymizer;
use crate::config::ExtractConfig;
use crate::cycles::{CycleInfo, DeferredUpdate};
use crate::emit::sql::SqlGenerator;
use crate::engine::{ExtractionResult, ProgressCallback};
use crate::errors::ExtractionError;
use crate::schema::{ForeignKey, RowKey, SchemaGraph};
use std::collections::{HashMap, HashSet};
use tokio::io::AsyncWriteExt;

/// Writes extraction results directly to an output file in chunks, so memory
/// usage stays bounded regardless of dataset size. Only SQL output is
/// streamed; JSON/CSV streaming is not supported since both formats need
/// either full-document framing or per-table buffering that defeats the
/// purpose of chunked writes.
pub struct StreamingEmitter<'a> {
    config: &'a ExtractConfig,
    schema: &'a SchemaGraph,
    records: &'a HashMap<String, HashSet<RowKey>>,
    insert_order: &'a [String],
    broken_fks: &'a [ForeignKey],
    deferred_updates: &'a [DeferredUpdate],
    anonymizer: Option<&'a DeterministicAnonymizer<'a>>,
    sql_generator: SqlGenerator,
    progress_callback: Option<&'a ProgressCallback>,
    chunk_size: usize,
}

impl<'a> StreamingEmitter<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &'a ExtractConfig,
        schema: &'a SchemaGraph,
        records: &'a HashMap<String, HashSet<RowKey>>,
        insert_order: &'a [String],
        broken_fks: &'a [ForeignKey],
        deferred_updates: &'a [DeferredUpdate],
        anonymizer: Option<&'a DeterministicAnonymizer<'a>>,
        sql_generator: SqlGenerator,
        progress_callback: Option<&'a ProgressCallback>,
        chunk_size: usize,
    ) -> Self {
        StreamingEmitter {
            config,
            schema,
            records,
            insert_order,
            broken_fks,
            deferred_updates,
            anonymizer,
            sql_generator,
            progress_callback,
            chunk_size,
        }
    }

    fn log(&self, stage: &str, message: &str, current: usize, total: usize) {
        if let Some(cb) = self.progress_callback {
            cb(stage, message, current, total);
        }
    }

    #[tracing::instrument(skip(self, adapter, cycle_infos), fields(output_file))]
    pub async fn stream_to_file(
        &self,
        adapter: &mut dyn DatabaseAdapter,
        output_file: &str,
        cycle_infos: Vec<CycleInfo>,
    ) -> Result<ExtractionResult, ExtractionError> {
        let total_tables = self
            .insert_order
            .iter()
            .filter(|t| self.records.contains_key(t.as_str()))
            .count();

        tracing::info!(
            output_file,
            table_count = total_tables,
            chunk_size = self.chunk_size,
            "starting streaming extraction"
        );
        self.log("stream", &format!("Streaming to {}...", output_file), 0, 0);

        let broken_fk_columns = build_broken_fk_map(self.broken_fks);

        let mut file = tokio::fs::File::create(output_file).await?;
        self.write_header(&mut file, total_tables).await?;

        let mut stats = HashMap::new();
        let mut current_idx = 0;

        for table in self.insert_order {
            let Some(pk_values) = self.records.get(table) else {
                continue;
            };
            if pk_values.is_empty() {
                continue;
            }
            let Some(table_info) = self.schema.get_table(table) else {
                continue;
            };
            current_idx += 1;

            self.log(
                "stream",
                &format!("Streaming {} ({} rows)", table, pk_values.len()),
                current_idx,
                total_tables,
            );

            file.write_all(format!("-- {} ({} rows)\n", table, pk_values.len()).as_bytes())
                .await?;

            let null_columns = broken_fk_columns.get(table);
            let mut row_count = 0;
            let chunks = adapter
                .fetch_by_pk_chunked(table, &table_info.primary_key, pk_values, self.chunk_size)
                .await?;

            for chunk in chunks {
                for row in chunk {
                    let row = match self.anonymizer {
                        Some(anonymizer) => anonymizer.anonymize_row(table, &row),
                        None => row,
                    };
                    let insert_stmt =
                        self.sql_generator
                            .generate_insert(table, &row, table_info, null_columns);
                    file.write_all(insert_stmt.as_bytes()).await?;
                    file.write_all(b"\n").await?;
                    row_count += 1;
                }
            }
            file.write_all(b"\n").await?;

            tracing::debug!(table, row_count, "table streamed");
            stats.insert(table.clone(), row_count);
        }

        if !self.deferred_updates.is_empty() {
            file.write_all(b"-- Restore circular foreign key references\n")
                .await?;
            for update in self.deferred_updates {
                let stmt = self
                    .sql_generator
                    .generate_deferred_update(update, &self.schema.tables);
                file.write_all(stmt.as_bytes()).await?;
                file.write_all(b"\n").await?;
            }
            file.write_all(b"\n").await?;
        }

        self.write_footer(&mut file).await?;
        file.flush().await?;

        let total_rows: usize = stats.values().sum();
        tracing::info!(total_rows, table_count = stats.len(), output_file, "streaming extraction complete");
        self.log(
            "complete",
            &format!("Streamed {} rows from {} tables to {}", total_rows, stats.len(), output_file),
            0,
            0,
        );

        Ok(ExtractionResult {
            tables: HashMap::new(),
            insert_order: self.insert_order.to_vec(),
            stats,
            traversal_path: Vec::new(),
            has_cycles: !self.broken_fks.is_empty(),
            broken_fks: self.broken_fks.to_vec(),
            deferred_updates: self.deferred_updates.to_vec(),
            cycle_infos,
            validation_report: None,
            profiler: None,
        })
    }

    async fn write_header(&self, file: &mut tokio::fs::File, table_count: usize) -> Result<(), ExtractionError> {
        file.write_all(b"-- Generated by dbslice (streaming mode)\n").await?;
        file.write_all(format!("-- Tables: {}\n", table_count).as_bytes()).await?;
        if !self.broken_fks.is_empty() {
            file.write_all(
                format!("-- Circular references detected: {} FK(s) broken\n", self.broken_fks.len())
                    .as_bytes(),
            )
            .await?;
        }
        file.write_all(b"\nBEGIN;\n\n").await?;
        let _ = self.config;
        Ok(())
    }

    async fn write_footer(&self, file: &mut tokio::fs::File) -> Result<(), ExtractionError> {
        file.write_all(b"COMMIT;\n").await?;
        Ok(())
    }
}

pub fn build_broken_fk_map(broken_fks: &[ForeignKey]) -> HashMap<String, HashSet<String>> {
    let mut map: HashMap<String, HashSet<String>> = HashMap::new();
    for fk in broken_fks {
        let entry = map.entry(fk.source_table.clone()).or_default();
        for col in &fk.source_columns {
            entry.insert(col.clone());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_fk_map_groups_columns_by_source_table() {
        let fks = vec![ForeignKey {
            name: "fk_orders_customer".into(),
            source_table: "orders".into(),
            source_columns: vec!["customer_id".into()],
            target_table: "customers".into(),
            target_columns: vec!["id".into()],
            is_nullable: true,
        }];
        let map = build_broken_fk_map(&fks);
        assert!(map["orders"].contains("customer_id"));
    }
}
