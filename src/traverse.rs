// ABOUTME: BFS referential-closure traversal over the schema's FK graph
// ABOUTME: UP (parents) is never depth-limited; DOWN (children) is bounded by max_depth

use crate::adapter::DatabaseAdapter;
use crate::config::TraversalDirection;
use crate::errors::ExtractionError;
use crate::schema::{RowKey, SchemaGraph};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct TraversalConfig {
    pub max_depth: u32,
    pub direction: TraversalDirection,
    pub exclude_tables: HashSet<String>,
    pub passthrough_tables: HashSet<String>,
}

/// Accumulates every record reached during a traversal, plus a human-readable
/// path of table visits for diagnostics and dry-run reporting.
#[derive(Debug, Default)]
pub struct TraversalResult {
    pub records: HashMap<String, HashSet<RowKey>>,
    pub traversal_path: Vec<String>,
}

impl TraversalResult {
    /// Adds `pks` to `table`'s record set, returning only the ones that were
    /// not already present (i.e. newly discovered in this step).
    pub fn add_records(&mut self, table: &str, pks: &HashSet<RowKey>) -> HashSet<RowKey> {
        let entry = self.records.entry(table.to_string()).or_default();
        let mut new_pks = HashSet::new();
        for pk in pks {
            if entry.insert(pk.clone()) {
                new_pks.insert(pk.clone());
            }
        }
        new_pks
    }

    pub fn get_records(&self, table: &str) -> HashSet<RowKey> {
        self.records.get(table).cloned().unwrap_or_default()
    }

    pub fn total_records(&self) -> usize {
        self.records.values().map(|s| s.len()).sum()
    }

    pub fn table_count(&self) -> usize {
        self.records.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepDirection {
    Up,
    Down,
}

struct QueueItem {
    table: String,
    pks: HashSet<RowKey>,
    depth: u32,
    direction: StepDirection,
}

pub struct GraphTraverser<'a, A: DatabaseAdapter + ?Sized> {
    schema: &'a SchemaGraph,
    adapter: &'a mut A,
}

impl<'a, A: DatabaseAdapter + ?Sized> GraphTraverser<'a, A> {
    pub fn new(schema: &'a SchemaGraph, adapter: &'a mut A) -> Self {
        GraphTraverser { schema, adapter }
    }

    #[tracing::instrument(skip(self, seed_pks, config), fields(seed_pk_count = seed_pks.len()))]
    pub async fn traverse(
        &mut self,
        seed_table: &str,
        seed_pks: HashSet<RowKey>,
        config: &TraversalConfig,
    ) -> Result<TraversalResult, ExtractionError> {
        let mut result = TraversalResult::default();
        result.add_records(seed_table, &seed_pks);
        result.traversal_path.push(seed_table.to_string());

        let mut visited_up: HashMap<String, HashSet<RowKey>> = HashMap::new();
        let mut visited_down: HashMap<String, HashSet<RowKey>> = HashMap::new();
        visited_up.insert(seed_table.to_string(), seed_pks.clone());
        visited_down.insert(seed_table.to_string(), seed_pks.clone());

        let mut queue: Vec<QueueItem> = Vec::new();
        if matches!(
            config.direction,
            TraversalDirection::Up | TraversalDirection::Both
        ) {
            queue.push(QueueItem {
                table: seed_table.to_string(),
                pks: seed_pks.clone(),
                depth: 0,
                direction: StepDirection::Up,
            });
        }
        if matches!(
            config.direction,
            TraversalDirection::Down | TraversalDirection::Both
        ) {
            queue.push(QueueItem {
                table: seed_table.to_string(),
                pks: seed_pks,
                depth: 0,
                direction: StepDirection::Down,
            });
        }

        let mut idx = 0;
        while idx < queue.len() {
            // Index-based loop rather than VecDeque::pop_front so new items
            // discovered mid-traversal can be pushed onto the same queue
            // without a second borrow of `queue`.
            let table = queue[idx].table.clone();
            let pks = queue[idx].pks.clone();
            let depth = queue[idx].depth;
            let direction = queue[idx].direction;
            idx += 1;

            if depth >= config.max_depth && direction == StepDirection::Down {
                continue;
            }

            let mut new_items = match direction {
                StepDirection::Up => {
                    self.traverse_up(&table, &pks, depth, config, &mut visited_up, &mut result)
                        .await?
                }
                StepDirection::Down => {
                    self.traverse_down(
                        &table,
                        &pks,
                        depth,
                        config,
                        &mut visited_up,
                        &mut visited_down,
                        &mut result,
                    )
                    .await?
                }
            };
            queue.append(&mut new_items);
        }

        self.process_passthrough_tables(config, &mut result).await?;

        Ok(result)
    }

    async fn traverse_up(
        &mut self,
        table: &str,
        pks: &HashSet<RowKey>,
        depth: u32,
        config: &TraversalConfig,
        visited_up: &mut HashMap<String, HashSet<RowKey>>,
        result: &mut TraversalResult,
    ) -> Result<Vec<QueueItem>, ExtractionError> {
        let mut next_items = Vec::new();
        for fk in self.schema.get_parents(table) {
            if config.exclude_tables.contains(&fk.target_table) {
                continue;
            }
            let parent_pks = self.adapter.fetch_fk_values(&fk, pks).await?;
            let already = visited_up.entry(fk.target_table.clone()).or_default();
            let new_pks: HashSet<RowKey> =
                parent_pks.difference(already).cloned().collect();
            if new_pks.is_empty() {
                continue;
            }
            already.extend(new_pks.iter().cloned());
            result.add_records(&fk.target_table, &new_pks);
            result.traversal_path.push(fk.target_table.clone());
            next_items.push(QueueItem {
                table: fk.target_table.clone(),
                pks: new_pks,
                depth: depth + 1,
                direction: StepDirection::Up,
            });
        }
        Ok(next_items)
    }

    async fn traverse_down(
        &mut self,
        table: &str,
        pks: &HashSet<RowKey>,
        depth: u32,
        config: &TraversalConfig,
        visited_up: &mut HashMap<String, HashSet<RowKey>>,
        visited_down: &mut HashMap<String, HashSet<RowKey>>,
        result: &mut TraversalResult,
    ) -> Result<Vec<QueueItem>, ExtractionError> {
        let mut next_items = Vec::new();
        for fk in self.schema.get_children(table) {
            if config.exclude_tables.contains(&fk.source_table) {
                continue;
            }
            let child_pks = self.adapter.fetch_referencing_pks(&fk, pks).await?;
            let already_down = visited_down.entry(fk.source_table.clone()).or_default();
            let new_down: HashSet<RowKey> =
                child_pks.difference(already_down).cloned().collect();
            if !new_down.is_empty() {
                already_down.extend(new_down.iter().cloned());
                result.add_records(&fk.source_table, &new_down);
                result.traversal_path.push(fk.source_table.clone());
                next_items.push(QueueItem {
                    table: fk.source_table.clone(),
                    pks: new_down.clone(),
                    depth: depth + 1,
                    direction: StepDirection::Down,
                });
            }

            // Children pulled in by a DOWN step still need their own parents
            // fetched for referential integrity; fold them into the UP queue
            // (never depth-limited) rather than requiring the caller to
            // discover this separately.
            let already_up = visited_up.entry(fk.source_table.clone()).or_default();
            let new_for_up: HashSet<RowKey> = new_down.difference(already_up).cloned().collect();
            if !new_for_up.is_empty() {
                already_up.extend(new_for_up.iter().cloned());
                next_items.push(QueueItem {
                    table: fk.source_table.clone(),
                    pks: new_for_up,
                    depth: depth + 1,
                    direction: StepDirection::Up,
                });
            }
        }
        Ok(next_items)
    }

    async fn process_passthrough_tables(
        &mut self,
        config: &TraversalConfig,
        result: &mut TraversalResult,
    ) -> Result<(), ExtractionError> {
        for table in &config.passthrough_tables {
            if config.exclude_tables.contains(table) {
                continue;
            }
            let Some(schema_table) = self.schema.get_table(table) else {
                continue;
            };
            if schema_table.primary_key.is_empty() {
                continue;
            }
            let pks = self
                .adapter
                .fetch_all_pks(table, &schema_table.primary_key)
                .await?;
            result.add_records(table, &pks);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::fake::FakeAdapter;
    use crate::schema::{Column, ForeignKey, SqlValue, Table};
    use std::collections::HashMap;

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
        let line_items = Table {
            name: "line_items".into(),
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
                    name: "order_id".into(),
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
        tables.insert("line_items".to_string(), line_items);

        let edges = vec![
            ForeignKey {
                name: "fk_orders_customer".into(),
                source_table: "orders".into(),
                source_columns: vec!["customer_id".into()],
                target_table: "customers".into(),
                target_columns: vec!["id".into()],
                is_nullable: false,
            },
            ForeignKey {
                name: "fk_line_items_order".into(),
                source_table: "line_items".into(),
                source_columns: vec!["order_id".into()],
                target_table: "orders".into(),
                target_columns: vec!["id".into()],
                is_nullable: false,
            },
        ];

        SchemaGraph::new(tables, edges)
    }

    #[tokio::test]
    async fn down_traversal_pulls_children_and_their_parents() {
        let schema = build_schema();
        let mut adapter = FakeAdapter::new();
        adapter.seed_row("customers", vec![("id", SqlValue::I64(1))]);
        adapter.seed_row(
            "orders",
            vec![("id", SqlValue::I64(100)), ("customer_id", SqlValue::I64(1))],
        );
        adapter.seed_row(
            "line_items",
            vec![("id", SqlValue::I64(9)), ("order_id", SqlValue::I64(100))],
        );

        let seed_pk = RowKey(vec!["1".to_string()]);
        let config = TraversalConfig {
            max_depth: 3,
            direction: TraversalDirection::Down,
            exclude_tables: HashSet::new(),
            passthrough_tables: HashSet::new(),
        };

        let mut traverser = GraphTraverser::new(&schema, &mut adapter);
        let result = traverser
            .traverse("customers", HashSet::from([seed_pk]), &config)
            .await
            .unwrap();

        assert_eq!(result.get_records("orders").len(), 1);
        assert_eq!(result.get_records("line_items").len(), 1);
    }

    #[tokio::test]
    async fn up_traversal_is_never_depth_limited() {
        let schema = build_schema();
        let mut adapter = FakeAdapter::new();
        adapter.seed_row("customers", vec![("id", SqlValue::I64(1))]);
        adapter.seed_row(
            "orders",
            vec![("id", SqlValue::I64(100)), ("customer_id", SqlValue::I64(1))],
        );

        let seed_pk = RowKey(vec!["100".to_string()]);
        let config = TraversalConfig {
            max_depth: 1,
            direction: TraversalDirection::Up,
            exclude_tables: HashSet::new(),
            passthrough_tables: HashSet::new(),
        };

        let mut traverser = GraphTraverser::new(&schema, &mut adapter);
        let result = traverser
            .traverse("orders", HashSet::from([seed_pk]), &config)
            .await
            .unwrap();

        assert_eq!(result.get_records("customers").len(), 1);
    }

    #[tokio::test]
    async fn passthrough_tables_are_included_regardless_of_reachability() {
        let schema = build_schema();
        let mut adapter = FakeAdapter::new();
        adapter.seed_row("customers", vec![("id", SqlValue::I64(1))]);
        adapter.seed_row("customers", vec![("id", SqlValue::I64(2))]);

        let config = TraversalConfig {
            max_depth: 1,
            direction: TraversalDirection::Up,
            exclude_tables: HashSet::new(),
            passthrough_tables: HashSet::from(["customers".to_string()]),
        };

        let mut traverser = GraphTraverser::new(&schema, &mut adapter);
        let result = traverser
            .traverse("customers", HashSet::new(), &config)
            .await
            .unwrap();

        assert_eq!(result.get_records("customers").len(), 2);
    }
}
