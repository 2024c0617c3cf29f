// ABOUTME: Cycle detection/breaking over the reduced FK dependency graph, plus topological sort
// ABOUTME: Broken FKs are nulled on insert and restored via a post-insert deferred UPDATE

use crate::schema::{ForeignKey, Row, SchemaGraph, SqlValue};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

#[derive(Debug, Clone)]
pub struct CycleInfo {
    pub tables: Vec<String>,
    pub fks_in_cycle: Vec<ForeignKey>,
}

impl fmt::Display for CycleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tables.join(" -> "))?;
        if let Some(first) = self.tables.first() {
            write!(f, " -> {}", first)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CycleBreak {
    pub fk: ForeignKey,
    pub strategy: &'static str,
}

#[derive(Debug, Clone)]
pub struct DeferredUpdate {
    pub table: String,
    pub pk_columns: Vec<String>,
    pub pk_values: Vec<SqlValue>,
    pub fk_column: String,
    pub fk_value: SqlValue,
}

/// Full report attached to [`crate::errors::ExtractionError::CircularReference`]
/// when no nullable FK could be found to break every detected cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycles: Vec<CycleInfo>,
    pub unbreakable: CycleInfo,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cycle: {}", self.unbreakable)?;
        writeln!(f, "foreign keys in this cycle:")?;
        for fk in &self.unbreakable.fks_in_cycle {
            writeln!(
                f,
                "  - {} ({}.{} -> {}.{}), nullable={}",
                fk.name,
                fk.source_table,
                fk.source_columns.join(","),
                fk.target_table,
                fk.target_columns.join(","),
                fk.is_nullable
            )?;
        }
        writeln!(
            f,
            "remediation: make one of the foreign keys above nullable, or declare a \
             virtual_foreign_keys override in the config to mark one side as breakable."
        )?;
        if self.unbreakable.fks_in_cycle.len() == 1 {
            writeln!(
                f,
                "suggestion: ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL;",
                self.unbreakable.fks_in_cycle[0].source_table,
                self.unbreakable.fks_in_cycle[0].source_columns.join(", ")
            )?;
        }
        Ok(())
    }
}

/// Depth-first cycle detection over a dependency graph (table -> set of
/// tables it depends on). Returns every simple cycle found, each expressed
/// as the ordered table path with no back-edge duplication.
pub fn find_cycles_dfs(dependencies: &HashMap<String, HashSet<String>>) -> Vec<Vec<String>> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut cycles = Vec::new();

    let mut nodes: Vec<&String> = dependencies.keys().collect();
    nodes.sort();

    for start in nodes {
        if visited.contains(start) {
            continue;
        }
        let mut rec_stack: Vec<String> = Vec::new();
        dfs_visit(start, dependencies, &mut visited, &mut rec_stack, &mut cycles);
    }

    cycles
}

fn dfs_visit(
    node: &str,
    dependencies: &HashMap<String, HashSet<String>>,
    visited: &mut HashSet<String>,
    rec_stack: &mut Vec<String>,
    cycles: &mut Vec<Vec<String>>,
) {
    if let Some(pos) = rec_stack.iter().position(|n| n == node) {
        cycles.push(rec_stack[pos..].to_vec());
        return;
    }
    if visited.contains(node) {
        return;
    }

    rec_stack.push(node.to_string());

    if let Some(neighbors) = dependencies.get(node) {
        let mut sorted: Vec<&String> = neighbors.iter().collect();
        sorted.sort();
        for neighbor in sorted {
            dfs_visit(neighbor, dependencies, visited, rec_stack, cycles);
        }
    }

    rec_stack.pop();
    visited.insert(node.to_string());
}

/// Builds the directed edge set implied by a cycle's table path (with
/// wraparound back to the first table), then filters `schema.edges` down to
/// only the FKs that realize one of those edges.
pub fn identify_cycle_fks(schema: &SchemaGraph, cycle: &[String]) -> Vec<ForeignKey> {
    let mut cycle_edges: HashSet<(String, String)> = HashSet::new();
    for i in 0..cycle.len() {
        let from = &cycle[i];
        let to = &cycle[(i + 1) % cycle.len()];
        cycle_edges.insert((from.clone(), to.clone()));
    }

    schema
        .edges
        .iter()
        .filter(|fk| cycle_edges.contains(&fk.as_edge()))
        .cloned()
        .collect()
}

/// Selects the best nullable FK to break within a cycle, per the priority
/// rules: self-loop cycles prefer a self-referential nullable FK;
/// multi-table cycles exclude self-referential FKs and prefer single-column
/// ones. Returns `None` when no nullable FK exists in the cycle at all.
pub fn select_nullable_fk_to_break(
    cycle_fks: &[ForeignKey],
    cycle: Option<&[String]>,
) -> Option<ForeignKey> {
    let nullable_fks: Vec<&ForeignKey> = cycle_fks.iter().filter(|fk| fk.is_nullable).collect();
    if nullable_fks.is_empty() {
        return None;
    }

    if let Some(cycle) = cycle {
        if cycle.len() == 1 {
            if let Some(self_ref) = nullable_fks.iter().find(|fk| fk.is_self_referential()) {
                return Some((*self_ref).clone());
            }
        } else {
            let inter_table: Vec<&&ForeignKey> = nullable_fks
                .iter()
                .filter(|fk| !fk.is_self_referential())
                .collect();
            if !inter_table.is_empty() {
                if let Some(single_col) = inter_table.iter().find(|fk| fk.is_single_column()) {
                    return Some((**single_col).clone());
                }
                return Some((*inter_table[0]).clone());
            }
        }
    }

    if let Some(single_col) = nullable_fks.iter().find(|fk| fk.is_single_column()) {
        return Some((*single_col).clone());
    }
    Some(nullable_fks[0].clone())
}

/// Finds every cycle among `tables`, selects one nullable FK to break per
/// cycle, and returns the set of broken FKs plus a description of each
/// cycle for reporting. Fails with the full cycle detail when a cycle has
/// no breakable (nullable) FK.
pub fn break_cycles_at_nullable_fks(
    schema: &SchemaGraph,
    dependencies: &HashMap<String, HashSet<String>>,
) -> Result<(Vec<ForeignKey>, Vec<CycleInfo>), CycleReport> {
    let raw_cycles = find_cycles_dfs(dependencies);
    let mut fks_to_break: Vec<ForeignKey> = Vec::new();
    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    let mut cycle_infos = Vec::new();

    for cycle in raw_cycles {
        let cycle_fks = identify_cycle_fks(schema, &cycle);
        let info = CycleInfo {
            tables: cycle.clone(),
            fks_in_cycle: cycle_fks.clone(),
        };

        match select_nullable_fk_to_break(&cycle_fks, Some(&cycle)) {
            Some(fk) => {
                let key = (fk.name.clone(), fk.source_table.clone(), fk.target_table.clone());
                if seen.insert(key) {
                    fks_to_break.push(fk);
                }
                cycle_infos.push(info);
            }
            None => {
                return Err(CycleReport {
                    cycles: cycle_infos,
                    unbreakable: info,
                });
            }
        }
    }

    Ok((fks_to_break, cycle_infos))
}

/// Builds the post-insert UPDATE statements needed to restore each broken
/// FK's value once every table has been inserted with that column NULLed
/// out. Rows whose FK value was itself NULL need no restoration.
pub fn build_deferred_updates(
    fks_to_break: &[ForeignKey],
    tables_data: &HashMap<String, Vec<Row>>,
    schema: &SchemaGraph,
) -> Vec<DeferredUpdate> {
    let mut updates = Vec::new();

    for fk in fks_to_break {
        let Some(table) = schema.get_table(&fk.source_table) else {
            continue;
        };
        let Some(rows) = tables_data.get(&fk.source_table) else {
            continue;
        };

        for row in rows {
            // Only single-column broken FKs are restored; composite broken
            // FKs would need a multi-column deferred update, which is not
            // produced by select_nullable_fk_to_break's single-column
            // preference but is still possible when it's the only option.
            for fk_column in &fk.source_columns {
                let Some(fk_value) = row.get(fk_column) else {
                    continue;
                };
                if fk_value.is_null() {
                    continue;
                }

                let pk_values: Option<Vec<SqlValue>> = table
                    .primary_key
                    .iter()
                    .map(|pk_col| row.get(pk_col).cloned())
                    .collect();
                let Some(pk_values) = pk_values else {
                    continue;
                };

                updates.push(DeferredUpdate {
                    table: fk.source_table.clone(),
                    pk_columns: table.primary_key.clone(),
                    pk_values,
                    fk_column: fk_column.clone(),
                    fk_value: fk_value.clone(),
                });
            }
        }
    }

    updates
}

/// Kahn's-algorithm topological sort over the table dependency graph
/// (table -> set of tables it must be inserted after). On a cycle, breaks
/// it via [`break_cycles_at_nullable_fks`] and re-sorts the reduced graph.
#[tracing::instrument(skip(schema, dependencies), fields(table_count = tables.len()))]
pub fn topological_sort(
    schema: &SchemaGraph,
    tables: &[String],
    dependencies: &HashMap<String, HashSet<String>>,
) -> Result<(Vec<String>, Vec<ForeignKey>, Vec<CycleInfo>), CycleReport> {
    match kahn_sort(tables, dependencies) {
        Some(order) => Ok((order, Vec::new(), Vec::new())),
        None => {
            let (fks_to_break, cycle_infos) = break_cycles_at_nullable_fks(schema, dependencies)?;

            let mut modified: HashMap<String, HashSet<String>> = dependencies.clone();
            for fk in &fks_to_break {
                if let Some(deps) = modified.get_mut(&fk.source_table) {
                    deps.remove(&fk.target_table);
                }
            }

            let order = kahn_sort(tables, &modified).unwrap_or_else(|| tables.to_vec());
            Ok((order, fks_to_break, cycle_infos))
        }
    }
}

fn kahn_sort(
    tables: &[String],
    dependencies: &HashMap<String, HashSet<String>>,
) -> Option<Vec<String>> {
    let mut in_degree: HashMap<String, usize> = tables.iter().map(|t| (t.clone(), 0)).collect();
    let mut dependents: HashMap<String, Vec<String>> =
        tables.iter().map(|t| (t.clone(), Vec::new())).collect();

    for table in tables {
        if let Some(deps) = dependencies.get(table) {
            for dep in deps {
                if !tables.contains(dep) {
                    continue;
                }
                *in_degree.get_mut(table).unwrap() += 1;
                dependents.get_mut(dep).unwrap().push(table.clone());
            }
        }
    }

    let mut ready: Vec<String> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(t, _)| t.clone())
        .collect();
    ready.sort();
    let mut queue: VecDeque<String> = ready.into();

    let mut order = Vec::with_capacity(tables.len());

    while let Some(node) = queue.pop_front() {
        order.push(node.clone());
        let mut newly_ready = Vec::new();
        if let Some(deps) = dependents.get(&node) {
            for dependent in deps {
                let deg = in_degree.get_mut(dependent).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    newly_ready.push(dependent.clone());
                }
            }
        }
        newly_ready.sort();
        for n in newly_ready {
            queue.push_back(n);
        }
    }

    if order.len() == tables.len() {
        Some(order)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Table;

    fn fk(name: &str, src: &str, tgt: &str, nullable: bool) -> ForeignKey {
        ForeignKey {
            name: name.to_string(),
            source_table: src.to_string(),
            source_columns: vec!["ref_id".to_string()],
            target_table: tgt.to_string(),
            target_columns: vec!["id".to_string()],
            is_nullable: nullable,
        }
    }

    #[test]
    fn detects_two_table_cycle() {
        let mut deps = HashMap::new();
        deps.insert("a".to_string(), HashSet::from(["b".to_string()]));
        deps.insert("b".to_string(), HashSet::from(["a".to_string()]));
        let cycles = find_cycles_dfs(&deps);
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn no_cycle_in_dag() {
        let mut deps = HashMap::new();
        deps.insert("a".to_string(), HashSet::from(["b".to_string()]));
        deps.insert("b".to_string(), HashSet::new());
        assert!(find_cycles_dfs(&deps).is_empty());
    }

    #[test]
    fn selects_self_referential_nullable_fk_for_self_loop() {
        let fks = vec![fk("fk_mgr", "employees", "employees", true)];
        let cycle = vec!["employees".to_string()];
        let selected = select_nullable_fk_to_break(&fks, Some(&cycle)).unwrap();
        assert_eq!(selected.name, "fk_mgr");
    }

    #[test]
    fn multi_table_cycle_excludes_self_referential() {
        let fks = vec![
            fk("fk_self", "a", "a", true),
            fk("fk_cross", "a", "b", true),
        ];
        let cycle = vec!["a".to_string(), "b".to_string()];
        let selected = select_nullable_fk_to_break(&fks, Some(&cycle)).unwrap();
        assert_eq!(selected.name, "fk_cross");
    }

    #[test]
    fn returns_none_when_no_nullable_fk() {
        let fks = vec![fk("fk_req", "a", "b", false)];
        assert!(select_nullable_fk_to_break(&fks, Some(&["a".to_string(), "b".to_string()])).is_none());
    }

    #[test]
    fn topological_sort_breaks_cycle_and_reports_it() {
        let mut tables = HashMap::new();
        tables.insert(
            "a".to_string(),
            Table {
                name: "a".to_string(),
                schema: "public".to_string(),
                columns: vec![],
                primary_key: vec!["id".to_string()],
                foreign_keys: vec![fk("fk_ab", "a", "b", true)],
            },
        );
        tables.insert(
            "b".to_string(),
            Table {
                name: "b".to_string(),
                schema: "public".to_string(),
                columns: vec![],
                primary_key: vec!["id".to_string()],
                foreign_keys: vec![fk("fk_ba", "b", "a", false)],
            },
        );
        let edges = vec![fk("fk_ab", "a", "b", true), fk("fk_ba", "b", "a", false)];
        let schema = SchemaGraph::new(tables, edges);

        let mut deps = HashMap::new();
        deps.insert("a".to_string(), HashSet::from(["b".to_string()]));
        deps.insert("b".to_string(), HashSet::from(["a".to_string()]));

        let tables_list = vec!["a".to_string(), "b".to_string()];
        let (order, broken, cycles) = topological_sort(&schema, &tables_list, &deps).unwrap();
        assert_eq!(order.len(), 2);
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].name, "fk_ab");
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn unbreakable_cycle_surfaces_full_report() {
        let tables = HashMap::new();
        let edges = vec![fk("fk_ab", "a", "b", false), fk("fk_ba", "b", "a", false)];
        let schema = SchemaGraph::new(tables, edges);

        let mut deps = HashMap::new();
        deps.insert("a".to_string(), HashSet::from(["b".to_string()]));
        deps.insert("b".to_string(), HashSet::from(["a".to_string()]));

        let tables_list = vec!["a".to_string(), "b".to_string()];
        let err = topological_sort(&schema, &tables_list, &deps).unwrap_err();
        assert_eq!(err.unbreakable.fks_in_cycle.len(), 2);
        assert!(err.to_string().contains("remediation"));
    }
}
