// ABOUTME: End-to-end extraction scenarios driven through FakeAdapter
// ABOUTME: Exercises traversal, cycle breaking, validation and SQL emission together

use dbslice::adapter::fake::FakeAdapter;
use dbslice::config::TraversalDirection;
use dbslice::cycles;
use dbslice::emit::SqlGenerator;
use dbslice::schema::{Column, ForeignKey, Row, RowKey, SchemaGraph, SqlValue, Table};
use dbslice::traverse::{GraphTraverser, TraversalConfig};
use dbslice::validate::ExtractionValidator;
use dbslice::connection::DatabaseType;
use std::collections::{HashMap, HashSet};

fn table(name: &str, pk: &str, extra_columns: &[&str]) -> Table {
    let mut columns = vec![Column {
        name: pk.to_string(),
        data_type: "integer".to_string(),
        nullable: false,
        is_primary_key: true,
        default: None,
    }];
    for c in extra_columns {
        columns.push(Column {
            name: c.to_string(),
            data_type: "integer".to_string(),
            nullable: true,
            is_primary_key: false,
            default: None,
        });
    }
    Table {
        name: name.to_string(),
        schema: "public".to_string(),
        columns,
        primary_key: vec![pk.to_string()],
        foreign_keys: vec![],
    }
}

fn fk(name: &str, source: &str, source_col: &str, target: &str, target_col: &str, nullable: bool) -> ForeignKey {
    ForeignKey {
        name: name.to_string(),
        source_table: source.to_string(),
        source_columns: vec![source_col.to_string()],
        target_table: target.to_string(),
        target_columns: vec![target_col.to_string()],
        is_nullable: nullable,
    }
}

/// customers <- orders <- line_items, a three-level chain with no cycles.
fn linear_schema() -> SchemaGraph {
    let mut tables = HashMap::new();
    tables.insert("customers".to_string(), table("customers", "id", &[]));
    tables.insert("orders".to_string(), table("orders", "id", &["customer_id"]));
    tables.insert("line_items".to_string(), table("line_items", "id", &["order_id"]));

    let edges = vec![
        fk("fk_orders_customer", "orders", "customer_id", "customers", "id", false),
        fk("fk_line_items_order", "line_items", "order_id", "orders", "id", false),
    ];
    SchemaGraph::new(tables, edges)
}

/// departments <-> employees: employees.department_id -> departments,
/// departments.manager_id -> employees (nullable), forming a two-table cycle.
fn cyclic_schema() -> SchemaGraph {
    let mut tables = HashMap::new();
    tables.insert(
        "departments".to_string(),
        table("departments", "id", &["manager_id"]),
    );
    tables.insert(
        "employees".to_string(),
        table("employees", "id", &["department_id"]),
    );

    let edges = vec![
        fk("fk_employees_department", "employees", "department_id", "departments", "id", false),
        fk("fk_departments_manager", "departments", "manager_id", "employees", "id", true),
    ];
    SchemaGraph::new(tables, edges)
}

fn build_dependencies(schema: &SchemaGraph, table_names: &[String]) -> HashMap<String, HashSet<String>> {
    let name_set: HashSet<&String> = table_names.iter().collect();
    let mut dependencies: HashMap<String, HashSet<String>> =
        table_names.iter().map(|t| (t.clone(), HashSet::new())).collect();
    for t in table_names {
        for fk in schema.get_parents(t) {
            if name_set.contains(&fk.target_table) {
                dependencies.get_mut(t).unwrap().insert(fk.target_table);
            }
        }
    }
    dependencies
}

#[tokio::test]
async fn full_chain_traverses_down_and_validates_clean() {
    let schema = linear_schema();
    let mut adapter = FakeAdapter::new();
    adapter.seed_row("customers", vec![("id", SqlValue::I64(1))]);
    adapter.seed_row(
        "orders",
        vec![("id", SqlValue::I64(10)), ("customer_id", SqlValue::I64(1))],
    );
    adapter.seed_row(
        "line_items",
        vec![("id", SqlValue::I64(100)), ("order_id", SqlValue::I64(10))],
    );

    let config = TraversalConfig {
        max_depth: 5,
        direction: TraversalDirection::Down,
        exclude_tables: HashSet::new(),
        passthrough_tables: HashSet::new(),
    };

    let seed_pk = RowKey(vec!["1".to_string()]);
    let mut traverser = GraphTraverser::new(&schema, &mut adapter);
    let traversal = traverser
        .traverse("customers", HashSet::from([seed_pk]), &config)
        .await
        .unwrap();

    assert_eq!(traversal.table_count(), 3);
    assert_eq!(traversal.total_records(), 3);

    let table_names: Vec<String> = {
        let mut names: Vec<String> = traversal.records.keys().cloned().collect();
        names.sort();
        names
    };
    let dependencies = build_dependencies(&schema, &table_names);
    let (order, broken_fks, cycle_infos) =
        cycles::topological_sort(&schema, &table_names, &dependencies).unwrap();

    assert!(broken_fks.is_empty());
    assert!(cycle_infos.is_empty());
    let customers_pos = order.iter().position(|t| t == "customers").unwrap();
    let orders_pos = order.iter().position(|t| t == "orders").unwrap();
    let line_items_pos = order.iter().position(|t| t == "line_items").unwrap();
    assert!(customers_pos < orders_pos);
    assert!(orders_pos < line_items_pos);

    let mut tables_data: HashMap<String, Vec<Row>> = HashMap::new();
    for t in &table_names {
        let pks = traversal.get_records(t);
        let pk_cols = schema.get_table(t).unwrap().primary_key.clone();
        tables_data.insert(t.clone(), adapter.fetch_by_pk(t, &pk_cols, &pks).await.unwrap());
    }

    let validator = ExtractionValidator::new(&schema);
    let report = validator.validate(&tables_data, &broken_fks);
    assert!(report.is_valid);
    assert!(report.orphaned_records.is_empty());
}

#[tokio::test]
async fn self_contained_cycle_is_broken_at_the_nullable_fk() {
    let schema = cyclic_schema();
    let table_names = vec!["departments".to_string(), "employees".to_string()];
    let dependencies = build_dependencies(&schema, &table_names);

    let (order, broken_fks, cycle_infos) =
        cycles::topological_sort(&schema, &table_names, &dependencies).unwrap();

    assert_eq!(order.len(), 2);
    assert_eq!(broken_fks.len(), 1);
    assert_eq!(broken_fks[0].name, "fk_departments_manager");
    assert_eq!(cycle_infos.len(), 1);

    // employees has no remaining dependency on departments once the nullable
    // manager FK is broken, so it must insert first.
    assert_eq!(order[0], "employees");
    assert_eq!(order[1], "departments");
}

#[tokio::test]
async fn broken_cycle_emits_null_fk_and_deferred_update() {
    let schema = cyclic_schema();
    let table_names = vec!["departments".to_string(), "employees".to_string()];
    let dependencies = build_dependencies(&schema, &table_names);
    let (order, broken_fks, _cycle_infos) =
        cycles::topological_sort(&schema, &table_names, &dependencies).unwrap();

    let mut tables_data: HashMap<String, Vec<Row>> = HashMap::new();
    let mut dept_row: Row = HashMap::new();
    dept_row.insert("id".to_string(), SqlValue::I64(1));
    dept_row.insert("manager_id".to_string(), SqlValue::I64(5));
    tables_data.insert("departments".to_string(), vec![dept_row]);

    let mut emp_row: Row = HashMap::new();
    emp_row.insert("id".to_string(), SqlValue::I64(5));
    emp_row.insert("department_id".to_string(), SqlValue::I64(1));
    tables_data.insert("employees".to_string(), vec![emp_row]);

    let deferred = cycles::build_deferred_updates(&broken_fks, &tables_data, &schema);
    assert_eq!(deferred.len(), 1);
    assert_eq!(deferred[0].table, "departments");
    assert_eq!(deferred[0].fk_column, "manager_id");

    let broken_fk_columns = dbslice::emit::build_broken_fk_map(&broken_fks);
    let generator = SqlGenerator::new(DatabaseType::PostgreSql);
    let sql = generator.generate(&tables_data, &order, &schema.tables, &broken_fk_columns, &deferred);

    assert!(sql.contains("INSERT INTO \"employees\""));
    assert!(sql.contains("INSERT INTO \"departments\""));
    assert!(sql.contains("UPDATE \"departments\""));
    // The broken FK column must be nulled on insert, restored only afterwards.
    let insert_pos = sql.find("INSERT INTO \"departments\"").unwrap();
    let update_pos = sql.find("UPDATE \"departments\"").unwrap();
    assert!(insert_pos < update_pos);
}

#[tokio::test]
async fn excluded_tables_are_never_traversed_into() {
    let schema = linear_schema();
    let mut adapter = FakeAdapter::new();
    adapter.seed_row("customers", vec![("id", SqlValue::I64(1))]);
    adapter.seed_row(
        "orders",
        vec![("id", SqlValue::I64(10)), ("customer_id", SqlValue::I64(1))],
    );
    adapter.seed_row(
        "line_items",
        vec![("id", SqlValue::I64(100)), ("order_id", SqlValue::I64(10))],
    );

    let config = TraversalConfig {
        max_depth: 5,
        direction: TraversalDirection::Down,
        exclude_tables: HashSet::from(["line_items".to_string()]),
        passthrough_tables: HashSet::new(),
    };

    let seed_pk = RowKey(vec!["1".to_string()]);
    let mut traverser = GraphTraverser::new(&schema, &mut adapter);
    let traversal = traverser
        .traverse("customers", HashSet::from([seed_pk]), &config)
        .await
        .unwrap();

    assert!(traversal.get_records("line_items").is_empty());
    assert_eq!(traversal.get_records("orders").len(), 1);
}

#[tokio::test]
async fn depth_limit_stops_downward_traversal_but_not_upward() {
    let schema = linear_schema();
    let mut adapter = FakeAdapter::new();
    adapter.seed_row("customers", vec![("id", SqlValue::I64(1))]);
    adapter.seed_row(
        "orders",
        vec![("id", SqlValue::I64(10)), ("customer_id", SqlValue::I64(1))],
    );
    adapter.seed_row(
        "line_items",
        vec![("id", SqlValue::I64(100)), ("order_id", SqlValue::I64(10))],
    );

    let config = TraversalConfig {
        max_depth: 1,
        direction: TraversalDirection::Down,
        exclude_tables: HashSet::new(),
        passthrough_tables: HashSet::new(),
    };

    let seed_pk = RowKey(vec!["1".to_string()]);
    let mut traverser = GraphTraverser::new(&schema, &mut adapter);
    let traversal = traverser
        .traverse("customers", HashSet::from([seed_pk]), &config)
        .await
        .unwrap();

    assert_eq!(traversal.get_records("orders").len(), 1);
    assert!(traversal.get_records("line_items").is_empty());
}
