// ABOUTME: Schema data model: columns, foreign keys, tables and the FK graph
// ABOUTME: Mirrors the introspection output every database adapter must produce

use std::collections::HashMap;
use std::fmt;

/// A typed column value that can round-trip through any supported adapter,
/// the anonymizer, and every output format without losing precision.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    /// Arbitrary-precision numeric, kept as its canonical decimal text.
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(chrono::NaiveDateTime),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    Uuid(uuid::Uuid),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(b) => write!(f, "{}", b),
            SqlValue::I64(i) => write!(f, "{}", i),
            SqlValue::F64(v) => write!(f, "{}", v),
            SqlValue::Decimal(d) => write!(f, "{}", d),
            SqlValue::Text(s) => write!(f, "{}", s),
            SqlValue::Bytes(b) => write!(f, "\\x{}", hex_encode(b)),
            SqlValue::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            SqlValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            SqlValue::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            SqlValue::Uuid(u) => write!(f, "{}", u),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// A single database row keyed by ordered primary-key column values.
///
/// `Ord` is derived from the values' textual representation so that
/// extracted rows can be stored in a `BTreeSet`/`BTreeMap` for deterministic
/// iteration order across runs, matching the reproducibility requirement on
/// generated SQL/JSON/CSV output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RowKey(pub Vec<String>);

impl RowKey {
    pub fn from_values(values: &[SqlValue]) -> Self {
        RowKey(values.iter().map(|v| v.to_string()).collect())
    }
}

/// A single row of extracted data: column name to typed value.
pub type Row = HashMap<String, SqlValue>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKey {
    pub name: String,
    pub source_table: String,
    pub source_columns: Vec<String>,
    pub target_table: String,
    pub target_columns: Vec<String>,
    pub is_nullable: bool,
}

impl ForeignKey {
    pub fn is_self_referential(&self) -> bool {
        self.source_table == self.target_table
    }

    pub fn as_edge(&self) -> (String, String) {
        (self.source_table.clone(), self.target_table.clone())
    }

    /// `true` when the FK is single-column, which is what the cycle-breaking
    /// heuristics prefer when several candidates are otherwise equal.
    pub fn is_single_column(&self) -> bool {
        self.source_columns.len() == 1
    }
}

/// A foreign key declared outside the database's own constraint catalog
/// (e.g. an application-level relationship with no `FOREIGN KEY` DDL).
/// Treated identically to a real FK once converted via [`to_foreign_key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualForeignKey {
    pub name: String,
    pub source_table: String,
    pub source_columns: Vec<String>,
    pub target_table: String,
    pub target_columns: Vec<String>,
    pub is_nullable: bool,
    pub description: Option<String>,
}

impl VirtualForeignKey {
    pub fn to_foreign_key(&self) -> ForeignKey {
        ForeignKey {
            name: self.name.clone(),
            source_table: self.source_table.clone(),
            source_columns: self.source_columns.clone(),
            target_table: self.target_table.clone(),
            target_columns: self.target_columns.clone(),
            is_nullable: self.is_nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Table {
    pub name: String,
    pub schema: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    pub fn get_pk_columns(&self) -> &[String] {
        &self.primary_key
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn get_column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// The full database schema plus the directed FK graph used for traversal.
#[derive(Debug, Clone, Default)]
pub struct SchemaGraph {
    pub tables: HashMap<String, Table>,
    pub edges: Vec<ForeignKey>,
    pub virtual_edges: Vec<VirtualForeignKey>,
}

impl SchemaGraph {
    pub fn new(tables: HashMap<String, Table>, edges: Vec<ForeignKey>) -> Self {
        SchemaGraph {
            tables,
            edges,
            virtual_edges: Vec::new(),
        }
    }

    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn get_table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every FK (real or virtual) where `table` is the source, i.e. the
    /// tables `table` depends on ("up" in the traversal direction).
    pub fn get_parents(&self, table: &str) -> Vec<ForeignKey> {
        let mut parents: Vec<ForeignKey> = self
            .edges
            .iter()
            .filter(|fk| fk.source_table == table)
            .cloned()
            .collect();
        parents.extend(
            self.virtual_edges
                .iter()
                .filter(|vfk| vfk.source_table == table)
                .map(VirtualForeignKey::to_foreign_key),
        );
        parents
    }

    /// Every FK (real or virtual) where `table` is the target, i.e. the
    /// tables that depend on `table` ("down" in the traversal direction).
    pub fn get_children(&self, table: &str) -> Vec<ForeignKey> {
        let mut children: Vec<ForeignKey> = self
            .edges
            .iter()
            .filter(|fk| fk.target_table == table)
            .cloned()
            .collect();
        children.extend(
            self.virtual_edges
                .iter()
                .filter(|vfk| vfk.target_table == table)
                .map(VirtualForeignKey::to_foreign_key),
        );
        children
    }

    pub fn get_virtual_fks(&self, table: Option<&str>) -> Vec<&VirtualForeignKey> {
        match table {
            Some(t) => self
                .virtual_edges
                .iter()
                .filter(|vfk| vfk.source_table == t || vfk.target_table == t)
                .collect(),
            None => self.virtual_edges.iter().collect(),
        }
    }

    pub fn add_virtual_fk(&mut self, vfk: VirtualForeignKey) {
        self.virtual_edges.push(vfk);
    }

    pub fn is_virtual_fk(&self, fk: &ForeignKey) -> bool {
        self.virtual_edges.iter().any(|vfk| {
            vfk.name == fk.name
                && vfk.source_table == fk.source_table
                && vfk.target_table == fk.target_table
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fk() -> ForeignKey {
        ForeignKey {
            name: "fk_orders_customer".into(),
            source_table: "orders".into(),
            source_columns: vec!["customer_id".into()],
            target_table: "customers".into(),
            target_columns: vec!["id".into()],
            is_nullable: false,
        }
    }

    #[test]
    fn parents_and_children_are_symmetric() {
        let fk = sample_fk();
        let graph = SchemaGraph::new(HashMap::new(), vec![fk.clone()]);
        assert_eq!(graph.get_parents("orders"), vec![fk.clone()]);
        assert_eq!(graph.get_children("customers"), vec![fk]);
        assert!(graph.get_children("orders").is_empty());
    }

    #[test]
    fn virtual_fk_converts_and_appears_in_parents() {
        let mut graph = SchemaGraph::new(HashMap::new(), vec![]);
        let vfk = VirtualForeignKey {
            name: "vfk_events_user".into(),
            source_table: "events".into(),
            source_columns: vec!["user_id".into()],
            target_table: "users".into(),
            target_columns: vec!["id".into()],
            is_nullable: true,
            description: Some("application-level link".into()),
        };
        graph.add_virtual_fk(vfk.clone());
        let parents = graph.get_parents("events");
        assert_eq!(parents.len(), 1);
        assert!(graph.is_virtual_fk(&parents[0]));
    }

    #[test]
    fn self_referential_detection() {
        let fk = ForeignKey {
            name: "fk_employees_manager".into(),
            source_table: "employees".into(),
            source_columns: vec!["manager_id".into()],
            target_table: "employees".into(),
            target_columns: vec!["id".into()],
            is_nullable: true,
        };
        assert!(fk.is_self_referential());
        assert!(fk.is_single_column());
    }

    #[test]
    fn row_key_ordering_is_deterministic() {
        let a = RowKey::from_values(&[SqlValue::I64(1)]);
        let b = RowKey::from_values(&[SqlValue::I64(2)]);
        assert!(a < b);
    }
}
