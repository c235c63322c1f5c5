//! Last-writer-wins materialized view of a document.
//!
//! A [`Projection`] maps `table -> row -> column -> value`. Alongside it a
//! shadow index records, for every cell, the timestamp of the write that
//! currently owns it. A fragment wins its cell if the cell is empty or owned
//! by a smaller timestamp; anything else is stale and dropped.
//!
//! Columns of one row are independent registers. Two concurrent updates of
//! the same row may each win some of its columns.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tessera_core::{Fragment, Projection, Timestamp, TimestampConfig};
//!
//! let config = TimestampConfig::default();
//! let old = Timestamp::new(1, 0, "aaaaaaaaaaaaaaaa", config).unwrap();
//! let new = Timestamp::new(2, 0, "bbbbbbbbbbbbbbbb", config).unwrap();
//!
//! let mut view = Projection::new();
//! assert!(view.apply(&Fragment::new("doc", &new, "todos", "1", "title", json!("new"))));
//! assert!(!view.apply(&Fragment::new("doc", &old, "todos", "1", "title", json!("old"))));
//! assert_eq!(view.get("todos", "1", "title"), Some(&json!("new")));
//! ```

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::crdt::{Crdt, OpCrdt};
use crate::fragment::Fragment;

/// Column values of one row.
pub type Row = BTreeMap<String, Value>;
/// Rows of one table keyed by row id.
pub type Table = BTreeMap<String, Row>;

type Index = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

/// Materialized `table -> row -> column -> value` view.
///
/// Serializes as the plain nested map; the ownership index stays private.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Projection {
    tables: BTreeMap<String, Table>,
    #[serde(skip)]
    latest: Index,
}

impl Projection {
    /// An empty projection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one fragment. Returns whether it won its cell.
    pub fn apply(&mut self, fragment: &Fragment) -> bool {
        let owner = self
            .latest
            .entry(fragment.table.clone())
            .or_default()
            .entry(fragment.row.clone())
            .or_default()
            .entry(fragment.column.clone())
            .or_default();
        if !owner.is_empty() && owner.as_str() >= fragment.timestamp.as_str() {
            return false;
        }
        owner.clone_from(&fragment.timestamp);

        self.tables
            .entry(fragment.table.clone())
            .or_default()
            .entry(fragment.row.clone())
            .or_default()
            .insert(fragment.column.clone(), fragment.value.clone());
        true
    }

    /// Apply many fragments, returning how many won their cell.
    pub fn apply_all<'a, I>(&mut self, fragments: I) -> usize
    where
        I: IntoIterator<Item = &'a Fragment>,
    {
        fragments.into_iter().filter(|f| self.apply(f)).count()
    }

    /// Value of one cell.
    pub fn get(&self, table: &str, row: &str, column: &str) -> Option<&Value> {
        self.row(table, row)?.get(column)
    }

    /// One row.
    pub fn row(&self, table: &str, row: &str) -> Option<&Row> {
        self.tables.get(table)?.get(row)
    }

    /// One table.
    pub fn table(&self, table: &str) -> Option<&Table> {
        self.tables.get(table)
    }

    /// All tables.
    pub fn tables(&self) -> &BTreeMap<String, Table> {
        &self.tables
    }

    /// Serialized timestamp of the write owning a cell.
    pub fn latest(&self, table: &str, row: &str, column: &str) -> Option<&str> {
        self.latest
            .get(table)?
            .get(row)?
            .get(column)
            .map(String::as_str)
    }

    /// Whether no fragment has been applied.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// The winning fragment of every cell, rebuilt from the view.
    pub fn winners(&self, document_id: &str) -> Vec<Fragment> {
        let mut out = Vec::new();
        for (table, rows) in &self.latest {
            for (row, columns) in rows {
                for (column, timestamp) in columns {
                    let value = self
                        .get(table, row, column)
                        .cloned()
                        .unwrap_or(Value::Null);
                    out.push(Fragment {
                        document_id: document_id.to_string(),
                        timestamp: timestamp.clone(),
                        table: table.clone(),
                        row: row.clone(),
                        column: column.clone(),
                        value,
                    });
                }
            }
        }
        out
    }
}

impl Crdt for Projection {
    /// Cell-wise last-writer-wins.
    fn merge(&mut self, other: &Self) {
        for fragment in other.winners("") {
            self.apply(&fragment);
        }
    }
}

impl OpCrdt for Projection {
    type Op = Fragment;

    fn apply_op(&mut self, op: &Fragment) -> bool {
        self.apply(op)
    }
}
