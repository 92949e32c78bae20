//! Flat rows and column plans.

use crate::descriptor::PrimitiveKind;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

/// A flat mapping from leaf path to value: the exchange format between the
/// codec and the backend adapters.
///
/// Keys are unique and kept sorted, so debug output is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatRow {
    columns: BTreeMap<String, Value>,
}

impl FlatRow {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column, returning the previous value.
    pub fn insert(&mut self, column: impl Into<String>, value: Value) -> Option<Value> {
        self.columns.insert(column.into(), value)
    }

    /// Gets a column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Removes a column.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.columns.remove(column)
    }

    /// Returns true if the column is present (possibly null).
    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterates columns in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.columns.iter()
    }

    /// Column names in key order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Copies every column of `other` into this row.
    pub fn extend(&mut self, other: FlatRow) {
        self.columns.extend(other.columns);
    }

    /// Keeps only the listed columns.
    #[must_use]
    pub fn project(&self, columns: &[&str]) -> FlatRow {
        let mut out = FlatRow::new();
        for name in columns {
            if let Some(v) = self.columns.get(*name) {
                out.insert(*name, v.clone());
            }
        }
        out
    }
}

impl FromIterator<(String, Value)> for FlatRow {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for FlatRow {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl<'a> IntoIterator for &'a FlatRow {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}

impl fmt::Display for FlatRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, "}}")
    }
}

/// Storage type of a column.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageType {
    /// Single scalar.
    Scalar(PrimitiveKind),
    /// Structure-of-arrays column: one entry per collection element.
    Array(Box<StorageType>),
    /// Native list collection column.
    List(Box<StorageType>),
    /// Native set collection column.
    Set(Box<StorageType>),
    /// Native map collection column.
    Map(Box<StorageType>, Box<StorageType>),
    /// Native frozen record stored inside a collection.
    Record(Vec<(String, StorageType)>),
}

/// A derived column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// Flattened column name.
    pub name: String,
    /// Storage type.
    pub storage: StorageType,
    /// Whether the column may hold null.
    pub nullable: bool,
}

impl ColumnDef {
    /// Creates a column definition.
    pub fn new(name: impl Into<String>, storage: StorageType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            storage,
            nullable,
        }
    }
}

/// Per-field derived columns for a record type, in field order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnPlan {
    columns: Vec<ColumnDef>,
}

impl ColumnPlan {
    /// Creates a plan from columns.
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    /// All columns.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Looks up a column by name.
    pub fn get(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in plan order.
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Columns whose names start with `prefix` (the columns contributed by
    /// one field subtree).
    pub fn under<'a>(&'a self, prefix: &'a str, separator: &'a str) -> Vec<&'a ColumnDef> {
        self.columns
            .iter()
            .filter(|c| {
                c.name == prefix
                    || c.name
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with(separator))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_basics() {
        let mut row = FlatRow::new();
        assert!(row.is_empty());
        row.insert("b", Value::Integer(2));
        row.insert("a", Value::Null);

        assert_eq!(row.len(), 2);
        assert!(row.contains("a"));
        assert_eq!(row.get("b"), Some(&Value::Integer(2)));
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(row.to_string(), "{a=null, b=2}");
    }

    #[test]
    fn project_keeps_listed_columns() {
        let row: FlatRow = vec![
            ("id".to_string(), Value::Integer(1)),
            ("name".to_string(), Value::Text("x".into())),
        ]
        .into_iter()
        .collect();

        let projected = row.project(&["id", "missing"]);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected.get("id"), Some(&Value::Integer(1)));
    }

    #[test]
    fn plan_under_prefix() {
        let plan = ColumnPlan::new(vec![
            ColumnDef::new("home", StorageType::Scalar(PrimitiveKind::Text), false),
            ColumnDef::new("home__city", StorageType::Scalar(PrimitiveKind::Text), false),
            ColumnDef::new("homepage", StorageType::Scalar(PrimitiveKind::Text), false),
        ]);

        let names: Vec<_> = plan
            .under("home", "__")
            .into_iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["home", "home__city"]);
    }
}
