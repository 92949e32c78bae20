//! Queries: a condition plus ordering and a result window.

use crate::condition::Condition;
use crate::eval::resolve_field;
use morphdb_codec::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One ordering key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortPart {
    /// Dotted field path.
    pub field: String,
    /// Ascending (nulls first) or descending (nulls last).
    pub ascending: bool,
}

impl SortPart {
    /// Ascending order on a field.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    /// Descending order on a field.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }

    /// Compares two records by this key. Unresolvable paths compare as null.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let key = |record| resolve_field(record, &self.field).unwrap_or(&Value::Null);
        let ordering = key(a).compare(key(b));
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

/// Compares two records by a list of sort keys.
pub fn compare_by(order_by: &[SortPart], a: &Value, b: &Value) -> Ordering {
    order_by
        .iter()
        .map(|part| part.compare(a, b))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// A filtered, ordered and windowed read.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    /// Filter.
    pub condition: Condition,
    /// Ordering keys, most significant first.
    pub order_by: Vec<SortPart>,
    /// Number of matching records to skip.
    pub skip: usize,
    /// Maximum number of records to return.
    pub limit: Option<usize>,
}

impl Query {
    /// A query returning every record matching `condition`.
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            ..Self::default()
        }
    }

    /// Query matching every record.
    pub fn all() -> Self {
        Self::new(Condition::Always)
    }

    /// Adds an ordering key.
    #[must_use]
    pub fn order_by(mut self, part: SortPart) -> Self {
        self.order_by.push(part);
        self
    }

    /// Sets the number of records to skip.
    #[must_use]
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the maximum number of records.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sorts records by the query's ordering (stable) and applies the
    /// skip/limit window.
    pub fn arrange(&self, mut records: Vec<Value>) -> Vec<Value> {
        if !self.order_by.is_empty() {
            records.sort_by(|a, b| compare_by(&self.order_by, a, b));
        }
        let window = records.into_iter().skip(self.skip);
        match self.limit {
            Some(limit) => window.take(limit).collect(),
            None => window.collect(),
        }
    }
}

impl From<Condition> for Query {
    fn from(condition: Condition) -> Self {
        Query::new(condition)
    }
}
