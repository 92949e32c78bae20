//! CQL statement model.
//!
//! Statements are built by the adapter and rendered to CQL text with `?`
//! placeholders plus bind values. Sessions may execute either form; the
//! in-memory session interprets the model directly.

use morphdb_codec::{FlatRow, Value};
use std::fmt;

/// Restriction operator in a `WHERE` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=`
    Eq,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `IN`
    In,
    /// `CONTAINS` on a list or set column.
    Contains,
    /// `CONTAINS KEY` on a map column.
    ContainsKey,
    /// `LIKE` with a trailing `%`, served by a prefix index.
    Like,
}

impl Operator {
    fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::In => "IN",
            Operator::Contains => "CONTAINS",
            Operator::ContainsKey => "CONTAINS KEY",
            Operator::Like => "LIKE",
        }
    }
}

/// One `column op value` term.
#[derive(Debug, Clone, PartialEq)]
pub struct Restriction {
    /// Column name.
    pub column: String,
    /// Operator.
    pub operator: Operator,
    /// Bound operand. A list for `IN`, a pattern ending in `%` for `LIKE`.
    pub value: Value,
}

impl Restriction {
    /// Creates a restriction.
    pub fn new(column: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
        }
    }

    /// Returns true if a stored column value satisfies the restriction.
    /// Null never satisfies a restriction.
    pub fn accepts(&self, stored: &Value) -> bool {
        if stored.is_null() {
            return false;
        }
        let ordered = |want: fn(std::cmp::Ordering) -> bool| {
            stored.is_comparable_with(&self.value) && want(stored.compare(&self.value))
        };
        match self.operator {
            Operator::Eq => stored.same(&self.value),
            Operator::Lt => ordered(std::cmp::Ordering::is_lt),
            Operator::Lte => ordered(std::cmp::Ordering::is_le),
            Operator::Gt => ordered(std::cmp::Ordering::is_gt),
            Operator::Gte => ordered(std::cmp::Ordering::is_ge),
            Operator::In => self
                .value
                .as_list()
                .is_some_and(|options| options.iter().any(|o| stored.same(o))),
            Operator::Contains => stored
                .as_list()
                .is_some_and(|items| items.iter().any(|i| i.same(&self.value))),
            Operator::ContainsKey => stored
                .as_map()
                .is_some_and(|pairs| pairs.iter().any(|(k, _)| k.same(&self.value))),
            Operator::Like => match (stored.as_text(), self.value.as_text()) {
                (Some(text), Some(pattern)) => text.starts_with(pattern.trim_end_matches('%')),
                _ => false,
            },
        }
    }
}

/// A CQL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum CqlStatement {
    /// `SELECT * FROM table WHERE ...`
    Select {
        /// Qualified table name.
        table: String,
        /// Conjunction of restrictions. Empty selects every row.
        restrictions: Vec<Restriction>,
        /// Appends `ALLOW FILTERING`.
        allow_filtering: bool,
    },
    /// `INSERT INTO table (...) VALUES (...)`
    Insert {
        /// Qualified table name.
        table: String,
        /// Column values.
        row: FlatRow,
        /// Appends `IF NOT EXISTS` (lightweight transaction).
        if_not_exists: bool,
    },
    /// `UPDATE table SET ... WHERE key = ? [IF ...]`
    Update {
        /// Qualified table name.
        table: String,
        /// Primary key column.
        key_column: String,
        /// Primary key value.
        key: Value,
        /// Columns to set.
        assignments: FlatRow,
        /// Compare-and-set guards: each column must hold the value.
        conditions: Vec<(String, Value)>,
    },
    /// `DELETE FROM table WHERE key = ? [IF ...]`
    Delete {
        /// Qualified table name.
        table: String,
        /// Primary key column.
        key_column: String,
        /// Primary key value.
        key: Value,
        /// Compare-and-set guards.
        conditions: Vec<(String, Value)>,
    },
    /// `CREATE TABLE IF NOT EXISTS`
    CreateTable {
        /// Qualified table name.
        table: String,
        /// Column names with CQL types.
        columns: Vec<(String, String)>,
        /// Primary key column.
        key_column: String,
    },
    /// `CREATE [CUSTOM] INDEX IF NOT EXISTS`
    CreateIndex {
        /// Qualified table name.
        table: String,
        /// Indexed column.
        column: String,
        /// Prefix (SASI) index supporting `LIKE 'abc%'`.
        prefix: bool,
    },
}

impl CqlStatement {
    /// Short operation name for logs and retries.
    pub fn kind(&self) -> &'static str {
        match self {
            CqlStatement::Select { .. } => "select",
            CqlStatement::Insert { .. } => "insert",
            CqlStatement::Update { .. } => "update",
            CqlStatement::Delete { .. } => "delete",
            CqlStatement::CreateTable { .. } => "create table",
            CqlStatement::CreateIndex { .. } => "create index",
        }
    }

    /// Returns true if the statement carries lightweight-transaction guards.
    pub fn is_conditional(&self) -> bool {
        match self {
            CqlStatement::Insert { if_not_exists, .. } => *if_not_exists,
            CqlStatement::Update { conditions, .. } | CqlStatement::Delete { conditions, .. } => {
                !conditions.is_empty()
            }
            _ => false,
        }
    }

    /// Renders CQL text and bind values.
    pub fn render(&self) -> (String, Vec<Value>) {
        let mut binds = Vec::new();
        let text = self.render_into(&mut binds);
        (text, binds)
    }

    fn render_into(&self, binds: &mut Vec<Value>) -> String {
        match self {
            CqlStatement::Select {
                table,
                restrictions,
                allow_filtering,
            } => {
                let mut text = format!("SELECT * FROM {table}");
                if !restrictions.is_empty() {
                    let terms: Vec<String> = restrictions
                        .iter()
                        .map(|r| {
                            binds.push(r.value.clone());
                            format!("{} {} ?", r.column, r.operator.symbol())
                        })
                        .collect();
                    text.push_str(" WHERE ");
                    text.push_str(&terms.join(" AND "));
                }
                if *allow_filtering {
                    text.push_str(" ALLOW FILTERING");
                }
                text
            }
            CqlStatement::Insert {
                table,
                row,
                if_not_exists,
            } => {
                let columns: Vec<&str> = row.columns().collect();
                binds.extend(row.iter().map(|(_, v)| v.clone()));
                let placeholders = vec!["?"; columns.len()].join(", ");
                let mut text = format!(
                    "INSERT INTO {table} ({}) VALUES ({placeholders})",
                    columns.join(", ")
                );
                if *if_not_exists {
                    text.push_str(" IF NOT EXISTS");
                }
                text
            }
            CqlStatement::Update {
                table,
                key_column,
                key,
                assignments,
                conditions,
            } => {
                let sets: Vec<String> = assignments
                    .iter()
                    .map(|(column, value)| {
                        binds.push(value.clone());
                        format!("{column} = ?")
                    })
                    .collect();
                binds.push(key.clone());
                let mut text = format!(
                    "UPDATE {table} SET {} WHERE {key_column} = ?",
                    sets.join(", ")
                );
                push_conditions(&mut text, conditions, binds);
                text
            }
            CqlStatement::Delete {
                table,
                key_column,
                key,
                conditions,
            } => {
                binds.push(key.clone());
                let mut text = format!("DELETE FROM {table} WHERE {key_column} = ?");
                push_conditions(&mut text, conditions, binds);
                text
            }
            CqlStatement::CreateTable {
                table,
                columns,
                key_column,
            } => {
                let defs: Vec<String> = columns.iter().map(|(n, t)| format!("{n} {t}")).collect();
                format!(
                    "CREATE TABLE IF NOT EXISTS {table} ({}, PRIMARY KEY ({key_column}))",
                    defs.join(", ")
                )
            }
            CqlStatement::CreateIndex {
                table,
                column,
                prefix,
            } => {
                let name = format!("{}_{column}_idx", table.replace('.', "_"));
                if *prefix {
                    format!(
                        "CREATE CUSTOM INDEX IF NOT EXISTS {name} ON {table} ({column}) \
                         USING 'org.apache.cassandra.index.sasi.SASIIndex' \
                         WITH OPTIONS = {{'mode': 'PREFIX'}}"
                    )
                } else {
                    format!("CREATE INDEX IF NOT EXISTS {name} ON {table} ({column})")
                }
            }
        }
    }
}

fn push_conditions(text: &mut String, conditions: &[(String, Value)], binds: &mut Vec<Value>) {
    if conditions.is_empty() {
        return;
    }
    let terms: Vec<String> = conditions
        .iter()
        .map(|(column, value)| {
            binds.push(value.clone());
            format!("{column} = ?")
        })
        .collect();
    text.push_str(" IF ");
    text.push_str(&terms.join(" AND "));
}

impl fmt::Display for CqlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render().0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_select_with_filtering() {
        let statement = CqlStatement::Select {
            table: "shop.person".into(),
            restrictions: vec![
                Restriction::new("id", Operator::Eq, "a".into()),
                Restriction::new("age", Operator::Gte, 18.into()),
                Restriction::new("tags", Operator::Contains, "vip".into()),
            ],
            allow_filtering: true,
        };
        let (text, binds) = statement.render();
        assert_eq!(
            text,
            "SELECT * FROM shop.person WHERE id = ? AND age >= ? AND tags CONTAINS ? ALLOW FILTERING"
        );
        assert_eq!(binds.len(), 3);
    }

    #[test]
    fn renders_lightweight_transactions() {
        let row: FlatRow = [("id".to_string(), Value::from("a")), ("age".to_string(), 3.into())]
            .into_iter()
            .collect();
        let insert = CqlStatement::Insert {
            table: "ks.t".into(),
            row: row.clone(),
            if_not_exists: true,
        };
        assert_eq!(
            insert.to_string(),
            "INSERT INTO ks.t (age, id) VALUES (?, ?) IF NOT EXISTS"
        );
        assert!(insert.is_conditional());

        let update = CqlStatement::Update {
            table: "ks.t".into(),
            key_column: "id".into(),
            key: "a".into(),
            assignments: [("age".to_string(), Value::from(4))].into_iter().collect(),
            conditions: vec![("age".into(), 3.into())],
        };
        let (text, binds) = update.render();
        assert_eq!(text, "UPDATE ks.t SET age = ? WHERE id = ? IF age = ?");
        assert_eq!(binds, vec![4.into(), "a".into(), 3.into()]);
    }

    #[test]
    fn renders_guarded_deletes() {
        let delete = CqlStatement::Delete {
            table: "ks.t".into(),
            key_column: "id".into(),
            key: "a".into(),
            conditions: vec![("age".into(), 3.into()), ("name".into(), Value::Null)],
        };
        let (text, binds) = delete.render();
        assert_eq!(text, "DELETE FROM ks.t WHERE id = ? IF age = ? AND name = ?");
        assert_eq!(binds, vec!["a".into(), 3.into(), Value::Null]);
        assert!(delete.is_conditional());
    }

    #[test]
    fn restrictions_follow_backend_null_semantics() {
        let lt = Restriction::new("age", Operator::Lt, 5.into());
        assert!(lt.accepts(&3.into()));
        assert!(!lt.accepts(&Value::Null));

        let like = Restriction::new("g", Operator::Like, "u4p%".into());
        assert!(like.accepts(&"u4pruyd".into()));
        assert!(!like.accepts(&"u4q".into()));

        let within = Restriction::new("id", Operator::In, Value::List(vec![1.into(), 2.into()]));
        assert!(within.accepts(&2.into()));
        assert!(!within.accepts(&3.into()));
    }

    #[test]
    fn renders_schema() {
        let index = CqlStatement::CreateIndex {
            table: "ks.person".into(),
            column: "email".into(),
            prefix: false,
        };
        assert_eq!(
            index.to_string(),
            "CREATE INDEX IF NOT EXISTS ks_person_email_idx ON ks.person (email)"
        );
    }
}
