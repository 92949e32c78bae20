//! In-memory relational executor.
//!
//! [`MemorySqlExecutor`] interprets [`SqlStatement`]s against in-process
//! tables with the observable semantics of a PostgreSQL server: tables
//! and columns must exist before they are written, unset columns read as
//! their default or `NULL`, the primary key is unique, comparisons with `NULL` are
//! unknown, and every statement applies atomically. Transactions are
//! serialized on one table-wide lock, which is stricter than row locks
//! but gives `FOR UPDATE` its meaning. Failures can be injected into
//! statements and commits.

use crate::executor::{SqlExecutor, SqlOutcome, SqlTransaction};
use crate::statement::{like_matches, ColumnSpec, SetExpr, SqlExpr, SqlStatement};
use async_trait::async_trait;
use morphdb_codec::{FlatRow, OrderedValue, Value};
use morphdb_core::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct StoredTable {
    key_column: String,
    columns: Vec<String>,
    defaults: BTreeMap<String, Value>,
    rows: BTreeMap<OrderedValue, FlatRow>,
}

impl StoredTable {
    fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    fn add_column(&mut self, column: &ColumnSpec) {
        if self.has_column(&column.name) {
            return;
        }
        self.columns.push(column.name.clone());
        if let Some(default) = &column.default {
            self.defaults.insert(column.name.clone(), default.clone());
            for row in self.rows.values_mut() {
                row.insert(column.name.clone(), default.clone());
            }
        }
    }

    /// A stored row with every table column, missing ones as null.
    fn full_row(&self, row: &FlatRow) -> FlatRow {
        self.columns
            .iter()
            .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
            .collect()
    }
}

type Tables = HashMap<String, StoredTable>;

#[derive(Debug, Default)]
struct Shared {
    tables: Arc<AsyncMutex<Tables>>,
    log: Mutex<Vec<SqlStatement>>,
    fail_next: AtomicUsize,
    fail_next_commit: AtomicBool,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl Shared {
    fn take_failure(&self, statement: &SqlStatement) -> CoreResult<()> {
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CoreError::backend_retryable(format!(
                "{} timed out",
                statement.kind()
            )));
        }
        Ok(())
    }

    fn record(&self, statement: &SqlStatement) {
        self.log.lock().push(statement.clone());
    }
}

/// An in-process SQL executor.
#[derive(Debug, Default)]
pub struct MemorySqlExecutor {
    shared: Arc<Shared>,
}

impl MemorySqlExecutor {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` statements fail with a retryable error.
    pub fn fail_next(&self, count: usize) {
        self.shared.fail_next.store(count, Ordering::SeqCst);
    }

    /// Makes the next commit fail with a retryable error, applying nothing.
    pub fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Every statement executed so far, in completion order.
    pub fn executed(&self) -> Vec<SqlStatement> {
        self.shared.log.lock().clone()
    }

    /// Forgets the statement log.
    pub fn clear_log(&self) {
        self.shared.log.lock().clear();
    }

    /// Committed transactions.
    pub fn commits(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    /// Rolled back transactions, explicit or by drop.
    pub fn rollbacks(&self) -> usize {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }

    /// Column names of a table in creation order.
    pub async fn columns(&self, table: &str) -> Vec<String> {
        self.shared
            .tables
            .lock()
            .await
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default()
    }

    /// Rows of a table in key order, with every column.
    pub async fn rows(&self, table: &str) -> Vec<FlatRow> {
        self.shared
            .tables
            .lock()
            .await
            .get(table)
            .map(|t| t.rows.values().map(|row| t.full_row(row)).collect())
            .unwrap_or_default()
    }

    /// Writes a raw row, bypassing the adapter. Used to simulate rows
    /// written by older schema versions.
    ///
    /// # Errors
    ///
    /// Fails if the table does not exist or the row lacks its key.
    pub async fn put_raw(&self, table: &str, row: FlatRow) -> CoreResult<()> {
        let mut tables = self.shared.tables.lock().await;
        let stored = table_mut(&mut tables, table)?;
        let key = row_key(stored, &row)?;
        stored.rows.insert(key, row);
        Ok(())
    }
}

fn table_ref<'a>(tables: &'a Tables, name: &str) -> CoreResult<&'a StoredTable> {
    tables
        .get(name)
        .ok_or_else(|| CoreError::invalid_query(format!("relation {name} does not exist")))
}

fn table_mut<'a>(tables: &'a mut Tables, name: &str) -> CoreResult<&'a mut StoredTable> {
    tables
        .get_mut(name)
        .ok_or_else(|| CoreError::invalid_query(format!("relation {name} does not exist")))
}

fn row_key(table: &StoredTable, row: &FlatRow) -> CoreResult<OrderedValue> {
    match row.get(&table.key_column) {
        Some(key) if !key.is_null() => Ok(OrderedValue(key.clone())),
        _ => Err(CoreError::invalid_query(format!(
            "null value in column {} violates not-null constraint",
            table.key_column
        ))),
    }
}

fn cell<'r>(row: &'r FlatRow, column: &str) -> &'r Value {
    static NULL: Value = Value::Null;
    row.get(column).unwrap_or(&NULL)
}

/// Three-valued evaluation: `None` is SQL `NULL`.
fn truth(expr: &SqlExpr, row: &FlatRow) -> Option<bool> {
    match expr {
        SqlExpr::Literal(b) => Some(*b),
        SqlExpr::Compare { column, op, value } => {
            let stored = cell(row, column);
            if stored.is_null() || value.is_null() {
                None
            } else {
                Some(op.holds(stored.compare(value)))
            }
        }
        SqlExpr::IsNull(column) => Some(cell(row, column).is_null()),
        SqlExpr::IsNotNull(column) => Some(!cell(row, column).is_null()),
        SqlExpr::DistinctFrom { column, value } => {
            let stored = cell(row, column);
            Some(match (stored.is_null(), value.is_null()) {
                (true, true) => false,
                (false, false) => !stored.compare(value).is_eq(),
                _ => true,
            })
        }
        SqlExpr::In { column, values } => {
            let stored = cell(row, column);
            if stored.is_null() {
                None
            } else {
                Some(values.iter().any(|v| stored.compare(v).is_eq()))
            }
        }
        SqlExpr::Like {
            column,
            pattern,
            case_insensitive,
        } => cell(row, column)
            .as_text()
            .map(|text| like_matches(text, pattern, *case_insensitive)),
        SqlExpr::ArrayContains { column, value } => cell(row, column)
            .as_list()
            .map(|items| items.iter().any(|item| !item.is_null() && item.compare(value).is_eq())),
        SqlExpr::Cardinality { column, size } => {
            let len = cell(row, column).as_list().map_or(0, <[Value]>::len);
            Some(len == *size)
        }
        SqlExpr::Flag(column) => Some(cell(row, column).as_bool().unwrap_or(false)),
        SqlExpr::And(children) => {
            let mut unknown = false;
            for child in children {
                match truth(child, row) {
                    Some(false) => return Some(false),
                    None => unknown = true,
                    Some(true) => {}
                }
            }
            if unknown {
                None
            } else {
                Some(true)
            }
        }
        SqlExpr::Or(children) => {
            let mut unknown = false;
            for child in children {
                match truth(child, row) {
                    Some(true) => return Some(true),
                    None => unknown = true,
                    Some(false) => {}
                }
            }
            if unknown {
                None
            } else {
                Some(false)
            }
        }
        SqlExpr::Not(inner) => Some(!truth(inner, row).unwrap_or(false)),
    }
}

#[allow(clippy::cast_precision_loss)]
fn arithmetic(
    current: &Value,
    operand: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> CoreResult<Value> {
    match (current, operand) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Integer(a), Value::Integer(b)) => int_op(*a, *b)
            .map(Value::Integer)
            .ok_or_else(|| CoreError::invalid_query("bigint out of range")),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(*a, *b))),
        (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(float_op(*a, *b as f64))),
        (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(float_op(*a as f64, *b))),
        (a, b) => Err(CoreError::invalid_query(format!(
            "operator does not exist: {} and {}",
            a.kind_name(),
            b.kind_name()
        ))),
    }
}

fn assign(set: &SetExpr, current: &Value) -> CoreResult<Value> {
    match set {
        SetExpr::Value(v) => Ok(v.clone()),
        SetExpr::Add(v) => arithmetic(current, v, i64::checked_add, |a, b| a + b),
        SetExpr::Multiply(v) => arithmetic(current, v, i64::checked_mul, |a, b| a * b),
        // LEAST and GREATEST ignore nulls.
        SetExpr::Least(v) | SetExpr::Greatest(v) if current.is_null() => Ok(v.clone()),
        SetExpr::Least(v) => Ok(if current.compare(v).is_gt() { v.clone() } else { current.clone() }),
        SetExpr::Greatest(v) => Ok(if current.compare(v).is_lt() { v.clone() } else { current.clone() }),
        SetExpr::Concat(v) => match (current, v) {
            (Value::Text(a), Value::Text(b)) => Ok(Value::Text(format!("{a}{b}"))),
            _ => Ok(Value::Null),
        },
    }
}

fn matching_keys(stored: &StoredTable, filter: &SqlExpr) -> Vec<OrderedValue> {
    stored
        .rows
        .iter()
        .filter(|(_, row)| truth(filter, &stored.full_row(row)) == Some(true))
        .map(|(key, _)| key.clone())
        .collect()
}

fn apply(tables: &mut Tables, statement: &SqlStatement) -> CoreResult<SqlOutcome> {
    match statement {
        SqlStatement::CreateTable {
            table,
            columns,
            key_column,
        } => {
            tables.entry(table.clone()).or_insert_with(|| {
                let mut stored = StoredTable {
                    key_column: key_column.clone(),
                    ..StoredTable::default()
                };
                for column in columns {
                    stored.add_column(column);
                }
                stored
            });
            Ok(SqlOutcome::default())
        }
        SqlStatement::AddColumn { table, column } => {
            table_mut(tables, table)?.add_column(column);
            Ok(SqlOutcome::default())
        }
        SqlStatement::CreateIndex { table, column, .. } => {
            let stored = table_ref(tables, table)?;
            if !stored.has_column(column) {
                return Err(CoreError::invalid_query(format!("column {column} does not exist")));
            }
            Ok(SqlOutcome::default())
        }
        SqlStatement::Select {
            table,
            filter,
            limit,
            ..
        } => {
            let stored = table_ref(tables, table)?;
            let rows = stored
                .rows
                .values()
                .map(|row| stored.full_row(row))
                .filter(|row| truth(filter, row) == Some(true))
                .take(limit.unwrap_or(usize::MAX))
                .collect();
            Ok(SqlOutcome::rows(rows))
        }
        SqlStatement::Insert { table, row } => {
            let stored = table_mut(tables, table)?;
            if let Some(unknown) = row.columns().find(|c| !stored.has_column(c)) {
                return Err(CoreError::invalid_query(format!(
                    "column {unknown} of relation {table} does not exist"
                )));
            }
            let key = row_key(stored, row)?;
            if stored.rows.contains_key(&key) {
                return Err(CoreError::duplicate_key(table.as_str(), key.0.to_string()));
            }
            let mut row = row.clone();
            for (column, default) in &stored.defaults {
                if !row.contains(column) {
                    row.insert(column.clone(), default.clone());
                }
            }
            stored.rows.insert(key, row);
            Ok(SqlOutcome::affected(1))
        }
        SqlStatement::Update {
            table,
            assignments,
            filter,
        } => {
            let stored = table_mut(tables, table)?;
            if let Some((unknown, _)) = assignments.iter().find(|(c, _)| !stored.has_column(c)) {
                return Err(CoreError::invalid_query(format!(
                    "column {unknown} of relation {table} does not exist"
                )));
            }
            let keys = matching_keys(stored, filter);
            let mut updated = Vec::with_capacity(keys.len());
            for key in &keys {
                let Some(mut row) = stored.rows.remove(key) else {
                    continue;
                };
                let current = stored.full_row(&row);
                for (column, set) in assignments {
                    row.insert(column.clone(), assign(set, cell(&current, column))?);
                }
                updated.push(row);
            }
            for row in updated {
                let key = row_key(stored, &row)?;
                if stored.rows.contains_key(&key) {
                    return Err(CoreError::duplicate_key(table.as_str(), key.0.to_string()));
                }
                stored.rows.insert(key, row);
            }
            Ok(SqlOutcome::affected(keys.len() as u64))
        }
        SqlStatement::Delete { table, filter } => {
            let stored = table_mut(tables, table)?;
            let keys = matching_keys(stored, filter);
            for key in &keys {
                stored.rows.remove(key);
            }
            Ok(SqlOutcome::affected(keys.len() as u64))
        }
    }
}

/// Applies a statement to a copy, so a failing statement changes nothing.
fn apply_atomically(tables: &mut Tables, statement: &SqlStatement) -> CoreResult<SqlOutcome> {
    let mut staged = tables.clone();
    let outcome = apply(&mut staged, statement)?;
    *tables = staged;
    Ok(outcome)
}

#[async_trait]
impl SqlExecutor for MemorySqlExecutor {
    async fn execute(&self, statement: &SqlStatement) -> CoreResult<SqlOutcome> {
        self.shared.take_failure(statement)?;
        let outcome = apply_atomically(&mut *self.shared.tables.lock().await, statement)?;
        self.shared.record(statement);
        Ok(outcome)
    }

    async fn begin(&self) -> CoreResult<Box<dyn SqlTransaction>> {
        let guard = Arc::clone(&self.shared.tables).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard: Some(guard),
            staged,
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// A transaction holding the table lock.
struct MemoryTransaction {
    guard: Option<OwnedMutexGuard<Tables>>,
    staged: Tables,
    shared: Arc<Shared>,
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.guard.is_some() {
            self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl SqlTransaction for MemoryTransaction {
    async fn execute(&mut self, statement: &SqlStatement) -> CoreResult<SqlOutcome> {
        self.shared.take_failure(statement)?;
        let outcome = apply_atomically(&mut self.staged, statement)?;
        self.shared.record(statement);
        Ok(outcome)
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        let mut this = self;
        if this.shared.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(CoreError::backend_retryable("commit timed out"));
        }
        if let Some(mut guard) = this.guard.take() {
            *guard = std::mem::take(&mut this.staged);
            this.shared.commits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::Comparison;

    const TABLE: &str = "app.t";

    fn row(id: &str, age: Option<i64>) -> FlatRow {
        [
            ("id".to_string(), Value::from(id)),
            ("age".to_string(), age.map_or(Value::Null, Value::from)),
        ]
        .into_iter()
        .collect()
    }

    fn column(name: &str, sql_type: &str, default: Option<Value>) -> ColumnSpec {
        ColumnSpec {
            name: name.into(),
            sql_type: sql_type.into(),
            default,
        }
    }

    async fn database() -> MemorySqlExecutor {
        let db = MemorySqlExecutor::new();
        db.execute(&SqlStatement::CreateTable {
            table: TABLE.into(),
            columns: vec![column("id", "TEXT", None), column("age", "BIGINT", None)],
            key_column: "id".into(),
        })
        .await
        .unwrap();
        db
    }

    fn insert(row: FlatRow) -> SqlStatement {
        SqlStatement::Insert {
            table: TABLE.into(),
            row,
        }
    }

    fn select(filter: SqlExpr) -> SqlStatement {
        SqlStatement::Select {
            table: TABLE.into(),
            filter,
            limit: None,
            for_update: false,
        }
    }

    #[tokio::test]
    async fn unknown_columns_are_rejected_until_added() {
        let db = database().await;
        let mut wide = row("a", Some(1));
        wide.insert("nickname", Value::from("al"));
        assert!(matches!(
            db.execute(&insert(wide.clone())).await.unwrap_err(),
            CoreError::InvalidQuery { .. }
        ));

        db.execute(&SqlStatement::AddColumn {
            table: TABLE.into(),
            column: column("nickname", "TEXT", None),
        })
        .await
        .unwrap();
        db.execute(&insert(wide)).await.unwrap();
        db.execute(&insert(row("b", Some(2)))).await.unwrap();
        assert_eq!(db.rows(TABLE).await[1].get("nickname"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn added_columns_take_their_default() {
        let db = database().await;
        db.execute(&insert(row("a", Some(1)))).await.unwrap();
        db.execute(&SqlStatement::AddColumn {
            table: TABLE.into(),
            column: column("level", "BIGINT", Some(Value::Integer(1))),
        })
        .await
        .unwrap();
        db.execute(&insert(row("b", Some(2)))).await.unwrap();

        let levels: Vec<Value> = db
            .rows(TABLE)
            .await
            .iter()
            .map(|r| r.get("level").cloned().unwrap_or(Value::Null))
            .collect();
        assert_eq!(levels, vec![Value::Integer(1), Value::Integer(1)]);
    }

    #[tokio::test]
    async fn primary_key_is_unique() {
        let db = database().await;
        db.execute(&insert(row("a", Some(1)))).await.unwrap();
        let err = db.execute(&insert(row("a", Some(2)))).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKey { .. }));
    }

    #[tokio::test]
    async fn comparisons_with_null_are_unknown() {
        let db = database().await;
        db.execute(&insert(row("a", Some(1)))).await.unwrap();
        db.execute(&insert(row("b", None))).await.unwrap();
        let below = SqlExpr::Compare {
            column: "age".into(),
            op: Comparison::Lt,
            value: 5.into(),
        };

        let plain = db.execute(&select(below.clone())).await.unwrap();
        assert_eq!(plain.rows.len(), 1);
        // Negation without COALESCE would drop the null row as well.
        let negated = db.execute(&select(SqlExpr::not(below))).await.unwrap();
        assert_eq!(negated.rows, vec![row("b", None)]);
    }

    #[tokio::test]
    async fn updates_can_move_keys_but_not_onto_taken_ones() {
        let db = database().await;
        db.execute(&insert(row("a", Some(1)))).await.unwrap();
        db.execute(&insert(row("b", Some(2)))).await.unwrap();
        let rename = |from: &str, to: &str| SqlStatement::Update {
            table: TABLE.into(),
            assignments: vec![("id".into(), SetExpr::Value(to.into()))],
            filter: SqlExpr::Compare {
                column: "id".into(),
                op: Comparison::Eq,
                value: from.into(),
            },
        };

        let err = db.execute(&rename("a", "b")).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKey { .. }));
        assert_eq!(db.rows(TABLE).await, vec![row("a", Some(1)), row("b", Some(2))]);

        assert_eq!(db.execute(&rename("a", "c")).await.unwrap().affected, 1);
        assert_eq!(db.rows(TABLE).await, vec![row("b", Some(2)), row("c", Some(1))]);
    }

    #[tokio::test]
    async fn transactions_apply_on_commit_only() {
        let db = database().await;
        let mut tx = db.begin().await.unwrap();
        tx.execute(&insert(row("a", Some(1)))).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(db.rows(TABLE).await.is_empty());
        assert_eq!(db.rollbacks(), 1);

        let mut tx = db.begin().await.unwrap();
        tx.execute(&insert(row("a", Some(1)))).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(db.rows(TABLE).await.len(), 1);
        assert_eq!(db.commits(), 1);

        db.fail_next_commit();
        let mut tx = db.begin().await.unwrap();
        tx.execute(&insert(row("b", Some(2)))).await.unwrap();
        assert!(tx.commit().await.unwrap_err().is_retryable());
        assert_eq!(db.rows(TABLE).await.len(), 1);
        assert_eq!(db.rollbacks(), 2);
    }
}
