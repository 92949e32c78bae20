//! In-memory column store.
//!
//! [`MemoryColumnStore`] interprets [`CqlStatement`]s against in-process
//! tables with the backend's observable semantics: tables and indexes must
//! be created first, filtering on unindexed columns requires
//! `ALLOW FILTERING`, restrictions never match null, lightweight
//! transactions report whether they applied and return the current row
//! when they did not. It also counts in-flight statements and can inject
//! failures, so adapter tests can assert on concurrency and fault handling.

use crate::session::{CqlResult, CqlSession};
use crate::statement::{CqlStatement, Restriction};
use async_trait::async_trait;
use morphdb_codec::{FlatRow, OrderedValue, Value};
use morphdb_core::{CoreError, CoreResult};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct StoredTable {
    key_column: String,
    indexes: BTreeSet<String>,
    rows: BTreeMap<OrderedValue, FlatRow>,
}

type Tables = HashMap<String, StoredTable>;

/// An in-process CQL session.
#[derive(Debug, Default)]
pub struct MemoryColumnStore {
    tables: RwLock<Tables>,
    log: Mutex<Vec<CqlStatement>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_kind: Mutex<Option<&'static str>>,
    fail_next: AtomicUsize,
}

/// Decrements the in-flight counter when a statement finishes or is
/// cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryColumnStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every statement, making concurrent execution observable.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Makes the next statement of the given [`kind`](CqlStatement::kind)
    /// fail with a retryable error without applying it.
    pub fn fail_next_of(&self, kind: &'static str) {
        *self.fail_kind.lock() = Some(kind);
    }

    /// Makes the next `count` statements fail with a retryable error.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Highest number of statements observed executing at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Resets the in-flight high-water mark.
    pub fn reset_max_in_flight(&self) {
        self.max_in_flight.store(0, Ordering::SeqCst);
    }

    /// Every statement executed so far, in completion order.
    pub fn executed(&self) -> Vec<CqlStatement> {
        self.log.lock().clone()
    }

    /// Forgets the statement log.
    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    /// Rows of a table in key order.
    pub fn rows(&self, table: &str) -> Vec<FlatRow> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Writes a raw row, bypassing the adapter. Used to simulate rows
    /// written by older or newer schema versions.
    ///
    /// # Errors
    ///
    /// Fails if the table does not exist or the row lacks its key.
    pub fn put_raw(&self, table: &str, row: FlatRow) -> CoreResult<()> {
        let mut tables = self.tables.write();
        let stored = table_mut(&mut tables, table)?;
        let key = row_key(stored, &row)?;
        stored.rows.insert(key, row);
        Ok(())
    }

    fn take_failure(&self, statement: &CqlStatement) -> bool {
        {
            let mut kind = self.fail_kind.lock();
            if *kind == Some(statement.kind()) {
                *kind = None;
                return true;
            }
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn table_ref<'a>(tables: &'a Tables, name: &str) -> CoreResult<&'a StoredTable> {
    tables
        .get(name)
        .ok_or_else(|| CoreError::invalid_query(format!("unconfigured table {name}")))
}

fn table_mut<'a>(tables: &'a mut Tables, name: &str) -> CoreResult<&'a mut StoredTable> {
    tables
        .get_mut(name)
        .ok_or_else(|| CoreError::invalid_query(format!("unconfigured table {name}")))
}

fn row_key(table: &StoredTable, row: &FlatRow) -> CoreResult<OrderedValue> {
    match row.get(&table.key_column) {
        Some(key) if !key.is_null() => Ok(OrderedValue(key.clone())),
        _ => Err(CoreError::invalid_query(format!(
            "missing primary key column {}",
            table.key_column
        ))),
    }
}

fn guards_hold(row: Option<&FlatRow>, conditions: &[(String, Value)]) -> bool {
    let Some(row) = row else {
        return false;
    };
    conditions
        .iter()
        .all(|(column, expected)| row.get(column).unwrap_or(&Value::Null).same(expected))
}

fn select(tables: &Tables, table: &str, restrictions: &[Restriction], allow_filtering: bool) -> CoreResult<Vec<FlatRow>> {
    let stored = table_ref(tables, table)?;
    let served = |r: &Restriction| r.column == stored.key_column || stored.indexes.contains(&r.column);
    if !allow_filtering && restrictions.iter().any(|r| !served(r)) {
        return Err(CoreError::invalid_query(
            "cannot execute this query as it might involve data filtering; use ALLOW FILTERING",
        ));
    }
    Ok(stored
        .rows
        .values()
        .filter(|row| {
            restrictions
                .iter()
                .all(|r| r.accepts(row.get(&r.column).unwrap_or(&Value::Null)))
        })
        .cloned()
        .collect())
}

fn apply(tables: &mut Tables, statement: &CqlStatement) -> CoreResult<CqlResult> {
    match statement {
        CqlStatement::Select {
            table,
            restrictions,
            allow_filtering,
        } => select(tables, table, restrictions, *allow_filtering).map(CqlResult::rows),
        CqlStatement::Insert {
            table,
            row,
            if_not_exists,
        } => {
            let stored = table_mut(tables, table)?;
            let key = row_key(stored, row)?;
            match stored.rows.get_mut(&key) {
                Some(existing) if *if_not_exists => Ok(CqlResult::not_applied(Some(existing.clone()))),
                Some(existing) => {
                    existing.extend(row.clone());
                    Ok(CqlResult::applied())
                }
                None => {
                    stored.rows.insert(key, row.clone());
                    Ok(CqlResult::applied())
                }
            }
        }
        CqlStatement::Update {
            table,
            key_column,
            key,
            assignments,
            conditions,
        } => {
            let stored = table_mut(tables, table)?;
            let id = OrderedValue(key.clone());
            if !conditions.is_empty() && !guards_hold(stored.rows.get(&id), conditions) {
                return Ok(CqlResult::not_applied(stored.rows.get(&id).cloned()));
            }
            let row = stored.rows.entry(id).or_insert_with(|| {
                let mut row = FlatRow::new();
                row.insert(key_column.clone(), key.clone());
                row
            });
            row.extend(assignments.clone());
            Ok(CqlResult::applied())
        }
        CqlStatement::Delete {
            table,
            key,
            conditions,
            ..
        } => {
            let stored = table_mut(tables, table)?;
            let id = OrderedValue(key.clone());
            if !conditions.is_empty() && !guards_hold(stored.rows.get(&id), conditions) {
                return Ok(CqlResult::not_applied(stored.rows.get(&id).cloned()));
            }
            stored.rows.remove(&id);
            Ok(CqlResult::applied())
        }
        CqlStatement::CreateTable {
            table, key_column, ..
        } => {
            tables.entry(table.clone()).or_insert_with(|| StoredTable {
                key_column: key_column.clone(),
                ..StoredTable::default()
            });
            Ok(CqlResult::applied())
        }
        CqlStatement::CreateIndex { table, column, .. } => {
            table_mut(tables, table)?.indexes.insert(column.clone());
            Ok(CqlResult::applied())
        }
    }
}

#[async_trait]
impl CqlSession for MemoryColumnStore {
    async fn execute(&self, statement: &CqlStatement) -> CoreResult<CqlResult> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.take_failure(statement) {
            return Err(CoreError::backend_retryable(format!(
                "{} timed out",
                statement.kind()
            )));
        }

        let result = apply(&mut self.tables.write(), statement)?;
        self.log.lock().push(statement.clone());
        Ok(result)
    }
}
