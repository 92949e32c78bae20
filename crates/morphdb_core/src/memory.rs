//! In-process table with client-side filtering.
//!
//! Records live in a `BTreeMap` keyed by identifier behind a
//! `parking_lot::RwLock`. Every write takes the write lock for its whole
//! read-modify-write, so inserts and key-changing updates are atomic with
//! respect to each other.

use crate::condition::Condition;
use crate::config::TableOptions;
use crate::entity::{Entity, EntryChange};
use crate::error::{CoreError, CoreResult};
use crate::modification::Modification;
use crate::query::Query;
use crate::table::{matches_record, modify, prepare_condition, prepare_modification, Table};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use morphdb_codec::{short_type_name, OrderedValue, Shape, Value};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;

/// A table stored in memory.
pub struct MemoryTable<T: Entity> {
    name: String,
    rows: RwLock<BTreeMap<OrderedValue, T>>,
}

impl<T: Entity> MemoryTable<T> {
    /// Creates an empty table named after the record type.
    pub fn new() -> Self {
        Self::with_options(&TableOptions::default())
    }

    /// Creates an empty table with explicit options.
    pub fn with_options(options: &TableOptions) -> Self {
        Self {
            name: options.resolve_name(short_type_name(std::any::type_name::<T>())),
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Returns a copy of every record in identifier order.
    pub fn snapshot(&self) -> Vec<T> {
        self.rows.read().values().cloned().collect()
    }

    fn key(record: &T) -> OrderedValue {
        OrderedValue(record.id_value())
    }

    fn duplicate(&self, key: &OrderedValue) -> CoreError {
        CoreError::duplicate_key(&self.name, key.0.to_string())
    }

    /// Identifiers of matching records, in identifier order.
    fn matching(
        rows: &BTreeMap<OrderedValue, T>,
        condition: &Condition,
        limit: Option<usize>,
    ) -> CoreResult<Vec<OrderedValue>> {
        let mut keys = Vec::new();
        for (key, record) in rows {
            if limit.is_some_and(|n| keys.len() >= n) {
                break;
            }
            if matches_record(condition, record)? {
                keys.push(key.clone());
            }
        }
        Ok(keys)
    }

    /// Replaces the record under `key` with `updated`, moving it if the
    /// identifier changed.
    fn replace(
        &self,
        rows: &mut BTreeMap<OrderedValue, T>,
        key: &OrderedValue,
        updated: T,
    ) -> CoreResult<()> {
        let new_key = Self::key(&updated);
        if new_key != *key {
            if rows.contains_key(&new_key) {
                return Err(self.duplicate(&new_key));
            }
            rows.remove(key);
        }
        rows.insert(new_key, updated);
        Ok(())
    }
}

impl<T: Entity> Default for MemoryTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> Table<T> for MemoryTable<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_one(&self, record: T) -> CoreResult<T> {
        let key = Self::key(&record);
        let mut rows = self.rows.write();
        if rows.contains_key(&key) {
            return Err(self.duplicate(&key));
        }
        debug!(table = %self.name, id = %key.0, "insert");
        rows.insert(key, record.clone());
        Ok(record)
    }

    async fn find(&self, query: Query) -> CoreResult<BoxStream<'static, CoreResult<T>>> {
        let condition = prepare_condition::<T>(&query.condition)?;
        let values: Vec<Value> = {
            let rows = self.rows.read();
            let mut out = Vec::new();
            for record in rows.values() {
                let value = record.to_value();
                if crate::eval::evaluate(&condition, &value)? {
                    out.push(value);
                }
            }
            out
        };
        let records = query
            .arrange(values)
            .into_iter()
            .map(|value| T::from_value(value).map_err(CoreError::from))
            .collect::<Vec<_>>();
        Ok(stream::iter(records).boxed())
    }

    async fn count(&self, condition: Condition) -> CoreResult<u64> {
        let condition = prepare_condition::<T>(&condition)?;
        let rows = self.rows.read();
        Ok(Self::matching(&rows, &condition, None)?.len() as u64)
    }

    async fn update_one(
        &self,
        condition: Condition,
        modification: Modification,
    ) -> CoreResult<EntryChange<T>> {
        let condition = prepare_condition::<T>(&condition)?;
        let modification = prepare_modification::<T>(&modification)?;
        let mut rows = self.rows.write();
        let Some(key) = Self::matching(&rows, &condition, Some(1))?.pop() else {
            return Ok(EntryChange::none());
        };
        let Some(old) = rows.get(&key).cloned() else {
            return Ok(EntryChange::none());
        };
        let new = modify(&modification, &old)?;
        self.replace(&mut rows, &key, new.clone())?;
        debug!(table = %self.name, id = %key.0, "update");
        Ok(EntryChange::changed(old, new))
    }

    async fn update_many(&self, condition: Condition, modification: Modification) -> CoreResult<u64> {
        let condition = prepare_condition::<T>(&condition)?;
        let modification = prepare_modification::<T>(&modification)?;
        let mut rows = self.rows.write();
        let keys = Self::matching(&rows, &condition, None)?;

        // Compute every new image first so a failure leaves the table untouched.
        let mut updates = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(old) = rows.get(&key) {
                updates.push((key, modify(&modification, old)?));
            }
        }
        let mut staged = rows.clone();
        for (key, updated) in &updates {
            self.replace(&mut staged, key, updated.clone())?;
        }
        *rows = staged;
        debug!(table = %self.name, count = updates.len(), "update many");
        Ok(updates.len() as u64)
    }

    async fn delete_one(&self, condition: Condition) -> CoreResult<Option<T>> {
        let condition = prepare_condition::<T>(&condition)?;
        let mut rows = self.rows.write();
        let removed = Self::matching(&rows, &condition, Some(1))?
            .pop()
            .and_then(|key| rows.remove(&key));
        Ok(removed)
    }

    async fn delete_many(&self, condition: Condition) -> CoreResult<u64> {
        let condition = prepare_condition::<T>(&condition)?;
        let mut rows = self.rows.write();
        let keys = Self::matching(&rows, &condition, None)?;
        for key in &keys {
            rows.remove(key);
        }
        debug!(table = %self.name, count = keys.len(), "delete many");
        Ok(keys.len() as u64)
    }
}
