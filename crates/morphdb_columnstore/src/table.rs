//! [`Table`] implementation over a CQL session.

use crate::config::ColumnStoreConfig;
use crate::lower::{LoweredQuery, Lowerer};
use crate::schema::TableSchema;
use crate::session::{CqlResult, CqlSession};
use crate::statement::{CqlStatement, Operator, Restriction};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, FuturesUnordered};
use futures::{future, StreamExt, TryStreamExt};
use morphdb_codec::{descriptor_of, FlatRow, MapFormat, OrderedValue, Shape, TypeDescriptor, Value};
use morphdb_core::geo::{geohash, point_of};
use morphdb_core::{
    matches_record, modify, prepare_condition, prepare_modification, report, resolve_field,
    retry_backend, Condition, CoreError, CoreResult, Entity, EntryChange, Modification,
    NoopObserver, Query, QueryAnalysis, QueryObserver, Table, TableOptions,
};
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// A fetched record with the row it was decoded from.
type Fetched<T> = (FlatRow, T);

/// A table of `T` records stored in a column-family store.
///
/// Reads lower the condition to one select per disjunct, run them with
/// bounded concurrency and evaluate the exact condition on the result.
/// Writes use lightweight transactions: inserts are `IF NOT EXISTS`,
/// updates and deletes are guarded by the columns they read, and lost
/// races are retried from a fresh read.
///
/// Changing a record's identifier claims the new key with `IF NOT EXISTS`
/// and then deletes the old row guarded by every column that was read. If
/// the old row changed in between, the claim is withdrawn and the update is
/// retried from a fresh read. Readers may see both rows between the two
/// statements, but a finished or failed key change never leaves both.
pub struct ColumnStoreTable<T: Entity> {
    session: Arc<dyn CqlSession>,
    config: ColumnStoreConfig,
    format: MapFormat,
    descriptor: Arc<TypeDescriptor>,
    schema: TableSchema,
    observer: Arc<dyn QueryObserver>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Entity> ColumnStoreTable<T> {
    /// Creates a table handle. Call [`ensure_schema`](Self::ensure_schema)
    /// before first use.
    pub fn new(session: Arc<dyn CqlSession>, config: ColumnStoreConfig, options: &TableOptions) -> Self {
        Self::with_format(session, config, options, MapFormat::native())
    }

    /// Creates a table handle with a custom format, e.g. one with
    /// registered converters.
    pub fn with_format(
        session: Arc<dyn CqlSession>,
        config: ColumnStoreConfig,
        options: &TableOptions,
        format: MapFormat,
    ) -> Self {
        let descriptor = descriptor_of::<T>();
        let schema = TableSchema::derive(&config.keyspace, &descriptor, T::ID_FIELD, options, &format);
        Self {
            session,
            config,
            format,
            descriptor,
            schema,
            observer: Arc::new(NoopObserver),
            _record: PhantomData,
        }
    }

    /// Sets the observer notified of every query's index analysis.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn QueryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The physical layout.
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Creates the table and its indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns the backend error of the first failing statement.
    pub async fn ensure_schema(&self) -> CoreResult<()> {
        for statement in self.schema.create_statements(&self.format) {
            self.run(&statement).await?;
        }
        info!(table = %self.schema.qualified(), "schema ensured");
        Ok(())
    }

    /// Lowers a condition without executing it.
    ///
    /// # Errors
    ///
    /// Fails if the condition does not type-check against `T`.
    pub fn explain(&self, condition: &Condition) -> CoreResult<LoweredQuery> {
        let condition = prepare_condition::<T>(condition)?;
        Ok(self.lowerer().plan(&condition))
    }

    fn lowerer(&self) -> Lowerer<'_> {
        Lowerer::new(&self.format, &self.descriptor, &self.schema)
    }

    fn encode(&self, record: &T) -> CoreResult<FlatRow> {
        let mut row = self.format.encode_record(record)?;
        if self.schema.geo_fields.is_empty() {
            return Ok(row);
        }
        let value = record.to_value();
        for field in &self.schema.geo_fields {
            let hash = match resolve_field(&value, field)? {
                Value::Null => Value::Null,
                point => Value::Text(geohash::encode(&point_of(point)?, geohash::MAX_PRECISION)),
            };
            row.insert(self.schema.geohash_column(&self.format, field), hash);
        }
        Ok(row)
    }

    fn decode(&self, row: &FlatRow) -> CoreResult<T> {
        Ok(self.format.decode_record(row)?)
    }

    fn key_of<'r>(&self, row: &'r FlatRow) -> CoreResult<&'r Value> {
        row.get(&self.schema.key_column)
            .ok_or_else(|| CoreError::backend_fatal(format!("row without `{}`", self.schema.key_column)))
    }

    fn duplicate(&self, key: &Value) -> CoreError {
        CoreError::duplicate_key(&self.schema.table, key.to_string())
    }

    /// Executes a statement, retrying transient failures.
    async fn run(&self, statement: &CqlStatement) -> CoreResult<CqlResult> {
        debug!(table = %self.schema.table, statement = %statement, "execute");
        retry_backend(&self.config.retry, statement.kind(), || self.session.execute(statement)).await
    }

    /// Executes a statement once.
    async fn run_once(&self, statement: &CqlStatement) -> CoreResult<CqlResult> {
        debug!(table = %self.schema.table, statement = %statement, "execute once");
        self.session.execute(statement).await
    }

    /// Runs selects concurrently, at most `fan_out_limit` at a time, and
    /// streams rows as each select completes.
    fn select_stream(&self, statements: Vec<CqlStatement>) -> BoxStream<'static, CoreResult<FlatRow>> {
        if statements.len() > 1 {
            debug!(
                table = %self.schema.table,
                branches = statements.len(),
                limit = self.config.fan_out_limit,
                "fanning out select"
            );
        }
        let permits = Arc::new(Semaphore::new(self.config.fan_out_limit));
        let pending: FuturesUnordered<_> = statements
            .into_iter()
            .map(|statement| {
                let permits = Arc::clone(&permits);
                let session = Arc::clone(&self.session);
                let retry = self.config.retry.clone();
                let table = self.schema.table.clone();
                async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| CoreError::backend_fatal("fan-out semaphore closed"))?;
                    debug!(table = %table, statement = %statement, "execute");
                    retry_backend(&retry, statement.kind(), || session.execute(&statement)).await
                }
            })
            .collect();
        pending
            .map_ok(|result| stream::iter(result.rows.into_iter().map(Ok::<_, CoreError>)))
            .try_flatten()
            .boxed()
    }

    /// Lowers a prepared condition to selects and reports the analysis.
    fn plan_reads(&self, condition: &Condition) -> Vec<CqlStatement> {
        let lowered = self.lowerer().plan(condition);
        report(
            self.observer.as_ref(),
            &QueryAnalysis {
                table: self.schema.qualified(),
                condition: condition.clone(),
                requires_full_scan: lowered.requires_full_scan,
                unindexed_fields: lowered.unindexed_fields.clone(),
                fan_out: lowered.statements.len(),
                statement: lowered
                    .statements
                    .first()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            },
        );
        lowered.statements
    }

    /// Fetches every record matching a prepared condition, in key order.
    async fn fetch(&self, condition: &Condition) -> CoreResult<Vec<Fetched<T>>> {
        let mut rows = self.select_stream(self.plan_reads(condition));
        let mut found = BTreeMap::new();
        while let Some(row) = rows.try_next().await? {
            let key = OrderedValue(self.key_of(&row)?.clone());
            if found.contains_key(&key) {
                continue;
            }
            let record = self.decode(&row)?;
            if matches_record(condition, &record)? {
                found.insert(key, (row, record));
            }
        }
        Ok(found.into_values().collect())
    }

    /// Guards for a conditional write: the columns that were read to decide
    /// the write must still hold the values that were read.
    fn guards<'c>(
        &self,
        row: &FlatRow,
        condition: &Condition,
        changed: impl IntoIterator<Item = &'c str>,
    ) -> Vec<(String, Value)> {
        let mut columns: BTreeSet<String> = changed.into_iter().map(str::to_string).collect();
        for field in condition.referenced_fields() {
            let path = self.format.column_path(&field);
            columns.extend(
                self.schema
                    .plan
                    .under(&path, self.format.separator())
                    .into_iter()
                    .map(|c| c.name.clone()),
            );
        }
        columns.remove(&self.schema.key_column);
        columns
            .into_iter()
            .map(|column| {
                let value = row.get(&column).cloned().unwrap_or(Value::Null);
                (column, value)
            })
            .collect()
    }

    /// Writes `new` over the row `old` was read from. Returns false when a
    /// concurrent writer got there first.
    async fn write_update(&self, row: &FlatRow, new: &T, condition: &Condition) -> CoreResult<bool> {
        let key = self.key_of(row)?.clone();
        let new_row = self.encode(new)?;
        let new_key = self.key_of(&new_row)?.clone();
        if !key.same(&new_key) {
            return self.move_row(row, new_row).await;
        }

        let assignments: FlatRow = new_row
            .iter()
            .filter(|(column, value)| match row.get(column) {
                Some(stored) => !stored.same(value),
                None => !value.is_null(),
            })
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();
        if assignments.is_empty() {
            return Ok(true);
        }
        let conditions = self.guards(row, condition, assignments.columns());
        let statement = CqlStatement::Update {
            table: self.schema.qualified(),
            key_column: self.schema.key_column.clone(),
            key,
            assignments,
            conditions,
        };
        Ok(self.run(&statement).await?.applied)
    }

    /// Reads the row stored under `key`, if any.
    async fn read_key(&self, key: &Value) -> CoreResult<Option<FlatRow>> {
        let statement = CqlStatement::Select {
            table: self.schema.qualified(),
            restrictions: vec![Restriction::new(
                self.schema.key_column.clone(),
                Operator::Eq,
                key.clone(),
            )],
            allow_filtering: false,
        };
        Ok(self.run(&statement).await?.rows.into_iter().next())
    }

    /// Guards pinning every non-key column of `row`, including the columns
    /// only `other` has, which must still be null.
    fn row_guards(&self, row: &FlatRow, other: &FlatRow) -> Vec<(String, Value)> {
        let columns: BTreeSet<&str> = row.columns().chain(other.columns()).collect();
        columns
            .into_iter()
            .filter(|column| *column != self.schema.key_column)
            .map(|column| {
                let value = row.get(column).cloned().unwrap_or(Value::Null);
                (column.to_string(), value)
            })
            .collect()
    }

    /// Moves the record read as `old_row` to the key of `new_row`. Returns
    /// false when the old row changed after it was read; nothing is left
    /// under the new key in that case.
    async fn move_row(&self, old_row: &FlatRow, new_row: FlatRow) -> CoreResult<bool> {
        let table = self.schema.qualified();
        let old_key = self.key_of(old_row)?.clone();
        let new_key = self.key_of(&new_row)?.clone();

        // A claim that times out may or may not have applied; the caller re-reads.
        let claim = CqlStatement::Insert {
            table: table.clone(),
            row: new_row.clone(),
            if_not_exists: true,
        };
        if !self.run_once(&claim).await?.applied {
            return Err(self.duplicate(&new_key));
        }

        let release = CqlStatement::Delete {
            table,
            key_column: self.schema.key_column.clone(),
            key: old_key.clone(),
            conditions: self.row_guards(old_row, &new_row),
        };
        match self.run_once(&release).await {
            Ok(result) if result.applied => {
                debug!(table = %self.schema.table, from = %old_key, to = %new_key, "moved record");
                Ok(true)
            }
            Ok(_) => {
                self.withdraw_claim(&new_row).await?;
                debug!(table = %self.schema.table, from = %old_key, "old row changed during key change");
                Ok(false)
            }
            Err(err) => match self.read_key(&old_key).await? {
                // The release applied before the failure was reported.
                None => Ok(true),
                Some(_) => {
                    self.withdraw_claim(&new_row).await?;
                    Err(err)
                }
            },
        }
    }

    /// Deletes a claimed row unless it was changed after the claim.
    async fn withdraw_claim(&self, claimed: &FlatRow) -> CoreResult<()> {
        let statement = CqlStatement::Delete {
            table: self.schema.qualified(),
            key_column: self.schema.key_column.clone(),
            key: self.key_of(claimed)?.clone(),
            conditions: self.row_guards(claimed, claimed),
        };
        if !self.run(&statement).await?.applied {
            debug!(table = %self.schema.table, "claimed row changed before it was withdrawn");
        }
        Ok(())
    }

    /// Updates one record, re-reading after lost races. `current` seeds the
    /// first attempt with an already fetched match.
    async fn update_record(
        &self,
        condition: &Condition,
        modification: &Modification,
        mut current: Option<Fetched<T>>,
    ) -> CoreResult<Option<(T, T)>> {
        for attempt in 0..self.config.update_attempts {
            let fetched = match current.take() {
                Some(fetched) => Some(fetched),
                None => self.fetch(condition).await?.into_iter().next(),
            };
            let Some((row, old)) = fetched else {
                return Ok(None);
            };
            let new = modify(modification, &old)?;
            if self.write_update(&row, &new, condition).await? {
                return Ok(Some((old, new)));
            }
            debug!(table = %self.schema.table, attempt, "conditional update lost a race");
        }
        Err(CoreError::backend_retryable(format!(
            "update on {} still contended after {} attempts",
            self.schema.table, self.config.update_attempts
        )))
    }

    /// Deletes one fetched record if it still matches.
    async fn delete_row(&self, row: &FlatRow, condition: &Condition) -> CoreResult<bool> {
        let statement = CqlStatement::Delete {
            table: self.schema.qualified(),
            key_column: self.schema.key_column.clone(),
            key: self.key_of(row)?.clone(),
            conditions: self.guards(row, condition, std::iter::empty::<&str>()),
        };
        Ok(self.run(&statement).await?.applied)
    }

    /// Streams matching records in the order selects complete, dropping
    /// rows already seen from another branch.
    fn stream_matches(
        &self,
        condition: Condition,
        skip: usize,
        limit: Option<usize>,
    ) -> BoxStream<'static, CoreResult<T>> {
        let format = self.format.clone();
        let key_column = self.schema.key_column.clone();
        let mut seen = BTreeSet::new();
        let records = self
            .select_stream(self.plan_reads(&condition))
            .try_filter_map(move |row| {
                future::ready(admit::<T>(&format, &key_column, &condition, &mut seen, &row))
            })
            .skip(skip);
        match limit {
            Some(limit) => records.take(limit).boxed(),
            None => records.boxed(),
        }
    }

    fn pinned(condition: &Condition, record: &T) -> Condition {
        Condition::and([
            condition.clone(),
            Condition::on_field(T::ID_FIELD, Condition::Equal(record.id_value())),
        ])
    }
}

/// Decodes a streamed row unless its key was already seen, keeping it if it
/// matches.
fn admit<T: Entity>(
    format: &MapFormat,
    key_column: &str,
    condition: &Condition,
    seen: &mut BTreeSet<OrderedValue>,
    row: &FlatRow,
) -> CoreResult<Option<T>> {
    let key = row
        .get(key_column)
        .ok_or_else(|| CoreError::backend_fatal(format!("row without `{key_column}`")))?;
    if !seen.insert(OrderedValue(key.clone())) {
        return Ok(None);
    }
    let record: T = format.decode_record(row)?;
    Ok(matches_record(condition, &record)?.then_some(record))
}

#[async_trait]
impl<T: Entity> Table<T> for ColumnStoreTable<T> {
    fn name(&self) -> &str {
        &self.schema.table
    }

    async fn insert_one(&self, record: T) -> CoreResult<T> {
        let row = self.encode(&record)?;
        let key = self.key_of(&row)?.clone();
        let statement = CqlStatement::Insert {
            table: self.schema.qualified(),
            row,
            if_not_exists: true,
        };
        if !self.run(&statement).await?.applied {
            return Err(self.duplicate(&key));
        }
        debug!(table = %self.schema.table, id = %key, "insert");
        Ok(record)
    }

    async fn find(&self, query: Query) -> CoreResult<BoxStream<'static, CoreResult<T>>> {
        let condition = prepare_condition::<T>(&query.condition)?;
        if query.order_by.is_empty() {
            return Ok(self.stream_matches(condition, query.skip, query.limit));
        }
        let values = self
            .fetch(&condition)
            .await?
            .into_iter()
            .map(|(_, record)| record.to_value())
            .collect();
        let records = query
            .arrange(values)
            .into_iter()
            .map(|value| T::from_value(value).map_err(CoreError::from))
            .collect::<Vec<_>>();
        Ok(stream::iter(records).boxed())
    }

    async fn count(&self, condition: Condition) -> CoreResult<u64> {
        let condition = prepare_condition::<T>(&condition)?;
        Ok(self.fetch(&condition).await?.len() as u64)
    }

    async fn update_one(
        &self,
        condition: Condition,
        modification: Modification,
    ) -> CoreResult<EntryChange<T>> {
        let condition = prepare_condition::<T>(&condition)?;
        let modification = prepare_modification::<T>(&modification)?;
        Ok(match self.update_record(&condition, &modification, None).await? {
            Some((old, new)) => EntryChange::changed(old, new),
            None => EntryChange::none(),
        })
    }

    async fn update_many(&self, condition: Condition, modification: Modification) -> CoreResult<u64> {
        let condition = prepare_condition::<T>(&condition)?;
        let modification = prepare_modification::<T>(&modification)?;
        let mut updated = 0;
        for (row, record) in self.fetch(&condition).await? {
            let pinned = Self::pinned(&condition, &record);
            if self
                .update_record(&pinned, &modification, Some((row, record)))
                .await?
                .is_some()
            {
                updated += 1;
            }
        }
        debug!(table = %self.schema.table, count = updated, "update many");
        Ok(updated)
    }

    async fn delete_one(&self, condition: Condition) -> CoreResult<Option<T>> {
        let condition = prepare_condition::<T>(&condition)?;
        for attempt in 0..self.config.update_attempts {
            let Some((row, record)) = self.fetch(&condition).await?.into_iter().next() else {
                return Ok(None);
            };
            if self.delete_row(&row, &condition).await? {
                return Ok(Some(record));
            }
            debug!(table = %self.schema.table, attempt, "conditional delete lost a race");
        }
        Err(CoreError::backend_retryable(format!(
            "delete on {} still contended after {} attempts",
            self.schema.table, self.config.update_attempts
        )))
    }

    async fn delete_many(&self, condition: Condition) -> CoreResult<u64> {
        let condition = prepare_condition::<T>(&condition)?;
        let mut deleted = 0;
        for (row, _) in self.fetch(&condition).await? {
            if self.delete_row(&row, &condition).await? {
                deleted += 1;
            }
        }
        debug!(table = %self.schema.table, count = deleted, "delete many");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryColumnStore;
    use morphdb_codec::structure;
    use morphdb_core::{collect_all, RetryConfig};

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: String,
        body: String,
        stars: i64,
    }
    structure!(Note {
        id: String,
        body: String,
        stars: i64 = 0,
    });

    impl Entity for Note {
        type Id = String;
        const ID_FIELD: &'static str = "id";
        fn id(&self) -> String {
            self.id.clone()
        }
    }

    fn note(id: &str, stars: i64) -> Note {
        Note {
            id: id.into(),
            body: format!("note {id}"),
            stars,
        }
    }

    async fn table() -> (Arc<MemoryColumnStore>, ColumnStoreTable<Note>) {
        let store = Arc::new(MemoryColumnStore::new());
        let config = ColumnStoreConfig::new("ks").with_retry(RetryConfig::no_retry());
        let table = ColumnStoreTable::new(store.clone(), config, &TableOptions::new());
        table.ensure_schema().await.unwrap();
        (store, table)
    }

    #[tokio::test]
    async fn insert_is_a_lightweight_transaction() {
        let (store, table) = table().await;
        table.insert_one(note("a", 1)).await.unwrap();
        let err = table.insert_one(note("a", 2)).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKey { .. }));
        assert_eq!(store.rows("ks.note").len(), 1);
    }

    #[tokio::test]
    async fn updates_are_guarded_by_what_they_read() {
        let (store, table) = table().await;
        table.insert_one(note("a", 1)).await.unwrap();
        store.clear_log();

        let change = table
            .update_one(
                Condition::on_field("stars", Condition::GreaterThan(0.into())),
                Modification::on_field("stars", Modification::Increment(1.into())),
            )
            .await
            .unwrap();
        assert_eq!(change.new, Some(note("a", 2)));

        let update = store
            .executed()
            .into_iter()
            .find(|s| s.kind() == "update")
            .unwrap();
        assert_eq!(
            update.to_string(),
            "UPDATE ks.note SET stars = ? WHERE id = ? IF stars = ?"
        );
    }

    #[tokio::test]
    async fn delete_many_counts_removed_rows() {
        let (_, table) = table().await;
        table
            .insert_many(vec![note("a", 0), note("b", 3), note("c", 0)])
            .await
            .unwrap();
        let removed = table
            .delete_many(Condition::field_eq("stars", 0))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        let left = collect_all(table.find(Query::all()).await.unwrap()).await.unwrap();
        assert_eq!(left, vec![note("b", 3)]);
    }
}
