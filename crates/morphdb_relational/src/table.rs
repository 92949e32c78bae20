//! [`Table`] implementation over a SQL executor.

use crate::config::RelationalConfig;
use crate::executor::{SqlExecutor, SqlOutcome, SqlTransaction};
use crate::lower::{LoweredFilter, Lowerer};
use crate::schema::RelationalSchema;
use crate::statement::{Comparison, SetExpr, SqlExpr, SqlStatement};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{future, StreamExt, TryStreamExt};
use morphdb_codec::{descriptor_of, FlatRow, MapFormat, OrderedValue, Shape, TypeDescriptor, Value};
use morphdb_core::{
    matches_record, modify, prepare_condition, prepare_modification, report, retry_backend,
    Condition, CoreError, CoreResult, Entity, EntryChange, Modification, NoopObserver, Query,
    QueryAnalysis, QueryObserver, Table, TableOptions,
};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info};

/// A table of `T` records stored in a relational database.
///
/// Records are flattened into structure-of-arrays rows, one column per
/// scalar leaf. Reads send the lowered `WHERE` clause and evaluate the
/// condition again only when the clause is a superset.
///
/// Single-record writes run in a transaction that locks the selected
/// rows with `FOR UPDATE`, applies the modification client-side and
/// writes back the changed columns by key. Whole transactions are retried
/// on transient failures; a failed commit is not, because its outcome is
/// unknown and the caller must re-read.
pub struct RelationalTable<T: Entity> {
    executor: Arc<dyn SqlExecutor>,
    config: RelationalConfig,
    format: MapFormat,
    descriptor: Arc<TypeDescriptor>,
    schema: RelationalSchema,
    observer: Arc<dyn QueryObserver>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Entity> RelationalTable<T> {
    /// Creates a table handle. Call [`ensure_schema`](Self::ensure_schema)
    /// before first use.
    pub fn new(executor: Arc<dyn SqlExecutor>, config: RelationalConfig, options: &TableOptions) -> Self {
        Self::with_format(executor, config, options, MapFormat::soa())
    }

    /// Creates a table handle with a custom format, e.g. one with
    /// registered converters.
    pub fn with_format(
        executor: Arc<dyn SqlExecutor>,
        config: RelationalConfig,
        options: &TableOptions,
        format: MapFormat,
    ) -> Self {
        let descriptor = descriptor_of::<T>();
        let schema = RelationalSchema::derive(&config.schema, &descriptor, T::ID_FIELD, options, &format);
        Self {
            executor,
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
    pub fn schema(&self) -> &RelationalSchema {
        &self.schema
    }

    /// Creates the table, adds columns for fields introduced since it was
    /// created, and creates the indexes.
    ///
    /// # Errors
    ///
    /// Returns the backend error of the first failing statement.
    pub async fn ensure_schema(&self) -> CoreResult<()> {
        for statement in self.schema.create_statements() {
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
    pub fn explain(&self, condition: &Condition) -> CoreResult<LoweredFilter> {
        let condition = prepare_condition::<T>(condition)?;
        Ok(self.lowerer().filter(&condition))
    }

    fn lowerer(&self) -> Lowerer<'_> {
        Lowerer::new(&self.format, &self.descriptor, &self.schema)
    }

    fn decode(&self, row: &FlatRow) -> CoreResult<T> {
        Ok(self.format.decode_record(row)?)
    }

    fn key_of<'r>(&self, row: &'r FlatRow) -> CoreResult<&'r Value> {
        row.get(&self.schema.key_column)
            .ok_or_else(|| CoreError::backend_fatal(format!("row without `{}`", self.schema.key_column)))
    }

    fn by_key(&self, key: Value) -> SqlExpr {
        SqlExpr::Compare {
            column: self.schema.key_column.clone(),
            op: Comparison::Eq,
            value: key,
        }
    }

    fn select(&self, filter: &SqlExpr, limit: Option<usize>, for_update: bool) -> SqlStatement {
        SqlStatement::Select {
            table: self.schema.qualified(),
            filter: filter.clone(),
            limit,
            for_update,
        }
    }

    /// Lowers a prepared condition and reports the analysis.
    fn analyze(&self, condition: &Condition) -> LoweredFilter {
        let lowered = self.lowerer().filter(condition);
        report(
            self.observer.as_ref(),
            &QueryAnalysis {
                table: self.schema.qualified(),
                condition: condition.clone(),
                requires_full_scan: lowered.requires_full_scan,
                unindexed_fields: lowered.unindexed_fields.clone(),
                fan_out: 1,
                statement: self.select(&lowered.filter, None, false).to_string(),
            },
        );
        lowered
    }

    /// Executes a statement, retrying transient failures.
    async fn run(&self, statement: &SqlStatement) -> CoreResult<SqlOutcome> {
        debug!(table = %self.schema.table, statement = %statement, "execute");
        retry_backend(&self.config.retry, statement.kind(), || self.executor.execute(statement)).await
    }

    /// Executes a statement once.
    async fn run_once(&self, statement: &SqlStatement) -> CoreResult<SqlOutcome> {
        debug!(table = %self.schema.table, statement = %statement, "execute once");
        self.executor.execute(statement).await
    }

    async fn run_in(
        &self,
        tx: &mut Box<dyn SqlTransaction>,
        statement: &SqlStatement,
    ) -> CoreResult<SqlOutcome> {
        debug!(table = %self.schema.table, statement = %statement, "execute in transaction");
        tx.execute(statement).await
    }

    /// Commits. A failed commit may or may not have applied, so it is
    /// reported as fatal and never retried.
    async fn commit(&self, tx: Box<dyn SqlTransaction>) -> CoreResult<()> {
        tx.commit().await.map_err(|err| match err {
            CoreError::BackendUnavailable { message, .. } => {
                CoreError::backend_fatal(format!("commit outcome unknown: {message}"))
            }
            other => other,
        })
    }

    /// Decodes fetched rows in key order, dropping those the residual
    /// condition rejects.
    fn matching(
        &self,
        rows: Vec<FlatRow>,
        condition: &Condition,
        lowered: &LoweredFilter,
    ) -> CoreResult<Vec<(FlatRow, T)>> {
        let mut found = BTreeMap::new();
        for row in rows {
            let key = OrderedValue(self.key_of(&row)?.clone());
            if found.contains_key(&key) {
                continue;
            }
            let record = self.decode(&row)?;
            if lowered.exact || matches_record(condition, &record)? {
                found.insert(key, (row, record));
            }
        }
        Ok(found.into_values().collect())
    }

    /// Fetches every record matching a prepared condition, in key order.
    async fn fetch(&self, condition: &Condition) -> CoreResult<Vec<T>> {
        let lowered = self.analyze(condition);
        let rows = self.run(&self.select(&lowered.filter, None, false)).await?.rows;
        Ok(self
            .matching(rows, condition, &lowered)?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    /// Streams matching records in the order the database returns them.
    /// An exact filter carries the query's window as a `LIMIT`.
    async fn stream_matches(
        &self,
        condition: Condition,
        skip: usize,
        limit: Option<usize>,
    ) -> CoreResult<BoxStream<'static, CoreResult<T>>> {
        let lowered = self.analyze(&condition);
        let pushed = limit.filter(|_| lowered.exact).map(|limit| limit.saturating_add(skip));
        let statement = self.select(&lowered.filter, pushed, false);
        debug!(table = %self.schema.table, statement = %statement, "stream");
        let rows = retry_backend(&self.config.retry, statement.kind(), || {
            self.executor.query_rows(&statement)
        })
        .await?;

        let format = self.format.clone();
        let residual = (!lowered.exact).then_some(condition);
        let records = rows
            .try_filter_map(move |row| future::ready(admit::<T>(&format, residual.as_ref(), &row)))
            .skip(skip);
        Ok(match limit {
            Some(limit) => records.take(limit).boxed(),
            None => records.boxed(),
        })
    }

    /// Selects matching rows for writing inside a transaction.
    async fn lock_matching(
        &self,
        tx: &mut Box<dyn SqlTransaction>,
        condition: &Condition,
        lowered: &LoweredFilter,
        single: bool,
    ) -> CoreResult<Vec<(FlatRow, T)>> {
        let limit = (single && lowered.exact).then_some(1);
        let rows = self
            .run_in(tx, &self.select(&lowered.filter, limit, true))
            .await?
            .rows;
        let mut matching = self.matching(rows, condition, lowered)?;
        if single {
            matching.truncate(1);
        }
        Ok(matching)
    }

    /// Writes the columns of `new` that differ from `row`, by the row's
    /// old key. Changing the key this way fails with `DuplicateKey` when
    /// the new key is taken.
    async fn write_back(&self, tx: &mut Box<dyn SqlTransaction>, row: &FlatRow, new: &T) -> CoreResult<()> {
        let key = self.key_of(row)?.clone();
        let new_row = self.format.encode_record(new)?;
        let assignments: Vec<(String, SetExpr)> = new_row
            .iter()
            .filter(|(column, value)| match row.get(column) {
                Some(stored) => !stored.same(value),
                None => !value.is_null(),
            })
            .map(|(column, value)| (column.clone(), SetExpr::Value(value.clone())))
            .collect();
        if assignments.is_empty() {
            return Ok(());
        }
        let statement = SqlStatement::Update {
            table: self.schema.qualified(),
            assignments,
            filter: self.by_key(key),
        };
        self.run_in(tx, &statement).await?;
        Ok(())
    }

    /// One attempt at updating matching records in a transaction.
    async fn update_locked(
        &self,
        condition: &Condition,
        modification: &Modification,
        lowered: &LoweredFilter,
        single: bool,
    ) -> CoreResult<Vec<(T, T)>> {
        let mut tx = self.executor.begin().await?;
        let mut changes = Vec::new();
        for (row, old) in self.lock_matching(&mut tx, condition, lowered, single).await? {
            let new = modify(modification, &old)?;
            self.write_back(&mut tx, &row, &new).await?;
            changes.push((old, new));
        }
        self.commit(tx).await?;
        Ok(changes)
    }

    /// One attempt at deleting matching records in a transaction.
    async fn delete_locked(
        &self,
        condition: &Condition,
        lowered: &LoweredFilter,
        single: bool,
    ) -> CoreResult<Vec<T>> {
        let mut tx = self.executor.begin().await?;
        let matching = self.lock_matching(&mut tx, condition, lowered, single).await?;
        if !matching.is_empty() {
            let keys = matching
                .iter()
                .map(|(row, _)| self.key_of(row).cloned())
                .collect::<CoreResult<Vec<_>>>()?;
            let filter = match <[Value; 1]>::try_from(keys) {
                Ok([key]) => self.by_key(key),
                Err(keys) => SqlExpr::In {
                    column: self.schema.key_column.clone(),
                    values: keys,
                },
            };
            let statement = SqlStatement::Delete {
                table: self.schema.qualified(),
                filter,
            };
            self.run_in(&mut tx, &statement).await?;
        }
        self.commit(tx).await?;
        Ok(matching.into_iter().map(|(_, record)| record).collect())
    }
}

/// Decodes a streamed row, keeping it if the residual condition accepts it.
fn admit<T: Entity>(format: &MapFormat, residual: Option<&Condition>, row: &FlatRow) -> CoreResult<Option<T>> {
    let record: T = format.decode_record(row)?;
    match residual {
        Some(condition) if !matches_record(condition, &record)? => Ok(None),
        _ => Ok(Some(record)),
    }
}

#[async_trait]
impl<T: Entity> Table<T> for RelationalTable<T> {
    fn name(&self) -> &str {
        &self.schema.table
    }

    async fn insert_one(&self, record: T) -> CoreResult<T> {
        let row = self.format.encode_record(&record)?;
        let key = self.key_of(&row)?.clone();
        let statement = SqlStatement::Insert {
            table: self.schema.qualified(),
            row,
        };
        self.run(&statement).await?;
        debug!(table = %self.schema.table, id = %key, "insert");
        Ok(record)
    }

    async fn find(&self, query: Query) -> CoreResult<BoxStream<'static, CoreResult<T>>> {
        let condition = prepare_condition::<T>(&query.condition)?;
        if query.order_by.is_empty() {
            return self.stream_matches(condition, query.skip, query.limit).await;
        }
        let values = self
            .fetch(&condition)
            .await?
            .into_iter()
            .map(|record| record.to_value())
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
        let lowered = self.analyze(&condition);
        let changes = retry_backend(&self.config.retry, "update", || {
            self.update_locked(&condition, &modification, &lowered, true)
        })
        .await?;
        Ok(match changes.into_iter().next() {
            Some((old, new)) => EntryChange::changed(old, new),
            None => EntryChange::none(),
        })
    }

    async fn update_many(&self, condition: Condition, modification: Modification) -> CoreResult<u64> {
        let condition = prepare_condition::<T>(&condition)?;
        let modification = prepare_modification::<T>(&modification)?;
        let lowered = self.analyze(&condition);

        let pushed = if lowered.exact && !modification.affects(T::ID_FIELD) {
            self.lowerer().assignments(&modification)
        } else {
            None
        };
        if let Some(assignments) = pushed {
            let idempotent = assignments.iter().all(|(_, set)| set.is_idempotent());
            let statement = SqlStatement::Update {
                table: self.schema.qualified(),
                assignments,
                filter: lowered.filter.clone(),
            };
            let outcome = if idempotent {
                self.run(&statement).await?
            } else {
                self.run_once(&statement).await?
            };
            debug!(table = %self.schema.table, count = outcome.affected, "update many in place");
            return Ok(outcome.affected);
        }

        let changes = retry_backend(&self.config.retry, "update", || {
            self.update_locked(&condition, &modification, &lowered, false)
        })
        .await?;
        debug!(table = %self.schema.table, count = changes.len(), "update many");
        Ok(changes.len() as u64)
    }

    async fn delete_one(&self, condition: Condition) -> CoreResult<Option<T>> {
        let condition = prepare_condition::<T>(&condition)?;
        let lowered = self.analyze(&condition);
        let removed = retry_backend(&self.config.retry, "delete", || {
            self.delete_locked(&condition, &lowered, true)
        })
        .await?;
        Ok(removed.into_iter().next())
    }

    async fn delete_many(&self, condition: Condition) -> CoreResult<u64> {
        let condition = prepare_condition::<T>(&condition)?;
        let lowered = self.analyze(&condition);
        let deleted = if lowered.exact {
            let statement = SqlStatement::Delete {
                table: self.schema.qualified(),
                filter: lowered.filter.clone(),
            };
            self.run(&statement).await?.affected
        } else {
            retry_backend(&self.config.retry, "delete", || {
                self.delete_locked(&condition, &lowered, false)
            })
            .await?
            .len() as u64
        };
        debug!(table = %self.schema.table, count = deleted, "delete many");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySqlExecutor;
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

    async fn table() -> (Arc<MemorySqlExecutor>, RelationalTable<Note>) {
        let executor = Arc::new(MemorySqlExecutor::new());
        let config = RelationalConfig::new("app").with_retry(RetryConfig::no_retry());
        let table = RelationalTable::new(executor.clone(), config, &TableOptions::new());
        table.ensure_schema().await.unwrap();
        (executor, table)
    }

    #[tokio::test]
    async fn duplicate_inserts_are_rejected_by_the_key() {
        let (executor, table) = table().await;
        table.insert_one(note("a", 1)).await.unwrap();
        let err = table.insert_one(note("a", 2)).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKey { .. }));
        assert_eq!(executor.rows("app.note").await.len(), 1);
    }

    #[tokio::test]
    async fn single_updates_lock_then_write_changed_columns() {
        let (executor, table) = table().await;
        table.insert_one(note("a", 1)).await.unwrap();
        executor.clear_log();

        let change = table
            .update_one(
                Condition::on_field("stars", Condition::GreaterThan(0.into())),
                Modification::on_field("stars", Modification::Increment(1.into())),
            )
            .await
            .unwrap();
        assert_eq!(change.new, Some(note("a", 2)));

        let executed: Vec<String> = executor.executed().iter().map(ToString::to_string).collect();
        assert_eq!(
            executed,
            vec![
                "SELECT * FROM \"app\".\"note\" WHERE \"stars\" > $1 LIMIT 1 FOR UPDATE",
                "UPDATE \"app\".\"note\" SET \"stars\" = $1 WHERE \"id\" = $2",
            ]
        );
        assert_eq!(executor.commits(), 1);
    }

    #[tokio::test]
    async fn exact_bulk_writes_are_single_statements() {
        let (executor, table) = table().await;
        table
            .insert_many(vec![note("a", 0), note("b", 3), note("c", 0)])
            .await
            .unwrap();
        executor.clear_log();

        let bumped = table
            .update_many(
                Condition::field_eq("stars", 0),
                Modification::on_field("stars", Modification::Increment(5.into())),
            )
            .await
            .unwrap();
        assert_eq!(bumped, 2);
        let removed = table
            .delete_many(Condition::on_field("stars", Condition::LessThan(4.into())))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let kinds: Vec<&str> = executor.executed().iter().map(SqlStatement::kind).collect();
        assert_eq!(kinds, vec!["update", "delete"]);
        assert_eq!(executor.commits(), 0);
        let left = collect_all(table.find(Query::all()).await.unwrap()).await.unwrap();
        assert_eq!(left, vec![note("a", 5), note("c", 5)]);
    }
}
