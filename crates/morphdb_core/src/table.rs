//! The backend-neutral table contract.

use crate::condition::Condition;
use crate::entity::{Entity, EntryChange};
use crate::error::CoreResult;
use crate::eval::{apply, evaluate};
use crate::modification::Modification;
use crate::normalize::{normalize, normalize_modification};
use crate::query::Query;
use crate::validate::{validate_condition, validate_modification};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use morphdb_codec::{descriptor_of, Shape};

/// Asynchronous access to the records of one type in one backend table.
///
/// Every implementation normalizes and validates conditions and
/// modifications before lowering them, so all backends agree on
/// semantics.
#[async_trait]
pub trait Table<T: Entity>: Send + Sync {
    /// Backend table name.
    fn name(&self) -> &str;

    /// Inserts a record. Fails with `DuplicateKey` if the identifier exists.
    async fn insert_one(&self, record: T) -> CoreResult<T>;

    /// Inserts records one by one, stopping at the first failure.
    async fn insert_many(&self, records: Vec<T>) -> CoreResult<Vec<T>> {
        let mut inserted = Vec::with_capacity(records.len());
        for record in records {
            inserted.push(self.insert_one(record).await?);
        }
        Ok(inserted)
    }

    /// Streams the records matching a query. Without an ordering, records
    /// arrive in the order the backend produces them.
    async fn find(&self, query: Query) -> CoreResult<BoxStream<'static, CoreResult<T>>>;

    /// The first record matching a condition.
    async fn find_one(&self, condition: Condition) -> CoreResult<Option<T>> {
        let mut records = self.find(Query::new(condition).limit(1)).await?;
        records.next().await.transpose()
    }

    /// Number of records matching a condition.
    async fn count(&self, condition: Condition) -> CoreResult<u64> {
        let records = self.find(Query::new(condition)).await?;
        let all: Vec<T> = records.try_collect().await?;
        Ok(all.len() as u64)
    }

    /// Applies a modification to one matching record.
    async fn update_one(
        &self,
        condition: Condition,
        modification: Modification,
    ) -> CoreResult<EntryChange<T>>;

    /// Applies a modification to every matching record, returning how many
    /// changed.
    async fn update_many(&self, condition: Condition, modification: Modification) -> CoreResult<u64>;

    /// Updates one matching record, or inserts `default` unchanged when
    /// nothing matches.
    async fn upsert_one(
        &self,
        condition: Condition,
        modification: Modification,
        default: T,
    ) -> CoreResult<EntryChange<T>> {
        let change = self.update_one(condition, modification).await?;
        if change.matched() {
            return Ok(change);
        }
        let inserted = self.insert_one(default).await?;
        Ok(EntryChange {
            old: None,
            new: Some(inserted),
        })
    }

    /// Deletes one matching record and returns it.
    async fn delete_one(&self, condition: Condition) -> CoreResult<Option<T>>;

    /// Deletes every matching record, returning how many were removed.
    async fn delete_many(&self, condition: Condition) -> CoreResult<u64>;
}

/// Drains a record stream into a vector.
///
/// # Errors
///
/// Returns the first error produced by the stream.
pub async fn collect_all<T>(records: BoxStream<'static, CoreResult<T>>) -> CoreResult<Vec<T>> {
    records.try_collect().await
}

/// Normalizes a condition and validates it against `T`.
///
/// # Errors
///
/// Returns `TypeMismatch` for conditions that do not fit `T`.
pub fn prepare_condition<T: Entity>(condition: &Condition) -> CoreResult<Condition> {
    let normalized = normalize(condition);
    validate_condition(&normalized, &descriptor_of::<T>())?;
    Ok(normalized)
}

/// Normalizes a modification and validates it against `T`.
///
/// # Errors
///
/// Returns `TypeMismatch` for modifications that do not fit `T`.
pub fn prepare_modification<T: Entity>(modification: &Modification) -> CoreResult<Modification> {
    let normalized = normalize_modification(modification);
    validate_modification(&normalized, &descriptor_of::<T>())?;
    Ok(normalized)
}

/// Evaluates a condition against a record.
///
/// # Errors
///
/// Returns `TypeMismatch` when the condition does not fit the record.
pub fn matches_record<T: Entity>(condition: &Condition, record: &T) -> CoreResult<bool> {
    evaluate(condition, &record.to_value())
}

/// Applies a modification to a record and rebuilds it.
///
/// # Errors
///
/// Returns `TypeMismatch` when the modification does not fit, or a codec
/// error when the result is not a valid `T`.
pub fn modify<T: Entity>(modification: &Modification, record: &T) -> CoreResult<T> {
    let updated = apply(modification, &record.to_value())?;
    Ok(T::from_value(updated)?)
}
