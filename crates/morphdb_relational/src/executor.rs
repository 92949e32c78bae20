//! Executor abstraction over a SQL driver.

use crate::statement::SqlStatement;
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use morphdb_codec::FlatRow;
use morphdb_core::CoreResult;

/// Result of executing a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlOutcome {
    /// Rows returned by a `SELECT`.
    pub rows: Vec<FlatRow>,
    /// Rows inserted, updated or deleted.
    pub affected: u64,
}

impl SqlOutcome {
    /// Outcome of a query.
    pub fn rows(rows: Vec<FlatRow>) -> Self {
        Self { rows, affected: 0 }
    }

    /// Outcome of a write.
    pub fn affected(affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            affected,
        }
    }
}

/// A connection pool to a relational store.
///
/// Implementations wrap a driver pool. They are long-lived, shared across
/// tables and called concurrently. Connection failures and timeouts must
/// be reported as `CoreError::BackendUnavailable`, and unique-key
/// violations as `CoreError::DuplicateKey`.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Executes one statement in its own implicit transaction.
    async fn execute(&self, statement: &SqlStatement) -> CoreResult<SqlOutcome>;

    /// Runs a query and streams its rows. Errors opening the query are
    /// returned directly; errors while reading arrive in the stream.
    ///
    /// The default buffers the rows of [`execute`](Self::execute). Drivers
    /// with row streams or cursors yield rows as they arrive.
    async fn query_rows(&self, statement: &SqlStatement) -> CoreResult<BoxStream<'static, CoreResult<FlatRow>>> {
        let rows = self.execute(statement).await?.rows;
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    /// Opens a transaction.
    async fn begin(&self) -> CoreResult<Box<dyn SqlTransaction>>;
}

/// An open transaction. Dropping it without committing rolls it back.
#[async_trait]
pub trait SqlTransaction: Send {
    /// Executes one statement inside the transaction.
    async fn execute(&mut self, statement: &SqlStatement) -> CoreResult<SqlOutcome>;

    /// Commits. When this fails with a connection error the outcome is
    /// unknown.
    async fn commit(self: Box<Self>) -> CoreResult<()>;

    /// Rolls back.
    async fn rollback(self: Box<Self>) -> CoreResult<()>;
}
