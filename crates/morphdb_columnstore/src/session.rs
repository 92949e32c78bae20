//! Session abstraction over a CQL driver.

use crate::statement::CqlStatement;
use async_trait::async_trait;
use morphdb_codec::FlatRow;
use morphdb_core::CoreResult;

/// Result of executing a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct CqlResult {
    /// Returned rows. For a lightweight transaction that did not apply,
    /// the current row, if any.
    pub rows: Vec<FlatRow>,
    /// False when a lightweight transaction's guard failed.
    pub applied: bool,
}

impl CqlResult {
    /// An applied result with rows.
    pub fn rows(rows: Vec<FlatRow>) -> Self {
        Self {
            rows,
            applied: true,
        }
    }

    /// An applied result without rows.
    pub fn applied() -> Self {
        Self::rows(Vec::new())
    }

    /// A lightweight transaction whose guard failed.
    pub fn not_applied(current: Option<FlatRow>) -> Self {
        Self {
            rows: current.into_iter().collect(),
            applied: false,
        }
    }
}

/// A connection to a column-family store.
///
/// Implementations wrap a driver session. They are long-lived, shared
/// across tables and called concurrently. Connection failures and timeouts
/// must be reported as `CoreError::BackendUnavailable`.
#[async_trait]
pub trait CqlSession: Send + Sync {
    /// Executes one statement.
    async fn execute(&self, statement: &CqlStatement) -> CoreResult<CqlResult>;
}
