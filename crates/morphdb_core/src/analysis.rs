//! Query analysis hook.
//!
//! Adapters describe every read before executing it. Queries that cannot be
//! served from an index are logged as full scans and handed to the
//! configured [`QueryObserver`], so callers can assert on them in tests or
//! export them.

use crate::condition::Condition;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// How an adapter plans to execute a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryAnalysis {
    /// Table name.
    pub table: String,
    /// Normalized condition.
    pub condition: Condition,
    /// True when no index can serve the query.
    pub requires_full_scan: bool,
    /// Referenced fields without an index.
    pub unindexed_fields: Vec<String>,
    /// Number of backend statements issued for the query.
    pub fan_out: usize,
    /// Rendered statement, or the first one when fanned out.
    pub statement: String,
}

/// Receives query analyses before execution.
pub trait QueryObserver: Send + Sync {
    /// Called once per query, before any statement runs.
    fn observe(&self, analysis: &QueryAnalysis);
}

/// Observer that discards analyses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl QueryObserver for NoopObserver {
    fn observe(&self, _analysis: &QueryAnalysis) {}
}

/// Observer that records every analysis.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    seen: Mutex<Vec<QueryAnalysis>>,
}

impl CollectingObserver {
    /// Creates an empty observer.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Analyses observed so far.
    pub fn analyses(&self) -> Vec<QueryAnalysis> {
        self.seen.lock().clone()
    }

    /// Analyses flagged as full scans.
    pub fn full_scans(&self) -> Vec<QueryAnalysis> {
        self.seen
            .lock()
            .iter()
            .filter(|a| a.requires_full_scan)
            .cloned()
            .collect()
    }

    /// Forgets recorded analyses.
    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

impl QueryObserver for CollectingObserver {
    fn observe(&self, analysis: &QueryAnalysis) {
        self.seen.lock().push(analysis.clone());
    }
}

/// Logs a full-scan warning if needed, then notifies the observer.
pub fn report(observer: &dyn QueryObserver, analysis: &QueryAnalysis) {
    if analysis.requires_full_scan {
        warn!(
            table = %analysis.table,
            fields = ?analysis.unindexed_fields,
            condition = %analysis.condition,
            "query requires full scan"
        );
    }
    observer.observe(analysis);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(full_scan: bool) -> QueryAnalysis {
        QueryAnalysis {
            table: "users".into(),
            condition: Condition::field_eq("age", 3),
            requires_full_scan: full_scan,
            unindexed_fields: vec!["age".into()],
            fan_out: 1,
            statement: "SELECT * FROM users WHERE age = ?".into(),
        }
    }

    #[test]
    fn collects_and_filters_full_scans() {
        let observer = CollectingObserver::new();
        report(observer.as_ref(), &analysis(true));
        report(observer.as_ref(), &analysis(false));

        assert_eq!(observer.analyses().len(), 2);
        assert_eq!(observer.full_scans().len(), 1);

        observer.clear();
        assert!(observer.analyses().is_empty());
    }
}
