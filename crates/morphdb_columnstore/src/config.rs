//! Configuration for the column-store adapter.

use morphdb_core::{DatabaseSettings, RetryConfig};

/// Default number of concurrent sub-queries when a disjunction fans out.
pub const DEFAULT_FAN_OUT_LIMIT: usize = 10;

/// Configuration for column-store tables.
#[derive(Debug, Clone)]
pub struct ColumnStoreConfig {
    /// Keyspace holding the tables.
    pub keyspace: String,
    /// Maximum concurrent sub-queries for a fanned-out read.
    pub fan_out_limit: usize,
    /// Retry policy for transient backend failures.
    pub retry: RetryConfig,
    /// Attempts at a conditional update before giving up on contention.
    pub update_attempts: u32,
}

impl ColumnStoreConfig {
    /// Creates a configuration for a keyspace.
    pub fn new(keyspace: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            fan_out_limit: DEFAULT_FAN_OUT_LIMIT,
            retry: RetryConfig::default(),
            update_attempts: 5,
        }
    }

    /// Creates a configuration from connection settings.
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        let mut config = Self::new(settings.namespace.clone());
        if let Some(limit) = settings
            .option("fan_out_limit")
            .and_then(|v| v.parse().ok())
        {
            config.fan_out_limit = limit;
        }
        config
    }

    /// Sets the fan-out limit.
    #[must_use]
    pub fn with_fan_out_limit(mut self, limit: usize) -> Self {
        self.fan_out_limit = limit.max(1);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the number of conditional update attempts.
    #[must_use]
    pub fn with_update_attempts(mut self, attempts: u32) -> Self {
        self.update_attempts = attempts.max(1);
        self
    }
}

impl Default for ColumnStoreConfig {
    fn default() -> Self {
        Self::new("morphdb")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ColumnStoreConfig::default();
        assert_eq!(config.fan_out_limit, 10);
        assert_eq!(config.keyspace, "morphdb");
    }

    #[test]
    fn from_settings_reads_namespace_and_limit() {
        let settings = DatabaseSettings::new("shop").with_option("fan_out_limit", "4");
        let config = ColumnStoreConfig::from_settings(&settings);
        assert_eq!(config.keyspace, "shop");
        assert_eq!(config.fan_out_limit, 4);
    }

    #[test]
    fn limits_are_at_least_one() {
        let config = ColumnStoreConfig::new("ks")
            .with_fan_out_limit(0)
            .with_update_attempts(0);
        assert_eq!(config.fan_out_limit, 1);
        assert_eq!(config.update_attempts, 1);
    }
}
