//! Configuration for the relational adapter.

use morphdb_core::{DatabaseSettings, RetryConfig};

/// Configuration for relational tables.
#[derive(Debug, Clone)]
pub struct RelationalConfig {
    /// Schema holding the tables.
    pub schema: String,
    /// Retry policy for transient backend failures. Whole transactions are
    /// retried, not single statements inside them.
    pub retry: RetryConfig,
}

impl RelationalConfig {
    /// Creates a configuration for a schema.
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            retry: RetryConfig::default(),
        }
    }

    /// Creates a configuration from connection settings.
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        let mut config = Self::new(settings.namespace.clone());
        if let Some(attempts) = settings
            .option("max_attempts")
            .and_then(|v| v.parse().ok())
        {
            config.retry = RetryConfig::new(attempts);
        }
        config
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self::new("public")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_settings_reads_schema_and_attempts() {
        let settings = DatabaseSettings::new("billing").with_option("max_attempts", "7");
        let config = RelationalConfig::from_settings(&settings);
        assert_eq!(config.schema, "billing");
        assert_eq!(config.retry.max_attempts, 7);
    }

    #[test]
    fn default_schema_is_public() {
        assert_eq!(RelationalConfig::default().schema, "public");
    }
}
