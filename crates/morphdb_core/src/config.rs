//! Table options and the opaque connection settings boundary.

use std::collections::BTreeMap;

/// Per-table options shared by every backend.
#[derive(Debug, Clone, Default)]
pub struct TableOptions {
    /// Explicit table name. Defaults to the snake-cased record type name.
    pub table_name: Option<String>,
    /// Dotted field paths with a secondary index. The identifier field is
    /// always indexed.
    pub indexed: Vec<String>,
}

impl TableOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the table name.
    #[must_use]
    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    /// Declares an indexed field.
    #[must_use]
    pub fn with_index(mut self, field: impl Into<String>) -> Self {
        self.indexed.push(field.into());
        self
    }

    /// Table name for a record type called `type_name`.
    pub fn resolve_name(&self, type_name: &str) -> String {
        self.table_name
            .clone()
            .unwrap_or_else(|| snake_case(type_name))
    }

    /// Returns true if `field` (dotted) is indexed.
    pub fn is_indexed(&self, field: &str) -> bool {
        self.indexed.iter().any(|f| f == field)
    }
}

/// Converts `UserProfile` to `user_profile`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut previous_lower = false;
    for c in name.chars() {
        if c.is_uppercase() {
            if previous_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            previous_lower = false;
        } else {
            out.push(c);
            previous_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

/// Pre-parsed connection settings.
///
/// Connection strings and credential stores are resolved by the caller;
/// adapters only read what they need from here.
#[derive(Debug, Clone, Default)]
pub struct DatabaseSettings {
    /// Contact points or hosts.
    pub hosts: Vec<String>,
    /// Keyspace or schema.
    pub namespace: String,
    /// Username and password, if any.
    pub credentials: Option<(String, String)>,
    /// Backend-specific options such as replication factor.
    pub options: BTreeMap<String, String>,
}

impl DatabaseSettings {
    /// Settings for a namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Adds a host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.hosts.push(host.into());
        self
    }

    /// Sets credentials.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    /// Sets a backend-specific option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Reads a backend-specific option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_default_to_snake_case() {
        assert_eq!(TableOptions::new().resolve_name("UserProfile"), "user_profile");
        assert_eq!(TableOptions::new().resolve_name("Order2Item"), "order2_item");
        assert_eq!(
            TableOptions::new().with_table_name("people").resolve_name("Person"),
            "people"
        );
    }

    #[test]
    fn indexed_fields() {
        let options = TableOptions::new().with_index("email");
        assert!(options.is_indexed("email"));
        assert!(!options.is_indexed("age"));
    }

    #[test]
    fn settings_builder() {
        let settings = DatabaseSettings::new("app")
            .with_host("10.0.0.1:9042")
            .with_option("replication_factor", "3");
        assert_eq!(settings.namespace, "app");
        assert_eq!(settings.option("replication_factor"), Some("3"));
        assert_eq!(settings.option("missing"), None);
    }
}
