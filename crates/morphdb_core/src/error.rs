//! Error types for MorphDB core.

use morphdb_codec::CodecError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in table operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A condition or modification was applied to an incompatible field.
    ///
    /// This is a programmer error and is never retried.
    #[error("type mismatch at {path}: {message}")]
    TypeMismatch {
        /// Dotted field path where the mismatch occurred (empty for the root).
        path: String,
        /// Description of the mismatch.
        message: String,
    },

    /// Encoding or decoding a record failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A conditional insert found an existing row with the same key.
    #[error("duplicate key {key} in table {table}")]
    DuplicateKey {
        /// Table name.
        table: String,
        /// Rendered key value.
        key: String,
    },

    /// The backend could not be reached or did not complete the operation.
    #[error("backend unavailable: {message}")]
    BackendUnavailable {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The query cannot be expressed against this backend.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a type mismatch error.
    pub fn type_mismatch(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a duplicate key error.
    pub fn duplicate_key(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self::DuplicateKey {
            table: table.into(),
            key: key.into(),
        }
    }

    /// Creates a retryable backend error (timeouts, lost connections).
    pub fn backend_retryable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable backend error.
    pub fn backend_fatal(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::BackendUnavailable { retryable: true, .. })
    }

    /// Prefixes the path of a type mismatch with a parent field.
    #[must_use]
    pub fn within(self, parent: &str) -> Self {
        match self {
            CoreError::TypeMismatch { path, message } => CoreError::TypeMismatch {
                path: if path.is_empty() {
                    parent.to_string()
                } else {
                    format!("{parent}.{path}")
                },
                message,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(CoreError::backend_retryable("timeout").is_retryable());
        assert!(!CoreError::backend_fatal("syntax error").is_retryable());
        assert!(!CoreError::duplicate_key("users", "1").is_retryable());
        assert!(!CoreError::type_mismatch("age", "expected integer").is_retryable());
    }

    #[test]
    fn error_display() {
        let err = CoreError::duplicate_key("users", "'ada'");
        assert_eq!(err.to_string(), "duplicate key 'ada' in table users");

        let err: CoreError = CodecError::missing_field("name").into();
        assert_eq!(err.to_string(), "codec error: missing field: name");
    }

    #[test]
    fn within_prefixes_paths() {
        let err = CoreError::type_mismatch("city", "expected text").within("home");
        assert!(matches!(err, CoreError::TypeMismatch { ref path, .. } if path == "home.city"));

        let err = CoreError::type_mismatch("", "expected text").within("name");
        assert!(matches!(err, CoreError::TypeMismatch { ref path, .. } if path == "name"));
    }
}
