//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding records.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// A required field had no value in the row and declares no default.
    #[error("missing field: {path}")]
    MissingField {
        /// Leaf path of the missing field.
        path: String,
    },

    /// A value did not have the shape the descriptor declares.
    #[error("unexpected value at {path}: expected {expected}, found {found}")]
    UnexpectedValue {
        /// Path where the mismatch occurred.
        path: String,
        /// Expected kind.
        expected: String,
        /// Kind actually found.
        found: String,
    },

    /// SOA arrays contributed by one collection disagree in length.
    #[error("array length mismatch at {path}: expected {expected}, found {found}")]
    ArrayLengthMismatch {
        /// Column path of the offending array.
        path: String,
        /// Length of the first leaf array.
        expected: usize,
        /// Length of this array.
        found: usize,
    },

    /// A value converter rejected a value.
    #[error("conversion failed for {type_name}: {message}")]
    ConversionFailed {
        /// The converted type.
        type_name: String,
        /// Description of the failure.
        message: String,
    },
}

impl CodecError {
    /// Creates a missing field error.
    pub fn missing_field(path: impl Into<String>) -> Self {
        Self::MissingField { path: path.into() }
    }

    /// Creates an unexpected value error.
    pub fn unexpected(
        path: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::UnexpectedValue {
            path: path.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates a conversion failed error.
    pub fn conversion_failed(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConversionFailed {
            type_name: type_name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CodecError::missing_field("address__city");
        assert_eq!(err.to_string(), "missing field: address__city");

        let err = CodecError::unexpected("age", "integer", "text");
        assert!(err.to_string().contains("expected integer"));
    }
}
