//! Value converters: per-type scalar encodings that take precedence over
//! structural recursion.

use crate::descriptor::{short_type_name, FieldKind, PrimitiveKind};
use crate::error::{CodecError, CodecResult};
use crate::shape::Shape;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Encodes a whole field subtree as a single scalar column.
pub trait ValueConverter: Send + Sync {
    /// Storage kind of the produced column.
    fn storage_kind(&self) -> PrimitiveKind;

    /// Converts the structural value to its stored scalar. Never called
    /// with null.
    fn to_storage(&self, value: &Value) -> CodecResult<Value>;

    /// Converts a stored scalar back to the structural value. Never called
    /// with null.
    fn from_storage(&self, stored: Value) -> CodecResult<Value>;
}

/// Strategy table keyed by type identity.
///
/// Records and inline wrappers are keyed by their Rust type. Primitive
/// leaves carry no type identity, only a storage kind, so a converter
/// registered for a primitive type (`bool`, `i32`, `String`, ...) applies to
/// every leaf of that kind: registering for `i32` also converts `i64`
/// fields.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    by_type: HashMap<&'static str, Arc<dyn ValueConverter>>,
    by_primitive: HashMap<PrimitiveKind, Arc<dyn ValueConverter>>,
}

impl ConverterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a converter for `T`.
    pub fn register<T: Shape + 'static>(&mut self, converter: impl ValueConverter + 'static) {
        let converter: Arc<dyn ValueConverter> = Arc::new(converter);
        match T::kind() {
            FieldKind::Primitive(kind) => {
                self.by_primitive.insert(kind, converter);
            }
            _ => {
                self.by_type.insert(std::any::type_name::<T>(), converter);
            }
        }
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with<T: Shape + 'static>(mut self, converter: impl ValueConverter + 'static) -> Self {
        self.register::<T>(converter);
        self
    }

    /// Looks up the converter for a field kind.
    pub fn for_kind(&self, kind: &FieldKind) -> Option<&Arc<dyn ValueConverter>> {
        match kind {
            FieldKind::Primitive(primitive) => self.by_primitive.get(primitive),
            _ => kind.type_name().and_then(|name| self.by_type.get(name)),
        }
    }

    /// Number of registered converters.
    pub fn len(&self) -> usize {
        self.by_type.len() + self.by_primitive.len()
    }

    /// Returns true if no converters are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .by_type
            .keys()
            .map(|n| short_type_name(n).to_string())
            .chain(self.by_primitive.keys().map(|p| format!("{p:?}").to_lowercase()))
            .collect();
        names.sort_unstable();
        f.debug_struct("ConverterRegistry")
            .field("types", &names)
            .finish()
    }
}

/// Stores a text-valued type as its raw string.
///
/// Stored text is returned untouched on decode, so repeated round trips are
/// idempotent.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawTextConverter;

impl ValueConverter for RawTextConverter {
    fn storage_kind(&self) -> PrimitiveKind {
        PrimitiveKind::Text
    }

    fn to_storage(&self, value: &Value) -> CodecResult<Value> {
        match value {
            Value::Text(s) => Ok(Value::Text(s.clone())),
            other => Err(CodecError::conversion_failed(
                "text",
                format!("expected text, found {}", other.kind_name()),
            )),
        }
    }

    fn from_storage(&self, stored: Value) -> CodecResult<Value> {
        match stored {
            Value::Text(s) => Ok(Value::Text(s)),
            other => Err(CodecError::conversion_failed(
                "text",
                format!("expected text, found {}", other.kind_name()),
            )),
        }
    }
}

/// Stores any value subtree as one JSON text column.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl ValueConverter for JsonConverter {
    fn storage_kind(&self) -> PrimitiveKind {
        PrimitiveKind::Text
    }

    fn to_storage(&self, value: &Value) -> CodecResult<Value> {
        serde_json::to_string(value)
            .map(Value::Text)
            .map_err(|e| CodecError::conversion_failed("json", e.to_string()))
    }

    fn from_storage(&self, stored: Value) -> CodecResult<Value> {
        match stored {
            Value::Text(s) => serde_json::from_str(&s)
                .map_err(|e| CodecError::conversion_failed("json", e.to_string())),
            other => Err(CodecError::conversion_failed(
                "json",
                format!("expected text, found {}", other.kind_name()),
            )),
        }
    }
}
