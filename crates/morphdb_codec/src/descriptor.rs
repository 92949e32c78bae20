//! Type descriptors: the compile-time field structure of record types.
//!
//! A [`TypeDescriptor`] lists a record's fields in declaration order with
//! each field's [`FieldKind`]. Descriptors are produced by the
//! [`Structure`](crate::Structure) implementation of a type (usually
//! generated by the [`structure!`](crate::structure) macro) and cached for
//! the process lifetime by [`descriptor_of`].

use crate::shape::Structure;
use crate::value::Value;
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Scalar storage kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Float,
    /// UTF-8 text.
    Text,
    /// Raw bytes.
    Bytes,
}

impl PrimitiveKind {
    /// Returns true if `value` is a valid instance of this kind.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (PrimitiveKind::Bool, Value::Bool(_))
                | (PrimitiveKind::Integer, Value::Integer(_))
                | (PrimitiveKind::Float, Value::Float(_) | Value::Integer(_))
                | (PrimitiveKind::Text, Value::Text(_))
                | (PrimitiveKind::Bytes, Value::Bytes(_))
        )
    }
}

/// The structural kind of a field.
#[derive(Clone, PartialEq)]
pub enum FieldKind {
    /// A scalar leaf.
    Primitive(PrimitiveKind),
    /// A nullable value.
    Optional(Box<FieldKind>),
    /// An ordered list.
    List(Box<FieldKind>),
    /// A set (encoded as a list with unique elements).
    Set(Box<FieldKind>),
    /// A map from keys to values.
    Map(Box<FieldKind>, Box<FieldKind>),
    /// A nested record whose fields are flattened into the parent row.
    Nested(Arc<TypeDescriptor>),
    /// A single-field wrapper type. Contributes no path segment.
    Inline {
        /// Type identity of the wrapper, used for converter lookup.
        type_name: &'static str,
        /// Kind of the wrapped value.
        inner: Box<FieldKind>,
    },
}

impl FieldKind {
    /// Returns the type identity used for converter lookup, if any.
    pub fn type_name(&self) -> Option<&'static str> {
        match self {
            FieldKind::Nested(desc) => Some(desc.type_name),
            FieldKind::Inline { type_name, .. } => Some(type_name),
            _ => None,
        }
    }

    /// Returns true if null is a valid value of this kind.
    pub fn is_nullable(&self) -> bool {
        match self {
            FieldKind::Optional(_) => true,
            FieldKind::Inline { inner, .. } => inner.is_nullable(),
            _ => false,
        }
    }

    /// Returns true if this kind is a list, set or map.
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            FieldKind::List(_) | FieldKind::Set(_) | FieldKind::Map(_, _)
        )
    }

    /// Strips optional and inline layers.
    pub fn unwrapped(&self) -> &FieldKind {
        match self {
            FieldKind::Optional(inner) => inner.unwrapped(),
            FieldKind::Inline { inner, .. } => inner.unwrapped(),
            other => other,
        }
    }

    /// Resolves a field path (already split into segments) starting at this
    /// kind, descending through optionals, inline wrappers and nested records.
    ///
    /// Returns `None` if any segment does not name a field.
    pub fn resolve<'a, S: AsRef<str>>(&'a self, segments: &[S]) -> Option<&'a FieldKind> {
        let Some((head, rest)) = segments.split_first() else {
            return Some(self);
        };
        match self {
            FieldKind::Optional(inner) | FieldKind::Inline { inner, .. } => {
                inner.resolve(segments)
            }
            FieldKind::Nested(desc) => desc.field(head.as_ref())?.kind.resolve(rest),
            _ => None,
        }
    }

    /// Short human-readable name of the kind.
    pub fn describe(&self) -> String {
        match self {
            FieldKind::Primitive(p) => format!("{p:?}").to_lowercase(),
            FieldKind::Optional(inner) => format!("{}?", inner.describe()),
            FieldKind::List(inner) => format!("list<{}>", inner.describe()),
            FieldKind::Set(inner) => format!("set<{}>", inner.describe()),
            FieldKind::Map(k, v) => format!("map<{}, {}>", k.describe(), v.describe()),
            FieldKind::Nested(desc) => desc.name.to_string(),
            FieldKind::Inline { type_name, .. } => short_type_name(type_name).to_string(),
        }
    }
}

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Description of a single record field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Field name.
    pub name: &'static str,
    /// Structural kind.
    pub kind: FieldKind,
    /// Value used when the field is absent from a row.
    ///
    /// Optional fields default to null; other fields only have a default
    /// when one is declared.
    pub default: Option<Value>,
}

impl FieldDescriptor {
    /// Creates a field descriptor without a declared default.
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        let default = kind.is_nullable().then_some(Value::Null);
        Self {
            name,
            kind,
            default,
        }
    }

    /// Sets the declared default.
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Metadata for a record type: ordered fields and their kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    /// Short type name, used to derive table names.
    pub name: &'static str,
    /// Full type identity, used for converter lookup.
    pub type_name: &'static str,
    /// Fields in declaration order.
    pub fields: Vec<FieldDescriptor>,
}

impl TypeDescriptor {
    /// Creates a descriptor.
    pub fn new(name: &'static str, type_name: &'static str, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name,
            type_name,
            fields,
        }
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Resolves a dotted field path (`address.city`) to its kind.
    pub fn resolve(&self, path: &str) -> Option<&FieldKind> {
        let segments: Vec<&str> = path.split('.').collect();
        let (head, rest) = segments.split_first()?;
        self.field(head)?.kind.resolve(rest)
    }

    /// Enumerates structural leaf paths joined by `separator`.
    ///
    /// Nested records and inline wrappers are descended; primitives and
    /// collections are leaves.
    pub fn leaf_paths(&self, separator: &str) -> Vec<String> {
        let mut out = Vec::new();
        for field in &self.fields {
            collect_leaves(field.name.to_string(), &field.kind, separator, &mut out);
        }
        out
    }
}

fn collect_leaves(path: String, kind: &FieldKind, separator: &str, out: &mut Vec<String>) {
    match kind {
        FieldKind::Optional(inner) | FieldKind::Inline { inner, .. } => {
            collect_leaves(path, inner, separator, out);
        }
        FieldKind::Nested(desc) => {
            for field in &desc.fields {
                collect_leaves(
                    format!("{path}{separator}{}", field.name),
                    &field.kind,
                    separator,
                    out,
                );
            }
        }
        _ => out.push(path),
    }
}

/// Returns the last path segment of a Rust type name (`a::b::Email` -> `Email`).
pub fn short_type_name(type_name: &str) -> &str {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::").next().unwrap_or(base)
}

type DescriptorCache = RwLock<HashMap<TypeId, Arc<TypeDescriptor>>>;

fn cache() -> &'static DescriptorCache {
    static CACHE: OnceLock<DescriptorCache> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Returns the cached descriptor for `T`, building it on first use.
///
/// The cache only memoizes pure data; it is safe to rebuild lazily.
/// Self-referential record types are not supported.
pub fn descriptor_of<T: Structure + 'static>() -> Arc<TypeDescriptor> {
    let id = TypeId::of::<T>();
    if let Some(desc) = cache().read().get(&id) {
        return Arc::clone(desc);
    }

    // Built outside the lock: building may recurse into descriptor_of for
    // nested types.
    let built = Arc::new(T::type_descriptor());
    let mut guard = cache().write();
    Arc::clone(guard.entry(id).or_insert(built))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Arc<TypeDescriptor> {
        Arc::new(TypeDescriptor::new(
            "Address",
            "tests::Address",
            vec![
                FieldDescriptor::new("city", FieldKind::Primitive(PrimitiveKind::Text)),
                FieldDescriptor::new(
                    "zip",
                    FieldKind::Optional(Box::new(FieldKind::Primitive(PrimitiveKind::Text))),
                ),
            ],
        ))
    }

    fn person() -> TypeDescriptor {
        TypeDescriptor::new(
            "Person",
            "tests::Person",
            vec![
                FieldDescriptor::new("name", FieldKind::Primitive(PrimitiveKind::Text)),
                FieldDescriptor::new("home", FieldKind::Nested(address())),
                FieldDescriptor::new(
                    "email",
                    FieldKind::Inline {
                        type_name: "tests::Email",
                        inner: Box::new(FieldKind::Primitive(PrimitiveKind::Text)),
                    },
                ),
                FieldDescriptor::new(
                    "tags",
                    FieldKind::List(Box::new(FieldKind::Primitive(PrimitiveKind::Text))),
                ),
            ],
        )
    }

    #[test]
    fn leaf_paths_flatten_nested_and_skip_inline() {
        assert_eq!(
            person().leaf_paths("__"),
            vec!["name", "home__city", "home__zip", "email", "tags"]
        );
    }

    #[test]
    fn resolve_nested_path() {
        let desc = person();
        assert_eq!(
            desc.resolve("home.city"),
            Some(&FieldKind::Primitive(PrimitiveKind::Text))
        );
        assert!(desc.resolve("home.country").is_none());
        assert!(desc.resolve("name.first").is_none());
    }

    #[test]
    fn optional_fields_default_to_null() {
        let desc = address();
        assert_eq!(desc.field("zip").unwrap().default, Some(Value::Null));
        assert_eq!(desc.field("city").unwrap().default, None);
    }

    #[test]
    fn short_names() {
        assert_eq!(short_type_name("my_app::model::Email"), "Email");
        assert_eq!(short_type_name("Email"), "Email");
        assert_eq!(short_type_name("a::Wrapper<b::C>"), "Wrapper");
    }

    #[test]
    fn primitive_accepts() {
        assert!(PrimitiveKind::Float.accepts(&Value::Integer(1)));
        assert!(!PrimitiveKind::Integer.accepts(&Value::Float(1.0)));
        assert!(!PrimitiveKind::Text.accepts(&Value::Null));
    }
}
