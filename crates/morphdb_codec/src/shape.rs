//! Compile-time shape traits.
//!
//! [`Shape`] describes how a Rust type maps onto a [`FieldKind`] and a
//! [`Value`] tree. [`Structure`] marks record types that own a
//! [`TypeDescriptor`]. Record types normally implement both through the
//! [`structure!`](crate::structure) macro; single-field wrappers use
//! [`inline_shape!`](crate::inline_shape).

use crate::descriptor::{FieldKind, PrimitiveKind, TypeDescriptor};
use crate::error::{CodecError, CodecResult};
use crate::value::{OrderedValue, Value};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// A type with a statically known field structure.
pub trait Shape: Sized {
    /// Structural kind of this type.
    fn kind() -> FieldKind;

    /// Converts to a value tree.
    fn to_value(&self) -> Value;

    /// Rebuilds from a value tree.
    fn from_value(value: Value) -> CodecResult<Self>;

    /// Value to use when the field is absent. `Option` uses `None`.
    fn absent() -> Option<Self> {
        None
    }
}

/// A record type with a descriptor.
pub trait Structure: Shape + 'static {
    /// Builds this type's descriptor. Prefer [`crate::descriptor_of`],
    /// which caches the result.
    fn type_descriptor() -> TypeDescriptor;
}

fn mismatch<T>(expected: &str, value: &Value) -> CodecResult<T> {
    Err(CodecError::unexpected("", expected, value.kind_name()))
}

impl Shape for bool {
    fn kind() -> FieldKind {
        FieldKind::Primitive(PrimitiveKind::Bool)
    }

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> CodecResult<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            other => mismatch("bool", &other),
        }
    }
}

macro_rules! integer_shape {
    ($($ty:ty),*) => {
        $(
            impl Shape for $ty {
                fn kind() -> FieldKind {
                    FieldKind::Primitive(PrimitiveKind::Integer)
                }

                fn to_value(&self) -> Value {
                    Value::Integer(i64::from(*self))
                }

                fn from_value(value: Value) -> CodecResult<Self> {
                    match value {
                        Value::Integer(n) => <$ty>::try_from(n).map_err(|_| {
                            CodecError::unexpected("", stringify!($ty), format!("integer {n}"))
                        }),
                        other => mismatch("integer", &other),
                    }
                }
            }
        )*
    };
}

integer_shape!(i8, i16, i32, i64, u8, u16, u32);

impl Shape for f64 {
    fn kind() -> FieldKind {
        FieldKind::Primitive(PrimitiveKind::Float)
    }

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> CodecResult<Self> {
        match value {
            Value::Float(x) => Ok(x),
            #[allow(clippy::cast_precision_loss)]
            Value::Integer(n) => Ok(n as f64),
            other => mismatch("float", &other),
        }
    }
}

impl Shape for String {
    fn kind() -> FieldKind {
        FieldKind::Primitive(PrimitiveKind::Text)
    }

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> CodecResult<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => mismatch("text", &other),
        }
    }
}

impl Shape for Uuid {
    fn kind() -> FieldKind {
        FieldKind::Inline {
            type_name: std::any::type_name::<Uuid>(),
            inner: Box::new(FieldKind::Primitive(PrimitiveKind::Text)),
        }
    }

    fn to_value(&self) -> Value {
        Value::Text(self.hyphenated().to_string())
    }

    fn from_value(value: Value) -> CodecResult<Self> {
        match value {
            Value::Text(s) => Uuid::parse_str(&s)
                .map_err(|e| CodecError::conversion_failed("Uuid", e.to_string())),
            other => mismatch("uuid text", &other),
        }
    }
}

impl<T: Shape> Shape for Option<T> {
    fn kind() -> FieldKind {
        FieldKind::Optional(Box::new(T::kind()))
    }

    fn to_value(&self) -> Value {
        match self {
            Some(inner) => inner.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> CodecResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }

    fn absent() -> Option<Self> {
        Some(None)
    }
}

impl<T: Shape> Shape for Vec<T> {
    fn kind() -> FieldKind {
        FieldKind::List(Box::new(T::kind()))
    }

    fn to_value(&self) -> Value {
        Value::List(self.iter().map(Shape::to_value).collect())
    }

    fn from_value(value: Value) -> CodecResult<Self> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => mismatch("list", &other),
        }
    }
}

impl<T: Shape + Ord> Shape for BTreeSet<T> {
    fn kind() -> FieldKind {
        FieldKind::Set(Box::new(T::kind()))
    }

    fn to_value(&self) -> Value {
        Value::List(self.iter().map(Shape::to_value).collect())
    }

    fn from_value(value: Value) -> CodecResult<Self> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => mismatch("set", &other),
        }
    }
}

impl<K: Shape + Ord, V: Shape> Shape for BTreeMap<K, V> {
    fn kind() -> FieldKind {
        FieldKind::Map(Box::new(K::kind()), Box::new(V::kind()))
    }

    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(k, v)| (k.to_value(), v.to_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> CodecResult<Self> {
        match value {
            Value::Map(pairs) => pairs
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            other => mismatch("map", &other),
        }
    }
}

/// Field-by-field reader over a record value, used by generated
/// [`Shape::from_value`] implementations.
pub struct RecordFields {
    type_name: &'static str,
    fields: BTreeMap<String, Value>,
}

impl RecordFields {
    /// Opens a record value.
    pub fn new(type_name: &'static str, value: Value) -> CodecResult<Self> {
        match value {
            Value::Record(fields) => Ok(Self {
                type_name,
                fields: fields.into_iter().collect(),
            }),
            other => Err(CodecError::unexpected(
                type_name,
                "record",
                other.kind_name(),
            )),
        }
    }

    /// Takes a field, falling back to `default` and then to the type's
    /// absent value. Nulls in non-nullable fields count as absent.
    pub fn take<T: Shape>(&mut self, name: &str, default: Option<T>) -> CodecResult<T> {
        let nullable = T::kind().is_nullable();
        match self.fields.remove(name) {
            Some(Value::Null) if !nullable => {}
            Some(value) => {
                return T::from_value(value).map_err(|err| self.at(name, err));
            }
            None => {}
        }
        default
            .or_else(T::absent)
            .ok_or_else(|| CodecError::missing_field(format!("{}.{name}", self.type_name)))
    }

    fn at(&self, name: &str, err: CodecError) -> CodecError {
        match err {
            CodecError::UnexpectedValue {
                path,
                expected,
                found,
            } => CodecError::UnexpectedValue {
                path: if path.is_empty() {
                    format!("{}.{name}", self.type_name)
                } else {
                    format!("{}.{name}.{path}", self.type_name)
                },
                expected,
                found,
            },
            other => other,
        }
    }
}

/// Collects set elements keyed by value order, rejecting nothing.
pub fn dedup_values(values: Vec<Value>) -> Vec<Value> {
    let set: BTreeSet<OrderedValue> = values.into_iter().map(OrderedValue).collect();
    set.into_iter().map(|v| v.0).collect()
}

/// Implements [`Shape`] and [`Structure`] for a record struct.
///
/// Fields may declare a default used when the column is absent:
///
/// ```
/// use morphdb_codec::{structure, MapFormat, Shape};
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct User {
///     name: String,
///     age: i64,
///     nickname: Option<String>,
/// }
///
/// structure!(User {
///     name: String,
///     age: i64 = 0,
///     nickname: Option<String>,
/// });
///
/// let user = User { name: "Ada".into(), age: 36, nickname: None };
/// let format = MapFormat::soa();
/// let row = format.encode_record(&user).unwrap();
/// assert_eq!(format.decode_record::<User>(&row).unwrap(), user);
/// ```
#[macro_export]
macro_rules! structure {
    (@default $fty:ty) => { None::<$fty> };
    (@default $fty:ty, $default:expr) => { Some::<$fty>($default) };
    (@field $field:ident, $fty:ty) => {
        $crate::FieldDescriptor::new(stringify!($field), <$fty as $crate::Shape>::kind())
    };
    (@field $field:ident, $fty:ty, $default:expr) => {
        $crate::FieldDescriptor::new(stringify!($field), <$fty as $crate::Shape>::kind())
            .with_default($crate::Shape::to_value(&{
                let default: $fty = $default;
                default
            }))
    };
    ($ty:ident { $( $field:ident : $fty:ty $( = $default:expr )? ),* $(,)? }) => {
        impl $crate::Shape for $ty {
            fn kind() -> $crate::FieldKind {
                $crate::FieldKind::Nested($crate::descriptor_of::<$ty>())
            }

            fn to_value(&self) -> $crate::Value {
                $crate::Value::Record(vec![
                    $( (stringify!($field).to_string(), $crate::Shape::to_value(&self.$field)), )*
                ])
            }

            fn from_value(value: $crate::Value) -> $crate::CodecResult<Self> {
                #[allow(unused_mut)]
                let mut fields = $crate::RecordFields::new(stringify!($ty), value)?;
                Ok(Self {
                    $( $field: fields.take::<$fty>(
                        stringify!($field),
                        $crate::structure!(@default $fty $(, $default)?),
                    )?, )*
                })
            }
        }

        impl $crate::Structure for $ty {
            fn type_descriptor() -> $crate::TypeDescriptor {
                $crate::TypeDescriptor::new(
                    stringify!($ty),
                    ::std::any::type_name::<$ty>(),
                    vec![
                        $( $crate::structure!(@field $field, $fty $(, $default)?), )*
                    ],
                )
            }
        }
    };
}

/// Implements [`Shape`] for a single-field tuple struct. The wrapper is
/// transparent in rows: it contributes no path segment of its own.
#[macro_export]
macro_rules! inline_shape {
    ($ty:ident($inner:ty)) => {
        impl $crate::Shape for $ty {
            fn kind() -> $crate::FieldKind {
                $crate::FieldKind::Inline {
                    type_name: ::std::any::type_name::<$ty>(),
                    inner: Box::new(<$inner as $crate::Shape>::kind()),
                }
            }

            fn to_value(&self) -> $crate::Value {
                $crate::Shape::to_value(&self.0)
            }

            fn from_value(value: $crate::Value) -> $crate::CodecResult<Self> {
                <$inner as $crate::Shape>::from_value(value).map(Self)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor_of;

    #[derive(Debug, Clone, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
        label: Option<String>,
    }

    structure!(Point {
        x: i64,
        y: i64 = 7,
        label: Option<String>,
    });

    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
    struct Tag(String);

    inline_shape!(Tag(String));

    #[test]
    fn structure_to_value_and_back() {
        let p = Point {
            x: 1,
            y: 2,
            label: Some("a".into()),
        };
        let value = p.to_value();
        assert_eq!(value.get("x"), Some(&Value::Integer(1)));
        assert_eq!(Point::from_value(value).unwrap(), p);
    }

    #[test]
    fn declared_defaults_fill_absent_fields() {
        let value = Value::record(vec![("x", Value::Integer(3))]);
        let p = Point::from_value(value).unwrap();
        assert_eq!(p.y, 7);
        assert_eq!(p.label, None);
    }

    #[test]
    fn missing_required_field_fails() {
        let value = Value::record(vec![("y", Value::Integer(3))]);
        let err = Point::from_value(value).unwrap_err();
        assert_eq!(err, CodecError::missing_field("Point.x"));
    }

    #[test]
    fn descriptor_carries_defaults() {
        let desc = descriptor_of::<Point>();
        assert_eq!(desc.name, "Point");
        assert_eq!(desc.field("y").unwrap().default, Some(Value::Integer(7)));
        assert_eq!(desc.field("label").unwrap().default, Some(Value::Null));
        assert_eq!(desc.field("x").unwrap().default, None);
    }

    #[test]
    fn descriptor_is_cached() {
        let a = descriptor_of::<Point>();
        let b = descriptor_of::<Point>();
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn inline_is_transparent() {
        let tag = Tag("rust".into());
        assert_eq!(tag.to_value(), Value::Text("rust".into()));
        assert!(matches!(Tag::kind(), FieldKind::Inline { .. }));
        assert_eq!(Tag::from_value(Value::Text("x".into())).unwrap(), Tag("x".into()));
    }

    #[test]
    fn integer_range_is_checked() {
        assert!(u8::from_value(Value::Integer(300)).is_err());
        assert_eq!(i32::from_value(Value::Integer(-5)).unwrap(), -5);
    }

    #[test]
    fn uuid_roundtrip() {
        let id = Uuid::new_v4();
        assert_eq!(Uuid::from_value(id.to_value()).unwrap(), id);
        assert!(Uuid::from_value(Value::Text("nope".into())).is_err());
    }

    #[test]
    fn dedup_sorts_and_removes_duplicates() {
        let values = vec![Value::Integer(2), Value::Integer(1), Value::Integer(2)];
        assert_eq!(
            dedup_values(values),
            vec![Value::Integer(1), Value::Integer(2)]
        );
    }
}
