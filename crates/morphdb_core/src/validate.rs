//! Static checks of conditions and modifications against a descriptor.
//!
//! Adapters validate before lowering so that a condition naming a missing
//! field, or comparing a text column with a number, fails with
//! [`CoreError::TypeMismatch`] instead of producing a malformed statement.

use crate::condition::Condition;
use crate::error::{CoreError, CoreResult};
use crate::modification::Modification;
use morphdb_codec::{FieldKind, GeoPoint, PrimitiveKind, TypeDescriptor, Value};
use std::sync::Arc;

/// Checks a condition against a record descriptor.
///
/// # Errors
///
/// Returns [`CoreError::TypeMismatch`] naming the offending path.
pub fn validate_condition(condition: &Condition, descriptor: &Arc<TypeDescriptor>) -> CoreResult<()> {
    check_condition(condition, &FieldKind::Nested(Arc::clone(descriptor)), "")
}

/// Checks a modification against a record descriptor.
///
/// # Errors
///
/// Returns [`CoreError::TypeMismatch`] naming the offending path.
pub fn validate_modification(
    modification: &Modification,
    descriptor: &Arc<TypeDescriptor>,
) -> CoreResult<()> {
    check_modification(modification, &FieldKind::Nested(Arc::clone(descriptor)), "")
}

fn resolve<'a>(kind: &'a FieldKind, field: &str, path: &str) -> CoreResult<&'a FieldKind> {
    let segments: Vec<&str> = field.split('.').collect();
    kind.resolve(&segments)
        .ok_or_else(|| CoreError::type_mismatch(path, format!("no field `{field}` in {kind:?}")))
}

fn check_condition(condition: &Condition, kind: &FieldKind, path: &str) -> CoreResult<()> {
    match condition {
        Condition::Always | Condition::Never => Ok(()),
        Condition::Equal(v)
        | Condition::NotEqual(v)
        | Condition::GreaterThan(v)
        | Condition::GreaterThanOrEqual(v)
        | Condition::LessThan(v)
        | Condition::LessThanOrEqual(v) => check_value(v, kind, path),
        Condition::Inside(values) | Condition::NotInside(values) => {
            values.iter().try_for_each(|v| check_value(v, kind, path))
        }
        Condition::And(children) | Condition::Or(children) => children
            .iter()
            .try_for_each(|c| check_condition(c, kind, path)),
        Condition::Not(inner) | Condition::IfNotNull(inner) => check_condition(inner, kind, path),
        Condition::OnField { field, condition } => {
            let child_path = crate::condition::join(path, field);
            let child = resolve(kind, field, &child_path)?;
            check_condition(condition, child, &child_path)
        }
        Condition::GeoDistance { .. } => match kind.unwrapped() {
            FieldKind::Nested(desc) if desc.type_name == GeoPoint::type_name() => Ok(()),
            other => Err(CoreError::type_mismatch(
                path,
                format!("expected GeoPoint, found {other:?}"),
            )),
        },
        Condition::StringContains { .. } => match kind.unwrapped() {
            FieldKind::Primitive(PrimitiveKind::Text) => Ok(()),
            other => Err(CoreError::type_mismatch(path, format!("expected text, found {other:?}"))),
        },
        Condition::ListAllElements(inner) | Condition::ListAnyElements(inner) => {
            match kind.unwrapped() {
                FieldKind::List(element) | FieldKind::Set(element) => {
                    check_condition(inner, element, path)
                }
                other => Err(CoreError::type_mismatch(path, format!("expected list, found {other:?}"))),
            }
        }
        Condition::ListSizeEquals(_) => match kind.unwrapped() {
            FieldKind::List(_) | FieldKind::Set(_) => Ok(()),
            other => Err(CoreError::type_mismatch(path, format!("expected list, found {other:?}"))),
        },
        Condition::MapHasKey(key) => match kind.unwrapped() {
            FieldKind::Map(key_kind, _) => check_value(key, key_kind, path),
            other => Err(CoreError::type_mismatch(path, format!("expected map, found {other:?}"))),
        },
        Condition::OnKey { key, condition } => match kind.unwrapped() {
            FieldKind::Map(key_kind, value_kind) => {
                check_value(key, key_kind, path)?;
                check_condition(condition, value_kind, path)
            }
            other => Err(CoreError::type_mismatch(path, format!("expected map, found {other:?}"))),
        },
    }
}

fn check_modification(modification: &Modification, kind: &FieldKind, path: &str) -> CoreResult<()> {
    let expect_list = |kind: &FieldKind| match kind.unwrapped() {
        FieldKind::List(element) | FieldKind::Set(element) => Ok(element.as_ref().clone()),
        other => Err(CoreError::type_mismatch(path, format!("expected list, found {other:?}"))),
    };
    let expect_map = |kind: &FieldKind| match kind.unwrapped() {
        FieldKind::Map(k, v) => Ok((k.as_ref().clone(), v.as_ref().clone())),
        other => Err(CoreError::type_mismatch(path, format!("expected map, found {other:?}"))),
    };
    match modification {
        Modification::Assign(v) => check_value(v, kind, path),
        Modification::Increment(v) | Modification::Multiply(v) => match kind.unwrapped() {
            FieldKind::Primitive(PrimitiveKind::Integer | PrimitiveKind::Float) => {
                check_value(v, &FieldKind::Primitive(PrimitiveKind::Float), path)
            }
            other => Err(CoreError::type_mismatch(path, format!("expected number, found {other:?}"))),
        },
        Modification::CoerceAtMost(v) | Modification::CoerceAtLeast(v) => check_value(v, kind, path),
        Modification::AppendString(_) => match kind.unwrapped() {
            FieldKind::Primitive(PrimitiveKind::Text) => Ok(()),
            other => Err(CoreError::type_mismatch(path, format!("expected text, found {other:?}"))),
        },
        Modification::AppendToList(items)
        | Modification::RemoveFromList(items)
        | Modification::AppendToSet(items) => {
            let element = expect_list(kind)?;
            items.iter().try_for_each(|v| check_value(v, &element, path))
        }
        Modification::RemoveWhere(condition) => check_condition(condition, &expect_list(kind)?, path),
        Modification::CombineMap(entries) => {
            let (key_kind, value_kind) = expect_map(kind)?;
            entries.iter().try_for_each(|(k, v)| {
                check_value(k, &key_kind, path)?;
                check_value(v, &value_kind, path)
            })
        }
        Modification::RemoveKeys(keys) => {
            let (key_kind, _) = expect_map(kind)?;
            keys.iter().try_for_each(|k| check_value(k, &key_kind, path))
        }
        Modification::OnField {
            field,
            modification,
        } => {
            let child_path = crate::condition::join(path, field);
            let child = resolve(kind, field, &child_path)?;
            check_modification(modification, child, &child_path)
        }
        Modification::IfNotNull(inner) => check_modification(inner, kind, path),
        Modification::Chain(items) => items
            .iter()
            .try_for_each(|m| check_modification(m, kind, path)),
    }
}

/// Checks that a literal fits a field kind.
///
/// Null fits every kind: comparing with null is a null test, and
/// assigning null to a required field is caught by the codec on write.
fn check_value(value: &Value, kind: &FieldKind, path: &str) -> CoreResult<()> {
    if value.is_null() {
        return Ok(());
    }
    let fits = match (kind.unwrapped(), value) {
        (FieldKind::Primitive(p), v) => p.accepts(v),
        (FieldKind::List(element) | FieldKind::Set(element), Value::List(items)) => {
            return items.iter().try_for_each(|item| check_value(item, element, path));
        }
        (FieldKind::Map(k, v), Value::Map(pairs)) => {
            return pairs.iter().try_for_each(|(key, entry)| {
                check_value(key, k, path)?;
                check_value(entry, v, path)
            });
        }
        (FieldKind::Nested(desc), Value::Record(fields)) => {
            return fields.iter().try_for_each(|(name, field_value)| {
                let field = desc.field(name).ok_or_else(|| {
                    CoreError::type_mismatch(path, format!("no field `{name}` in {}", desc.name))
                })?;
                check_value(field_value, &field.kind, &crate::condition::join(path, name))
            });
        }
        _ => false,
    };
    if fits {
        Ok(())
    } else {
        Err(CoreError::type_mismatch(
            path,
            format!("expected {kind:?}, found {}", value.kind_name()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morphdb_codec::{descriptor_of, structure};
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq)]
    struct Address {
        city: String,
    }
    structure!(Address { city: String });

    #[derive(Debug, Clone, PartialEq)]
    struct Person {
        name: String,
        age: i64,
        home: Option<Address>,
        tags: Vec<String>,
        scores: BTreeMap<String, i64>,
        location: GeoPoint,
    }
    structure!(Person {
        name: String,
        age: i64,
        home: Option<Address>,
        tags: Vec<String>,
        scores: BTreeMap<String, i64>,
        location: GeoPoint,
    });

    fn mismatch_path(result: CoreResult<()>) -> String {
        match result {
            Err(CoreError::TypeMismatch { path, .. }) => path,
            other => panic!("expected type mismatch, got {other:?}"),
        }
    }

    #[test]
    fn accepts_well_typed_conditions() {
        let desc = descriptor_of::<Person>();
        let c = Condition::and([
            Condition::field_eq("name", "Ada"),
            Condition::on_field("home.city", Condition::Equal(Value::Null)),
            Condition::on_field(
                "tags",
                Condition::ListAnyElements(Box::new(Condition::Equal("x".into()))),
            ),
            Condition::on_field("scores", Condition::MapHasKey("math".into())),
            Condition::on_field("location", Condition::within_km(GeoPoint::new(0.0, 0.0), 1.0)),
            Condition::on_field("age", Condition::GreaterThan(Value::Float(1.5))),
        ]);
        validate_condition(&c, &desc).unwrap();
    }

    #[test]
    fn rejects_unknown_fields() {
        let desc = descriptor_of::<Person>();
        let c = Condition::on_field("home", Condition::field_eq("country", "NO"));
        assert_eq!(mismatch_path(validate_condition(&c, &desc)), "home.country");
    }

    #[test]
    fn rejects_wrong_literal_kind() {
        let desc = descriptor_of::<Person>();
        let c = Condition::field_eq("age", "old");
        assert_eq!(mismatch_path(validate_condition(&c, &desc)), "age");

        let c = Condition::on_field(
            "name",
            Condition::ListSizeEquals(1),
        );
        assert_eq!(mismatch_path(validate_condition(&c, &desc)), "name");
    }

    #[test]
    fn checks_modifications() {
        let desc = descriptor_of::<Person>();
        let ok = Modification::chain([
            Modification::on_field("age", Modification::Increment(1.into())),
            Modification::on_field("tags", Modification::AppendToSet(vec!["a".into()])),
            Modification::set("home", Value::Null),
        ]);
        validate_modification(&ok, &desc).unwrap();

        let bad = Modification::on_field("name", Modification::Increment(1.into()));
        assert_eq!(mismatch_path(validate_modification(&bad, &desc)), "name");

        let bad = Modification::set("home.city", 3);
        assert_eq!(mismatch_path(validate_modification(&bad, &desc)), "home.city");
    }
}
