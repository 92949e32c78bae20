//! Client-side evaluation of conditions and modifications.
//!
//! Both functions are pure: they perform no I/O and never mutate their
//! inputs. Backends that cannot express a condition natively fall back to
//! [`evaluate`] after fetching candidate rows.

use crate::condition::Condition;
use crate::error::{CoreError, CoreResult};
use crate::geo::{haversine_km, point_of};
use crate::modification::Modification;
use morphdb_codec::Value;
use std::cmp::Ordering;

/// Evaluates a condition against a value.
///
/// # Errors
///
/// Returns [`CoreError::TypeMismatch`] if the condition does not fit the
/// value's shape, for example an `OnField` naming a field the record does
/// not have, or an ordering comparison between text and a number.
pub fn evaluate(condition: &Condition, value: &Value) -> CoreResult<bool> {
    match condition {
        Condition::Always => Ok(true),
        Condition::Never => Ok(false),
        Condition::Equal(operand) => compare(value, operand).map(Ordering::is_eq),
        Condition::NotEqual(operand) => compare(value, operand).map(Ordering::is_ne),
        Condition::GreaterThan(operand) => compare(value, operand).map(Ordering::is_gt),
        Condition::GreaterThanOrEqual(operand) => compare(value, operand).map(Ordering::is_ge),
        Condition::LessThan(operand) => compare(value, operand).map(Ordering::is_lt),
        Condition::LessThanOrEqual(operand) => compare(value, operand).map(Ordering::is_le),
        Condition::Inside(operands) => inside(value, operands),
        Condition::NotInside(operands) => inside(value, operands).map(|found| !found),
        Condition::And(children) => {
            for child in children {
                if !evaluate(child, value)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::Or(children) => {
            for child in children {
                if evaluate(child, value)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Condition::Not(inner) => evaluate(inner, value).map(|matched| !matched),
        Condition::OnField { field, condition } => {
            let field_value = resolve_field(value, field)?;
            evaluate(condition, field_value).map_err(|err| err.within(field))
        }
        Condition::GeoDistance {
            center,
            greater_than_km,
            less_than_km,
        } => {
            if value.is_null() {
                return Ok(false);
            }
            let point = point_of(value)?;
            let distance = haversine_km(center, &point);
            Ok(distance > *greater_than_km && distance < *less_than_km)
        }
        Condition::StringContains {
            value: needle,
            ignore_case,
        } => match value {
            Value::Null => Ok(false),
            Value::Text(haystack) if *ignore_case => {
                Ok(haystack.to_lowercase().contains(&needle.to_lowercase()))
            }
            Value::Text(haystack) => Ok(haystack.contains(needle.as_str())),
            other => Err(mismatch("text", other)),
        },
        Condition::ListAllElements(inner) => {
            for item in list_items(value)? {
                if !evaluate(inner, item)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::ListAnyElements(inner) => {
            for item in list_items(value)? {
                if evaluate(inner, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Condition::ListSizeEquals(size) => Ok(list_items(value)?.len() == *size),
        Condition::MapHasKey(key) => match value {
            Value::Null => Ok(false),
            Value::Map(_) => Ok(value.get_key(key).is_some()),
            other => Err(mismatch("map", other)),
        },
        Condition::OnKey { key, condition } => match value {
            Value::Null => Ok(false),
            Value::Map(_) => match value.get_key(key) {
                Some(entry) => evaluate(condition, entry),
                None => Ok(false),
            },
            other => Err(mismatch("map", other)),
        },
        Condition::IfNotNull(inner) => {
            if value.is_null() {
                Ok(false)
            } else {
                evaluate(inner, value)
            }
        }
    }
}

/// Applies a modification, returning the new value.
///
/// # Errors
///
/// Returns [`CoreError::TypeMismatch`] if the modification does not fit
/// the value's shape, or if integer arithmetic overflows.
pub fn apply(modification: &Modification, value: &Value) -> CoreResult<Value> {
    match modification {
        Modification::Assign(v) => Ok(v.clone()),
        Modification::Increment(delta) => {
            arithmetic(value, delta, "increment", i64::checked_add, |a, b| a + b)
        }
        Modification::Multiply(factor) => {
            arithmetic(value, factor, "multiply", i64::checked_mul, |a, b| a * b)
        }
        Modification::CoerceAtMost(bound) => Ok(if compare(value, bound)?.is_gt() {
            bound.clone()
        } else {
            value.clone()
        }),
        Modification::CoerceAtLeast(bound) => Ok(if compare(value, bound)?.is_lt() {
            bound.clone()
        } else {
            value.clone()
        }),
        Modification::AppendString(suffix) => match value {
            Value::Text(s) => Ok(Value::Text(format!("{s}{suffix}"))),
            other => Err(mismatch("text", other)),
        },
        Modification::AppendToList(items) => {
            let mut list = owned_list(value)?;
            list.extend(items.iter().cloned());
            Ok(Value::List(list))
        }
        Modification::RemoveFromList(items) => {
            let mut list = owned_list(value)?;
            list.retain(|element| !items.iter().any(|item| item.same(element)));
            Ok(Value::List(list))
        }
        Modification::RemoveWhere(condition) => {
            let list = owned_list(value)?;
            let mut kept = Vec::with_capacity(list.len());
            for element in list {
                if !evaluate(condition, &element)? {
                    kept.push(element);
                }
            }
            Ok(Value::List(kept))
        }
        Modification::AppendToSet(items) => {
            let mut list = owned_list(value)?;
            for item in items {
                if !list.iter().any(|element| element.same(item)) {
                    list.push(item.clone());
                }
            }
            Ok(Value::List(list))
        }
        Modification::CombineMap(entries) => {
            let mut pairs = owned_map(value)?;
            for (key, entry) in entries {
                let existing = pairs.iter().position(|(k, _)| k.same(key));
                match existing {
                    Some(i) => pairs[i].1 = entry.clone(),
                    None => pairs.push((key.clone(), entry.clone())),
                }
            }
            Ok(Value::Map(pairs))
        }
        Modification::RemoveKeys(keys) => {
            let mut pairs = owned_map(value)?;
            pairs.retain(|(k, _)| !keys.iter().any(|key| key.same(k)));
            Ok(Value::Map(pairs))
        }
        Modification::OnField {
            field,
            modification,
        } => {
            let mut out = value.clone();
            let slot = resolve_field_mut(&mut out, field)?;
            let updated = apply(modification, slot).map_err(|err| err.within(field))?;
            *slot = updated;
            Ok(out)
        }
        Modification::IfNotNull(inner) => {
            if value.is_null() {
                Ok(Value::Null)
            } else {
                apply(inner, value)
            }
        }
        Modification::Chain(items) => {
            let mut current = value.clone();
            for item in items {
                current = apply(item, &current)?;
            }
            Ok(current)
        }
    }
}

/// Resolves a dotted field path inside a record value.
///
/// A null record on the way yields null for every field below it, matching
/// how flattened backends store absent nested records.
///
/// # Errors
///
/// Returns a type mismatch if a segment does not name a field.
pub fn resolve_field<'a>(value: &'a Value, path: &str) -> CoreResult<&'a Value> {
    static NULL: Value = Value::Null;
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Null => return Ok(&NULL),
            Value::Record(_) => current
                .get(segment)
                .ok_or_else(|| CoreError::type_mismatch(path, format!("no field `{segment}`")))?,
            other => {
                return Err(CoreError::type_mismatch(
                    path,
                    format!("expected record, found {}", other.kind_name()),
                ))
            }
        };
    }
    Ok(current)
}

fn resolve_field_mut<'a>(value: &'a mut Value, path: &str) -> CoreResult<&'a mut Value> {
    let mut current = value;
    for segment in path.split('.') {
        if !matches!(current, Value::Record(_)) {
            return Err(CoreError::type_mismatch(
                path,
                format!("expected record, found {}", current.kind_name()),
            ));
        }
        current = current
            .get_mut(segment)
            .ok_or_else(|| CoreError::type_mismatch(path, format!("no field `{segment}`")))?;
    }
    Ok(current)
}

/// Orders `value` against `operand` under the total value order.
fn compare(value: &Value, operand: &Value) -> CoreResult<Ordering> {
    if value.is_comparable_with(operand) {
        Ok(value.compare(operand))
    } else {
        Err(mismatch(operand.kind_name(), value))
    }
}

fn inside(value: &Value, operands: &[Value]) -> CoreResult<bool> {
    for operand in operands {
        if compare(value, operand)?.is_eq() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Null lists behave as empty lists.
fn list_items(value: &Value) -> CoreResult<&[Value]> {
    match value {
        Value::Null => Ok(&[]),
        Value::List(items) => Ok(items),
        other => Err(mismatch("list", other)),
    }
}

fn owned_list(value: &Value) -> CoreResult<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items.clone()),
        other => Err(mismatch("list", other)),
    }
}

fn owned_map(value: &Value) -> CoreResult<Vec<(Value, Value)>> {
    match value {
        Value::Map(pairs) => Ok(pairs.clone()),
        other => Err(mismatch("map", other)),
    }
}

#[allow(clippy::cast_precision_loss)]
fn arithmetic(
    value: &Value,
    operand: &Value,
    op: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> CoreResult<Value> {
    match (value, operand) {
        (Value::Integer(a), Value::Integer(b)) => int_op(*a, *b)
            .map(Value::Integer)
            .ok_or_else(|| CoreError::type_mismatch("", format!("{op} overflows i64"))),
        (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(float_op(*a as f64, *b))),
        (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(float_op(*a, *b as f64))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(*a, *b))),
        (Value::Integer(_) | Value::Float(_), other) => Err(mismatch("number", other)),
        (other, _) => Err(mismatch("number", other)),
    }
}

fn mismatch(expected: &str, found: &Value) -> CoreError {
    CoreError::type_mismatch("", format!("expected {expected}, found {}", found.kind_name()))
}
