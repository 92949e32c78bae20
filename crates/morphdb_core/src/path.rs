//! Typed field paths.
//!
//! A [`FieldPath<T, V>`] names a field of type `V` inside records of type
//! `T` and builds conditions and modifications whose operands are checked
//! by the compiler:
//!
//! ```
//! use morphdb_core::{ConditionExt, FieldPath};
//! use morphdb_codec::structure;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Address { city: String }
//! structure!(Address { city: String });
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct User { age: i64, home: Address }
//! structure!(User { age: i64, home: Address });
//!
//! let age = FieldPath::<User, i64>::field("age");
//! let city = FieldPath::<User, Address>::field("home").then::<String>("city");
//!
//! let adults_in_oslo = age.gte(18).and(city.eq("Oslo".to_string()));
//! assert_eq!(adults_in_oslo.to_string(), "(age >= 18 AND home.city = 'Oslo')");
//! ```

use crate::condition::Condition;
use crate::modification::Modification;
use morphdb_codec::{GeoPoint, Shape, Value};
use std::fmt;
use std::marker::PhantomData;

/// Path from a record of type `T` to a field of type `V`.
pub struct FieldPath<T, V> {
    segments: Vec<&'static str>,
    _types: PhantomData<fn(&T) -> V>,
}

impl<T, V> Clone for FieldPath<T, V> {
    fn clone(&self) -> Self {
        Self {
            segments: self.segments.clone(),
            _types: PhantomData,
        }
    }
}

impl<T, V> fmt::Debug for FieldPath<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPath({})", self.path())
    }
}

impl<T> FieldPath<T, T> {
    /// The record itself.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
            _types: PhantomData,
        }
    }
}

impl<T, V> FieldPath<T, V> {
    /// A top-level field.
    pub fn field(name: &'static str) -> Self {
        Self {
            segments: vec![name],
            _types: PhantomData,
        }
    }

    /// Descends into a field of `V`.
    pub fn then<W>(&self, name: &'static str) -> FieldPath<T, W> {
        let mut segments = self.segments.clone();
        segments.push(name);
        FieldPath {
            segments,
            _types: PhantomData,
        }
    }

    /// Dotted path, empty for the root.
    pub fn path(&self) -> String {
        self.segments.join(".")
    }

    /// Wraps a condition on `V` into a condition on `T`.
    pub fn condition(&self, condition: Condition) -> Condition {
        if self.segments.is_empty() {
            condition
        } else {
            Condition::on_field(self.path(), condition)
        }
    }

    /// Wraps a modification of `V` into a modification of `T`.
    pub fn modify(&self, modification: Modification) -> Modification {
        if self.segments.is_empty() {
            modification
        } else {
            Modification::on_field(self.path(), modification)
        }
    }
}

impl<T, V: Shape> FieldPath<T, V> {
    /// Field equals a value.
    pub fn eq(&self, value: impl Into<V>) -> Condition {
        self.condition(Condition::Equal(value.into().to_value()))
    }

    /// Field differs from a value.
    pub fn ne(&self, value: impl Into<V>) -> Condition {
        self.condition(Condition::NotEqual(value.into().to_value()))
    }

    /// Field is greater than a value.
    pub fn gt(&self, value: impl Into<V>) -> Condition {
        self.condition(Condition::GreaterThan(value.into().to_value()))
    }

    /// Field is greater than or equal to a value.
    pub fn gte(&self, value: impl Into<V>) -> Condition {
        self.condition(Condition::GreaterThanOrEqual(value.into().to_value()))
    }

    /// Field is less than a value.
    pub fn lt(&self, value: impl Into<V>) -> Condition {
        self.condition(Condition::LessThan(value.into().to_value()))
    }

    /// Field is less than or equal to a value.
    pub fn lte(&self, value: impl Into<V>) -> Condition {
        self.condition(Condition::LessThanOrEqual(value.into().to_value()))
    }

    /// Field equals one of the values.
    pub fn inside(&self, values: impl IntoIterator<Item = V>) -> Condition {
        self.condition(Condition::Inside(
            values.into_iter().map(|v| v.to_value()).collect(),
        ))
    }

    /// Field equals none of the values.
    pub fn not_inside(&self, values: impl IntoIterator<Item = V>) -> Condition {
        self.condition(Condition::NotInside(
            values.into_iter().map(|v| v.to_value()).collect(),
        ))
    }

    /// Assigns the field.
    pub fn assign(&self, value: impl Into<V>) -> Modification {
        self.modify(Modification::Assign(value.into().to_value()))
    }

    /// Caps the field at a maximum.
    pub fn coerce_at_most(&self, value: impl Into<V>) -> Modification {
        self.modify(Modification::CoerceAtMost(value.into().to_value()))
    }

    /// Raises the field to a minimum.
    pub fn coerce_at_least(&self, value: impl Into<V>) -> Modification {
        self.modify(Modification::CoerceAtLeast(value.into().to_value()))
    }
}

impl<T> FieldPath<T, i64> {
    /// Adds to the field.
    pub fn increment(&self, by: i64) -> Modification {
        self.modify(Modification::Increment(Value::Integer(by)))
    }

    /// Multiplies the field.
    pub fn multiply(&self, by: i64) -> Modification {
        self.modify(Modification::Multiply(Value::Integer(by)))
    }
}

impl<T> FieldPath<T, f64> {
    /// Adds to the field.
    pub fn increment(&self, by: f64) -> Modification {
        self.modify(Modification::Increment(Value::Float(by)))
    }

    /// Multiplies the field.
    pub fn multiply(&self, by: f64) -> Modification {
        self.modify(Modification::Multiply(Value::Float(by)))
    }
}

impl<T> FieldPath<T, String> {
    /// Field contains a substring.
    pub fn contains(&self, needle: impl Into<String>, ignore_case: bool) -> Condition {
        self.condition(Condition::StringContains {
            value: needle.into(),
            ignore_case,
        })
    }

    /// Appends to the field.
    pub fn append(&self, suffix: impl Into<String>) -> Modification {
        self.modify(Modification::AppendString(suffix.into()))
    }
}

impl<T, V: Shape> FieldPath<T, Option<V>> {
    /// Field is null.
    pub fn is_null(&self) -> Condition {
        self.condition(Condition::Equal(Value::Null))
    }

    /// Field is not null.
    pub fn is_not_null(&self) -> Condition {
        self.condition(Condition::NotEqual(Value::Null))
    }

    /// Field is not null and the value matches.
    pub fn if_not_null(&self, build: impl FnOnce(&FieldPath<V, V>) -> Condition) -> Condition {
        self.condition(Condition::IfNotNull(Box::new(build(&FieldPath::root()))))
    }

    /// Modifies the value unless it is null.
    pub fn modify_if_not_null(
        &self,
        build: impl FnOnce(&FieldPath<V, V>) -> Modification,
    ) -> Modification {
        self.modify(Modification::IfNotNull(Box::new(build(&FieldPath::root()))))
    }
}

impl<T, E: Shape> FieldPath<T, Vec<E>> {
    /// Every element matches.
    pub fn all(&self, build: impl FnOnce(&FieldPath<E, E>) -> Condition) -> Condition {
        self.condition(Condition::ListAllElements(Box::new(build(&FieldPath::root()))))
    }

    /// Some element matches.
    pub fn any(&self, build: impl FnOnce(&FieldPath<E, E>) -> Condition) -> Condition {
        self.condition(Condition::ListAnyElements(Box::new(build(&FieldPath::root()))))
    }

    /// List has exactly `size` elements.
    pub fn size_eq(&self, size: usize) -> Condition {
        self.condition(Condition::ListSizeEquals(size))
    }

    /// Appends elements.
    pub fn append_all(&self, items: impl IntoIterator<Item = E>) -> Modification {
        self.modify(Modification::AppendToList(
            items.into_iter().map(|e| e.to_value()).collect(),
        ))
    }

    /// Appends elements that are not already present.
    pub fn add_all(&self, items: impl IntoIterator<Item = E>) -> Modification {
        self.modify(Modification::AppendToSet(
            items.into_iter().map(|e| e.to_value()).collect(),
        ))
    }

    /// Removes every element equal to one of `items`.
    pub fn remove_all(&self, items: impl IntoIterator<Item = E>) -> Modification {
        self.modify(Modification::RemoveFromList(
            items.into_iter().map(|e| e.to_value()).collect(),
        ))
    }

    /// Removes every element matching a condition.
    pub fn remove_where(&self, build: impl FnOnce(&FieldPath<E, E>) -> Condition) -> Modification {
        self.modify(Modification::RemoveWhere(build(&FieldPath::root())))
    }
}

impl<T, K: Shape, V: Shape> FieldPath<T, std::collections::BTreeMap<K, V>> {
    /// Map contains the key.
    pub fn has_key(&self, key: K) -> Condition {
        self.condition(Condition::MapHasKey(key.to_value()))
    }

    /// The entry under `key` matches.
    pub fn on_key(&self, key: K, build: impl FnOnce(&FieldPath<V, V>) -> Condition) -> Condition {
        self.condition(Condition::OnKey {
            key: key.to_value(),
            condition: Box::new(build(&FieldPath::root())),
        })
    }

    /// Inserts or replaces entries.
    pub fn combine(&self, entries: impl IntoIterator<Item = (K, V)>) -> Modification {
        self.modify(Modification::CombineMap(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_value(), v.to_value()))
                .collect(),
        ))
    }

    /// Removes entries by key.
    pub fn remove_keys(&self, keys: impl IntoIterator<Item = K>) -> Modification {
        self.modify(Modification::RemoveKeys(
            keys.into_iter().map(|k| k.to_value()).collect(),
        ))
    }
}

impl<T> FieldPath<T, GeoPoint> {
    /// Point lies closer than `radius_km` to `center`.
    pub fn within_km(&self, center: GeoPoint, radius_km: f64) -> Condition {
        self.condition(Condition::within_km(center, radius_km))
    }

    /// Point lies in the band between two distances from `center`.
    pub fn distance_between_km(&self, center: GeoPoint, min_km: f64, max_km: f64) -> Condition {
        self.condition(Condition::GeoDistance {
            center,
            greater_than_km: min_km,
            less_than_km: max_km,
        })
    }
}

/// Combinators for building compound conditions fluently.
pub trait ConditionExt: Sized {
    /// Conjunction.
    fn and(self, other: Condition) -> Condition;
    /// Disjunction.
    fn or(self, other: Condition) -> Condition;
    /// Negation.
    fn negate(self) -> Condition;
}

impl ConditionExt for Condition {
    fn and(self, other: Condition) -> Condition {
        Condition::and([self, other])
    }

    fn or(self, other: Condition) -> Condition {
        Condition::or([self, other])
    }

    fn negate(self) -> Condition {
        Condition::not(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{apply, evaluate};
    use morphdb_codec::structure;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq)]
    struct Pet {
        name: String,
        age: i64,
        nickname: Option<String>,
        toys: Vec<String>,
        weights: BTreeMap<String, f64>,
    }

    structure!(Pet {
        name: String,
        age: i64,
        nickname: Option<String>,
        toys: Vec<String>,
        weights: BTreeMap<String, f64>,
    });

    fn rex() -> Value {
        Pet {
            name: "Rex".into(),
            age: 3,
            nickname: None,
            toys: vec!["ball".into(), "rope".into()],
            weights: BTreeMap::from([("2024".to_string(), 12.5)]),
        }
        .to_value()
    }

    #[test]
    fn typed_conditions_evaluate() {
        let age = FieldPath::<Pet, i64>::field("age");
        let toys = FieldPath::<Pet, Vec<String>>::field("toys");
        let nickname = FieldPath::<Pet, Option<String>>::field("nickname");
        let weights = FieldPath::<Pet, BTreeMap<String, f64>>::field("weights");

        let value = rex();
        assert!(evaluate(&age.inside([1, 2, 3]), &value).unwrap());
        assert!(evaluate(&toys.any(|toy| toy.eq("ball")), &value).unwrap());
        assert!(!evaluate(&toys.all(|toy| toy.eq("ball")), &value).unwrap());
        assert!(evaluate(&nickname.is_null(), &value).unwrap());
        assert!(evaluate(&weights.on_key("2024".into(), |w| w.gt(10.0)), &value).unwrap());
        assert!(evaluate(&age.gt(2).and(age.lt(4)), &value).unwrap());
        assert!(!evaluate(&age.gt(2).negate(), &value).unwrap());
    }

    #[test]
    fn typed_modifications_apply() {
        let age = FieldPath::<Pet, i64>::field("age");
        let name = FieldPath::<Pet, String>::field("name");
        let toys = FieldPath::<Pet, Vec<String>>::field("toys");

        let m = Modification::chain([
            age.increment(1),
            name.append("!"),
            toys.remove_where(|toy| toy.eq("rope")),
        ]);
        let pet = Pet::from_value(apply(&m, &rex()).unwrap()).unwrap();
        assert_eq!(pet.age, 4);
        assert_eq!(pet.name, "Rex!");
        assert_eq!(pet.toys, vec!["ball".to_string()]);
    }

    #[test]
    fn root_path_is_transparent() {
        let root = FieldPath::<i64, i64>::root();
        assert_eq!(root.eq(3), Condition::Equal(Value::Integer(3)));
        assert_eq!(root.path(), "");
    }
}
