//! Property-based test generators using proptest.
//!
//! Record strategies produce well-formed fixtures. Condition strategies
//! only produce conditions that type-check against [`Person`], so
//! evaluating them never fails.

use crate::fixtures::{Address, Person, Tagged, UserId};
use morphdb_codec::{GeoPoint, Value};
use morphdb_core::Condition;
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Strategy for short lowercase words. The alphabet is tiny so that
/// generated values collide often.
pub fn word_strategy() -> impl Strategy<Value = String> + Clone {
    "[a-e]{0,3}"
}

/// Strategy for scalar values of every kind, null included.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e6..1.0e6f64).prop_map(Value::Float),
        word_strategy().prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
    ]
}

/// Strategy for points away from the poles and the antimeridian.
pub fn geo_point_strategy() -> impl Strategy<Value = GeoPoint> {
    (-80.0..80.0f64, -170.0..170.0f64).prop_map(|(lat, lon)| GeoPoint::new(lat, lon))
}

/// Strategy for addresses.
pub fn address_strategy() -> impl Strategy<Value = Address> {
    (
        word_strategy(),
        word_strategy(),
        prop::option::of(word_strategy()),
    )
        .prop_map(|(street, city, zip)| Address { street, city, zip })
}

/// Strategy for people with small value ranges, so generated conditions
/// hit and miss in roughly equal measure.
pub fn person_strategy() -> impl Strategy<Value = Person> {
    (
        word_strategy(),
        word_strategy(),
        0..100i64,
        prop::option::of(word_strategy()),
        prop::option::of(address_strategy()),
        geo_point_strategy(),
        prop::collection::vec(word_strategy(), 0..4),
        prop::collection::vec(address_strategy(), 0..3),
        prop::collection::btree_map(word_strategy(), -5..5i64, 0..3),
    )
        .prop_map(
            |(id, name, age, email, home, location, tags, previous, scores)| Person {
                id,
                name,
                age,
                email,
                home,
                location,
                tags,
                previous,
                scores,
            },
        )
}

/// Strategy for [`Tagged`] records.
pub fn tagged_strategy() -> impl Strategy<Value = Tagged> {
    (
        any::<i64>(),
        prop::collection::btree_set(word_strategy().prop_map(UserId), 0..5),
    )
        .prop_map(|(id, labels): (i64, BTreeSet<UserId>)| Tagged { id, labels })
}

fn text(word: String) -> Value {
    Value::Text(word)
}

fn comparison(value: impl Strategy<Value = Value> + Clone) -> impl Strategy<Value = Condition> {
    prop_oneof![
        value.clone().prop_map(Condition::Equal),
        value.clone().prop_map(Condition::NotEqual),
        value.clone().prop_map(Condition::GreaterThan),
        value.clone().prop_map(Condition::GreaterThanOrEqual),
        value.clone().prop_map(Condition::LessThan),
        value.clone().prop_map(Condition::LessThanOrEqual),
        prop::collection::vec(value.clone(), 0..3).prop_map(Condition::Inside),
        prop::collection::vec(value, 0..3).prop_map(Condition::NotInside),
    ]
}

fn text_condition() -> impl Strategy<Value = Condition> {
    prop_oneof![
        3 => comparison(word_strategy().prop_map(text)),
        1 => (word_strategy(), any::<bool>()).prop_map(|(value, ignore_case)| {
            Condition::StringContains { value, ignore_case }
        }),
    ]
}

fn optional_text_condition() -> impl Strategy<Value = Condition> {
    prop_oneof![
        Just(Condition::Equal(Value::Null)),
        Just(Condition::NotEqual(Value::Null)),
        text_condition().prop_map(|c| Condition::IfNotNull(Box::new(c))),
        comparison(word_strategy().prop_map(text)),
    ]
}

fn address_condition() -> impl Strategy<Value = Condition> {
    prop_oneof![
        text_condition().prop_map(|c| Condition::on_field("street", c)),
        text_condition().prop_map(|c| Condition::on_field("city", c)),
        optional_text_condition().prop_map(|c| Condition::on_field("zip", c)),
    ]
}

/// Strategy for single-field conditions on [`Person`].
pub fn person_leaf_strategy() -> impl Strategy<Value = Condition> {
    let age = comparison((-5..105i64).prop_map(Value::Integer));
    let tags = prop_oneof![
        text_condition().prop_map(|c| Condition::ListAnyElements(Box::new(c))),
        text_condition().prop_map(|c| Condition::ListAllElements(Box::new(c))),
        (0..4usize).prop_map(Condition::ListSizeEquals),
    ];
    let scores = prop_oneof![
        word_strategy().prop_map(|k| Condition::MapHasKey(text(k))),
        (word_strategy(), comparison((-6..6i64).prop_map(Value::Integer))).prop_map(
            |(key, condition)| Condition::OnKey {
                key: text(key),
                condition: Box::new(condition),
            }
        ),
    ];
    let location = (geo_point_strategy(), 0.0..500.0f64, 0.0..5000.0f64).prop_map(
        |(center, near, far)| Condition::GeoDistance {
            center,
            greater_than_km: near,
            less_than_km: far,
        },
    );
    prop_oneof![
        age.prop_map(|c| Condition::on_field("age", c)),
        text_condition().prop_map(|c| Condition::on_field("name", c)),
        optional_text_condition().prop_map(|c| Condition::on_field("email", c)),
        prop_oneof![
            Just(Condition::Equal(Value::Null)),
            address_condition(),
            address_condition().prop_map(|c| Condition::IfNotNull(Box::new(c))),
        ]
        .prop_map(|c| Condition::on_field("home", c)),
        location.prop_map(|c| Condition::on_field("location", c)),
        tags.prop_map(|c| Condition::on_field("tags", c)),
        address_condition()
            .prop_map(|c| Condition::on_field("previous", Condition::ListAnyElements(Box::new(c)))),
        scores.prop_map(|c| Condition::on_field("scores", c)),
    ]
}

/// Strategy for arbitrary boolean combinations of [`Person`] conditions.
pub fn person_condition_strategy() -> impl Strategy<Value = Condition> {
    let leaf = prop_oneof![
        8 => person_leaf_strategy(),
        1 => Just(Condition::Always),
        1 => Just(Condition::Never),
    ];
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Condition::And),
            prop::collection::vec(inner.clone(), 0..4).prop_map(Condition::Or),
            inner.prop_map(|c| Condition::Not(Box::new(c))),
        ]
    })
}

