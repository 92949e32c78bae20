//! Condition normalization.
//!
//! [`normalize`] rewrites a condition bottom-up into a canonical form:
//!
//! - negation is pushed down until it reaches a leaf that has a native
//!   complement (`Equal`/`NotEqual`, `GreaterThan`/`LessThanOrEqual`,
//!   `Inside`/`NotInside`, `Always`/`Never`), using De Morgan for `And`/`Or`
//! - nested `And`/`Or` are flattened and neutral children removed
//! - `And` containing `Never` becomes `Never`, `Or` containing `Always`
//!   becomes `Always`; empty and single-child lists collapse
//! - nested `OnField` chains merge into one dotted path
//!
//! Leaves without a native complement (`GeoDistance`, `StringContains`,
//! `ListSizeEquals`, `MapHasKey`, `OnKey`) keep a single `Not` wrapper.
//!
//! Normalization is idempotent and preserves the result of
//! [`evaluate`](crate::evaluate) for every well-typed value.

use crate::condition::{join, Condition};
use crate::modification::Modification;

/// Rewrites a condition into canonical form.
pub fn normalize(condition: &Condition) -> Condition {
    match condition {
        Condition::Not(inner) => negate(normalize(inner)),
        Condition::And(children) => and(children.iter().map(normalize)),
        Condition::Or(children) => or(children.iter().map(normalize)),
        Condition::OnField { field, condition } => on_field(field, normalize(condition)),
        Condition::ListAllElements(inner) => {
            Condition::ListAllElements(Box::new(normalize(inner)))
        }
        Condition::ListAnyElements(inner) => {
            Condition::ListAnyElements(Box::new(normalize(inner)))
        }
        Condition::OnKey { key, condition } => Condition::OnKey {
            key: key.clone(),
            condition: Box::new(normalize(condition)),
        },
        Condition::IfNotNull(inner) => Condition::IfNotNull(Box::new(normalize(inner))),
        leaf => leaf.clone(),
    }
}

/// Negates a condition that is already canonical, keeping it canonical.
fn negate(condition: Condition) -> Condition {
    match condition {
        Condition::Not(inner) => *inner,
        Condition::Always => Condition::Never,
        Condition::Never => Condition::Always,
        Condition::Equal(v) => Condition::NotEqual(v),
        Condition::NotEqual(v) => Condition::Equal(v),
        Condition::GreaterThan(v) => Condition::LessThanOrEqual(v),
        Condition::GreaterThanOrEqual(v) => Condition::LessThan(v),
        Condition::LessThan(v) => Condition::GreaterThanOrEqual(v),
        Condition::LessThanOrEqual(v) => Condition::GreaterThan(v),
        Condition::Inside(values) => Condition::NotInside(values),
        Condition::NotInside(values) => Condition::Inside(values),
        Condition::And(children) => or(children.into_iter().map(negate)),
        Condition::Or(children) => and(children.into_iter().map(negate)),
        Condition::OnField { field, condition } => Condition::OnField {
            field,
            condition: Box::new(negate(*condition)),
        },
        Condition::ListAllElements(inner) => Condition::ListAnyElements(Box::new(negate(*inner))),
        Condition::ListAnyElements(inner) => Condition::ListAllElements(Box::new(negate(*inner))),
        Condition::IfNotNull(inner) => Condition::Or(vec![
            Condition::Equal(morphdb_codec::Value::Null),
            Condition::IfNotNull(Box::new(negate(*inner))),
        ]),
        opaque => Condition::Not(Box::new(opaque)),
    }
}

/// Builds a canonical conjunction from canonical children.
fn and(children: impl Iterator<Item = Condition>) -> Condition {
    let mut flat = Vec::new();
    for child in children {
        match child {
            Condition::Always => {}
            Condition::Never => return Condition::Never,
            Condition::And(grandchildren) => flat.extend(grandchildren),
            other => flat.push(other),
        }
    }
    collapse(flat, Condition::Always, Condition::And)
}

/// Builds a canonical disjunction from canonical children.
fn or(children: impl Iterator<Item = Condition>) -> Condition {
    let mut flat = Vec::new();
    for child in children {
        match child {
            Condition::Never => {}
            Condition::Always => return Condition::Always,
            Condition::Or(grandchildren) => flat.extend(grandchildren),
            other => flat.push(other),
        }
    }
    collapse(flat, Condition::Never, Condition::Or)
}

fn collapse(
    mut children: Vec<Condition>,
    empty: Condition,
    wrap: fn(Vec<Condition>) -> Condition,
) -> Condition {
    match children.len() {
        0 => empty,
        1 => children.remove(0),
        _ => wrap(children),
    }
}

fn on_field(field: &str, condition: Condition) -> Condition {
    match condition {
        Condition::OnField {
            field: inner,
            condition,
        } => Condition::OnField {
            field: join(field, &inner),
            condition,
        },
        other => Condition::OnField {
            field: field.to_string(),
            condition: Box::new(other),
        },
    }
}

/// Rewrites a modification into canonical form: chains are flattened,
/// single-element chains unwrapped, nested `OnField` paths merged and
/// embedded conditions normalized.
pub fn normalize_modification(modification: &Modification) -> Modification {
    match modification {
        Modification::Chain(items) => {
            let mut flat = Vec::with_capacity(items.len());
            for item in items {
                match normalize_modification(item) {
                    Modification::Chain(nested) => flat.extend(nested),
                    other => flat.push(other),
                }
            }
            if flat.len() == 1 {
                flat.remove(0)
            } else {
                Modification::Chain(flat)
            }
        }
        Modification::OnField {
            field,
            modification,
        } => match normalize_modification(modification) {
            Modification::OnField {
                field: inner,
                modification,
            } => Modification::OnField {
                field: join(field, &inner),
                modification,
            },
            other => Modification::OnField {
                field: field.clone(),
                modification: Box::new(other),
            },
        },
        Modification::IfNotNull(inner) => {
            Modification::IfNotNull(Box::new(normalize_modification(inner)))
        }
        Modification::RemoveWhere(condition) => Modification::RemoveWhere(normalize(condition)),
        leaf => leaf.clone(),
    }
}
