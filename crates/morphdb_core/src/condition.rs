//! Condition expression trees.
//!
//! A [`Condition`] is an immutable predicate over a [`Value`]. Conditions
//! are usually built through the typed [`FieldPath`](crate::FieldPath) DSL,
//! canonicalized by [`normalize`](crate::normalize), and then either
//! evaluated client-side with [`evaluate`](crate::evaluate) or lowered by a
//! backend adapter.

use morphdb_codec::{GeoPoint, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A predicate over a value.
///
/// `And(vec![])` is equivalent to `Always` and `Or(vec![])` to `Never`.
/// Ordering comparisons use the total value order, where null sorts before
/// every other value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// Matches everything.
    Always,
    /// Matches nothing.
    Never,
    /// Value equals the operand. `Equal(Null)` tests for null.
    Equal(Value),
    /// Value differs from the operand.
    NotEqual(Value),
    /// Value is greater than the operand.
    GreaterThan(Value),
    /// Value is greater than or equal to the operand.
    GreaterThanOrEqual(Value),
    /// Value is less than the operand.
    LessThan(Value),
    /// Value is less than or equal to the operand.
    LessThanOrEqual(Value),
    /// Value equals one of the operands.
    Inside(Vec<Value>),
    /// Value equals none of the operands.
    NotInside(Vec<Value>),
    /// All children match. Evaluated left to right, short-circuiting.
    And(Vec<Condition>),
    /// Any child matches. Evaluated left to right, short-circuiting.
    Or(Vec<Condition>),
    /// Inner condition does not match.
    Not(Box<Condition>),
    /// Applies a condition to a (possibly dotted) field of a record.
    OnField {
        /// Field path, segments separated by `.`.
        field: String,
        /// Condition applied to the field value.
        condition: Box<Condition>,
    },
    /// Point lies within a distance band around a center.
    GeoDistance {
        /// Center of the search.
        center: GeoPoint,
        /// Exclusive lower bound in kilometers.
        greater_than_km: f64,
        /// Exclusive upper bound in kilometers.
        less_than_km: f64,
    },
    /// Text contains a substring.
    StringContains {
        /// Substring to look for.
        value: String,
        /// Compare case-insensitively.
        ignore_case: bool,
    },
    /// Every list element matches.
    ListAllElements(Box<Condition>),
    /// At least one list element matches.
    ListAnyElements(Box<Condition>),
    /// List has exactly this many elements.
    ListSizeEquals(usize),
    /// Map contains the key.
    MapHasKey(Value),
    /// Applies a condition to the value stored under a map key.
    OnKey {
        /// Map key.
        key: Value,
        /// Condition applied to the entry value.
        condition: Box<Condition>,
    },
    /// Value is not null and matches the inner condition.
    IfNotNull(Box<Condition>),
}

impl Condition {
    /// Conjunction of conditions.
    pub fn and(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::And(conditions.into_iter().collect())
    }

    /// Disjunction of conditions.
    pub fn or(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::Or(conditions.into_iter().collect())
    }

    /// Negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(condition: Condition) -> Self {
        Condition::Not(Box::new(condition))
    }

    /// Condition on a field.
    pub fn on_field(field: impl Into<String>, condition: Condition) -> Self {
        Condition::OnField {
            field: field.into(),
            condition: Box::new(condition),
        }
    }

    /// Field equals a value.
    pub fn field_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::on_field(field, Condition::Equal(value.into()))
    }

    /// Geo distance condition with only an upper bound.
    pub fn within_km(center: GeoPoint, radius_km: f64) -> Self {
        Condition::GeoDistance {
            center,
            greater_than_km: 0.0,
            less_than_km: radius_km,
        }
    }

    /// Returns true for the comparison leaf variants.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Condition::Equal(_)
                | Condition::NotEqual(_)
                | Condition::GreaterThan(_)
                | Condition::GreaterThanOrEqual(_)
                | Condition::LessThan(_)
                | Condition::LessThanOrEqual(_)
        )
    }

    /// Dotted paths of every field referenced through `OnField`.
    pub fn referenced_fields(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_fields(self, "", &mut out);
        out.sort_unstable();
        out.dedup();
        out
    }
}

fn collect_fields(condition: &Condition, prefix: &str, out: &mut Vec<String>) {
    match condition {
        Condition::OnField { field, condition } => {
            let path = join(prefix, field);
            match condition.as_ref() {
                Condition::OnField { .. } | Condition::And(_) | Condition::Or(_) => {}
                _ => out.push(path.clone()),
            }
            collect_fields(condition, &path, out);
        }
        Condition::And(children) | Condition::Or(children) => {
            for child in children {
                collect_fields(child, prefix, out);
            }
        }
        Condition::Not(inner) | Condition::IfNotNull(inner) => {
            collect_fields(inner, prefix, out);
        }
        _ => {}
    }
}

pub(crate) fn join(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

impl Default for Condition {
    fn default() -> Self {
        Condition::Always
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        display(self, "it", f)
    }
}

fn display(condition: &Condition, subject: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let list = |values: &[Value]| {
        values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    match condition {
        Condition::Always => write!(f, "true"),
        Condition::Never => write!(f, "false"),
        Condition::Equal(Value::Null) => write!(f, "{subject} IS NULL"),
        Condition::NotEqual(Value::Null) => write!(f, "{subject} IS NOT NULL"),
        Condition::Equal(v) => write!(f, "{subject} = {v}"),
        Condition::NotEqual(v) => write!(f, "{subject} <> {v}"),
        Condition::GreaterThan(v) => write!(f, "{subject} > {v}"),
        Condition::GreaterThanOrEqual(v) => write!(f, "{subject} >= {v}"),
        Condition::LessThan(v) => write!(f, "{subject} < {v}"),
        Condition::LessThanOrEqual(v) => write!(f, "{subject} <= {v}"),
        Condition::Inside(values) => write!(f, "{subject} IN ({})", list(values)),
        Condition::NotInside(values) => write!(f, "{subject} NOT IN ({})", list(values)),
        Condition::And(children) | Condition::Or(children) => {
            let op = if matches!(condition, Condition::And(_)) {
                " AND "
            } else {
                " OR "
            };
            if children.is_empty() {
                return write!(f, "{}", matches!(condition, Condition::And(_)));
            }
            write!(f, "(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, "{op}")?;
                }
                display(child, subject, f)?;
            }
            write!(f, ")")
        }
        Condition::Not(inner) => {
            write!(f, "NOT ")?;
            display(inner, subject, f)
        }
        Condition::OnField { field, condition } => {
            let path = if subject == "it" {
                field.clone()
            } else {
                format!("{subject}.{field}")
            };
            display(condition, &path, f)
        }
        Condition::GeoDistance {
            center,
            greater_than_km,
            less_than_km,
        } => write!(
            f,
            "{greater_than_km}km < distance({subject}, ({}, {})) < {less_than_km}km",
            center.latitude, center.longitude
        ),
        Condition::StringContains { value, ignore_case } => {
            let op = if *ignore_case { "ICONTAINS" } else { "CONTAINS" };
            write!(f, "{subject} {op} {}", Value::Text(value.clone()))
        }
        Condition::ListAllElements(inner) => {
            write!(f, "ALL ")?;
            display(inner, &format!("{subject}[*]"), f)
        }
        Condition::ListAnyElements(inner) => {
            write!(f, "ANY ")?;
            display(inner, &format!("{subject}[*]"), f)
        }
        Condition::ListSizeEquals(n) => write!(f, "size({subject}) = {n}"),
        Condition::MapHasKey(key) => write!(f, "{subject} HAS KEY {key}"),
        Condition::OnKey { key, condition } => display(condition, &format!("{subject}[{key}]"), f),
        Condition::IfNotNull(inner) => {
            write!(f, "({subject} IS NOT NULL AND ")?;
            display(inner, subject, f)?;
            write!(f, ")")
        }
    }
}
