//! Modification expression trees.

use crate::condition::{join, Condition};
use morphdb_codec::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An in-place mutation of a value.
///
/// Modifications are applied with [`apply`](crate::apply) and lowered by
/// backend adapters into native update statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Modification {
    /// Replaces the value.
    Assign(Value),
    /// Adds a number.
    Increment(Value),
    /// Multiplies by a number.
    Multiply(Value),
    /// Caps the value at a maximum.
    CoerceAtMost(Value),
    /// Raises the value to a minimum.
    CoerceAtLeast(Value),
    /// Appends to a text value.
    AppendString(String),
    /// Appends elements to a list.
    AppendToList(Vec<Value>),
    /// Removes every list element equal to one of the operands.
    RemoveFromList(Vec<Value>),
    /// Removes every list element matching the condition.
    RemoveWhere(Condition),
    /// Appends elements not already present.
    AppendToSet(Vec<Value>),
    /// Inserts or replaces map entries.
    CombineMap(Vec<(Value, Value)>),
    /// Removes map entries by key.
    RemoveKeys(Vec<Value>),
    /// Modifies a (possibly dotted) field of a record.
    OnField {
        /// Field path, segments separated by `.`.
        field: String,
        /// Modification applied to the field value.
        modification: Box<Modification>,
    },
    /// Applies the inner modification unless the value is null.
    IfNotNull(Box<Modification>),
    /// Applies modifications in order.
    Chain(Vec<Modification>),
}

impl Modification {
    /// Assigns a field.
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::on_field(field, Modification::Assign(value.into()))
    }

    /// Modifies a field.
    pub fn on_field(field: impl Into<String>, modification: Modification) -> Self {
        Modification::OnField {
            field: field.into(),
            modification: Box::new(modification),
        }
    }

    /// Applies modifications in order.
    pub fn chain(modifications: impl IntoIterator<Item = Modification>) -> Self {
        Modification::Chain(modifications.into_iter().collect())
    }

    /// Returns true if applying this modification never changes anything.
    pub fn is_noop(&self) -> bool {
        match self {
            Modification::Chain(items) => items.iter().all(Modification::is_noop),
            Modification::OnField { modification, .. } | Modification::IfNotNull(modification) => {
                modification.is_noop()
            }
            _ => false,
        }
    }

    /// Returns true if this modification may change the field at the dotted
    /// `path` (or any field inside it).
    ///
    /// Used by adapters to detect primary-key changes.
    pub fn affects(&self, path: &str) -> bool {
        self.affects_under("", path)
    }

    fn affects_under(&self, prefix: &str, path: &str) -> bool {
        match self {
            Modification::Chain(items) => items.iter().any(|m| m.affects_under(prefix, path)),
            Modification::IfNotNull(inner) => inner.affects_under(prefix, path),
            Modification::OnField {
                field,
                modification,
            } => {
                let here = join(prefix, field);
                if overlaps(&here, path) {
                    modification.affects_under(&here, path)
                } else {
                    false
                }
            }
            // A leaf modification replaces the whole value at `prefix`.
            _ => prefix.is_empty() || overlaps(prefix, path),
        }
    }

    /// Dotted paths of the fields this modification writes.
    pub fn modified_fields(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_modified(self, "", &mut out);
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// True if one path is equal to, or nested inside, the other.
fn overlaps(a: &str, b: &str) -> bool {
    let nested = |outer: &str, inner: &str| {
        inner
            .strip_prefix(outer)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
    };
    nested(a, b) || nested(b, a)
}

fn collect_modified(modification: &Modification, prefix: &str, out: &mut Vec<String>) {
    match modification {
        Modification::Chain(items) => {
            for item in items {
                collect_modified(item, prefix, out);
            }
        }
        Modification::IfNotNull(inner) => collect_modified(inner, prefix, out),
        Modification::OnField {
            field,
            modification,
        } => collect_modified(modification, &join(prefix, field), out),
        _ => out.push(prefix.to_string()),
    }
}

impl Default for Modification {
    fn default() -> Self {
        Modification::Chain(Vec::new())
    }
}

impl fmt::Display for Modification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        display(self, "it", f)
    }
}

fn display(modification: &Modification, subject: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match modification {
        Modification::Assign(v) => write!(f, "{subject} = {v}"),
        Modification::Increment(v) => write!(f, "{subject} += {v}"),
        Modification::Multiply(v) => write!(f, "{subject} *= {v}"),
        Modification::CoerceAtMost(v) => write!(f, "{subject} = min({subject}, {v})"),
        Modification::CoerceAtLeast(v) => write!(f, "{subject} = max({subject}, {v})"),
        Modification::AppendString(s) => write!(f, "{subject} ||= {}", Value::Text(s.clone())),
        Modification::AppendToList(items) => write!(f, "{subject} += {}", Value::List(items.clone())),
        Modification::RemoveFromList(items) => {
            write!(f, "{subject} -= {}", Value::List(items.clone()))
        }
        Modification::RemoveWhere(condition) => {
            write!(f, "{subject} -= where {condition}")
        }
        Modification::AppendToSet(items) => {
            write!(f, "{subject} |= {}", Value::List(items.clone()))
        }
        Modification::CombineMap(pairs) => write!(f, "{subject} += {}", Value::Map(pairs.clone())),
        Modification::RemoveKeys(keys) => write!(f, "{subject} -= keys {}", Value::List(keys.clone())),
        Modification::OnField {
            field,
            modification,
        } => {
            let path = if subject == "it" {
                field.clone()
            } else {
                format!("{subject}.{field}")
            };
            display(modification, &path, f)
        }
        Modification::IfNotNull(inner) => {
            write!(f, "if {subject} IS NOT NULL: ")?;
            display(inner, subject, f)
        }
        Modification::Chain(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                display(item, subject, f)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affects_detects_key_changes() {
        let m = Modification::chain([
            Modification::set("name", "Ada"),
            Modification::on_field("home", Modification::set("city", "Paris")),
        ]);
        assert!(m.affects("name"));
        assert!(m.affects("home"));
        assert!(m.affects("home.city"));
        assert!(!m.affects("home.zip"));
        assert!(!m.affects("id"));
        assert!(!m.affects("nam"));
    }

    #[test]
    fn root_assignment_affects_everything() {
        assert!(Modification::Assign(Value::Null).affects("id"));
        assert!(!Modification::default().affects("id"));
    }

    #[test]
    fn modified_fields() {
        let m = Modification::chain([
            Modification::on_field("age", Modification::Increment(1.into())),
            Modification::on_field(
                "home",
                Modification::IfNotNull(Box::new(Modification::set("city", "Oslo"))),
            ),
        ]);
        assert_eq!(m.modified_fields(), vec!["age", "home.city"]);
        assert_eq!(m.to_string(), "age += 1, if home IS NOT NULL: home.city = 'Oslo'");
    }

    #[test]
    fn noop_detection() {
        assert!(Modification::chain([]).is_noop());
        assert!(Modification::on_field("a", Modification::chain([])).is_noop());
        assert!(!Modification::set("a", 1).is_noop());
    }
}
