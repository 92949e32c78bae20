//! Stored record types.

use morphdb_codec::{Shape, Structure, Value};
use std::fmt::Debug;

/// A record type stored in a table.
///
/// The identifier field and its type are chosen by the implementor; the
/// identifier must be unique within a table.
///
/// ```
/// use morphdb_codec::structure;
/// use morphdb_core::Entity;
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct User {
///     id: String,
///     age: i64,
/// }
/// structure!(User { id: String, age: i64 });
///
/// impl Entity for User {
///     type Id = String;
///     const ID_FIELD: &'static str = "id";
///     fn id(&self) -> String {
///         self.id.clone()
///     }
/// }
/// ```
pub trait Entity: Structure + Clone + Send + Sync + 'static {
    /// Identifier type.
    type Id: Shape + Clone + Send + Sync + Debug;

    /// Name of the identifier field.
    const ID_FIELD: &'static str;

    /// Extracts the identifier.
    fn id(&self) -> Self::Id;

    /// The identifier as a value.
    fn id_value(&self) -> Value {
        self.id().to_value()
    }
}

/// Before and after images of a single-record update.
///
/// Both sides are `None` when nothing matched.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryChange<T> {
    /// Record before the update.
    pub old: Option<T>,
    /// Record after the update.
    pub new: Option<T>,
}

impl<T> EntryChange<T> {
    /// An update that matched nothing.
    pub fn none() -> Self {
        Self {
            old: None,
            new: None,
        }
    }

    /// An update from `old` to `new`.
    pub fn changed(old: T, new: T) -> Self {
        Self {
            old: Some(old),
            new: Some(new),
        }
    }

    /// Returns true if a record matched.
    pub fn matched(&self) -> bool {
        self.old.is_some() || self.new.is_some()
    }
}

impl<T> Default for EntryChange<T> {
    fn default() -> Self {
        Self::none()
    }
}
