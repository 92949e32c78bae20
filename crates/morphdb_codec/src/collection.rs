//! Collection encoding strategies.
//!
//! Lists, sets and maps do not flatten into one column per leaf the way
//! records do. How they are stored depends on the backend, so
//! [`MapFormat`] delegates them to a [`CollectionHandler`]:
//!
//! - [`NativeCollectionHandler`] keeps the whole collection in one column
//!   holding a native collection value (column stores).
//! - [`SoaCollectionHandler`](crate::SoaCollectionHandler) spreads the
//!   collection over parallel array columns, one per element leaf
//!   (relational stores).

use crate::descriptor::FieldKind;
use crate::error::CodecResult;
use crate::format::MapFormat;
use crate::row::{ColumnDef, FlatRow};
use crate::value::Value;
use std::fmt;

/// Strategy for encoding collection-valued fields.
///
/// Implementations must be deterministic: encoding the same value twice
/// yields the same columns.
pub trait CollectionHandler: Send + Sync + fmt::Debug {
    /// Encodes a collection value at `path` into `out`.
    ///
    /// `kind` is a list, set or map kind. `value` may be null only if the
    /// caller wraps the collection in an optional, in which case the format
    /// handles it before calling here.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not match `kind`.
    fn encode(
        &self,
        format: &MapFormat,
        path: &str,
        kind: &FieldKind,
        value: &Value,
        out: &mut FlatRow,
    ) -> CodecResult<()>;

    /// Decodes a collection at `path`.
    ///
    /// Returns `Ok(None)` if the row has no columns for it and
    /// `Ok(Some(Value::Null))` if the stored collection is null.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored columns are malformed.
    fn decode(
        &self,
        format: &MapFormat,
        path: &str,
        kind: &FieldKind,
        row: &FlatRow,
    ) -> CodecResult<Option<Value>>;

    /// Appends the columns a collection at `path` contributes.
    fn columns(
        &self,
        format: &MapFormat,
        path: &str,
        kind: &FieldKind,
        nullable: bool,
        out: &mut Vec<ColumnDef>,
    );
}

/// One column per collection, holding a native list/set/map value.
///
/// Nested records inside the collection become record values; converters
/// still apply to element types.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeCollectionHandler;

impl CollectionHandler for NativeCollectionHandler {
    fn encode(
        &self,
        format: &MapFormat,
        path: &str,
        kind: &FieldKind,
        value: &Value,
        out: &mut FlatRow,
    ) -> CodecResult<()> {
        out.insert(path, format.to_storage_value(path, kind, value)?);
        Ok(())
    }

    fn decode(
        &self,
        format: &MapFormat,
        path: &str,
        kind: &FieldKind,
        row: &FlatRow,
    ) -> CodecResult<Option<Value>> {
        match row.get(path) {
            None => Ok(None),
            Some(stored) => format
                .from_storage_value(path, kind, stored.clone())
                .map(Some),
        }
    }

    fn columns(
        &self,
        format: &MapFormat,
        path: &str,
        kind: &FieldKind,
        nullable: bool,
        out: &mut Vec<ColumnDef>,
    ) {
        out.push(ColumnDef::new(path, format.storage_type(kind), nullable));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::PrimitiveKind;
    use crate::row::StorageType;

    fn tags() -> FieldKind {
        FieldKind::Set(Box::new(FieldKind::Primitive(PrimitiveKind::Text)))
    }

    #[test]
    fn native_set_is_one_column() {
        let format = MapFormat::native();
        let mut row = FlatRow::new();
        let value = Value::List(vec!["a".into(), "b".into()]);
        format.encode_field("tags", &tags(), &value, &mut row).unwrap();

        assert_eq!(row.len(), 1);
        assert_eq!(row.get("tags"), Some(&value));
        assert_eq!(
            format.decode_field("tags", &tags(), &row).unwrap(),
            Some(value)
        );
    }

    #[test]
    fn native_column_type() {
        let format = MapFormat::native();
        let mut cols = Vec::new();
        format.columns_for("tags", &tags(), false, &mut cols);
        assert_eq!(
            cols,
            vec![ColumnDef::new(
                "tags",
                StorageType::Set(Box::new(StorageType::Scalar(PrimitiveKind::Text))),
                false
            )]
        );
    }

    #[test]
    fn native_absent_column_decodes_none() {
        let format = MapFormat::native();
        assert_eq!(
            format.decode_field("tags", &tags(), &FlatRow::new()).unwrap(),
            None
        );
    }
}
