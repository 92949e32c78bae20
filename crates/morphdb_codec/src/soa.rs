//! Structure-of-arrays collection encoding.
//!
//! A collection of `n` elements is stored as one array column per element
//! leaf, each of length `n`. For a list of addresses at `homes`:
//!
//! ```text
//! homes__city = ['Paris', 'Oslo']
//! homes__zip  = ['75001', null]
//! ```
//!
//! Map keys use the collection path itself; map values live under
//! `{path}{separator}value`. Collections nested in elements become arrays of
//! arrays.

use crate::collection::CollectionHandler;
use crate::descriptor::FieldKind;
use crate::error::{CodecError, CodecResult};
use crate::format::{expect_list, expect_map, MapFormat, MAP_VALUE_SUFFIX};
use crate::row::{ColumnDef, FlatRow, StorageType};
use crate::value::Value;

/// Parallel array columns per element leaf.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoaCollectionHandler;

/// State of a collection's array columns in a row.
enum Arrays {
    Absent,
    Null,
    Elements(Vec<Value>),
}

impl SoaCollectionHandler {
    fn leaves(format: &MapFormat, element: &FieldKind) -> Vec<ColumnDef> {
        let mut columns = Vec::new();
        format.columns_for("", element, false, &mut columns);
        columns
    }

    /// Encodes each element into a scratch row and distributes its leaves
    /// over the parallel arrays.
    fn scatter<'a>(
        format: &MapFormat,
        base: &str,
        element: &FieldKind,
        items: impl ExactSizeIterator<Item = &'a Value>,
        out: &mut FlatRow,
    ) -> CodecResult<()> {
        let leaves = Self::leaves(format, element);
        let mut arrays = vec![Vec::with_capacity(items.len()); leaves.len()];
        for item in items {
            let mut scratch = FlatRow::new();
            format
                .encode_field("", element, item, &mut scratch)
                .map_err(|err| prefixed(format, base, err))?;
            for (array, leaf) in arrays.iter_mut().zip(&leaves) {
                array.push(scratch.remove(&leaf.name).unwrap_or(Value::Null));
            }
        }
        for (leaf, array) in leaves.iter().zip(arrays) {
            out.insert(format.join(base, &leaf.name), Value::List(array));
        }
        Ok(())
    }

    /// Rebuilds elements from the parallel arrays under `base`.
    fn gather(
        format: &MapFormat,
        base: &str,
        element: &FieldKind,
        row: &FlatRow,
    ) -> CodecResult<Arrays> {
        let leaves = Self::leaves(format, element);
        let columns: Vec<(String, Option<&Value>)> = leaves
            .iter()
            .map(|leaf| {
                let name = format.join(base, &leaf.name);
                let value = row.get(&name);
                (name, value)
            })
            .collect();

        // Columns added after a row was written hold null, so the length
        // comes from whichever column still has an array.
        let Some((reference, len)) = columns.iter().find_map(|(name, value)| match value {
            Some(Value::List(items)) => Some((name.as_str(), items.len())),
            _ => None,
        }) else {
            for (name, value) in &columns {
                if let Some(other) = value.filter(|v| !v.is_null()) {
                    return Err(CodecError::unexpected(name.as_str(), "array", other.kind_name()));
                }
            }
            return Ok(if columns.iter().any(|(_, value)| value.is_some()) {
                Arrays::Null
            } else {
                Arrays::Absent
            });
        };
        for (name, value) in &columns {
            match value {
                Some(Value::List(items)) if items.len() != len => {
                    return Err(CodecError::ArrayLengthMismatch {
                        path: name.clone(),
                        expected: len,
                        found: items.len(),
                    });
                }
                Some(Value::List(_) | Value::Null) | None => {}
                Some(other) => {
                    return Err(CodecError::unexpected(
                        name.as_str(),
                        "array",
                        other.kind_name(),
                    ))
                }
            }
        }

        let mut elements = Vec::with_capacity(len);
        for i in 0..len {
            let mut scratch = FlatRow::new();
            for (leaf, (_, value)) in leaves.iter().zip(&columns) {
                if let Some(Value::List(items)) = value {
                    scratch.insert(leaf.name.as_str(), items[i].clone());
                }
            }
            let element = format
                .decode_field("", element, &scratch)
                .map_err(|err| prefixed(format, base, err))?
                .ok_or_else(|| CodecError::missing_field(reference))?;
            elements.push(element);
        }
        Ok(Arrays::Elements(elements))
    }
}

impl CollectionHandler for SoaCollectionHandler {
    fn encode(
        &self,
        format: &MapFormat,
        path: &str,
        kind: &FieldKind,
        value: &Value,
        out: &mut FlatRow,
    ) -> CodecResult<()> {
        match kind {
            FieldKind::List(element) | FieldKind::Set(element) => {
                let items = expect_list(path, value)?;
                Self::scatter(format, path, element, items.iter(), out)
            }
            FieldKind::Map(key, val) => {
                let pairs = expect_map(path, value)?;
                Self::scatter(format, path, key, pairs.iter().map(|(k, _)| k), out)?;
                let values_base = format.join(path, MAP_VALUE_SUFFIX);
                Self::scatter(format, &values_base, val, pairs.iter().map(|(_, v)| v), out)
            }
            other => Err(CodecError::unexpected(path, "collection", other.describe())),
        }
    }

    fn decode(
        &self,
        format: &MapFormat,
        path: &str,
        kind: &FieldKind,
        row: &FlatRow,
    ) -> CodecResult<Option<Value>> {
        match kind {
            FieldKind::List(element) | FieldKind::Set(element) => {
                Ok(match Self::gather(format, path, element, row)? {
                    Arrays::Absent => None,
                    Arrays::Null => Some(Value::Null),
                    Arrays::Elements(items) => Some(Value::List(items)),
                })
            }
            FieldKind::Map(key, val) => {
                let keys = match Self::gather(format, path, key, row)? {
                    Arrays::Absent => return Ok(None),
                    Arrays::Null => return Ok(Some(Value::Null)),
                    Arrays::Elements(keys) => keys,
                };
                let values_base = format.join(path, MAP_VALUE_SUFFIX);
                let values = match Self::gather(format, &values_base, val, row)? {
                    Arrays::Elements(values) => values,
                    Arrays::Absent | Arrays::Null if keys.is_empty() => Vec::new(),
                    Arrays::Absent | Arrays::Null => {
                        return Err(CodecError::missing_field(values_base))
                    }
                };
                if values.len() != keys.len() {
                    return Err(CodecError::ArrayLengthMismatch {
                        path: values_base,
                        expected: keys.len(),
                        found: values.len(),
                    });
                }
                Ok(Some(Value::Map(keys.into_iter().zip(values).collect())))
            }
            other => Err(CodecError::unexpected(path, "collection", other.describe())),
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
        let mut push = |base: &str, element: &FieldKind| {
            for leaf in Self::leaves(format, element) {
                out.push(ColumnDef::new(
                    format.join(base, &leaf.name),
                    StorageType::Array(Box::new(leaf.storage)),
                    nullable,
                ));
            }
        };
        match kind {
            FieldKind::List(element) | FieldKind::Set(element) => push(path, element),
            FieldKind::Map(key, val) => {
                push(path, key);
                push(&format.join(path, MAP_VALUE_SUFFIX), val);
            }
            _ => {}
        }
    }
}

/// Re-roots an element-relative error path under the collection path.
fn prefixed(format: &MapFormat, base: &str, err: CodecError) -> CodecError {
    match err {
        CodecError::MissingField { path } => CodecError::MissingField {
            path: format.join(base, &path),
        },
        CodecError::UnexpectedValue {
            path,
            expected,
            found,
        } => CodecError::UnexpectedValue {
            path: format.join(base, &path),
            expected,
            found,
        },
        CodecError::ArrayLengthMismatch {
            path,
            expected,
            found,
        } => CodecError::ArrayLengthMismatch {
            path: format.join(base, &path),
            expected,
            found,
        },
        other => other,
    }
}
