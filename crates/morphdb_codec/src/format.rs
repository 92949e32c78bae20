//! Structural codec: records to flat rows and back.
//!
//! [`MapFormat`] walks a [`TypeDescriptor`] and a [`Value`] tree together:
//!
//! - primitive leaves write one column named by the current path
//! - nested records recurse, prefixing child paths with `{field}{separator}`
//! - inline wrappers are transparent
//! - lists, sets and maps are handed to the configured [`CollectionHandler`]
//! - registered converters take precedence over all of the above
//!
//! Null optionals write null into every column contributed by their
//! subtree. Optionals whose subtree cannot express absence with a single
//! null (nested records, nested optionals) also write a boolean presence
//! column `{path}{separator}exists`.

use crate::collection::{CollectionHandler, NativeCollectionHandler};
use crate::converter::ConverterRegistry;
use crate::descriptor::{descriptor_of, FieldKind, PrimitiveKind, TypeDescriptor};
use crate::error::{CodecError, CodecResult};
use crate::row::{ColumnDef, ColumnPlan, FlatRow, StorageType};
use crate::shape::Structure;
use crate::soa::SoaCollectionHandler;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Name of the presence column suffix for optional subtrees.
pub const PRESENCE_SUFFIX: &str = "exists";

/// Name of the map value column suffix.
pub const MAP_VALUE_SUFFIX: &str = "value";

/// Configuration for [`MapFormat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapFormatConfig {
    /// Separator placed between path segments.
    pub separator: String,
}

impl Default for MapFormatConfig {
    fn default() -> Self {
        Self {
            separator: "__".to_string(),
        }
    }
}

impl MapFormatConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the path separator.
    #[must_use]
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }
}

/// Generic encoder/decoder between records and [`FlatRow`]s.
///
/// A `MapFormat` owns no mutable state; it can be shared freely across
/// threads.
#[derive(Clone)]
pub struct MapFormat {
    config: MapFormatConfig,
    converters: ConverterRegistry,
    collections: Arc<dyn CollectionHandler>,
}

impl fmt::Debug for MapFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapFormat")
            .field("config", &self.config)
            .field("converters", &self.converters)
            .field("collections", &self.collections)
            .finish()
    }
}

impl MapFormat {
    /// Creates a format with the given collection strategy.
    pub fn new(config: MapFormatConfig, collections: Arc<dyn CollectionHandler>) -> Self {
        Self {
            config,
            converters: ConverterRegistry::new(),
            collections,
        }
    }

    /// Format with structure-of-arrays collections (relational backends).
    pub fn soa() -> Self {
        Self::new(MapFormatConfig::default(), Arc::new(SoaCollectionHandler))
    }

    /// Format with single-column native collections (column-store backends).
    pub fn native() -> Self {
        Self::new(MapFormatConfig::default(), Arc::new(NativeCollectionHandler))
    }

    /// Replaces the converter registry.
    #[must_use]
    pub fn with_converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = converters;
        self
    }

    /// The path separator.
    pub fn separator(&self) -> &str {
        &self.config.separator
    }

    /// The converter registry.
    pub fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    /// Joins two path segments. Empty segments contribute nothing.
    pub fn join(&self, parent: &str, child: &str) -> String {
        match (parent.is_empty(), child.is_empty()) {
            (true, _) => child.to_string(),
            (_, true) => parent.to_string(),
            _ => format!("{parent}{}{child}", self.config.separator),
        }
    }

    /// Converts a dotted field path (`home.city`) to its column path.
    pub fn column_path(&self, dotted: &str) -> String {
        dotted
            .split('.')
            .fold(String::new(), |acc, segment| self.join(&acc, segment))
    }

    /// Presence column for an optional subtree at `path`.
    pub fn presence_column(&self, path: &str) -> String {
        self.join(path, PRESENCE_SUFFIX)
    }

    /// Encodes a record value into a row.
    pub fn encode(&self, descriptor: &TypeDescriptor, value: &Value) -> CodecResult<FlatRow> {
        let mut row = FlatRow::new();
        self.encode_nested("", descriptor, value, &mut row)?;
        Ok(row)
    }

    /// Decodes a row into a record value. Unknown columns are ignored.
    pub fn decode(&self, descriptor: &TypeDescriptor, row: &FlatRow) -> CodecResult<Value> {
        self.decode_nested("", descriptor, row, true)?
            .ok_or_else(|| CodecError::missing_field(descriptor.name))
    }

    /// Encodes a typed record.
    pub fn encode_record<T: Structure>(&self, record: &T) -> CodecResult<FlatRow> {
        self.encode(&descriptor_of::<T>(), &record.to_value())
    }

    /// Decodes a typed record.
    pub fn decode_record<T: Structure>(&self, row: &FlatRow) -> CodecResult<T> {
        T::from_value(self.decode(&descriptor_of::<T>(), row)?)
    }

    /// Column plan for a record type.
    pub fn column_plan(&self, descriptor: &TypeDescriptor) -> ColumnPlan {
        let mut columns = Vec::new();
        for field in &descriptor.fields {
            self.columns_for(field.name, &field.kind, false, &mut columns);
        }
        ColumnPlan::new(columns)
    }

    /// Appends the columns contributed by a field subtree at `path`.
    pub fn columns_for(
        &self,
        path: &str,
        kind: &FieldKind,
        nullable: bool,
        out: &mut Vec<ColumnDef>,
    ) {
        if let Some(conv) = self.converters.for_kind(kind) {
            out.push(ColumnDef::new(
                path,
                StorageType::Scalar(conv.storage_kind()),
                nullable,
            ));
            return;
        }
        match kind {
            FieldKind::Primitive(p) => {
                out.push(ColumnDef::new(path, StorageType::Scalar(*p), nullable));
            }
            FieldKind::Inline { inner, .. } => self.columns_for(path, inner, nullable, out),
            FieldKind::Nested(desc) => {
                for field in &desc.fields {
                    self.columns_for(&self.join(path, field.name), &field.kind, nullable, out);
                }
            }
            FieldKind::Optional(inner) => {
                if self.needs_presence(inner) {
                    out.push(ColumnDef::new(
                        self.presence_column(path),
                        StorageType::Scalar(PrimitiveKind::Bool),
                        nullable,
                    ));
                }
                self.columns_for(path, inner, true, out);
            }
            FieldKind::List(_) | FieldKind::Set(_) | FieldKind::Map(_, _) => {
                self.collections.columns(self, path, kind, nullable, out);
            }
        }
    }

    /// Encodes one field subtree into `out` at `path`.
    pub fn encode_field(
        &self,
        path: &str,
        kind: &FieldKind,
        value: &Value,
        out: &mut FlatRow,
    ) -> CodecResult<()> {
        if let Some(conv) = self.converters.for_kind(kind) {
            let stored = if value.is_null() {
                Value::Null
            } else {
                conv.to_storage(value)?
            };
            out.insert(path, stored);
            return Ok(());
        }
        match kind {
            FieldKind::Primitive(p) => {
                out.insert(path, check_primitive(path, *p, value)?);
            }
            FieldKind::Inline { inner, .. } => self.encode_field(path, inner, value, out)?,
            FieldKind::Nested(desc) => self.encode_nested(path, desc, value, out)?,
            FieldKind::Optional(inner) => {
                if value.is_null() {
                    self.encode_absent(path, inner, out);
                } else {
                    if self.needs_presence(inner) {
                        out.insert(self.presence_column(path), Value::Bool(true));
                    }
                    self.encode_field(path, inner, value, out)?;
                }
            }
            FieldKind::List(_) | FieldKind::Set(_) | FieldKind::Map(_, _) => {
                self.collections.encode(self, path, kind, value, out)?;
            }
        }
        Ok(())
    }

    /// Decodes one field subtree at `path`.
    ///
    /// Returns `Ok(None)` when the row holds no column for the subtree, so
    /// the caller can apply the field's default.
    pub fn decode_field(
        &self,
        path: &str,
        kind: &FieldKind,
        row: &FlatRow,
    ) -> CodecResult<Option<Value>> {
        if let Some(conv) = self.converters.for_kind(kind) {
            return match row.get(path) {
                None => Ok(None),
                Some(Value::Null) => Ok(Some(Value::Null)),
                Some(stored) => conv.from_storage(stored.clone()).map(Some),
            };
        }
        match kind {
            FieldKind::Primitive(p) => match row.get(path) {
                None => Ok(None),
                Some(Value::Null) => Ok(Some(Value::Null)),
                Some(v) => check_primitive(path, *p, v).map(Some),
            },
            FieldKind::Inline { inner, .. } => self.decode_field(path, inner, row),
            FieldKind::Nested(desc) => self.decode_nested(path, desc, row, false),
            FieldKind::Optional(inner) => {
                if self.needs_presence(inner) {
                    match row.get(&self.presence_column(path)) {
                        Some(Value::Bool(false) | Value::Null) => return Ok(Some(Value::Null)),
                        Some(Value::Bool(true)) => {
                            return self
                                .decode_field(path, inner, row)?
                                .map(Some)
                                .ok_or_else(|| CodecError::missing_field(path));
                        }
                        Some(other) => {
                            return Err(CodecError::unexpected(
                                self.presence_column(path),
                                "bool",
                                other.kind_name(),
                            ))
                        }
                        None => {}
                    }
                }
                self.decode_field(path, inner, row)
            }
            FieldKind::List(_) | FieldKind::Set(_) | FieldKind::Map(_, _) => {
                self.collections.decode(self, path, kind, row)
            }
        }
    }

    /// Storage type of a subtree kept in a single native column.
    pub fn storage_type(&self, kind: &FieldKind) -> StorageType {
        if let Some(conv) = self.converters.for_kind(kind) {
            return StorageType::Scalar(conv.storage_kind());
        }
        match kind {
            FieldKind::Primitive(p) => StorageType::Scalar(*p),
            FieldKind::Inline { inner, .. } | FieldKind::Optional(inner) => {
                self.storage_type(inner)
            }
            FieldKind::List(elem) => StorageType::List(Box::new(self.storage_type(elem))),
            FieldKind::Set(elem) => StorageType::Set(Box::new(self.storage_type(elem))),
            FieldKind::Map(k, v) => StorageType::Map(
                Box::new(self.storage_type(k)),
                Box::new(self.storage_type(v)),
            ),
            FieldKind::Nested(desc) => StorageType::Record(
                desc.fields
                    .iter()
                    .map(|f| (f.name.to_string(), self.storage_type(&f.kind)))
                    .collect(),
            ),
        }
    }

    /// Converts a subtree into the value stored in a single native column.
    pub fn to_storage_value(
        &self,
        path: &str,
        kind: &FieldKind,
        value: &Value,
    ) -> CodecResult<Value> {
        if value.is_null() {
            return if kind.is_nullable() {
                Ok(Value::Null)
            } else {
                Err(CodecError::unexpected(path, kind.describe(), "null"))
            };
        }
        if let Some(conv) = self.converters.for_kind(kind) {
            return conv.to_storage(value);
        }
        match kind {
            FieldKind::Primitive(p) => check_primitive(path, *p, value),
            FieldKind::Inline { inner, .. } | FieldKind::Optional(inner) => {
                self.to_storage_value(path, inner, value)
            }
            FieldKind::List(elem) | FieldKind::Set(elem) => {
                let items = expect_list(path, value)?;
                items
                    .iter()
                    .map(|item| self.to_storage_value(path, elem, item))
                    .collect::<CodecResult<Vec<_>>>()
                    .map(Value::List)
            }
            FieldKind::Map(k, v) => {
                let pairs = expect_map(path, value)?;
                pairs
                    .iter()
                    .map(|(key, val)| {
                        Ok((
                            self.to_storage_value(path, k, key)?,
                            self.to_storage_value(path, v, val)?,
                        ))
                    })
                    .collect::<CodecResult<Vec<_>>>()
                    .map(Value::Map)
            }
            FieldKind::Nested(desc) => {
                expect_record(path, value)?;
                let mut fields = Vec::with_capacity(desc.fields.len());
                for field in &desc.fields {
                    let child = self.join(path, field.name);
                    let v = match value.get(field.name) {
                        Some(v) => v.clone(),
                        None => field
                            .default
                            .clone()
                            .ok_or_else(|| CodecError::missing_field(&child))?,
                    };
                    fields.push((
                        field.name.to_string(),
                        self.to_storage_value(&child, &field.kind, &v)?,
                    ));
                }
                Ok(Value::Record(fields))
            }
        }
    }

    /// Inverse of [`to_storage_value`](Self::to_storage_value).
    pub fn from_storage_value(
        &self,
        path: &str,
        kind: &FieldKind,
        stored: Value,
    ) -> CodecResult<Value> {
        if stored.is_null() {
            return Ok(Value::Null);
        }
        if let Some(conv) = self.converters.for_kind(kind) {
            return conv.from_storage(stored);
        }
        match kind {
            FieldKind::Primitive(p) => check_primitive(path, *p, &stored),
            FieldKind::Inline { inner, .. } | FieldKind::Optional(inner) => {
                self.from_storage_value(path, inner, stored)
            }
            FieldKind::List(elem) | FieldKind::Set(elem) => match stored {
                Value::List(items) => items
                    .into_iter()
                    .map(|item| self.from_storage_value(path, elem, item))
                    .collect::<CodecResult<Vec<_>>>()
                    .map(Value::List),
                other => Err(CodecError::unexpected(path, "list", other.kind_name())),
            },
            FieldKind::Map(k, v) => match stored {
                Value::Map(pairs) => pairs
                    .into_iter()
                    .map(|(key, val)| {
                        Ok((
                            self.from_storage_value(path, k, key)?,
                            self.from_storage_value(path, v, val)?,
                        ))
                    })
                    .collect::<CodecResult<Vec<_>>>()
                    .map(Value::Map),
                other => Err(CodecError::unexpected(path, "map", other.kind_name())),
            },
            FieldKind::Nested(desc) => {
                let Value::Record(stored_fields) = stored else {
                    return Err(CodecError::unexpected(path, "record", stored.kind_name()));
                };
                let mut stored_fields: std::collections::BTreeMap<String, Value> =
                    stored_fields.into_iter().collect();
                let mut fields = Vec::with_capacity(desc.fields.len());
                for field in &desc.fields {
                    let child = self.join(path, field.name);
                    let v = match stored_fields.remove(field.name) {
                        Some(Value::Null) if !field.kind.is_nullable() => None,
                        Some(v) => Some(self.from_storage_value(&child, &field.kind, v)?),
                        None => None,
                    };
                    let v = match v {
                        Some(v) => v,
                        None => field
                            .default
                            .clone()
                            .ok_or_else(|| CodecError::missing_field(&child))?,
                    };
                    fields.push((field.name.to_string(), v));
                }
                Ok(Value::Record(fields))
            }
        }
    }

    fn encode_nested(
        &self,
        path: &str,
        descriptor: &TypeDescriptor,
        value: &Value,
        out: &mut FlatRow,
    ) -> CodecResult<()> {
        expect_record(path, value)?;
        for field in &descriptor.fields {
            let child = self.join(path, field.name);
            match value.get(field.name) {
                Some(v) => self.encode_field(&child, &field.kind, v, out)?,
                None => {
                    let default = field
                        .default
                        .as_ref()
                        .ok_or_else(|| CodecError::missing_field(&child))?;
                    self.encode_field(&child, &field.kind, default, out)?;
                }
            }
        }
        Ok(())
    }

    fn decode_nested(
        &self,
        path: &str,
        descriptor: &TypeDescriptor,
        row: &FlatRow,
        root: bool,
    ) -> CodecResult<Option<Value>> {
        let mut decoded = Vec::with_capacity(descriptor.fields.len());
        let mut any_present = false;
        for field in &descriptor.fields {
            let child = self.join(path, field.name);
            let value = self.decode_field(&child, &field.kind, row)?;
            any_present |= value.is_some();
            decoded.push((field, child, value));
        }
        if !any_present && !root {
            return Ok(None);
        }

        let mut fields = Vec::with_capacity(decoded.len());
        for (field, child, value) in decoded {
            let value = match value {
                Some(Value::Null) if !field.kind.is_nullable() => None,
                other => other,
            };
            let value = match value {
                Some(v) => v,
                None => field
                    .default
                    .clone()
                    .ok_or_else(|| CodecError::missing_field(child))?,
            };
            fields.push((field.name.to_string(), value));
        }
        Ok(Some(Value::Record(fields)))
    }

    fn encode_absent(&self, path: &str, inner: &FieldKind, out: &mut FlatRow) {
        let mut columns = Vec::new();
        self.columns_for(path, inner, true, &mut columns);
        for column in columns {
            out.insert(column.name, Value::Null);
        }
        if self.needs_presence(inner) {
            out.insert(self.presence_column(path), Value::Bool(false));
        }
    }

    /// Whether an optional wrapping `inner` needs a presence column.
    fn needs_presence(&self, inner: &FieldKind) -> bool {
        if self.converters.for_kind(inner).is_some() {
            return false;
        }
        match inner {
            FieldKind::Primitive(_)
            | FieldKind::List(_)
            | FieldKind::Set(_)
            | FieldKind::Map(_, _) => false,
            FieldKind::Inline { inner, .. } => self.needs_presence(inner),
            FieldKind::Nested(_) | FieldKind::Optional(_) => true,
        }
    }
}

fn check_primitive(path: &str, kind: PrimitiveKind, value: &Value) -> CodecResult<Value> {
    match (kind, value) {
        #[allow(clippy::cast_precision_loss)]
        (PrimitiveKind::Float, Value::Integer(n)) => Ok(Value::Float(*n as f64)),
        _ if kind.accepts(value) => Ok(value.clone()),
        _ => Err(CodecError::unexpected(
            path,
            format!("{kind:?}").to_lowercase(),
            value.kind_name(),
        )),
    }
}

pub(crate) fn expect_list<'a>(path: &str, value: &'a Value) -> CodecResult<&'a [Value]> {
    value
        .as_list()
        .ok_or_else(|| CodecError::unexpected(path, "list", value.kind_name()))
}

pub(crate) fn expect_map<'a>(path: &str, value: &'a Value) -> CodecResult<&'a [(Value, Value)]> {
    value
        .as_map()
        .ok_or_else(|| CodecError::unexpected(path, "map", value.kind_name()))
}

fn expect_record<'a>(path: &str, value: &'a Value) -> CodecResult<&'a [(String, Value)]> {
    value
        .as_record()
        .ok_or_else(|| CodecError::unexpected(path, "record", value.kind_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::RawTextConverter;
    use crate::{inline_shape, structure};
    use std::collections::{BTreeMap, BTreeSet};

    #[derive(Debug, Clone, PartialEq)]
    struct Address {
        city: String,
        zip: Option<String>,
    }

    structure!(Address {
        city: String,
        zip: Option<String>,
    });

    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
    struct Email(String);

    inline_shape!(Email(String));

    #[derive(Debug, Clone, PartialEq)]
    struct Person {
        name: String,
        age: i64,
        home: Address,
        work: Option<Address>,
        email: Email,
        scores: BTreeMap<String, i64>,
    }

    structure!(Person {
        name: String,
        age: i64 = 18,
        home: Address,
        work: Option<Address>,
        email: Email,
        scores: BTreeMap<String, i64>,
    });

    fn sample() -> Person {
        Person {
            name: "Ada".into(),
            age: 36,
            home: Address {
                city: "London".into(),
                zip: None,
            },
            work: Some(Address {
                city: "Cambridge".into(),
                zip: Some("CB1".into()),
            }),
            email: Email("ada@example.com".into()),
            scores: BTreeMap::from([("math".to_string(), 10)]),
        }
    }

    #[test]
    fn nested_fields_are_prefixed() {
        let row = MapFormat::native().encode_record(&sample()).unwrap();
        assert_eq!(row.get("home__city"), Some(&Value::Text("London".into())));
        assert_eq!(row.get("home__zip"), Some(&Value::Null));
        assert_eq!(row.get("work__exists"), Some(&Value::Bool(true)));
        assert_eq!(
            row.get("email"),
            Some(&Value::Text("ada@example.com".into()))
        );
    }

    #[test]
    fn null_optional_nulls_every_leaf() {
        let mut person = sample();
        person.work = None;
        let row = MapFormat::soa().encode_record(&person).unwrap();
        assert_eq!(row.get("work__exists"), Some(&Value::Bool(false)));
        assert_eq!(row.get("work__city"), Some(&Value::Null));
        assert_eq!(row.get("work__zip"), Some(&Value::Null));
    }

    #[test]
    fn roundtrip_native_and_soa() {
        for format in [MapFormat::native(), MapFormat::soa()] {
            let mut person = sample();
            let row = format.encode_record(&person).unwrap();
            assert_eq!(format.decode_record::<Person>(&row).unwrap(), person);

            person.work = None;
            let row = format.encode_record(&person).unwrap();
            assert_eq!(format.decode_record::<Person>(&row).unwrap(), person);
        }
    }

    #[test]
    fn unknown_columns_are_ignored() {
        let format = MapFormat::soa();
        let mut row = format.encode_record(&sample()).unwrap();
        row.insert("legacy_column", Value::Integer(1));
        assert_eq!(format.decode_record::<Person>(&row).unwrap(), sample());
    }

    #[test]
    fn missing_column_uses_default() {
        let format = MapFormat::soa();
        let mut row = format.encode_record(&sample()).unwrap();
        row.remove("age");
        assert_eq!(format.decode_record::<Person>(&row).unwrap().age, 18);

        // A column added later holds null for old rows.
        row.insert("age", Value::Null);
        assert_eq!(format.decode_record::<Person>(&row).unwrap().age, 18);
    }

    #[test]
    fn missing_required_column_fails() {
        let format = MapFormat::soa();
        let mut row = format.encode_record(&sample()).unwrap();
        row.remove("name");
        let err = format.decode_record::<Person>(&row).unwrap_err();
        assert_eq!(err, CodecError::missing_field("name"));
    }

    #[test]
    fn missing_optional_subtree_decodes_as_null() {
        let format = MapFormat::soa();
        let mut row = format.encode_record(&sample()).unwrap();
        for column in ["work__exists", "work__city", "work__zip"] {
            row.remove(column);
        }
        assert_eq!(format.decode_record::<Person>(&row).unwrap().work, None);
    }

    #[test]
    fn converter_takes_precedence() {
        let converters = ConverterRegistry::new().with::<Email>(RawTextConverter);
        let format = MapFormat::soa().with_converters(converters);
        let row = format.encode_record(&sample()).unwrap();
        assert_eq!(
            row.get("email"),
            Some(&Value::Text("ada@example.com".into()))
        );
        assert_eq!(format.decode_record::<Person>(&row).unwrap(), sample());
    }

    /// Stores integers as decimal text.
    struct DecimalText;

    impl crate::converter::ValueConverter for DecimalText {
        fn storage_kind(&self) -> PrimitiveKind {
            PrimitiveKind::Text
        }

        fn to_storage(&self, value: &Value) -> CodecResult<Value> {
            Ok(Value::Text(value.to_string()))
        }

        fn from_storage(&self, stored: Value) -> CodecResult<Value> {
            match stored {
                Value::Text(s) => s
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|e| CodecError::conversion_failed("i64", e.to_string())),
                other => Err(CodecError::conversion_failed("i64", other.kind_name())),
            }
        }
    }

    #[test]
    fn primitive_converters_apply_to_every_leaf_of_their_kind() {
        let converters = ConverterRegistry::new().with::<i64>(DecimalText);
        let format = MapFormat::soa().with_converters(converters);
        let row = format.encode_record(&sample()).unwrap();
        assert_eq!(row.get("age"), Some(&Value::Text("36".into())));
        assert_eq!(
            row.get("scores__value"),
            Some(&Value::List(vec![Value::Text("10".into())]))
        );
        let plan = format.column_plan(&descriptor_of::<Person>());
        assert_eq!(
            plan.get("age").unwrap().storage,
            StorageType::Scalar(PrimitiveKind::Text)
        );
        assert_eq!(format.decode_record::<Person>(&row).unwrap(), sample());
    }

    #[test]
    fn json_converter_collapses_nested_record() {
        let converters =
            ConverterRegistry::new().with::<Address>(crate::converter::JsonConverter);
        let format = MapFormat::soa().with_converters(converters);
        let row = format.encode_record(&sample()).unwrap();
        assert!(row.get("home").and_then(Value::as_text).is_some());
        assert!(!row.contains("home__city"));
        assert_eq!(format.decode_record::<Person>(&row).unwrap(), sample());
    }

    #[test]
    fn column_plan_matches_encoded_columns() {
        for format in [MapFormat::native(), MapFormat::soa()] {
            let desc = descriptor_of::<Person>();
            let plan = format.column_plan(&desc);
            let row = format.encode_record(&sample()).unwrap();
            let mut planned: Vec<_> = plan.names();
            planned.sort_unstable();
            let encoded: Vec<_> = row.columns().collect();
            assert_eq!(planned, encoded);
        }
    }

    #[test]
    fn column_path_joins_segments() {
        let format = MapFormat::soa();
        assert_eq!(format.column_path("home.city"), "home__city");
        assert_eq!(format.column_path("name"), "name");
        assert_eq!(format.join("", "x"), "x");
        assert_eq!(format.join("x", ""), "x");
    }

    #[test]
    fn custom_separator() {
        let format = MapFormat::new(
            MapFormatConfig::new().separator("_"),
            Arc::new(SoaCollectionHandler),
        );
        let row = format.encode_record(&sample()).unwrap();
        assert!(row.contains("home_city"));
    }

    #[test]
    fn sets_of_inline_values_roundtrip() {
        #[derive(Debug, Clone, PartialEq)]
        struct Mailing {
            to: BTreeSet<Email>,
        }
        structure!(Mailing {
            to: BTreeSet<Email>,
        });

        let mailing = Mailing {
            to: BTreeSet::from([Email("a@x".into()), Email("b@x".into())]),
        };
        for format in [MapFormat::native(), MapFormat::soa()] {
            let row = format.encode_record(&mailing).unwrap();
            assert_eq!(format.decode_record::<Mailing>(&row).unwrap(), mailing);
        }
    }

    #[test]
    fn type_mismatch_on_encode() {
        let desc = descriptor_of::<Address>();
        let bad = Value::record(vec![("city", Value::Integer(1))]);
        let err = MapFormat::soa().encode(&desc, &bad).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedValue { .. }));
    }
}
