//! # MorphDB Codec
//!
//! Structural mapping between typed records and flat rows.
//!
//! This crate provides:
//! - [`Value`], the dynamic value tree every record converts to
//! - [`TypeDescriptor`], the compile-time field structure of a record type,
//!   produced by the [`structure!`] and [`inline_shape!`] macros
//! - [`MapFormat`], the encoder/decoder between records and [`FlatRow`]s
//! - [`CollectionHandler`] strategies for lists, sets and maps: one native
//!   column per collection, or structure-of-arrays
//! - [`ConverterRegistry`], per-type scalar encodings
//!
//! ## Usage
//!
//! ```
//! use morphdb_codec::{structure, MapFormat, Value};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Address {
//!     city: String,
//! }
//! structure!(Address { city: String });
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct User {
//!     name: String,
//!     homes: Vec<Address>,
//! }
//! structure!(User { name: String, homes: Vec<Address> });
//!
//! let user = User {
//!     name: "Ada".into(),
//!     homes: vec![Address { city: "London".into() }],
//! };
//!
//! let format = MapFormat::soa();
//! let row = format.encode_record(&user).unwrap();
//! assert_eq!(row.get("homes__city"), Some(&Value::List(vec!["London".into()])));
//! assert_eq!(format.decode_record::<User>(&row).unwrap(), user);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod converter;
mod descriptor;
mod error;
mod format;
mod point;
mod row;
mod shape;
mod soa;
mod value;

pub use collection::{CollectionHandler, NativeCollectionHandler};
pub use converter::{ConverterRegistry, JsonConverter, RawTextConverter, ValueConverter};
pub use descriptor::{
    descriptor_of, short_type_name, FieldDescriptor, FieldKind, PrimitiveKind, TypeDescriptor,
};
pub use error::{CodecError, CodecResult};
pub use format::{MapFormat, MapFormatConfig, MAP_VALUE_SUFFIX, PRESENCE_SUFFIX};
pub use point::GeoPoint;
pub use row::{ColumnDef, ColumnPlan, FlatRow, StorageType};
pub use shape::{dedup_values, RecordFields, Shape, Structure};
pub use soa::SoaCollectionHandler;
pub use value::{OrderedValue, Value};
