//! # MorphDB Column Store
//!
//! Column-family store adapter for MorphDB.
//!
//! Records are flattened with the native [`MapFormat`](morphdb_codec::MapFormat)
//! into one row per record, keyed by the record identifier. Collections
//! live in single native columns and geo points get an extra geohash
//! column backed by a prefix index.
//!
//! ## Query Strategy
//!
//! - Conditions are lowered to a disjunction of selects ([`Lowerer`])
//! - Each select is a superset of its branch; the exact condition is always
//!   evaluated on fetched rows
//! - Disjunctions fan out with at most `fan_out_limit` selects in flight
//! - Every query is reported to a [`QueryObserver`](morphdb_core::QueryObserver)
//!   before it runs, flagging full scans
//!
//! ## Backends
//!
//! - [`CqlSession`] - the driver seam
//! - [`MemoryColumnStore`] - in-process session for tests
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use morphdb_codec::structure;
//! use morphdb_columnstore::{ColumnStoreConfig, ColumnStoreTable, MemoryColumnStore};
//! use morphdb_core::{Condition, Entity, Table, TableOptions};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct City { id: String, population: i64 }
//! structure!(City { id: String, population: i64 });
//!
//! impl Entity for City {
//!     type Id = String;
//!     const ID_FIELD: &'static str = "id";
//!     fn id(&self) -> String { self.id.clone() }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let session = Arc::new(MemoryColumnStore::new());
//! let cities: ColumnStoreTable<City> =
//!     ColumnStoreTable::new(session, ColumnStoreConfig::new("geo"), &TableOptions::new());
//! cities.ensure_schema().await.unwrap();
//! cities.insert_one(City { id: "osl".into(), population: 700_000 }).await.unwrap();
//! let found = cities.find_one(Condition::field_eq("id", "osl")).await.unwrap();
//! assert_eq!(found.map(|c| c.population), Some(700_000));
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod lower;
mod memory;
mod schema;
mod session;
mod statement;
mod table;

pub use config::{ColumnStoreConfig, DEFAULT_FAN_OUT_LIMIT};
pub use lower::{LoweredQuery, Lowerer, MAX_BRANCHES};
pub use memory::MemoryColumnStore;
pub use schema::{cql_type, TableSchema, GEOHASH_SUFFIX};
pub use session::{CqlResult, CqlSession};
pub use statement::{CqlStatement, Operator, Restriction};
pub use table::ColumnStoreTable;
