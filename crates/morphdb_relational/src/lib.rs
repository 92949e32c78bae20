//! # MorphDB Relational
//!
//! Relational store adapter for MorphDB.
//!
//! Records are flattened with the structure-of-arrays
//! [`MapFormat`](morphdb_codec::MapFormat): every scalar leaf gets its own
//! column, lists of records become parallel array columns, maps become a
//! key array plus value arrays, and optional nested records get a
//! `__exists` presence column.
//!
//! ## Query Strategy
//!
//! - Conditions are lowered to one `WHERE` clause ([`Lowerer`]); terms that
//!   SQL cannot express are dropped from conjunctions and evaluated on the
//!   fetched rows
//! - Null ordering, `NOT` over unknown values and text collation are made
//!   to agree with client-side evaluation
//! - Single-record writes lock rows with `SELECT ... FOR UPDATE` inside a
//!   transaction; bulk writes with an exact filter are one statement
//! - Every query is reported to a [`QueryObserver`](morphdb_core::QueryObserver)
//!   before it runs, flagging full scans
//!
//! ## Backends
//!
//! - [`SqlExecutor`] and [`SqlTransaction`] - the driver seam
//! - [`MemorySqlExecutor`] - in-process executor for tests
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use morphdb_codec::structure;
//! use morphdb_core::{Condition, Entity, Modification, Table, TableOptions};
//! use morphdb_relational::{MemorySqlExecutor, RelationalConfig, RelationalTable};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Account { id: i64, owner: String, balance: i64 }
//! structure!(Account { id: i64, owner: String, balance: i64 });
//!
//! impl Entity for Account {
//!     type Id = i64;
//!     const ID_FIELD: &'static str = "id";
//!     fn id(&self) -> i64 { self.id }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let executor = Arc::new(MemorySqlExecutor::new());
//! let accounts: RelationalTable<Account> =
//!     RelationalTable::new(executor, RelationalConfig::new("bank"), &TableOptions::new());
//! accounts.ensure_schema().await.unwrap();
//! accounts.insert_one(Account { id: 1, owner: "ada".into(), balance: 10 }).await.unwrap();
//! let change = accounts
//!     .update_one(
//!         Condition::field_eq("id", 1),
//!         Modification::on_field("balance", Modification::Increment(5.into())),
//!     )
//!     .await
//!     .unwrap();
//! assert_eq!(change.new.map(|a| a.balance), Some(15));
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod executor;
mod lower;
mod memory;
mod schema;
mod statement;
mod table;

pub use config::RelationalConfig;
pub use executor::{SqlExecutor, SqlOutcome, SqlTransaction};
pub use lower::{bounding_box, LoweredFilter, Lowerer};
pub use memory::MemorySqlExecutor;
pub use schema::{sql_type, RelationalSchema};
pub use statement::{escape_like, like_matches, ColumnSpec, Comparison, SetExpr, SqlExpr, SqlStatement};
pub use table::RelationalTable;
