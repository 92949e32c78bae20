//! # MorphDB Core
//!
//! Backend-neutral query algebra and table contract for MorphDB.
//!
//! This crate provides:
//! - [`Condition`] and [`Modification`] expression trees, built directly or
//!   through the typed [`FieldPath`] DSL
//! - [`evaluate`] and [`apply`], the reference semantics every backend
//!   must reproduce
//! - [`normalize`], which rewrites conditions into the canonical form
//!   adapters lower from
//! - the [`Table`] trait, the [`Entity`] trait for stored records and
//!   [`MemoryTable`], a client-side filtering implementation
//! - the [`geo`] module: haversine distance and geohash cells
//! - [`retry_backend`] and the [`QueryObserver`] analysis hook used by
//!   adapters
//!
//! ## Key Invariants
//!
//! - `normalize` is idempotent and preserves `evaluate` results
//! - Null sorts before every other value
//! - Conditions are validated against the record descriptor before any
//!   backend sees them

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod analysis;
mod condition;
mod config;
mod entity;
mod error;
mod eval;
pub mod geo;
mod memory;
mod modification;
mod normalize;
mod path;
mod query;
mod retry;
mod table;
mod validate;

pub use analysis::{report, CollectingObserver, NoopObserver, QueryAnalysis, QueryObserver};
pub use condition::Condition;
pub use config::{snake_case, DatabaseSettings, TableOptions};
pub use entity::{Entity, EntryChange};
pub use error::{CoreError, CoreResult};
pub use eval::{apply, evaluate, resolve_field};
pub use memory::MemoryTable;
pub use modification::Modification;
pub use normalize::{normalize, normalize_modification};
pub use path::{ConditionExt, FieldPath};
pub use query::{compare_by, Query, SortPart};
pub use retry::{retry_backend, RetryConfig};
pub use table::{collect_all, matches_record, modify, prepare_condition, prepare_modification, Table};
pub use validate::{validate_condition, validate_modification};
