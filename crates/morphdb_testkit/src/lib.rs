//! # MorphDB Testkit
//!
//! Test utilities for MorphDB.
//!
//! This crate provides:
//! - Sample record types covering every field kind, with sample data
//! - Property-based test generators using proptest
//! - A tracing subscriber for tests
//!
//! ## Usage
//!
//! ```rust
//! use morphdb_core::{evaluate, Condition};
//! use morphdb_codec::Shape;
//! use morphdb_testkit::prelude::*;
//!
//! init_tracing();
//! let adults = Condition::on_field("age", Condition::GreaterThanOrEqual(18.into()));
//! let count = sample_people()
//!     .iter()
//!     .filter(|p| evaluate(&adults, &p.to_value()).unwrap())
//!     .count();
//! assert_eq!(count, 3);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
