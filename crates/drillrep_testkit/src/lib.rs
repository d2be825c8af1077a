//! # drillrep testkit
//!
//! Test utilities for drillrep.
//!
//! This crate provides:
//! - Property-based test generators using proptest
//! - Credential fixtures covering every stored scheme
//! - Scripted backend candidate lists for resolver tests
//! - A seeded SQLite user store in a temporary directory

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
