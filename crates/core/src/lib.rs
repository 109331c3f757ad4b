//! Shared domain primitives for the moviehub workspace.
//!
//! - [`error`] -- the domain error taxonomy used across crates.
//! - [`types`] -- common type aliases (ids, timestamps).

pub mod error;
pub mod types;
