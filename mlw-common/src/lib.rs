//! # mlw-common
//!
//! Shared code for the ML annotation worker:
//! - Process-local SQLite cache (schema, version gate, parent merge, queries)
//! - Inter-task cache path layout
//! - Common error type

pub mod cache;
pub mod error;
pub mod paths;

pub use cache::{CacheStore, CacheTable, OpenMode};
pub use error::{Error, Result};
