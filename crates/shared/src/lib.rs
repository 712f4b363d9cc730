//! Launchkit Shared Infrastructure
//!
//! This crate contains the database pool, the key-value cache handle, and
//! common types shared across the launchkit workspace.

pub mod cache;
pub mod db;
pub mod error;
pub mod types;

pub use cache::{CacheError, KvCache};
pub use db::*;
pub use error::{is_unique_violation, DbError};
pub use types::*;
