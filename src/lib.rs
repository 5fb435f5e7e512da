//! db-facade library
//!
//! Pooled data access over MySQL-protocol stores, PostgreSQL, Redis and
//! MongoDB behind one error type and one set of lifecycle hooks.

pub mod cache;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod lifecycle;
pub mod models;

pub use config::ConfigStore;
pub use error::{DbError, DbResult};
pub use lifecycle::{Backends, backends};
