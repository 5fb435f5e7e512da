//! Data models for the data-access facade.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{Backend, RelationalSettings, TransactionState};
pub use query::{Params, Row, SqlValue};
