//! Relational database layer.
//!
//! This module provides:
//! - Pool managers for MySQL-protocol backends and PostgreSQL
//! - The shared `SqlExecutor` CRUD contract
//! - Placeholder translation and statement building
//! - Transaction scopes

pub mod builder;
pub mod executor;
pub mod macros;
pub mod mysql;
pub(crate) mod params;
pub mod placeholder;
pub mod postgres;
pub mod slot;
pub mod transaction;
pub mod types;

pub use builder::{Condition, Fields, SelectQuery, Statement};
pub use executor::SqlExecutor;
pub use mysql::MySqlManager;
pub use placeholder::{Dialect, Translated, translate};
pub use postgres::PostgresManager;
pub use slot::ResourceSlot;
pub use transaction::{MySqlTransaction, PgTransaction, TransactionScope};

use crate::models::Backend;

/// Generate a helpful suggestion for connection errors.
pub(crate) fn connection_suggestion(backend: Backend, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!("Check that the {} server is running and accessible", backend);
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the user and password settings".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    format!(
        "Verify host, port ({} by default) and database for {}",
        backend.default_port(),
        backend
    )
}
