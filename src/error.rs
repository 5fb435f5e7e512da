//! Error types for the data-access facade.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Driver errors from sqlx, redis and mongodb are converted into `DbError` so every
//! backend surfaces failures through the same taxonomy.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("{resource} is not initialized")]
    NotInitialized { resource: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} timed out")]
    Timeout { operation: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Parameter binding failed: {message}")]
    ParameterBinding { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("Document store error: {message}")]
    Document { message: String },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an uninitialized-resource error.
    pub fn not_initialized(resource: impl Into<String>) -> Self {
        Self::NotInitialized {
            resource: resource.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn parameter_binding(message: impl Into<String>) -> Self {
        Self::ParameterBinding {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    pub fn document(message: impl Into<String>) -> Self {
        Self::Document {
            message: message.into(),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Suggestion for a server-side error, keyed on the SQLSTATE class.
fn sql_state_suggestion(code: Option<&str>) -> &'static str {
    match code.map(|c| c.get(..2).unwrap_or(c)) {
        Some("23") => "Check unique, foreign key and NOT NULL constraints",
        Some("42") => "Check the SQL syntax and that referenced tables and columns exist",
        Some("40") => "The transaction was rolled back by the server; run it again",
        Some("28") => "Verify the user and password settings",
        Some("08") => "Check network connectivity and database server status",
        _ => "Check the statement and its parameters",
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned());
                let suggestion = sql_state_suggestion(code.as_deref());
                DbError::database(db_err.message(), code, suggestion)
            }
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire"),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Initialize the pool again")
            }
            sqlx::Error::Configuration(_)
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_) => DbError::connection(
                err.to_string(),
                "Check the host, port, credentials and TLS settings",
            ),
            sqlx::Error::RowNotFound => {
                DbError::database("No rows returned", None, "The statement matched no row")
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::invalid_input(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DbError::serialization(err.to_string())
            }
            other => DbError::internal(other.to_string()),
        }
    }
}

/// Convert redis errors to DbError.
impl From<redis::RedisError> for DbError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            DbError::connection(
                format!("Redis connection error: {}", err),
                "Check that the Redis server is running and the URL is correct",
            )
        } else if err.is_timeout() {
            DbError::timeout("redis command")
        } else {
            DbError::cache(err.to_string())
        }
    }
}

/// Convert mongodb errors to DbError.
impl From<mongodb::error::Error> for DbError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;

        match err.kind.as_ref() {
            ErrorKind::ServerSelection { message, .. } => DbError::connection(
                format!("MongoDB server selection failed: {}", message),
                "Check the host list, port and replica set configuration",
            ),
            ErrorKind::Authentication { message, .. } => DbError::connection(
                format!("MongoDB authentication failed: {}", message),
                "Verify the username, password and authSource",
            ),
            ErrorKind::Io(io_err) => DbError::connection(
                format!("MongoDB I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            _ => DbError::document(err.to_string()),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
