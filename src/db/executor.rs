//! Query execution.
//!
//! `SqlExecutor` is the CRUD contract shared by both relational pool managers
//! and by transaction scopes. Implementors only provide the four native
//! operations (statement already in the backend's marker style); every other
//! operation is a provided method that translates placeholders, builds the
//! statement and delegates.
//!
//! # Architecture
//!
//! The connection-level code is organized in parallel submodules:
//! - `mysql`: runs statements on a `MySqlConnection`
//! - `postgres`: runs statements on a `PgConnection`
//!
//! Both the pool path and the transaction path funnel through these functions,
//! so a statement behaves the same inside and outside a transaction.

use crate::db::builder::{self, Condition, Fields, SelectQuery, Statement};
use crate::db::placeholder::{self, Dialect};
use crate::error::{DbError, DbResult};
use crate::models::{Params, Row, SqlValue};
use async_trait::async_trait;
use tracing::debug;

/// CRUD contract shared by every relational executor.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Marker style this executor's backend understands.
    fn dialect(&self) -> Dialect;

    /// Run a native statement and return the rows affected.
    async fn execute_native(&self, sql: &str, values: &[SqlValue]) -> DbResult<u64>;

    /// Run a native statement once per batch, all-or-nothing.
    async fn execute_many_native(&self, sql: &str, batches: &[Vec<SqlValue>]) -> DbResult<u64>;

    /// Fetch at most one row of a native statement.
    async fn fetch_optional_native(&self, sql: &str, values: &[SqlValue]) -> DbResult<Option<Row>>;

    /// Fetch every row of a native statement.
    async fn fetch_all_native(&self, sql: &str, values: &[SqlValue]) -> DbResult<Vec<Row>>;

    // =========================================================================
    // Raw statements
    // =========================================================================

    /// Execute a write statement and return the number of affected rows.
    async fn execute(&self, sql: &str, params: Params) -> DbResult<u64> {
        let t = placeholder::translate(sql, &params, self.dialect())?;
        self.execute_native(&t.sql, &t.values).await
    }

    /// Execute a positional statement once per batch.
    ///
    /// The batch runs on a single connection inside one transaction. An empty
    /// batch returns 0 without touching the backend.
    async fn executemany(&self, sql: &str, batches: Vec<Vec<SqlValue>>) -> DbResult<u64> {
        let Some(first) = batches.first() else {
            return Ok(0);
        };

        let t = placeholder::translate(sql, &Params::Positional(first.clone()), self.dialect())?;
        let expected = placeholder::positional_count(sql);
        if expected > 0 {
            if let Some((idx, batch)) = batches
                .iter()
                .enumerate()
                .find(|(_, b)| b.len() != expected)
            {
                return Err(DbError::parameter_binding(format!(
                    "batch {} has {} values but the statement has {} positional markers",
                    idx,
                    batch.len(),
                    expected
                )));
            }
        }

        self.execute_many_native(&t.sql, &batches).await
    }

    /// Fetch a single row, or `None` when the statement returns nothing.
    async fn fetchone(&self, sql: &str, params: Params) -> DbResult<Option<Row>> {
        let t = placeholder::translate(sql, &params, self.dialect())?;
        self.fetch_optional_native(&t.sql, &t.values).await
    }

    /// Fetch every row.
    async fn fetchall(&self, sql: &str, params: Params) -> DbResult<Vec<Row>> {
        let t = placeholder::translate(sql, &params, self.dialect())?;
        self.fetch_all_native(&t.sql, &t.values).await
    }

    // =========================================================================
    // CRUD helpers
    // =========================================================================

    /// `INSERT INTO table (...) VALUES (...)`
    async fn insert(&self, table: &str, fields: &Fields) -> DbResult<u64> {
        let stmt = builder::insert(table, fields)?;
        self.execute(&stmt.sql, stmt.params()).await
    }

    /// Insert many records sharing the first record's columns.
    async fn insert_many(&self, table: &str, records: &[Fields]) -> DbResult<u64> {
        match builder::insert_many(table, records)? {
            Some(batch) => self.executemany(&batch.sql, batch.rows).await,
            None => Ok(0),
        }
    }

    /// `UPDATE table SET ... WHERE condition`
    async fn update(&self, table: &str, fields: &Fields, condition: &Condition) -> DbResult<u64> {
        let stmt = builder::update(table, fields, condition)?;
        self.execute(&stmt.sql, stmt.params()).await
    }

    /// `DELETE FROM table WHERE condition`
    async fn delete(&self, table: &str, condition: &Condition) -> DbResult<u64> {
        let stmt = builder::delete(table, condition)?;
        self.execute(&stmt.sql, stmt.params()).await
    }

    /// Fetch the row whose `id` column equals `id`.
    async fn get_by_id(&self, table: &str, id: SqlValue) -> DbResult<Option<Row>> {
        self.get_by_id_column(table, id, "id").await
    }

    /// Fetch the row whose `column` equals `id`.
    async fn get_by_id_column(
        &self,
        table: &str,
        id: SqlValue,
        column: &str,
    ) -> DbResult<Option<Row>> {
        let stmt = builder::get_by_id(table, column, id)?;
        self.fetchone(&stmt.sql, stmt.params()).await
    }

    /// Run a SELECT built with `SelectQuery`.
    async fn query(&self, query: &SelectQuery) -> DbResult<Vec<Row>> {
        let stmt = builder::select(query)?;
        self.fetchall(&stmt.sql, stmt.params()).await
    }

    /// Count rows, optionally filtered. Returns 0 when no row comes back.
    async fn count(&self, table: &str, condition: Option<&Condition>) -> DbResult<i64> {
        let stmt: Statement = builder::count(table, condition)?;
        match self.fetchone(&stmt.sql, stmt.params()).await? {
            Some(row) => count_from_row(&row),
            None => Ok(0),
        }
    }
}

/// Read the `count` column, which may come back as a number or a decimal string.
fn count_from_row(row: &Row) -> DbResult<i64> {
    let parsed = match row.get("count") {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        DbError::internal(format!(
            "COUNT(*) returned an unusable value: {:?}",
            row.get("count")
        ))
    })
}

fn log_statement(sql: &str, values: &[SqlValue]) {
    debug!(sql = %sql, params = values.len(), "Executing statement");
}

// =============================================================================
// Backend-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its backend.

pub(crate) mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_all;
    use crate::db::types::RowToJson;
    use sqlx::{Executor, MySqlConnection};

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        values: &[SqlValue],
    ) -> DbResult<u64> {
        log_statement(sql, values);
        // When values is empty, execute raw SQL directly to avoid prepared statement issues
        // (some SQL like CREATE PROCEDURE doesn't support prepared statements)
        let result = if values.is_empty() {
            (&mut *conn).execute(sql).await?
        } else {
            bind_mysql_all(sql, values).execute(&mut *conn).await?
        };
        Ok(result.rows_affected())
    }

    pub async fn execute_many(
        conn: &mut MySqlConnection,
        sql: &str,
        batches: &[Vec<SqlValue>],
    ) -> DbResult<u64> {
        let mut total = 0;
        for values in batches {
            total += bind_mysql_all(sql, values)
                .execute(&mut *conn)
                .await?
                .rows_affected();
        }
        debug!(sql = %sql, batches = batches.len(), rows_affected = total, "Executed batch");
        Ok(total)
    }

    pub async fn fetch_optional(
        conn: &mut MySqlConnection,
        sql: &str,
        values: &[SqlValue],
    ) -> DbResult<Option<Row>> {
        log_statement(sql, values);
        let row = if values.is_empty() {
            (&mut *conn).fetch_optional(sql).await?
        } else {
            bind_mysql_all(sql, values)
                .fetch_optional(&mut *conn)
                .await?
        };
        row.map(|r| r.to_json_map()).transpose()
    }

    pub async fn fetch_all(
        conn: &mut MySqlConnection,
        sql: &str,
        values: &[SqlValue],
    ) -> DbResult<Vec<Row>> {
        log_statement(sql, values);
        let rows = if values.is_empty() {
            (&mut *conn).fetch_all(sql).await?
        } else {
            bind_mysql_all(sql, values).fetch_all(&mut *conn).await?
        };
        rows.iter().map(|r| r.to_json_map()).collect()
    }
}

pub(crate) mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_all;
    use crate::db::types::RowToJson;
    use sqlx::{Executor, PgConnection};

    pub async fn execute(conn: &mut PgConnection, sql: &str, values: &[SqlValue]) -> DbResult<u64> {
        log_statement(sql, values);
        let result = if values.is_empty() {
            (&mut *conn).execute(sql).await?
        } else {
            bind_postgres_all(sql, values).execute(&mut *conn).await?
        };
        Ok(result.rows_affected())
    }

    pub async fn execute_many(
        conn: &mut PgConnection,
        sql: &str,
        batches: &[Vec<SqlValue>],
    ) -> DbResult<u64> {
        let mut total = 0;
        for values in batches {
            total += bind_postgres_all(sql, values)
                .execute(&mut *conn)
                .await?
                .rows_affected();
        }
        debug!(sql = %sql, batches = batches.len(), rows_affected = total, "Executed batch");
        Ok(total)
    }

    pub async fn fetch_optional(
        conn: &mut PgConnection,
        sql: &str,
        values: &[SqlValue],
    ) -> DbResult<Option<Row>> {
        log_statement(sql, values);
        let row = if values.is_empty() {
            (&mut *conn).fetch_optional(sql).await?
        } else {
            bind_postgres_all(sql, values)
                .fetch_optional(&mut *conn)
                .await?
        };
        row.map(|r| r.to_json_map()).transpose()
    }

    pub async fn fetch_all(
        conn: &mut PgConnection,
        sql: &str,
        values: &[SqlValue],
    ) -> DbResult<Vec<Row>> {
        log_statement(sql, values);
        let rows = if values.is_empty() {
            (&mut *conn).fetch_all(sql).await?
        } else {
            bind_postgres_all(sql, values).fetch_all(&mut *conn).await?
        };
        rows.iter().map(|r| r.to_json_map()).collect()
    }
}
