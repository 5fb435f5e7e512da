//! Transaction scopes.
//!
//! A `TransactionScope` owns one pooled connection with an open transaction.
//! Statements run through the scope's `SqlExecutor` implementation, one at a
//! time. The scope ends in exactly one of two ways:
//!
//! - `commit(self)` or `rollback(self)`, called explicitly or by `run`
//! - being dropped while still active, in which case sqlx rolls the
//!   transaction back and returns the connection to its pool
//!
//! ```ignore
//! let id = mysql
//!     .run_transaction(|tx| {
//!         Box::pin(async move {
//!             tx.insert("orders", &order).await?;
//!             tx.execute("UPDATE stock SET qty = qty - 1 WHERE sku = ?", params![sku]).await?;
//!             Ok::<_, DbError>(order_id)
//!         })
//!     })
//!     .await?;
//! ```

use crate::db::executor::{self, SqlExecutor};
use crate::db::placeholder::Dialect;
use crate::error::{DbError, DbResult};
use crate::models::{Backend, Row, SqlValue, TransactionState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use sqlx::{Connection, Database, MySql, Pool, Postgres, Transaction};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

struct ScopeInner<DB: Database> {
    tx: Option<Transaction<'static, DB>>,
    state: TransactionState,
}

/// An open transaction on a dedicated connection.
pub struct TransactionScope<DB: Database> {
    id: String,
    backend: Backend,
    started_at: DateTime<Utc>,
    inner: Mutex<ScopeInner<DB>>,
}

/// Transaction scope on a MySQL-protocol backend.
pub type MySqlTransaction = TransactionScope<MySql>;

/// Transaction scope on PostgreSQL.
pub type PgTransaction = TransactionScope<Postgres>;

impl<DB: Database> std::fmt::Debug for TransactionScope<DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("id", &self.id)
            .field("backend", &self.backend)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

fn ended_error(id: &str, state: TransactionState) -> DbError {
    DbError::transaction(format!("Transaction '{}' has already {}", id, state))
}

impl<DB: Database> TransactionScope<DB> {
    /// Acquire a connection from `pool` and begin a transaction on it.
    pub(crate) async fn begin(pool: &Pool<DB>, backend: Backend) -> DbResult<Self> {
        let tx = pool.begin().await?;
        let id = uuid::Uuid::new_v4().to_string();
        debug!(transaction_id = %id, backend = %backend, "Transaction started");

        Ok(Self {
            id,
            backend,
            started_at: Utc::now(),
            inner: Mutex::new(ScopeInner {
                tx: Some(tx),
                state: TransactionState::Active,
            }),
        })
    }

    /// Unique identifier used in log records.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub async fn state(&self) -> TransactionState {
        self.inner.lock().await.state
    }

    /// Borrow the underlying driver connection.
    ///
    /// The guard blocks every other statement on this scope until it is
    /// dropped, so do not hold it across calls to the scope's own methods.
    pub async fn connection(&self) -> DbResult<MappedMutexGuard<'_, DB::Connection>> {
        let guard = self.inner.lock().await;
        let state = guard.state;
        MutexGuard::try_map(guard, |inner| inner.tx.as_deref_mut())
            .map_err(|_| ended_error(&self.id, state))
    }

    /// Commit the transaction and release its connection.
    pub async fn commit(self) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        let tx = inner.tx.take().ok_or_else(|| ended_error(&self.id, inner.state))?;

        match tx.commit().await {
            Ok(()) => {
                inner.state = TransactionState::Committed;
                info!(transaction_id = %self.id, backend = %self.backend, "Transaction committed");
                Ok(())
            }
            Err(e) => {
                inner.state = TransactionState::RolledBack;
                error!(transaction_id = %self.id, error = %e, "Transaction commit failed");
                Err(e.into())
            }
        }
    }

    /// Roll the transaction back and release its connection.
    pub async fn rollback(self) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        let tx = inner.tx.take().ok_or_else(|| ended_error(&self.id, inner.state))?;

        inner.state = TransactionState::RolledBack;
        tx.rollback().await?;
        info!(transaction_id = %self.id, backend = %self.backend, "Transaction rolled back");
        Ok(())
    }

    /// Run `f` inside this transaction.
    ///
    /// `Ok` commits and returns the value; a commit failure is returned.
    /// `Err` rolls back and returns the closure's error unchanged, even when
    /// the rollback itself fails (that failure is logged).
    pub async fn run<F, T, E>(self, f: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s Self) -> BoxFuture<'s, Result<T, E>>,
        E: From<DbError>,
    {
        let outcome = f(&self).await;
        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                let id = self.id.clone();
                if let Err(rollback_err) = self.rollback().await {
                    error!(
                        transaction_id = %id,
                        error = %rollback_err,
                        "Rollback failed after transaction body error"
                    );
                }
                Err(e)
            }
        }
    }
}

impl<DB: Database> Drop for TransactionScope<DB> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.tx.is_some() {
            // Dropping the sqlx transaction issues the rollback
            warn!(
                transaction_id = %self.id,
                backend = %self.backend,
                "Transaction scope dropped while active, rolling back"
            );
            inner.state = TransactionState::RolledBack;
            inner.tx = None;
        }
    }
}

// =============================================================================
// SqlExecutor implementations
// =============================================================================

#[async_trait]
impl SqlExecutor for TransactionScope<MySql> {
    fn dialect(&self) -> Dialect {
        Dialect::QuestionMark
    }

    async fn execute_native(&self, sql: &str, values: &[SqlValue]) -> DbResult<u64> {
        let mut conn = self.connection().await?;
        executor::mysql::execute(&mut conn, sql, values).await
    }

    async fn execute_many_native(&self, sql: &str, batches: &[Vec<SqlValue>]) -> DbResult<u64> {
        let mut conn = self.connection().await?;
        // Savepoint keeps the batch all-or-nothing within the outer transaction
        let mut savepoint = conn.begin().await?;
        let total = executor::mysql::execute_many(&mut savepoint, sql, batches).await?;
        savepoint.commit().await?;
        Ok(total)
    }

    async fn fetch_optional_native(&self, sql: &str, values: &[SqlValue]) -> DbResult<Option<Row>> {
        let mut conn = self.connection().await?;
        executor::mysql::fetch_optional(&mut conn, sql, values).await
    }

    async fn fetch_all_native(&self, sql: &str, values: &[SqlValue]) -> DbResult<Vec<Row>> {
        let mut conn = self.connection().await?;
        executor::mysql::fetch_all(&mut conn, sql, values).await
    }
}

#[async_trait]
impl SqlExecutor for TransactionScope<Postgres> {
    fn dialect(&self) -> Dialect {
        Dialect::Numbered
    }

    async fn execute_native(&self, sql: &str, values: &[SqlValue]) -> DbResult<u64> {
        let mut conn = self.connection().await?;
        executor::postgres::execute(&mut conn, sql, values).await
    }

    async fn execute_many_native(&self, sql: &str, batches: &[Vec<SqlValue>]) -> DbResult<u64> {
        let mut conn = self.connection().await?;
        let mut savepoint = conn.begin().await?;
        let total = executor::postgres::execute_many(&mut savepoint, sql, batches).await?;
        savepoint.commit().await?;
        Ok(total)
    }

    async fn fetch_optional_native(&self, sql: &str, values: &[SqlValue]) -> DbResult<Option<Row>> {
        let mut conn = self.connection().await?;
        executor::postgres::fetch_optional(&mut conn, sql, values).await
    }

    async fn fetch_all_native(&self, sql: &str, values: &[SqlValue]) -> DbResult<Vec<Row>> {
        let mut conn = self.connection().await?;
        executor::postgres::fetch_all(&mut conn, sql, values).await
    }
}
