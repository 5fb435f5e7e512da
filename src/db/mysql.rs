//! MySQL-protocol pool manager (MySQL, MariaDB, Doris).

use crate::db::connection_suggestion;
use crate::db::executor::{self, SqlExecutor};
use crate::db::placeholder::Dialect;
use crate::db::slot::ResourceSlot;
use crate::db::transaction::MySqlTransaction;
use crate::error::{DbError, DbResult};
use crate::models::{Backend, RelationalSettings, Row, SqlValue};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use sqlx::MySqlPool;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug)]
struct PoolHandle {
    pool: MySqlPool,
    settings: RelationalSettings,
}

/// Owns at most one MySQL connection pool between `init_pool` and `close`.
#[derive(Debug)]
pub struct MySqlManager {
    slot: ResourceSlot<PoolHandle>,
}

impl Default for MySqlManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MySqlManager {
    pub fn new() -> Self {
        Self {
            slot: ResourceSlot::new("MySQL pool"),
        }
    }

    /// Create the pool once. Later calls return immediately and ignore `settings`.
    pub async fn init_pool(&self, settings: RelationalSettings) -> DbResult<&Self> {
        settings.validate()?;

        let (handle, created) = self
            .slot
            .get_or_init(|| async {
                let pool = create_pool(&settings).await?;
                Ok(PoolHandle {
                    pool,
                    settings: settings.clone(),
                })
            })
            .await?;

        if created {
            info!(
                backend = %Backend::MySql,
                host = %handle.settings.host,
                port = handle.settings.port_or_default(Backend::MySql),
                database = %handle.settings.database,
                min_size = handle.settings.min_size,
                max_size = handle.settings.max_size,
                lazy = handle.settings.lazy,
                "Connection pool created"
            );
        } else {
            debug!(backend = %Backend::MySql, "Pool already initialized, ignoring new settings");
        }
        Ok(self)
    }

    /// Get the live pool.
    pub fn get_pool(&self) -> DbResult<MySqlPool> {
        self.slot.get().map(|h| h.pool.clone())
    }

    /// Settings the live pool was built with.
    pub fn settings(&self) -> Option<RelationalSettings> {
        self.slot.get().ok().map(|h| h.settings.clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.is_initialized()
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        if let Some(handle) = self.slot.take().await {
            handle.pool.close().await;
            info!(backend = %Backend::MySql, "Connection pool closed");
        }
    }

    /// Round-trip a trivial statement.
    pub async fn ping(&self) -> DbResult<()> {
        let pool = self.get_pool()?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }

    /// Begin a transaction on a dedicated connection.
    pub async fn transaction(&self) -> DbResult<MySqlTransaction> {
        let pool = self.get_pool()?;
        MySqlTransaction::begin(&pool, Backend::MySql).await
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back on `Err`.
    pub async fn run_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s MySqlTransaction) -> BoxFuture<'s, Result<T, E>>,
        E: From<DbError>,
    {
        let scope = self.transaction().await?;
        scope.run(f).await
    }
}

async fn create_pool(settings: &RelationalSettings) -> DbResult<MySqlPool> {
    let mut options = MySqlConnectOptions::new()
        .host(&settings.host)
        .port(settings.port_or_default(Backend::MySql))
        .username(&settings.user)
        .charset("utf8mb4");
    if !settings.password.is_empty() {
        options = options.password(&settings.password);
    }
    if !settings.database.is_empty() {
        options = options.database(&settings.database);
    }

    let mut pool_options = MySqlPoolOptions::new()
        .min_connections(settings.min_size)
        .max_connections(settings.max_size);
    if let Some(secs) = settings.acquire_timeout_secs {
        pool_options = pool_options.acquire_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = settings.idle_timeout_secs {
        pool_options = pool_options.idle_timeout(Duration::from_secs(secs));
    }

    if settings.lazy {
        return Ok(pool_options.connect_lazy_with(options));
    }

    pool_options.connect_with(options).await.map_err(|e| {
        DbError::connection(
            format!("Failed to connect: {}", e),
            connection_suggestion(Backend::MySql, &e),
        )
    })
}

#[async_trait]
impl SqlExecutor for MySqlManager {
    fn dialect(&self) -> Dialect {
        Dialect::QuestionMark
    }

    async fn execute_native(&self, sql: &str, values: &[SqlValue]) -> DbResult<u64> {
        let pool = self.get_pool()?;
        let mut conn = pool.acquire().await?;
        executor::mysql::execute(&mut conn, sql, values).await
    }

    async fn execute_many_native(&self, sql: &str, batches: &[Vec<SqlValue>]) -> DbResult<u64> {
        let pool = self.get_pool()?;
        let mut tx = pool.begin().await?;
        let total = executor::mysql::execute_many(&mut tx, sql, batches).await?;
        tx.commit().await?;
        Ok(total)
    }

    async fn fetch_optional_native(&self, sql: &str, values: &[SqlValue]) -> DbResult<Option<Row>> {
        let pool = self.get_pool()?;
        let mut conn = pool.acquire().await?;
        executor::mysql::fetch_optional(&mut conn, sql, values).await
    }

    async fn fetch_all_native(&self, sql: &str, values: &[SqlValue]) -> DbResult<Vec<Row>> {
        let pool = self.get_pool()?;
        let mut conn = pool.acquire().await?;
        executor::mysql::fetch_all(&mut conn, sql, values).await
    }
}
