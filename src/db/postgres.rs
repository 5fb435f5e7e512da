//! PostgreSQL pool manager.

use crate::db::connection_suggestion;
use crate::db::executor::{self, SqlExecutor};
use crate::db::placeholder::Dialect;
use crate::db::slot::ResourceSlot;
use crate::db::transaction::PgTransaction;
use crate::error::{DbError, DbResult};
use crate::models::{Backend, RelationalSettings, Row, SqlValue};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug)]
struct PoolHandle {
    pool: PgPool,
    settings: RelationalSettings,
}

/// Owns at most one PostgreSQL connection pool between `init_pool` and `close`.
#[derive(Debug)]
pub struct PostgresManager {
    slot: ResourceSlot<PoolHandle>,
}

impl Default for PostgresManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PostgresManager {
    pub fn new() -> Self {
        Self {
            slot: ResourceSlot::new("PostgreSQL pool"),
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
                backend = %Backend::Postgres,
                host = %handle.settings.host,
                port = handle.settings.port_or_default(Backend::Postgres),
                database = %handle.settings.database,
                min_size = handle.settings.min_size,
                max_size = handle.settings.max_size,
                lazy = handle.settings.lazy,
                "Connection pool created"
            );
        } else {
            debug!(backend = %Backend::Postgres, "Pool already initialized, ignoring new settings");
        }
        Ok(self)
    }

    /// Get the live pool.
    pub fn get_pool(&self) -> DbResult<PgPool> {
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
            info!(backend = %Backend::Postgres, "Connection pool closed");
        }
    }

    /// Round-trip a trivial statement.
    pub async fn ping(&self) -> DbResult<()> {
        let pool = self.get_pool()?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }

    /// Begin a transaction on a dedicated connection.
    pub async fn transaction(&self) -> DbResult<PgTransaction> {
        let pool = self.get_pool()?;
        PgTransaction::begin(&pool, Backend::Postgres).await
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back on `Err`.
    pub async fn run_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s PgTransaction) -> BoxFuture<'s, Result<T, E>>,
        E: From<DbError>,
    {
        let scope = self.transaction().await?;
        scope.run(f).await
    }
}

async fn create_pool(settings: &RelationalSettings) -> DbResult<PgPool> {
    let mut options = PgConnectOptions::new()
        .host(&settings.host)
        .port(settings.port_or_default(Backend::Postgres))
        .username(&settings.user)
        .application_name("db-facade");
    if !settings.password.is_empty() {
        options = options.password(&settings.password);
    }
    if !settings.database.is_empty() {
        options = options.database(&settings.database);
    }

    let mut pool_options = PgPoolOptions::new()
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
            connection_suggestion(Backend::Postgres, &e),
        )
    })
}

#[async_trait]
impl SqlExecutor for PostgresManager {
    fn dialect(&self) -> Dialect {
        Dialect::Numbered
    }

    async fn execute_native(&self, sql: &str, values: &[SqlValue]) -> DbResult<u64> {
        let pool = self.get_pool()?;
        let mut conn = pool.acquire().await?;
        executor::postgres::execute(&mut conn, sql, values).await
    }

    async fn execute_many_native(&self, sql: &str, batches: &[Vec<SqlValue>]) -> DbResult<u64> {
        let pool = self.get_pool()?;
        let mut tx = pool.begin().await?;
        let total = executor::postgres::execute_many(&mut tx, sql, batches).await?;
        tx.commit().await?;
        Ok(total)
    }

    async fn fetch_optional_native(&self, sql: &str, values: &[SqlValue]) -> DbResult<Option<Row>> {
        let pool = self.get_pool()?;
        let mut conn = pool.acquire().await?;
        executor::postgres::fetch_optional(&mut conn, sql, values).await
    }

    async fn fetch_all_native(&self, sql: &str, values: &[SqlValue]) -> DbResult<Vec<Row>> {
        let pool = self.get_pool()?;
        let mut conn = pool.acquire().await?;
        executor::postgres::fetch_all(&mut conn, sql, values).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lazy_settings(max_size: u32) -> RelationalSettings {
        RelationalSettings {
            host: "127.0.0.1".into(),
            port: Some(5432),
            user: "postgres".into(),
            database: "test".into(),
            min_size: 0,
            max_size,
            lazy: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_get_pool_before_init() {
        let manager = PostgresManager::new();
        let err = manager.get_pool().unwrap_err();
        assert!(matches!(err, DbError::NotInitialized { .. }));
        assert!(manager.settings().is_none());
    }

    #[tokio::test]
    async fn test_init_pool_is_idempotent() {
        let manager = PostgresManager::new();
        manager.init_pool(lazy_settings(4)).await.unwrap();
        manager.init_pool(lazy_settings(9)).await.unwrap();

        assert_eq!(manager.settings().unwrap().max_size, 4);
        assert_eq!(manager.get_pool().unwrap().options().get_max_connections(), 4);
    }

    #[tokio::test]
    async fn test_init_pool_rejects_invalid_settings() {
        let manager = PostgresManager::new();
        let err = manager.init_pool(lazy_settings(0)).await.unwrap_err();
        assert!(matches!(err, DbError::Config { .. }));
        assert!(!manager.is_initialized());
    }

    #[tokio::test]
    async fn test_close_then_reinit() {
        let manager = PostgresManager::new();
        manager.init_pool(lazy_settings(2)).await.unwrap();
        manager.close().await;
        assert!(!manager.is_initialized());
        // Closing twice is a no-op
        manager.close().await;

        manager.init_pool(lazy_settings(3)).await.unwrap();
        assert_eq!(manager.settings().unwrap().max_size, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_init_pool_creates_one_pool() {
        let manager = std::sync::Arc::new(PostgresManager::new());

        let tasks: Vec<_> = (1..=8u32)
            .map(|size| {
                let manager = std::sync::Arc::clone(&manager);
                tokio::spawn(async move {
                    manager.init_pool(lazy_settings(size)).await.map(|_| ())
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let size = manager.settings().unwrap().max_size;
        assert_eq!(manager.get_pool().unwrap().options().get_max_connections(), size);
        assert_eq!(manager.slot.generation(), 1);
    }

    #[tokio::test]
    async fn test_fetch_before_init() {
        let manager = PostgresManager::new();
        let err = manager
            .fetchall("SELECT * FROM users WHERE id = %s", crate::params![1])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotInitialized { .. }));
        assert!(manager.ping().await.is_err());
    }
}
