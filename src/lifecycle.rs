//! Process-wide backend registry and lifecycle hooks.
//!
//! `backends()` returns the one `Backends` value per process. An orchestrator
//! calls `init_from_config` at startup and `close_all` at shutdown; request
//! code reaches the managers through the same registry.

use crate::cache::{CacheManager, CacheSettings};
use crate::config::ConfigStore;
use crate::db::{MySqlManager, PostgresManager};
use crate::document::{DocumentManager, DocumentSettings};
use crate::error::DbResult;
use crate::models::{Backend, RelationalSettings};
use serde::Serialize;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{info, warn};

static BACKENDS: LazyLock<Backends> = LazyLock::new(Backends::new);

/// The process-wide registry.
pub fn backends() -> &'static Backends {
    &BACKENDS
}

#[derive(Debug, Default)]
pub struct Backends {
    pub mysql: MySqlManager,
    /// Doris speaks the MySQL protocol and gets its own pool.
    pub doris: MySqlManager,
    pub postgres: PostgresManager,
    pub cache: CacheManager,
    pub documents: DocumentManager,
}

/// Health of one initialized backend.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub name: &'static str,
    pub backend: Backend,
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn probe<F>(name: &'static str, backend: Backend, ping: F) -> HealthReport
where
    F: Future<Output = DbResult<()>>,
{
    let start = Instant::now();
    let result = ping.await;
    let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    match result {
        Ok(()) => HealthReport {
            name,
            backend,
            healthy: true,
            latency_ms,
            error: None,
        },
        Err(e) => {
            warn!(check = name, backend = %backend, error = %e, "Health check failed");
            HealthReport {
                name,
                backend,
                healthy: false,
                latency_ms,
                error: Some(e.to_string()),
            }
        }
    }
}

impl Backends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize every backend whose `enable_*` flag is set.
    ///
    /// | flag | section |
    /// |---|---|
    /// | `enable_mariadb` | `mariadb` |
    /// | `enable_doris` | `doris` |
    /// | `enable_postgresql` | `postgresql` |
    /// | `enable_redis` | `redis` (`from_url`, `cluster_nodes`) |
    /// | `enable_mongodb` | `mongodb` |
    ///
    /// Stops at the first failure; backends initialized before it stay up.
    /// Returns the names of the backends that were initialized.
    pub async fn init_from_config(&self, config: &ConfigStore) -> DbResult<Vec<&'static str>> {
        let mut enabled = Vec::new();

        if config.flag("enable_mariadb") {
            info!("Initializing MariaDB pool...");
            let settings: RelationalSettings = config.section("mariadb")?;
            self.mysql.init_pool(settings).await?;
            enabled.push("mariadb");
        }

        if config.flag("enable_doris") {
            info!("Initializing Doris pool...");
            let settings: RelationalSettings = config.section("doris")?;
            self.doris.init_pool(settings).await?;
            enabled.push("doris");
        }

        if config.flag("enable_postgresql") {
            info!("Initializing PostgreSQL pool...");
            let settings: RelationalSettings = config.section("postgresql")?;
            self.postgres.init_pool(settings).await?;
            enabled.push("postgresql");
        }

        if config.flag("enable_redis") {
            info!("Initializing Redis client...");
            let settings: CacheSettings = config.section("redis")?;
            self.cache.init_client(settings).await?;
            enabled.push("redis");
        }

        if config.flag("enable_mongodb") {
            info!("Initializing MongoDB client...");
            let settings: DocumentSettings = config.section("mongodb")?;
            self.documents.init_client(settings).await?;
            enabled.push("mongodb");
        }

        info!(backends = ?enabled, "Backends initialized");
        Ok(enabled)
    }

    /// Ping every initialized backend.
    pub async fn health_check(&self) -> Vec<HealthReport> {
        let mut reports = Vec::new();
        if self.mysql.is_initialized() {
            reports.push(probe("mariadb", Backend::MySql, self.mysql.ping()).await);
        }
        if self.doris.is_initialized() {
            reports.push(probe("doris", Backend::MySql, self.doris.ping()).await);
        }
        if self.postgres.is_initialized() {
            reports.push(probe("postgresql", Backend::Postgres, self.postgres.ping()).await);
        }
        if self.cache.is_initialized() {
            reports.push(probe("redis", Backend::Redis, self.cache.ping()).await);
        }
        if self.documents.is_initialized() {
            reports.push(probe("mongodb", Backend::MongoDb, self.documents.ping()).await);
        }
        reports
    }

    /// Close every backend. Safe to call repeatedly and in any state.
    pub async fn close_all(&self) {
        tokio::join!(
            self.mysql.close(),
            self.doris.close(),
            self.postgres.close(),
            self.cache.close(),
            self.documents.close(),
        );
        info!("All backends closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;

    #[tokio::test]
    async fn test_nothing_enabled() {
        let backends = Backends::new();
        let config = ConfigStore::from_yaml_str("enable_redis: false\n").unwrap();
        let enabled = backends.init_from_config(&config).await.unwrap();
        assert!(enabled.is_empty());
        assert!(backends.health_check().await.is_empty());
        backends.close_all().await;
    }

    #[tokio::test]
    async fn test_enabled_section_missing() {
        let backends = Backends::new();
        let config = ConfigStore::from_yaml_str("enable_postgresql: true\n").unwrap();
        let err = backends.init_from_config(&config).await.unwrap_err();
        assert!(matches!(err, DbError::Config { .. }));
        assert!(!backends.postgres.is_initialized());
    }

    #[tokio::test]
    async fn test_lazy_pools_from_config() {
        let yaml = r#"
enable_mariadb: true
mariadb:
  host: 127.0.0.1
  port: 1
  user: app
  database: shop
  min_pool_size: 0
  max_pool_size: 4
  acquire_timeout_secs: 1
  lazy: true
enable_postgresql: true
postgresql:
  host: 127.0.0.1
  port: 1
  user: app
  database: shop
  min_pool_size: 0
  max_pool_size: 2
  acquire_timeout_secs: 1
  lazy: true
"#;
        let backends = Backends::new();
        let config = ConfigStore::from_yaml_str(yaml).unwrap();
        let enabled = backends.init_from_config(&config).await.unwrap();
        assert_eq!(enabled, vec!["mariadb", "postgresql"]);
        assert_eq!(backends.mysql.settings().unwrap().max_size, 4);
        assert!(!backends.doris.is_initialized());

        // Nothing listens on port 1
        let reports = backends.health_check().await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| !r.healthy && r.error.is_some()));

        backends.close_all().await;
        assert!(!backends.mysql.is_initialized());
        assert!(!backends.postgres.is_initialized());
    }

    #[test]
    fn test_global_registry_is_shared() {
        assert!(std::ptr::eq(backends(), backends()));
    }
}
