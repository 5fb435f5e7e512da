//! Redis connection handle for single-node and cluster deployments.

use crate::error::{DbError, DbResult};
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Cmd, Pipeline, RedisFuture, Value};
use serde::{Deserialize, Serialize};

/// Settings for the cache client.
///
/// When `cluster_nodes` is non-empty a cluster client is built from those
/// node URLs and `url` is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheSettings {
    #[serde(default = "default_url", alias = "from_url")]
    pub url: String,

    #[serde(default)]
    pub cluster_nodes: Vec<String>,
}

fn default_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            url: default_url(),
            cluster_nodes: Vec::new(),
        }
    }
}

impl CacheSettings {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cluster_nodes: Vec::new(),
        }
    }

    pub fn cluster(nodes: Vec<String>) -> Self {
        Self {
            url: String::new(),
            cluster_nodes: nodes,
        }
    }

    pub fn is_cluster(&self) -> bool {
        !self.cluster_nodes.is_empty()
    }

    pub fn validate(&self) -> DbResult<()> {
        if !self.is_cluster() && self.url.trim().is_empty() {
            return Err(DbError::config("Cache url must not be empty"));
        }
        if self.cluster_nodes.iter().any(|n| n.trim().is_empty()) {
            return Err(DbError::config("Cache cluster node urls must not be empty"));
        }
        Ok(())
    }

    /// Address without credentials, for log records.
    pub fn display_target(&self) -> String {
        if self.is_cluster() {
            return format!("cluster({} nodes)", self.cluster_nodes.len());
        }
        match url::Url::parse(&self.url) {
            Ok(parsed) => format!(
                "{}:{}",
                parsed.host_str().unwrap_or("?"),
                parsed.port().unwrap_or(6379)
            ),
            Err(_) => "<invalid url>".to_string(),
        }
    }
}

/// A multiplexed connection. Cloning is cheap and shares the underlying socket(s).
#[derive(Clone)]
pub enum CacheConnection {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

impl std::fmt::Debug for CacheConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(_) => f.write_str("CacheConnection::Single"),
            Self::Cluster(_) => f.write_str("CacheConnection::Cluster"),
        }
    }
}

impl CacheConnection {
    pub(crate) async fn connect(settings: &CacheSettings) -> DbResult<Self> {
        if settings.is_cluster() {
            let client = ClusterClient::new(settings.cluster_nodes.clone())?;
            let conn = client.get_async_connection().await?;
            return Ok(Self::Cluster(conn));
        }

        let client = redis::Client::open(settings.url.as_str()).map_err(|e| {
            DbError::config(format!("Invalid cache url: {}", e))
        })?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::Single(manager))
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self, Self::Cluster(_))
    }
}

impl ConnectionLike for CacheConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            Self::Single(conn) => conn.req_packed_command(cmd),
            Self::Cluster(conn) => conn.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            Self::Single(conn) => conn.req_packed_commands(cmd, offset, count),
            Self::Cluster(conn) => conn.req_packed_commands(cmd, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            Self::Single(conn) => conn.get_db(),
            Self::Cluster(conn) => conn.get_db(),
        }
    }
}
