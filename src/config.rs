//! Configuration handling for db-facade.
//!
//! Two layers:
//! - `Cli`: command-line arguments and environment variables (clap)
//! - `ConfigStore`: the per-environment YAML document, read through dotted
//!   keys such as `mariadb.host` or `redis.cluster_nodes.0`
//!
//! A process installs one store with `install` and reads it anywhere through
//! `global`.

use crate::error::{DbError, DbResult};
use clap::Parser;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::info;

pub const DEFAULT_ENV: &str = "dev";
pub const DEFAULT_CONFIG_DIR: &str = "config";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Command-line configuration.
#[derive(Parser, Debug, Clone)]
#[command(name = "db-facade")]
#[command(version, about = "Connect to the configured data stores and report their health")]
pub struct Cli {
    /// Config file. Overrides --config-dir/--env when set.
    #[arg(short, long, value_name = "FILE", env = "DB_FACADE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Environment name, selects `config_<env>.yaml`
    #[arg(short, long, default_value = DEFAULT_ENV, env = "APP_ENV")]
    pub env: String,

    /// Directory holding the per-environment config files
    #[arg(long, default_value = DEFAULT_CONFIG_DIR, env = "DB_FACADE_CONFIG_DIR")]
    pub config_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "DB_FACADE_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_FACADE_JSON_LOGS")]
    pub json_logs: bool,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: None,
            env: DEFAULT_ENV.to_string(),
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
        }
    }
}

impl Cli {
    /// Path of the config file to load.
    pub fn config_path(&self) -> PathBuf {
        match &self.config {
            Some(path) => path.clone(),
            None => env_config_path(&self.config_dir, &self.env),
        }
    }
}

/// `<dir>/config_<env>.yaml`
pub fn env_config_path(dir: &Path, env: &str) -> PathBuf {
    dir.join(format!("config_{}.yaml", env))
}

/// Nested configuration document with dotted-key lookup.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    root: Value,
}

impl ConfigStore {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn from_yaml_str(yaml: &str) -> DbResult<Self> {
        let root: Value = serde_yaml_ng::from_str(yaml)
            .map_err(|e| DbError::config(format!("Invalid YAML config: {}", e)))?;
        // An empty document parses as null
        let root = if root.is_null() {
            Value::Object(Default::default())
        } else {
            root
        };
        Ok(Self { root })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DbError::config(format!("Config file not found: {}", path.display()))
            } else {
                DbError::config(format!("Failed to read {}: {}", path.display(), e))
            }
        })?;
        let store = Self::from_yaml_str(&text)?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(store)
    }

    /// Load `<dir>/config_<env>.yaml`.
    pub fn for_env(dir: impl AsRef<Path>, env: &str) -> DbResult<Self> {
        Self::from_yaml_file(env_config_path(dir.as_ref(), env))
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Look up a dotted key. Segments are lowercased; numeric segments index
    /// into lists. Returns `None` for missing keys and explicit nulls.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut current = &self.root;
        for segment in key.to_lowercase().split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        (!current.is_null()).then_some(current)
    }

    /// Typed lookup falling back to `default` when the key is missing or
    /// does not convert to `T`.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| T::deserialize(v).ok())
            .unwrap_or(default)
    }

    /// Typed lookup. A present value of the wrong shape is an error.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        self.get(key)
            .map(|v| {
                T::deserialize(v)
                    .map_err(|e| DbError::config(format!("Invalid value for '{}': {}", key, e)))
            })
            .transpose()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn require(&self, key: &str) -> DbResult<&Value> {
        self.get(key)
            .ok_or_else(|| DbError::config(format!("Key '{}' not found in config", key)))
    }

    /// Deserialize the subtree at `key` into a settings struct.
    pub fn section<T: DeserializeOwned>(&self, key: &str) -> DbResult<T> {
        let value = self.require(key)?;
        T::deserialize(value)
            .map_err(|e| DbError::config(format!("Invalid '{}' section: {}", key, e)))
    }

    /// Feature flag lookup. Accepts booleans, `"true"`/`"yes"`/`"on"` and non-zero numbers.
    pub fn flag(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
            Some(Value::String(s)) => {
                matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "on" | "1")
            }
            _ => false,
        }
    }
}

static GLOBAL: RwLock<Option<Arc<ConfigStore>>> = RwLock::new(None);

/// Install `store` as the process-wide configuration, replacing any previous one.
pub fn install(store: ConfigStore) -> Arc<ConfigStore> {
    let store = Arc::new(store);
    let mut guard = match GLOBAL.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = Some(Arc::clone(&store));
    store
}

/// The installed process-wide configuration.
pub fn global() -> DbResult<Arc<ConfigStore>> {
    let guard = match GLOBAL.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard
        .clone()
        .ok_or_else(|| DbError::not_initialized("Configuration"))
}
