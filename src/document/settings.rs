//! MongoDB connection settings and URI assembly.

use crate::error::{DbError, DbResult};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Deserializer, Serialize};

fn default_hosts() -> Vec<String> {
    vec!["localhost".to_string()]
}

fn default_port() -> u16 {
    27017
}

fn default_auth_source() -> String {
    "admin".to_string()
}

fn default_max_pool_size() -> u32 {
    100
}

fn default_retries() -> u32 {
    3
}

/// Accept either a single host or a list of hosts.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(host) => vec![host],
        OneOrMany::Many(hosts) => hosts,
    })
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DocumentSettings {
    #[serde(default = "default_hosts", deserialize_with = "one_or_many", alias = "host")]
    pub hosts: Vec<String>,

    /// Applied to hosts that do not carry their own port.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    #[serde(default = "default_auth_source", alias = "authSource")]
    pub auth_source: String,

    #[serde(default)]
    pub database: String,

    #[serde(default = "default_max_pool_size", alias = "maxPoolSize")]
    pub max_pool_size: u32,

    #[serde(default, alias = "minPoolSize")]
    pub min_pool_size: u32,

    /// Connection attempts made by `init_client` before giving up.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Per-attempt server selection timeout. Driver default when unset.
    #[serde(default)]
    pub server_selection_timeout_secs: Option<u64>,
}

impl std::fmt::Debug for DocumentSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSettings")
            .field("hosts", &self.hosts)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("auth_source", &self.auth_source)
            .field("database", &self.database)
            .field("max_pool_size", &self.max_pool_size)
            .field("min_pool_size", &self.min_pool_size)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            port: default_port(),
            username: None,
            password: None,
            auth_source: default_auth_source(),
            database: String::new(),
            max_pool_size: default_max_pool_size(),
            min_pool_size: 0,
            retries: default_retries(),
            server_selection_timeout_secs: None,
        }
    }
}

impl DocumentSettings {
    pub fn validate(&self) -> DbResult<()> {
        if self.hosts.is_empty() || self.hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(DbError::config("MongoDB hosts must not be empty"));
        }
        if self.database.is_empty() {
            return Err(DbError::config("MongoDB database must be set"));
        }
        if self.max_pool_size == 0 {
            return Err(DbError::config("max_pool_size must be greater than 0"));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(DbError::config(format!(
                "min_pool_size ({}) cannot exceed max_pool_size ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }

    /// Comma-separated `host:port` list.
    pub fn host_list(&self) -> String {
        self.hosts
            .iter()
            .map(|host| {
                if has_port(host) {
                    host.clone()
                } else {
                    format!("{}:{}", host, self.port)
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Build `mongodb://[user:pass@]h1:port,h2:port/db?authSource=..`.
    ///
    /// Credentials are only included when both user and password are set.
    pub fn connection_uri(&self) -> String {
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => format!(
                "{}:{}@",
                utf8_percent_encode(user, NON_ALPHANUMERIC),
                utf8_percent_encode(pass, NON_ALPHANUMERIC)
            ),
            _ => String::new(),
        };

        format!(
            "mongodb://{}{}/{}?authSource={}",
            auth,
            self.host_list(),
            self.database,
            utf8_percent_encode(&self.auth_source, NON_ALPHANUMERIC)
        )
    }
}

fn has_port(host: &str) -> bool {
    // Bracketed IPv6 literal: "[::1]:27018"
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split_once(']').is_some_and(|(_, tail)| tail.starts_with(':'));
    }
    host.rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_single_host_without_auth() {
        let settings = DocumentSettings {
            database: "app".into(),
            ..Default::default()
        };
        assert_eq!(
            settings.connection_uri(),
            "mongodb://localhost:27017/app?authSource=admin"
        );
    }

    #[test]
    fn test_uri_replica_set_with_escaped_credentials() {
        let settings = DocumentSettings {
            hosts: vec!["m1".into(), "m2:27018".into(), "[::1]".into()],
            username: Some("svc".into()),
            password: Some("p@ss:w/rd".into()),
            database: "events".into(),
            ..Default::default()
        };
        assert_eq!(
            settings.connection_uri(),
            "mongodb://svc:p%40ss%3Aw%2Frd@m1:27017,m2:27018,[::1]:27017/events?authSource=admin"
        );
    }

    #[test]
    fn test_uri_requires_both_credentials() {
        let settings = DocumentSettings {
            username: Some("svc".into()),
            database: "app".into(),
            ..Default::default()
        };
        assert!(!settings.connection_uri().contains('@'));
    }

    #[test]
    fn test_hosts_accept_string_or_list() {
        let one: DocumentSettings = serde_yaml_ng::from_str("hosts: db1\ndatabase: app\n").unwrap();
        assert_eq!(one.hosts, vec!["db1"]);
        assert_eq!(one.port, 27017);
        assert_eq!(one.auth_source, "admin");
        assert_eq!(one.max_pool_size, 100);
        assert_eq!(one.retries, 3);

        let many: DocumentSettings =
            serde_yaml_ng::from_str("hosts: [db1, db2]\nauthSource: users\ndatabase: app\n")
                .unwrap();
        assert_eq!(many.hosts, vec!["db1", "db2"]);
        assert_eq!(many.auth_source, "users");
    }

    #[test]
    fn test_validate() {
        assert!(DocumentSettings::default().validate().is_err());

        let settings = DocumentSettings {
            database: "app".into(),
            min_pool_size: 200,
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("min_pool_size"));
    }

    #[test]
    fn test_debug_masks_password() {
        let settings = DocumentSettings {
            password: Some("hunter2".into()),
            ..Default::default()
        };
        assert!(!format!("{:?}", settings).contains("hunter2"));
    }

    #[test]
    fn test_has_port() {
        assert!(has_port("db:27018"));
        assert!(!has_port("db"));
        assert!(has_port("[::1]:27018"));
        assert!(!has_port("[::1]"));
    }
}
