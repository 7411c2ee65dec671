//! Cluster configuration.
//!
//! Loaded from a JSON file whose path comes from `TCLUSTER_CONFIG`. Every
//! field except the member list has a default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use transmission_client::{ClientConfig, Endpoint};

use crate::{Error, Result};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "TCLUSTER_CONFIG";

/// Default key prefix for shared affinity entries.
pub const DEFAULT_KEY_PREFIX: &str = "utcluster:";

/// One daemon in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Parent directory for job output; each job gets `<download_dir>/<hash>`.
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
}

fn default_download_dir() -> String {
    "/".to_string()
}

impl MemberConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            download_dir: default_download_dir(),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Connection settings for a shared Redis affinity store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub members: Vec<MemberConfig>,
    /// Lifetime of an affinity entry after its last write.
    pub cache_ttl_secs: u64,
    /// Delay between two poll ticks of the same job.
    pub poll_interval_ms: u64,
    /// How long a job may be missing from its member before it times out.
    pub absence_timeout_secs: u64,
    pub client: ClientConfig,
    pub redis: Option<RedisConfig>,
    pub log_dir: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            members: Vec::new(),
            cache_ttl_secs: 300,
            poll_interval_ms: 2000,
            absence_timeout_secs: 300,
            client: ClientConfig::default(),
            redis: None,
            log_dir: None,
        }
    }
}

impl ClusterConfig {
    pub fn with_members(members: Vec<MemberConfig>) -> Self {
        Self {
            members,
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    /// Load from the file named by `TCLUSTER_CONFIG`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV)
            .map_err(|_| Error::config(format!("{CONFIG_ENV} is not set")))?;
        Self::from_file(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.members.is_empty() {
            return Err(Error::config("at least one member is required"));
        }
        if let Some(member) = self.members.iter().find(|m| m.port == 0) {
            return Err(Error::config(format!("member {} has port 0", member.host)));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::config("poll_interval_ms must be positive"));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn absence_timeout(&self) -> Duration {
        Duration::from_secs(self.absence_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = ClusterConfig::from_json(
            r#"{"members": [{"host": "10.0.0.1", "port": 9091}]}"#,
        )
        .unwrap();

        assert_eq!(config.members[0].download_dir, "/");
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.absence_timeout(), Duration::from_secs(300));
        assert_eq!(config.client.retry.max_attempts, 60);
        assert!(config.redis.is_none());
    }

    #[test]
    fn test_nested_overrides() {
        let config = ClusterConfig::from_json(
            r#"{
                "members": [{"host": "a", "port": 1, "username": "u", "password": "p"}],
                "absence_timeout_secs": 90,
                "client": {"max_attempts": 20, "retry_delay_ms": 1500},
                "redis": {"url": "redis://127.0.0.1/"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.absence_timeout(), Duration::from_secs(90));
        assert_eq!(config.client.retry.retry_delay_ms, 1500);
        assert_eq!(config.redis.unwrap().key_prefix, DEFAULT_KEY_PREFIX);
        assert_eq!(config.members[0].endpoint().password.as_deref(), Some("p"));
    }

    #[test]
    fn test_validation_rejects_empty_cluster() {
        assert!(matches!(
            ClusterConfig::from_json(r#"{"members": []}"#),
            Err(Error::Configuration(_))
        ));
        assert!(ClusterConfig::from_json(r#"{"members": [{"host": "a", "port": 0}]}"#).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.json");
        std::fs::write(&path, r#"{"members": [{"host": "h", "port": 9091}]}"#).unwrap();

        let config = ClusterConfig::from_file(&path).unwrap();
        assert_eq!(config.members.len(), 1);
    }
}
