use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

pub const DEFAULT_RPC_PATH: &str = "/transmission/rpc";

pub const DEFAULT_CLIENT_ID: &str = "Torrent-Cluster";

/// Network address and credentials of one daemon.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: Option<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    /// `host:port`, also used as the `Host` header.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Client behaviour shared by every daemon connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub scheme: String,
    pub rpc_path: String,
    /// Value sent in `X-Requested-With`.
    pub client_id: String,
    /// Overall timeout for one HTTP exchange. Zero disables it.
    pub request_timeout_ms: u64,
    /// Consecutive 409 handshakes tolerated for a single call.
    pub max_session_handshakes: u32,
    pub pool_max_idle_per_host: usize,
    #[serde(flatten)]
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            rpc_path: DEFAULT_RPC_PATH.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            request_timeout_ms: 10_000,
            max_session_handshakes: 5,
            pool_max_idle_per_host: 4,
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn rpc_url(&self, endpoint: &Endpoint) -> String {
        format!("{}://{}{}", self.scheme, endpoint.authority(), self.rpc_path)
    }
}
