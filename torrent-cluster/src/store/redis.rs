//! Redis-backed affinity store, shared by every process routing for the
//! same cluster.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use super::AffinityStore;
use crate::member::MemberRef;
use crate::{Error, Result};

/// Entries live under `<prefix><hash>` as JSON `{"host": .., "port": ..}`
/// and are written with `SET .. EX` so value and expiry land atomically.
#[derive(Clone)]
pub struct RedisAffinityStore {
    connection: MultiplexedConnection,
    key_prefix: String,
}

impl RedisAffinityStore {
    pub async fn connect(redis_url: impl AsRef<str>, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| Error::store(e.to_string()))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| Error::store(e.to_string()))?;

        Ok(Self {
            connection,
            key_prefix: key_prefix.into(),
        })
    }

    fn key(&self, hash: &str) -> String {
        format!("{}{}", self.key_prefix, hash)
    }
}

#[async_trait]
impl AffinityStore for RedisAffinityStore {
    async fn get(&self, hash: &str) -> Result<Option<MemberRef>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .get(self.key(hash))
            .await
            .map_err(|e| Error::store(e.to_string()))?;

        raw.map(|value| serde_json::from_str(&value).map_err(Error::from))
            .transpose()
    }

    async fn set(&self, hash: &str, member: &MemberRef, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        let value = serde_json::to_string(member)?;
        conn.set_ex::<_, _, ()>(self.key(hash), value, ttl.as_secs().max(1))
            .await
            .map_err(|e| Error::store(e.to_string()))
    }

    async fn delete(&self, hash: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(self.key(hash))
            .await
            .map_err(|e| Error::store(e.to_string()))
    }
}
