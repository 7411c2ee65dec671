//! Affinity stores: job hash -> owning member, with per-entry expiry.
//!
//! Entries are hints. The router treats every store failure as a miss, so a
//! broken or empty store only costs a cluster-wide search.

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;
use crate::member::MemberRef;

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryAffinityStore;
#[cfg(feature = "redis")]
pub use redis::RedisAffinityStore;

#[async_trait]
pub trait AffinityStore: Send + Sync + 'static {
    /// Owner recorded for `hash`, if a live entry exists.
    async fn get(&self, hash: &str) -> Result<Option<MemberRef>>;

    /// Record `member` as owner of `hash` for `ttl`, replacing any entry.
    async fn set(&self, hash: &str, member: &MemberRef, ttl: Duration) -> Result<()>;

    async fn delete(&self, hash: &str) -> Result<()>;
}
