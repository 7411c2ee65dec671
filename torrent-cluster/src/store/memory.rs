//! In-process affinity store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::AffinityStore;
use crate::Result;
use crate::member::MemberRef;

#[derive(Clone)]
struct CacheEntry {
    member: MemberRef,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(member: MemberRef, ttl: Duration) -> Self {
        Self {
            member,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Affinity store backed by a concurrent map.
///
/// Expired entries are dropped lazily on read and by [`cleanup_expired`].
///
/// [`cleanup_expired`]: MemoryAffinityStore::cleanup_expired
#[derive(Clone, Default)]
pub struct MemoryAffinityStore {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl MemoryAffinityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all expired entries, returning how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before - self.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl AffinityStore for MemoryAffinityStore {
    async fn get(&self, hash: &str) -> Result<Option<MemberRef>> {
        let Some(entry) = self.entries.get(hash) else {
            return Ok(None);
        };

        if entry.is_expired() {
            drop(entry); // Release the shard lock before removing
            self.entries.remove(hash);
            return Ok(None);
        }

        Ok(Some(entry.member.clone()))
    }

    async fn set(&self, hash: &str, member: &MemberRef, ttl: Duration) -> Result<()> {
        self.entries
            .insert(hash.to_string(), CacheEntry::new(member.clone(), ttl));
        Ok(())
    }

    async fn delete(&self, hash: &str) -> Result<()> {
        self.entries.remove(hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> MemberRef {
        MemberRef::new("10.0.0.1", 9091)
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryAffinityStore::new();
        store.set("abc", &member(), Duration::from_secs(300)).await.unwrap();

        assert_eq!(store.get("abc").await.unwrap(), Some(member()));

        store.delete("abc").await.unwrap();
        assert_eq!(store.get("abc").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let store = MemoryAffinityStore::new();
        store.set("abc", &member(), Duration::from_secs(300)).await.unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(store.get("abc").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("abc").await.unwrap().is_none());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewrite_refreshes_ttl() {
        let store = MemoryAffinityStore::new();
        store.set("abc", &member(), Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        store.set("abc", &member(), Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;

        assert!(store.get("abc").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired() {
        let store = MemoryAffinityStore::new();
        store.set("short", &member(), Duration::from_secs(1)).await.unwrap();
        store.set("long", &member(), Duration::from_secs(100)).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(store.cleanup_expired(), 1);
        assert_eq!(store.len(), 1);
    }
}
