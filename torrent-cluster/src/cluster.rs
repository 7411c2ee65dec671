//! Cluster router.
//!
//! Places new jobs on the least-loaded member and finds existing ones through
//! the affinity store, falling back to asking every member at once.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::future::join_all;
use futures::stream::FuturesUnordered;
use tracing::{debug, info, warn};
use transmission_client::{JobSnapshot, RpcError};

use crate::config::ClusterConfig;
use crate::member::{Member, MemberRef, RpcMember};
use crate::monitor::PollMonitor;
use crate::relay::JobRelay;
use crate::resolver::{MagnetResolver, SourceResolver};
use crate::store::AffinityStore;
use crate::{Error, Result};

pub struct Cluster {
    members: Vec<Arc<dyn Member>>,
    store: Arc<dyn AffinityStore>,
    resolver: Arc<dyn SourceResolver>,
    monitor: PollMonitor,
    cache_ttl: Duration,
}

impl Cluster {
    /// Members are kept in the given order, which breaks placement ties.
    pub fn new(
        members: Vec<Arc<dyn Member>>,
        store: Arc<dyn AffinityStore>,
        monitor: PollMonitor,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            members,
            store,
            resolver: Arc::new(MagnetResolver::new()),
            monitor,
            cache_ttl,
        }
    }

    /// Build RPC members for every configured daemon.
    pub fn from_config(config: &ClusterConfig, store: Arc<dyn AffinityStore>) -> Result<Self> {
        config.validate()?;

        let members = config
            .members
            .iter()
            .map(|m| RpcMember::new(m, config.client.clone()).map(RpcMember::into_shared))
            .collect::<std::result::Result<Vec<_>, RpcError>>()?;

        let monitor = PollMonitor::from_config(config, store.clone());
        Ok(Self::new(members, store, monitor, config.cache_ttl()))
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn SourceResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn members(&self) -> &[Arc<dyn Member>] {
        &self.members
    }

    pub fn store(&self) -> &Arc<dyn AffinityStore> {
        &self.store
    }

    /// Start tracking a job, submitting it to a member if none holds it yet.
    ///
    /// The snapshot is `None` when the daemon has not registered a freshly
    /// submitted job by the time of the first read.
    pub async fn add(&self, source: &str) -> Result<(JobRelay, Option<JobSnapshot>)> {
        let resolved = self.resolver.resolve(source)?;
        let hash = resolved.hash.to_ascii_lowercase();
        debug!(hash = %hash, source = %resolved.source, "Adding job");

        if let Some((member, snapshot)) = self.locate(&hash).await? {
            return Ok((self.monitor.watch(member, &hash), Some(snapshot)));
        }

        let member = self.lowest_loaded().await?;
        info!(hash = %hash, member = %member.member_ref(), "Placing job");
        member.submit(&resolved.source, &hash).await?;
        self.remember(&hash, &member).await;

        self.monitor.resume(member, &hash).await
    }

    /// Remove a job, keeping its data. Returns whether a member removed it.
    pub async fn remove(&self, hash: &str) -> Result<bool> {
        self.remove_job(hash, false).await
    }

    /// Remove a job together with its downloaded data.
    pub async fn remove_data(&self, hash: &str) -> Result<bool> {
        self.remove_job(hash, true).await
    }

    async fn remove_job(&self, hash: &str, delete_data: bool) -> Result<bool> {
        let hash = hash.to_ascii_lowercase();
        let owner = self.locate(&hash).await;
        self.forget(&hash).await;

        let Some((member, _)) = owner? else {
            debug!(hash = %hash, "No member holds job, nothing to remove");
            return Ok(false);
        };

        member.remove(&hash, delete_data).await?;
        info!(hash = %hash, member = %member.member_ref(), delete_data, "Removed job");
        Ok(true)
    }

    /// Current snapshot of a job from its owner.
    pub async fn get(&self, hash: &str) -> Result<Option<JobSnapshot>> {
        let hash = hash.to_ascii_lowercase();
        let Some(member) = self.get_owner(&hash).await else {
            return Ok(None);
        };

        match member.fetch(&hash).await {
            Ok(Some(snapshot)) => Ok(Some(snapshot)),
            Ok(None) => {
                self.forget(&hash).await;
                Ok(None)
            }
            Err(e) => {
                self.forget(&hash).await;
                Err(e.into())
            }
        }
    }

    /// The member holding a job, from the affinity store or by searching.
    pub async fn get_owner(&self, hash: &str) -> Option<Arc<dyn Member>> {
        let hash = hash.to_ascii_lowercase();
        if let Some(member) = self.cached_owner(&hash).await {
            return Some(member);
        }

        let (member, _) = self.search(&hash).await?;
        self.remember(&hash, &member).await;
        Some(member)
    }

    /// Ask the owning member to re-check a job's data.
    pub async fn verify(&self, hash: &str) -> Result<bool> {
        let hash = hash.to_ascii_lowercase();
        let Some((member, _)) = self.locate(&hash).await? else {
            return Ok(false);
        };

        member.verify(&hash).await?;
        Ok(true)
    }

    /// Find the member currently holding a job, checking a cached owner
    /// before trusting it.
    ///
    /// An owner that no longer reports the job, or cannot be reached at all,
    /// loses its entry and the search runs instead. Other failures of the
    /// cached owner are returned so the job is not placed twice.
    async fn locate(&self, hash: &str) -> Result<Option<(Arc<dyn Member>, JobSnapshot)>> {
        if let Some(member) = self.cached_owner(hash).await {
            match member.fetch(hash).await {
                Ok(Some(snapshot)) => {
                    debug!(hash = %hash, member = %member.member_ref(), "Cached owner holds job");
                    self.remember(hash, &member).await;
                    return Ok(Some((member, snapshot)));
                }
                Ok(None) => {
                    debug!(hash = %hash, member = %member.member_ref(), "Stale affinity entry");
                    self.forget(hash).await;
                }
                Err(e) if e.is_unreachable() => {
                    warn!(hash = %hash, member = %member.member_ref(), error = %e, "Cached owner unreachable");
                    self.forget(hash).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let Some((member, snapshot)) = self.search(hash).await else {
            return Ok(None);
        };
        info!(hash = %hash, member = %member.member_ref(), "Found job on member");
        self.remember(hash, &member).await;
        Ok(Some((member, snapshot)))
    }

    /// Job counts of every member that answered, in configuration order.
    pub async fn loads(&self) -> Vec<(MemberRef, u64)> {
        self.query_loads()
            .await
            .into_iter()
            .map(|(member, load)| (member.member_ref(), load))
            .collect()
    }

    async fn query_loads(&self) -> Vec<(Arc<dyn Member>, u64)> {
        let answers = join_all(self.members.iter().map(|member| async move {
            (member, member.load().await)
        }))
        .await;

        answers
            .into_iter()
            .filter_map(|(member, load)| match load {
                Ok(load) => Some((member.clone(), load)),
                Err(e) => {
                    warn!(member = %member.member_ref(), error = %e, "Load query failed");
                    None
                }
            })
            .collect()
    }

    /// Member with the fewest jobs; the earliest configured wins ties.
    async fn lowest_loaded(&self) -> Result<Arc<dyn Member>> {
        self.query_loads()
            .await
            .into_iter()
            .min_by_key(|(_, load)| *load)
            .map(|(member, _)| member)
            .ok_or(Error::NoMembersAvailable)
    }

    /// Ask every member for the job; the first non-empty answer wins.
    async fn search(&self, hash: &str) -> Option<(Arc<dyn Member>, JobSnapshot)> {
        let mut pending: FuturesUnordered<_> = self
            .members
            .iter()
            .map(|member| async move { (member, member.fetch(hash).await) })
            .collect();

        while let Some((member, answer)) = pending.next().await {
            match answer {
                Ok(Some(snapshot)) => return Some((member.clone(), snapshot)),
                Ok(None) => {}
                Err(e) => {
                    warn!(hash = %hash, member = %member.member_ref(), error = %e, "Search query failed")
                }
            }
        }

        debug!(hash = %hash, "Job not found on any member");
        None
    }

    async fn cached_owner(&self, hash: &str) -> Option<Arc<dyn Member>> {
        let owner = match self.store.get(hash).await {
            Ok(owner) => owner?,
            Err(e) => {
                warn!(hash = %hash, error = %e, "Affinity lookup failed");
                return None;
            }
        };

        let member = self
            .members
            .iter()
            .find(|m| m.member_ref() == owner)
            .cloned();
        if member.is_none() {
            debug!(hash = %hash, member = %owner, "Affinity entry names an unknown member");
        }
        member
    }

    async fn remember(&self, hash: &str, member: &Arc<dyn Member>) {
        if let Err(e) = self
            .store
            .set(hash, &member.member_ref(), self.cache_ttl)
            .await
        {
            warn!(hash = %hash, error = %e, "Failed to record affinity");
        }
    }

    async fn forget(&self, hash: &str) {
        if let Err(e) = self.store.delete(hash).await {
            warn!(hash = %hash, error = %e, "Failed to drop affinity entry");
        }
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let members: Vec<MemberRef> = self.members.iter().map(|m| m.member_ref()).collect();
        f.debug_struct("Cluster")
            .field("members", &members)
            .field("monitor", &self.monitor)
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}
