//! Poll monitor.
//!
//! Every watched job gets one task that fetches a fresh snapshot at a fixed
//! interval and turns it into relay events until a terminal event fires or
//! the relay is cancelled.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use transmission_client::JobSnapshot;

use crate::Result;
use crate::config::ClusterConfig;
use crate::member::Member;
use crate::relay::{EventKind, JobEvent, JobFailure, JobRelay, TimeoutPayload};
use crate::store::AffinityStore;

#[derive(Clone)]
pub struct PollMonitor {
    store: Arc<dyn AffinityStore>,
    poll_interval: Duration,
    absence_timeout: Duration,
}

impl PollMonitor {
    pub fn new(
        store: Arc<dyn AffinityStore>,
        poll_interval: Duration,
        absence_timeout: Duration,
    ) -> Self {
        Self {
            store,
            poll_interval,
            absence_timeout,
        }
    }

    pub fn from_config(config: &ClusterConfig, store: Arc<dyn AffinityStore>) -> Self {
        Self::new(store, config.poll_interval(), config.absence_timeout())
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Take a first snapshot of `hash` on `member` and start polling.
    ///
    /// A failing first fetch is returned and nothing is spawned.
    pub async fn resume(
        &self,
        member: Arc<dyn Member>,
        hash: &str,
    ) -> Result<(JobRelay, Option<JobSnapshot>)> {
        let snapshot = member.fetch(hash).await?;
        let relay = self.watch(member, hash);
        Ok((relay, snapshot))
    }

    /// Start polling `hash` on `member`. The first tick runs one interval
    /// from now.
    pub fn watch(&self, member: Arc<dyn Member>, hash: &str) -> JobRelay {
        let relay = self.relay_for(member.clone(), hash);

        let job = PollJob {
            member,
            hash: hash.to_string(),
            relay: relay.clone(),
            store: self.store.clone(),
            poll_interval: self.poll_interval,
            absence_timeout: self.absence_timeout,
            last_seen_at: Instant::now(),
        };
        tokio::spawn(job.run());

        relay
    }

    fn relay_for(&self, member: Arc<dyn Member>, hash: &str) -> JobRelay {
        let relay = JobRelay::new(hash);

        // An unreachable member cannot vouch for its cache entries.
        let store = self.store.clone();
        let job_hash = hash.to_string();
        relay.on(EventKind::Error, move |event| {
            let JobEvent::Error(failure) = event else {
                return;
            };
            if !failure.is_unreachable() {
                return;
            }
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                return;
            };
            let store = store.clone();
            let hash = job_hash.clone();
            runtime.spawn(async move {
                match store.delete(&hash).await {
                    Ok(()) => debug!(hash = %hash, "Dropped affinity of unreachable member"),
                    Err(e) => warn!(hash = %hash, error = %e, "Failed to drop affinity entry"),
                }
            });
        });

        let store = self.store.clone();
        let job_hash = hash.to_string();
        relay.set_removal_hook(Box::new(move || {
            async move {
                let owner = member.member_ref();
                match member.remove(&job_hash, false).await {
                    Ok(()) => info!(hash = %job_hash, member = %owner, "Removed cancelled job"),
                    Err(e) => {
                        warn!(hash = %job_hash, member = %owner, error = %e, "Failed to remove cancelled job")
                    }
                }
                if let Err(e) = store.delete(&job_hash).await {
                    warn!(hash = %job_hash, error = %e, "Failed to drop affinity entry");
                }
            }
            .boxed()
        }));

        relay
    }
}

impl std::fmt::Debug for PollMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollMonitor")
            .field("poll_interval", &self.poll_interval)
            .field("absence_timeout", &self.absence_timeout)
            .finish_non_exhaustive()
    }
}

/// Map a present snapshot to the event it produces.
pub fn evaluate(snapshot: JobSnapshot) -> JobEvent {
    if snapshot.is_completed() {
        JobEvent::Complete(snapshot)
    } else if snapshot.has_error() {
        JobEvent::Error(JobFailure::Job(snapshot))
    } else if !snapshot.has_seeds_at(Utc::now()) {
        JobEvent::NoSeeds(snapshot)
    } else if snapshot.is_stalled {
        JobEvent::Timeout(TimeoutPayload::Stalled(snapshot))
    } else {
        JobEvent::Download(snapshot)
    }
}

struct PollJob {
    member: Arc<dyn Member>,
    hash: String,
    relay: JobRelay,
    store: Arc<dyn AffinityStore>,
    poll_interval: Duration,
    absence_timeout: Duration,
    /// Last time the member reported the job.
    last_seen_at: Instant,
}

impl PollJob {
    async fn run(mut self) {
        let token = self.relay.cancellation_token();
        let member = self.member.member_ref();
        debug!(hash = %self.hash, member = %member, "Polling started");

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!(hash = %self.hash, "Polling cancelled");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if self.tick().await.is_break() {
                break;
            }
        }

        debug!(hash = %self.hash, state = ?self.relay.state(), "Polling stopped");
    }

    async fn tick(&mut self) -> ControlFlow<()> {
        if !self.relay.emit(JobEvent::Poll {
            hash: self.hash.clone(),
        }) {
            return ControlFlow::Break(());
        }

        let fetched = self.member.fetch(&self.hash).await;
        if self.relay.is_cancelled() {
            return ControlFlow::Break(());
        }

        let event = match fetched {
            Ok(Some(snapshot)) => {
                self.last_seen_at = Instant::now();
                evaluate(snapshot)
            }
            Ok(None) => {
                if self.last_seen_at.elapsed() <= self.absence_timeout {
                    return ControlFlow::Continue(());
                }
                if let Err(e) = self.store.delete(&self.hash).await {
                    warn!(hash = %self.hash, error = %e, "Failed to drop affinity entry");
                }
                JobEvent::Timeout(TimeoutPayload::Missing {
                    host: self.member.member_ref().host,
                    hash: self.hash.clone(),
                    reason: format!("exceeded {} seconds", self.absence_timeout.as_secs()),
                })
            }
            Err(e) => {
                warn!(hash = %self.hash, error = %e, "Snapshot fetch failed");
                JobEvent::Error(JobFailure::Transport(Arc::new(e)))
            }
        };

        let kind = event.kind();
        if !self.relay.emit(event) {
            return ControlFlow::Break(());
        }
        if kind.is_terminal() {
            info!(hash = %self.hash, event = %kind, "Job reached terminal event");
            return ControlFlow::Break(());
        }

        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use transmission_client::JobStatus;

    fn snapshot() -> JobSnapshot {
        JobSnapshot {
            id: 1,
            hash: "abc".to_string(),
            name: "job".to_string(),
            status_code: 4,
            status: Some(JobStatus::Downloading),
            added_at: Utc::now(),
            percent_done: 0.5,
            total_size: 100,
            eta: 10,
            download_rate: 1,
            upload_rate: 0,
            error: 0,
            error_message: String::new(),
            is_finished: false,
            is_private: false,
            is_stalled: false,
            peers_in_swarm: 3,
            peers_connected: 2,
            seeds_in_swarm: 1,
            seeds_connected: 1,
            reported_peers_connected: 3,
            download_dir: "/abc".to_string(),
            host: "h".to_string(),
        }
    }

    #[test]
    fn test_evaluate_download() {
        assert_eq!(evaluate(snapshot()).kind(), EventKind::Download);
    }

    #[test]
    fn test_evaluate_completion_wins() {
        let mut s = snapshot();
        s.percent_done = 1.0;
        s.error = 3;
        s.is_stalled = true;
        assert_eq!(evaluate(s).kind(), EventKind::Complete);
    }

    #[test]
    fn test_evaluate_error_before_noseeds() {
        let mut s = snapshot();
        s.error = 2;
        s.seeds_connected = 0;
        s.peers_connected = 0;
        s.added_at = Utc::now() - ChronoDuration::minutes(30);
        assert_eq!(evaluate(s).kind(), EventKind::Error);
    }

    #[test]
    fn test_evaluate_noseeds_and_stalled() {
        let mut starved = snapshot();
        starved.seeds_connected = 0;
        starved.peers_connected = 1;
        starved.added_at = Utc::now() - ChronoDuration::minutes(6);
        assert_eq!(evaluate(starved).kind(), EventKind::NoSeeds);

        let mut stalled = snapshot();
        stalled.is_stalled = true;
        assert_eq!(evaluate(stalled).kind(), EventKind::Timeout);
    }
}
