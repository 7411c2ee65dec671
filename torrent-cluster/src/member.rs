//! Cluster members.
//!
//! The router and the poll monitor only talk to daemons through [`Member`],
//! so tests can stand in fakes for real RPC endpoints.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use transmission_client::{ClientConfig, JobSnapshot, RpcError, TransmissionClient};

use crate::config::MemberConfig;

/// Identity of a member, as recorded in the affinity store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberRef {
    pub host: String,
    pub port: u16,
}

impl MemberRef {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Operations the cluster needs from one daemon.
#[async_trait]
pub trait Member: Send + Sync + 'static {
    fn member_ref(&self) -> MemberRef;

    /// Parent directory for job output on this member.
    fn download_dir(&self) -> &str;

    /// Number of jobs the member currently holds.
    async fn load(&self) -> Result<u64, RpcError>;

    /// Hand a job to the member. Output goes to `<download_dir>/<hash>`.
    async fn submit(&self, source: &str, hash: &str) -> Result<(), RpcError>;

    /// Current snapshot of a job, `None` if the member does not hold it.
    async fn fetch(&self, hash: &str) -> Result<Option<JobSnapshot>, RpcError>;

    async fn remove(&self, hash: &str, delete_data: bool) -> Result<(), RpcError>;

    /// Ask the member to re-check the job's local data.
    async fn verify(&self, hash: &str) -> Result<(), RpcError>;
}

/// Member backed by a Transmission-style RPC daemon.
#[derive(Debug)]
pub struct RpcMember {
    client: TransmissionClient,
    download_dir: String,
}

impl RpcMember {
    pub fn new(config: &MemberConfig, client_config: ClientConfig) -> Result<Self, RpcError> {
        Ok(Self::with_client(
            TransmissionClient::new(config.endpoint(), client_config)?,
            config.download_dir.clone(),
        ))
    }

    pub fn with_client(client: TransmissionClient, download_dir: impl Into<String>) -> Self {
        Self {
            client,
            download_dir: download_dir.into(),
        }
    }

    pub fn client(&self) -> &TransmissionClient {
        &self.client
    }

    pub fn into_shared(self) -> Arc<dyn Member> {
        Arc::new(self)
    }
}

/// Join the member's output directory and the job hash.
pub fn job_dir(download_dir: &str, hash: &str) -> String {
    let parent = download_dir.trim_end_matches('/');
    format!("{parent}/{hash}")
}

#[async_trait]
impl Member for RpcMember {
    fn member_ref(&self) -> MemberRef {
        let endpoint = self.client.endpoint();
        MemberRef::new(endpoint.host.clone(), endpoint.port)
    }

    fn download_dir(&self) -> &str {
        &self.download_dir
    }

    async fn load(&self) -> Result<u64, RpcError> {
        Ok(self.client.session_stats().await?.torrent_count)
    }

    async fn submit(&self, source: &str, hash: &str) -> Result<(), RpcError> {
        self.client
            .torrent_add(source, &job_dir(&self.download_dir, hash))
            .await
            .map(|_| ())
    }

    async fn fetch(&self, hash: &str) -> Result<Option<JobSnapshot>, RpcError> {
        self.client.torrent_get(hash).await
    }

    async fn remove(&self, hash: &str, delete_data: bool) -> Result<(), RpcError> {
        self.client.torrent_remove(hash, delete_data).await
    }

    async fn verify(&self, hash: &str) -> Result<(), RpcError> {
        self.client.torrent_verify(hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_ref_serialization() {
        let member = MemberRef::new("10.0.0.1", 9091);
        let json = serde_json::to_string(&member).unwrap();
        assert_eq!(json, r#"{"host":"10.0.0.1","port":9091}"#);
        assert_eq!(member.to_string(), "10.0.0.1:9091");
    }

    #[test]
    fn test_job_dir() {
        assert_eq!(job_dir("/", "abc"), "/abc");
        assert_eq!(job_dir("/data/", "abc"), "/data/abc");
        assert_eq!(job_dir("/data", "abc"), "/data/abc");
    }

    #[test]
    fn test_rpc_member_identity() {
        let mut config = MemberConfig::new("seedbox", 9091);
        config.download_dir = "/srv/jobs".to_string();
        let member = RpcMember::new(&config, ClientConfig::default()).unwrap();

        assert_eq!(member.member_ref(), MemberRef::new("seedbox", 9091));
        assert_eq!(member.download_dir(), "/srv/jobs");
    }
}
