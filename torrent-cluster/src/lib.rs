//! Routing for a cluster of Transmission-style download daemons.
//!
//! [`Cluster`] decides which member holds each job, remembers that choice in
//! an [`AffinityStore`] and watches the job through a [`JobRelay`].

pub mod cluster;
pub mod config;
pub mod error;
pub mod logging;
pub mod member;
pub mod monitor;
pub mod relay;
pub mod resolver;
pub mod store;

pub use cluster::Cluster;
pub use config::{ClusterConfig, MemberConfig, RedisConfig};
pub use error::{Error, Result};
pub use member::{Member, MemberRef, RpcMember};
pub use monitor::PollMonitor;
pub use relay::{EventKind, JobEvent, JobFailure, JobRelay, RelayState, TimeoutPayload};
pub use resolver::{MagnetResolver, Resolved, SourceResolver};
pub use store::{AffinityStore, MemoryAffinityStore};
#[cfg(feature = "redis")]
pub use store::RedisAffinityStore;

pub use transmission_client::{JobSnapshot, JobStatus, RpcError};
