//! JSON-RPC client for Transmission-style download daemons.
//!
//! - [`TransmissionClient`] speaks the daemon protocol: session-token
//!   handshake, basic auth and bounded retries of transient network faults.
//! - [`JobSnapshot`] is the typed view of a job and its derived predicates.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod retry;
pub mod snapshot;

pub use client::{TransmissionClient, build_http_client, classify_transient};
pub use config::{ClientConfig, Endpoint};
pub use error::{RpcError, TransientKind};
pub use protocol::SessionStats;
pub use retry::{AttemptTracker, CallSignature, RetryConfig};
pub use snapshot::{JobSnapshot, JobStatus, RawPeer, RawTorrent};
