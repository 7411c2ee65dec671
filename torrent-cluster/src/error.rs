//! Application-wide error types.

use thiserror::Error;
use transmission_client::RpcError;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Cannot resolve source `{source_input}`: {reason}")]
    Resolve {
        source_input: String,
        reason: String,
    },

    #[error("No cluster member answered the load query")]
    NoMembersAvailable,

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Affinity store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn resolve(source_input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolve {
            source_input: source_input.into(),
            reason: reason.into(),
        }
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether the error means a member could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Rpc(err) if err.is_unreachable())
    }
}
