use std::fmt;

use reqwest::StatusCode;

/// Network failures that are worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// Nothing is listening on the daemon port.
    ConnectionRefused,
    /// Connect or request deadline elapsed.
    TimedOut,
    /// The daemon dropped an established connection.
    ConnectionReset,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientKind::ConnectionRefused => write!(f, "connection refused"),
            TransientKind::TimedOut => write!(f, "timed out"),
            TransientKind::ConnectionReset => write!(f, "connection reset"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("unauthorized by {endpoint}")]
    Unauthorized { endpoint: String },

    #[error("{kind} while calling `{method}` on {endpoint}: {reason}")]
    Transient {
        endpoint: String,
        method: String,
        kind: TransientKind,
        reason: String,
    },

    #[error("max attempts ({attempts}) exceeded for `{method}` on {endpoint}, last failure: {last}")]
    MaxAttemptsExceeded {
        endpoint: String,
        method: String,
        attempts: u32,
        last: TransientKind,
    },

    #[error("request failed with HTTP {status} for `{method}` on {endpoint}")]
    HttpStatus {
        status: StatusCode,
        endpoint: String,
        method: String,
    },

    #[error("daemon {endpoint} rejected `{method}`: {result}")]
    Rejected {
        endpoint: String,
        method: String,
        result: String,
    },

    #[error("session negotiation with {endpoint} did not settle after {attempts} attempts")]
    SessionNegotiation { endpoint: String, attempts: u32 },

    #[error("HTTP request failed: {source}")]
    Transport {
        #[from]
        source: reqwest::Error,
    },

    #[error("invalid response payload: {source}")]
    Decode {
        #[from]
        source: serde_json::Error,
    },
}

impl RpcError {
    pub fn transient(
        endpoint: impl Into<String>,
        method: impl Into<String>,
        kind: TransientKind,
        reason: impl Into<String>,
    ) -> Self {
        Self::Transient {
            endpoint: endpoint.into(),
            method: method.into(),
            kind,
            reason: reason.into(),
        }
    }

    pub fn rejected(
        endpoint: impl Into<String>,
        method: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self::Rejected {
            endpoint: endpoint.into(),
            method: method.into(),
            result: result.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether the failure means the daemon could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::Transient {
                kind: TransientKind::ConnectionRefused,
                ..
            } | Self::MaxAttemptsExceeded {
                last: TransientKind::ConnectionRefused,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_is_unreachable() {
        let err = RpcError::transient(
            "10.0.0.1:9091",
            "torrent-get",
            TransientKind::ConnectionRefused,
            "refused",
        );
        assert!(err.is_transient());
        assert!(err.is_unreachable());

        let timeout =
            RpcError::transient("10.0.0.1:9091", "torrent-get", TransientKind::TimedOut, "slow");
        assert!(!timeout.is_unreachable());
    }

    #[test]
    fn exhausted_budget_after_refusals_is_unreachable() {
        let err = RpcError::MaxAttemptsExceeded {
            endpoint: "10.0.0.1:9091".into(),
            method: "torrent-get".into(),
            attempts: 61,
            last: TransientKind::ConnectionRefused,
        };
        assert!(err.is_unreachable());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("connection refused"));
    }
}
