//! Retry bookkeeping for transient network failures.
//!
//! Attempts are counted per call signature so that unrelated calls on the
//! same daemon never share a budget.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Failures tolerated per call signature before giving up.
    pub max_attempts: u32,
    /// Fixed delay between retries in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            retry_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Whether `attempts` failures exhaust the budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts > self.max_attempts
    }
}

/// Identity of one logical call: target endpoint, method and arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSignature {
    endpoint: String,
    method: String,
    arguments: String,
}

impl CallSignature {
    pub fn new(
        endpoint: impl Into<String>,
        method: impl Into<String>,
        arguments: &serde_json::Value,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into(),
            arguments: arguments.to_string(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

/// Failure counters keyed by [`CallSignature`].
#[derive(Debug, Default)]
pub struct AttemptTracker {
    attempts: Mutex<HashMap<CallSignature, u32>>,
}

impl AttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return the updated count.
    pub fn record_failure(&self, signature: &CallSignature) -> u32 {
        let mut attempts = self.attempts.lock();
        let count = attempts.entry(signature.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Forget the counter for a signature.
    pub fn reset(&self, signature: &CallSignature) {
        if self.attempts.lock().remove(signature).is_some() {
            debug!(method = %signature.method, "Attempt counter reset");
        }
    }

    pub fn attempts(&self, signature: &CallSignature) -> u32 {
        self.attempts.lock().get(signature).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 60);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert!(!config.is_exhausted(60));
        assert!(config.is_exhausted(61));
    }

    #[test]
    fn test_counters_are_isolated_per_signature() {
        let tracker = AttemptTracker::new();
        let get_a = CallSignature::new("h:1", "torrent-get", &json!({"ids": ["a"]}));
        let get_b = CallSignature::new("h:1", "torrent-get", &json!({"ids": ["b"]}));
        let other_host = CallSignature::new("h:2", "torrent-get", &json!({"ids": ["a"]}));

        assert_eq!(tracker.record_failure(&get_a), 1);
        assert_eq!(tracker.record_failure(&get_a), 2);
        assert_eq!(tracker.record_failure(&get_b), 1);

        assert_eq!(tracker.attempts(&get_a), 2);
        assert_eq!(tracker.attempts(&other_host), 0);
    }

    #[test]
    fn test_reset_clears_only_one_signature() {
        let tracker = AttemptTracker::new();
        let stats = CallSignature::new("h:1", "session-stats", &json!(null));
        let get = CallSignature::new("h:1", "torrent-get", &json!({"ids": ["a"]}));

        tracker.record_failure(&stats);
        tracker.record_failure(&get);
        tracker.reset(&stats);

        assert_eq!(tracker.attempts(&stats), 0);
        assert_eq!(tracker.attempts(&get), 1);
    }
}
