//! Reconciler tuning

use crate::kind::Verb;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings shared by every reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Interval between status queries while waiting for a state
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

fn default_poll_interval() -> u64 {
    5000
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_interval_ms: default_poll_interval(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl ReconcilerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Per-verb deadlines, in seconds
///
/// Each deadline bounds the whole verb's retry loop and, separately, its
/// status wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_create_secs")]
    pub create_secs: u64,
    #[serde(default = "default_read_secs")]
    pub read_secs: u64,
    #[serde(default = "default_update_secs")]
    pub update_secs: u64,
    #[serde(default = "default_delete_secs")]
    pub delete_secs: u64,
}

fn default_create_secs() -> u64 {
    600
}
fn default_read_secs() -> u64 {
    120
}
fn default_update_secs() -> u64 {
    600
}
fn default_delete_secs() -> u64 {
    600
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            create_secs: default_create_secs(),
            read_secs: default_read_secs(),
            update_secs: default_update_secs(),
            delete_secs: default_delete_secs(),
        }
    }
}

impl TimeoutConfig {
    /// Same deadline for every verb
    pub fn uniform(secs: u64) -> Self {
        Self {
            create_secs: secs,
            read_secs: secs,
            update_secs: secs,
            delete_secs: secs,
        }
    }

    pub fn for_verb(&self, verb: Verb) -> Duration {
        let secs = match verb {
            Verb::Create => self.create_secs,
            Verb::Read => self.read_secs,
            Verb::Update => self.update_secs,
            Verb::Delete => self.delete_secs,
        };
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: ReconcilerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ReconcilerConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.timeouts.for_verb(Verb::Read), Duration::from_secs(120));
    }

    #[test]
    fn test_partial_override() {
        let config: ReconcilerConfig = serde_json::from_str(
            r#"{"retry": {"initial_delay_ms": 200, "jitter": true}, "timeouts": {"delete_secs": 30}}"#,
        )
        .unwrap();

        assert_eq!(config.retry.initial_delay_ms, 200);
        assert_eq!(config.retry.max_delay_ms, 30000);
        assert!(config.retry.jitter);
        assert_eq!(config.timeouts.for_verb(Verb::Delete), Duration::from_secs(30));
        assert_eq!(config.timeouts.for_verb(Verb::Create), Duration::from_secs(600));
    }
}
