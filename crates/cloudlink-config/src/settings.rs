//! Reconciler settings file

use crate::error::{ConfigError, Result};
use cloudlink_core::{ReconcilerConfig, ResourceKind, TimeoutConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const ENV_POLL_INTERVAL_MS: &str = "CLOUDLINK_POLL_INTERVAL_MS";
pub const ENV_TIMEOUT_SECS: &str = "CLOUDLINK_TIMEOUT_SECS";

/// Contents of `cloudlink.yaml`
///
/// ```yaml
/// reconciler:
///   poll_interval_ms: 2000
///   retry:
///     initial_delay_ms: 500
///     jitter: true
/// kinds:
///   vswitch:
///     create_secs: 1200
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Per-kind deadline overrides
    #[serde(default)]
    pub kinds: BTreeMap<String, TimeoutConfig>,
}

impl Settings {
    pub fn from_yaml(content: &str, origin: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
            path: origin.to_string(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_yaml(&content, &path.display().to_string())?;
        tracing::debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Apply `CLOUDLINK_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(ms) = env_u64(ENV_POLL_INTERVAL_MS)? {
            self.reconciler.poll_interval_ms = ms;
        }
        if let Some(secs) = env_u64(ENV_TIMEOUT_SECS)? {
            self.reconciler.timeouts = TimeoutConfig::uniform(secs);
        }
        Ok(())
    }

    /// Deadlines for one kind, falling back to the reconciler defaults
    pub fn timeouts_for(&self, kind: &str) -> TimeoutConfig {
        self.kinds
            .get(kind)
            .copied()
            .unwrap_or(self.reconciler.timeouts)
    }

    /// Attach this file's deadline override, if any, to a kind
    pub fn configure(&self, kind: ResourceKind) -> ResourceKind {
        match self.kinds.get(&kind.name) {
            Some(timeouts) => kind.with_timeouts(*timeouts),
            None => kind,
        }
    }
}

fn env_u64(name: &'static str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudlink_core::Operations;

    const SAMPLE: &str = r#"
reconciler:
  poll_interval_ms: 2000
  retry:
    initial_delay_ms: 500
    jitter: true
  timeouts:
    read_secs: 30
kinds:
  vswitch:
    create_secs: 1200
"#;

    #[test]
    fn test_parse_settings() {
        let settings = Settings::from_yaml(SAMPLE, "sample").unwrap();

        assert_eq!(settings.reconciler.poll_interval_ms, 2000);
        assert_eq!(settings.reconciler.retry.initial_delay_ms, 500);
        assert_eq!(settings.reconciler.retry.max_delay_ms, 30000);
        assert!(settings.reconciler.retry.jitter);
        assert_eq!(settings.reconciler.timeouts.read_secs, 30);
        assert_eq!(settings.reconciler.timeouts.create_secs, 600);

        let vswitch = settings.timeouts_for("vswitch");
        assert_eq!(vswitch.create_secs, 1200);
        assert_eq!(vswitch.delete_secs, 600);
        assert_eq!(settings.timeouts_for("vpc"), settings.reconciler.timeouts);
    }

    #[test]
    fn test_empty_settings_are_defaults() {
        let settings = Settings::from_yaml("{}", "empty").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_invalid_yaml() {
        let err = Settings::from_yaml("reconciler: [1, 2", "broken.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { ref path, .. } if path == "broken.yaml"));
    }

    #[test]
    fn test_configure_kind() {
        let settings = Settings::from_yaml(SAMPLE, "sample").unwrap();
        let ops = Operations::new("CreateVSwitch", "DescribeVSwitch", "DeleteVSwitch");

        let vswitch = settings.configure(ResourceKind::new("vswitch", ops.clone(), ["id"]));
        assert_eq!(vswitch.timeouts.map(|t| t.create_secs), Some(1200));

        let vpc = settings.configure(ResourceKind::new("vpc", ops, ["id"]));
        assert!(vpc.timeouts.is_none());
    }
}
