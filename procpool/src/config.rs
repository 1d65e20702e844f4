//! Pool configuration and run manifests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{PoolError, Result};
use crate::models::ProcessSpec;

/// Default number of output chunks held per pipe while no consumer is attached.
pub const DEFAULT_BACKLOG_CAPACITY: usize = 64;

/// Configuration for a [`ProcessPool`](crate::ProcessPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Hard cap on registered processes.
    pub max_concurrent: usize,

    /// Period of the dead-entry sweeper. `None` disables it.
    #[serde(
        default,
        rename = "health_check_interval_ms",
        with = "millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub health_check_interval: Option<Duration>,

    /// Reserved. Stored and serialized but not enforced.
    #[serde(
        default,
        rename = "idle_timeout_ms",
        with = "millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub idle_timeout: Option<Duration>,

    /// Output chunks kept per pipe while nobody is reading it; the oldest
    /// are forgotten first. Zero forgets unread output immediately.
    #[serde(default = "default_backlog_capacity")]
    pub backlog_capacity: usize,
}

const fn default_backlog_capacity() -> usize {
    DEFAULT_BACKLOG_CAPACITY
}

impl PoolConfig {
    /// Create a config with the given cap and no sweeper.
    pub const fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            health_check_interval: None,
            idle_timeout: None,
            backlog_capacity: DEFAULT_BACKLOG_CAPACITY,
        }
    }

    /// Enable the sweeper with the given period.
    pub const fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = Some(interval);
        self
    }

    /// Set the (unenforced) idle timeout.
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set how many unread output chunks each pipe keeps.
    pub const fn backlog_capacity(mut self, chunks: usize) -> Self {
        self.backlog_capacity = chunks;
        self
    }

    /// Reject configurations the pool cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(PoolError::InvalidConfig(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.health_check_interval == Some(Duration::ZERO) {
            return Err(PoolError::InvalidConfig(
                "health_check_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A pool configuration plus the processes to launch in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Pool settings.
    pub pool: PoolConfig,

    /// Processes keyed by pool id, spawned in key order.
    #[serde(default)]
    pub processes: BTreeMap<String, ProcessSpec>,
}

impl Manifest {
    /// Parse a manifest from JSON text.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let manifest: Self = serde_json::from_str(json)?;
        manifest.pool.validate()?;
        Ok(manifest)
    }

    /// Read and parse a manifest file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        Self::from_json(&text)
            .with_context(|| format!("Invalid manifest: {}", path.display()))
    }
}

/// `Option<Duration>` as integer milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_are_milliseconds() {
        let config = PoolConfig::new(4)
            .health_check_interval(Duration::from_millis(250))
            .idle_timeout(Duration::from_secs(60));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["health_check_interval_ms"], 250);
        assert_eq!(json["idle_timeout_ms"], 60_000);

        let back: PoolConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn missing_optionals_default() {
        let config: PoolConfig = serde_json::from_str(r#"{"max_concurrent":2}"#).unwrap();
        assert_eq!(config, PoolConfig::new(2));
        assert!(config.health_check_interval.is_none());
        assert_eq!(config.backlog_capacity, DEFAULT_BACKLOG_CAPACITY);
    }

    #[test]
    fn validate_rejects_unusable_values() {
        assert!(PoolConfig::new(1).validate().is_ok());
        assert!(matches!(
            PoolConfig::new(0).validate(),
            Err(PoolError::InvalidConfig(_))
        ));
        assert!(PoolConfig::new(1)
            .health_check_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(PoolConfig::new(1).backlog_capacity(0).validate().is_ok());
    }

    #[test]
    fn manifest_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");
        std::fs::write(
            &path,
            r#"{
                "pool": {"max_concurrent": 2, "health_check_interval_ms": 500},
                "processes": {
                    "b": {"command": "sleep", "args": ["1"]},
                    "a": {"command": "echo", "args": ["hi"], "env": {"X": "1"}}
                }
            }"#,
        )
        .unwrap();

        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.pool.max_concurrent, 2);
        assert_eq!(
            manifest.pool.health_check_interval,
            Some(Duration::from_millis(500))
        );
        let ids: Vec<_> = manifest.processes.keys().cloned().collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(manifest.processes["a"].env["X"], "1");
    }

    #[test]
    fn manifest_with_zero_cap_is_rejected() {
        let err = Manifest::from_json(r#"{"pool":{"max_concurrent":0}}"#).unwrap_err();
        assert!(err.to_string().contains("max_concurrent"));
    }
}
