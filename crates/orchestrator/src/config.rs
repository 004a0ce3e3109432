//! Orchestrator configuration

use gridrunner_common::TestUnit;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum test units in flight at once
    pub concurrency_limit: usize,

    /// Default retry budget per unit; per-unit overrides win
    pub max_retry: u32,

    /// How long a unit may wait for a matching idle session
    pub acquire_timeout_ms: u64,

    /// Default per-attempt execution deadline; per-unit overrides win
    pub execution_timeout_ms: u64,

    /// Delay policy between retry attempts
    pub backoff: BackoffPolicy,

    /// Session pool configuration
    pub pool: PoolConfig,

    /// Directory for per-attempt artifacts
    pub artifact_dir: PathBuf,

    /// Results database path
    pub results_db: PathBuf,

    /// Structured report feed, one JSON record per result
    pub feed_path: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            max_retry: 2,
            acquire_timeout_ms: 30_000,
            execution_timeout_ms: 60_000,
            backoff: BackoffPolicy::default(),
            pool: PoolConfig::default(),
            artifact_dir: gridrunner_common::default_store_path().join("artifacts"),
            results_db: gridrunner_common::default_db_path(),
            feed_path: Some(gridrunner_common::default_store_path().join("results.jsonl")),
        }
    }
}

/// Session pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Below this many live sessions per capability, replacement
    /// provisioning is requested
    pub min_pool_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { min_pool_size: 1 }
    }
}

/// Delay policy between retry attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Constant delay before every retry
    Fixed { delay_ms: u64 },
    /// Delay grows by `factor` per retry, capped at `max_delay_ms`
    Exponential {
        base_ms: u64,
        factor: f64,
        max_delay_ms: u64,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Fixed { delay_ms: 1_000 }
    }
}

impl BackoffPolicy {
    /// Delay before the given retry; `retry` is 1-based
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self {
            BackoffPolicy::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            BackoffPolicy::Exponential {
                base_ms,
                factor,
                max_delay_ms,
            } => {
                let exponent = retry.saturating_sub(1) as i32;
                let ms = (*base_ms as f64) * factor.powi(exponent);
                Duration::from_millis(ms.min(*max_delay_ms as f64) as u64)
            }
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Acquire timeout as a Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Effective per-attempt deadline for a unit
    pub fn execution_timeout_for(&self, unit: &TestUnit) -> Duration {
        Duration::from_millis(unit.timeout_ms.unwrap_or(self.execution_timeout_ms))
    }

    /// Effective retry budget for a unit
    pub fn max_retry_for(&self, unit: &TestUnit) -> u32 {
        unit.max_retry.unwrap_or(self.max_retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridrunner_common::{BrowserFamily, Capability, TestStep};

    #[test]
    fn test_fixed_backoff_is_constant() {
        let policy = BackoffPolicy::Fixed { delay_ms: 250 };
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(5), Duration::from_millis(250));
    }

    #[test]
    fn test_exponential_backoff_grows_and_caps() {
        let policy = BackoffPolicy::Exponential {
            base_ms: 100,
            factor: 2.0,
            max_delay_ms: 500,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        // would be 800ms uncapped
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(10), Duration::from_millis(500));
    }

    #[test]
    fn test_per_unit_overrides_win() {
        let config = OrchestratorConfig::default();
        let base = TestUnit::new(
            "t",
            Capability::new(BrowserFamily::Chrome),
            vec![TestStep::Navigate {
                url: "/".to_string(),
            }],
        );

        assert_eq!(config.max_retry_for(&base), 2);
        assert_eq!(
            config.execution_timeout_for(&base),
            Duration::from_millis(60_000)
        );

        let tuned = base.with_max_retry(5).with_timeout_ms(1_500);
        assert_eq!(config.max_retry_for(&tuned), 5);
        assert_eq!(
            config.execution_timeout_for(&tuned),
            Duration::from_millis(1_500)
        );
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = OrchestratorConfig::default();
        config.concurrency_limit = 8;
        config.backoff = BackoffPolicy::Exponential {
            base_ms: 200,
            factor: 1.5,
            max_delay_ms: 10_000,
        };
        config.save(&path).unwrap();

        let loaded = OrchestratorConfig::load(&path).unwrap();
        assert_eq!(loaded.concurrency_limit, 8);
        assert_eq!(loaded.backoff, config.backoff);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = OrchestratorConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded.concurrency_limit, 4);
        assert_eq!(loaded.max_retry, 2);
        assert_eq!(loaded.acquire_timeout_ms, 30_000);
    }
}
