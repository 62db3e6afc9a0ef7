//! Resilience configuration types
//!
//! All keys are kebab-case in YAML. Every field has a default, so a partial
//! file only overrides what it names.

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffOptions;
use crate::inflight::DedupeMode;
use crate::optimistic::CommitBehavior;

/// Top-level configuration (`actflow.yaml`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResilienceConfig {
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub inflight: InflightConfig,

    #[serde(default)]
    pub optimistic: OptimisticConfig,
}

/// Retry policy for an operation
///
/// Backoff keys sit next to `max-retries`:
///
/// ```yaml
/// retry:
///   max-retries: 3
///   base-ms: 200
///   factor: 2
///   max-ms: 30000
///   jitter: full
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(flatten)]
    pub backoff: BackoffOptions,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff: BackoffOptions::default(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

/// Defaults for the in-flight registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InflightConfig {
    #[serde(default)]
    pub mode: DedupeMode,
}

/// Defaults for optimistic managers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OptimisticConfig {
    #[serde(default)]
    pub commit_behavior: CommitBehavior,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::Jitter;

    #[test]
    fn test_defaults() {
        let config = ResilienceConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.backoff.base_ms, 200.0);
        assert_eq!(config.retry.backoff.jitter, Jitter::Full);
        assert_eq!(config.inflight.mode, DedupeMode::ByKey);
        assert_eq!(config.optimistic.commit_behavior, CommitBehavior::Keep);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
retry:
  max-retries: 5
  jitter: half
inflight:
  mode: latest-wins
"#;
        let config: ResilienceConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.backoff.jitter, Jitter::Half);
        assert_eq!(config.retry.backoff.max_ms, 30_000.0);
        assert_eq!(config.inflight.mode, DedupeMode::LatestWins);
        assert_eq!(config.optimistic.commit_behavior, CommitBehavior::Keep);
    }
}
