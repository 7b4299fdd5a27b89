//! Orchestrator configuration.
//!
//! Every field has a serde default, so a partial JSON document (or `{}`)
//! yields a usable config. [`OrchestratorConfig::from_env`] layers
//! environment overrides on top of the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};

/// Retry and backoff settings for capability invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per step, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fraction of the computed delay applied as ± random jitter.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            factor: default_factor(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Retry without waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            jitter: 0.0,
            ..Default::default()
        }
    }
}

/// Top-level configuration for an [`Orchestrator`](crate::orchestrator::Orchestrator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Plans with more steps than this are rejected, never truncated.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Capability used for the single-step fallback plan.
    #[serde(default = "default_reasoning_capability")]
    pub reasoning_capability: String,
    #[serde(default = "default_oracle_timeout_ms")]
    pub oracle_timeout_ms: u64,
    /// Bound on each individual capability attempt.
    #[serde(default = "default_capability_timeout_ms")]
    pub capability_timeout_ms: u64,
    #[serde(default = "default_planner_temperature")]
    pub planner_temperature: f32,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_steps() -> usize {
    10
}

fn default_reasoning_capability() -> String {
    "reasoning".into()
}

fn default_oracle_timeout_ms() -> u64 {
    60_000
}

fn default_capability_timeout_ms() -> u64 {
    30_000
}

fn default_planner_temperature() -> f32 {
    0.3
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            reasoning_capability: default_reasoning_capability(),
            oracle_timeout_ms: default_oracle_timeout_ms(),
            capability_timeout_ms: default_capability_timeout_ms(),
            planner_temperature: default_planner_temperature(),
            retry: RetryConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_millis(self.capability_timeout_ms)
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_capability_timeout(mut self, timeout: Duration) -> Self {
        self.capability_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn from_json(json: &str) -> FlowResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> FlowResult<String> {
        serde_json::to_string_pretty(self).map_err(FlowError::Serialization)
    }

    /// Defaults overridden by `GOALFLOW_*` variables (the legacy
    /// `MAX_REASONING_STEPS` and `MAX_RETRIES` names are also honoured).
    pub fn from_env() -> FlowResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> FlowResult<Self> {
        let mut config = Self::default();
        let first = |keys: &[&str]| keys.iter().find_map(|k| lookup(k));

        if let Some(v) = first(&["GOALFLOW_MAX_STEPS", "MAX_REASONING_STEPS"]) {
            config.max_steps = parse_number("GOALFLOW_MAX_STEPS", &v)?;
        }
        if let Some(v) = first(&["GOALFLOW_MAX_RETRIES", "MAX_RETRIES"]) {
            config.retry.max_attempts = parse_number("GOALFLOW_MAX_RETRIES", &v)?;
        }
        if let Some(v) = first(&["GOALFLOW_ORACLE_TIMEOUT_MS"]) {
            config.oracle_timeout_ms = parse_number("GOALFLOW_ORACLE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = first(&["GOALFLOW_CAPABILITY_TIMEOUT_MS"]) {
            config.capability_timeout_ms = parse_number("GOALFLOW_CAPABILITY_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = first(&["GOALFLOW_REASONING_CAPABILITY"]) {
            config.reasoning_capability = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FlowResult<()> {
        if self.max_steps == 0 {
            return Err(FlowError::Config("max_steps must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(FlowError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.reasoning_capability.trim().is_empty() {
            return Err(FlowError::Config(
                "reasoning_capability must not be empty".into(),
            ));
        }
        if self.oracle_timeout_ms == 0 || self.capability_timeout_ms == 0 {
            return Err(FlowError::Config("timeouts must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(FlowError::Config("retry.jitter must be within 0..=1".into()));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> FlowResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| FlowError::Config(format!("{key} is not a valid number: {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_steps, 10);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.reasoning_capability, "reasoning");
        assert_eq!(config.capability_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config =
            OrchestratorConfig::from_json(r#"{"max_steps": 4, "retry": {"max_attempts": 5}}"#)
                .unwrap();
        assert_eq!(config.max_steps, 4);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 200);
        assert_eq!(config.oracle_timeout_ms, 60_000);
    }

    #[test]
    fn json_roundtrip() {
        let config = OrchestratorConfig::default().with_max_steps(7);
        let json = config.to_json_pretty().unwrap();
        assert_eq!(OrchestratorConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(OrchestratorConfig::from_json(r#"{"max_steps": 0}"#).is_err());
        assert!(OrchestratorConfig::from_json(r#"{"retry": {"max_attempts": 0}}"#).is_err());
        assert!(OrchestratorConfig::from_json(r#"{"retry": {"jitter": 1.5}}"#).is_err());
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("GOALFLOW_MAX_STEPS", "6"),
            ("MAX_RETRIES", "2"),
            ("GOALFLOW_CAPABILITY_TIMEOUT_MS", "1500"),
        ]
        .into_iter()
        .collect();
        let config =
            OrchestratorConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.max_steps, 6);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.capability_timeout_ms, 1500);
    }

    #[test]
    fn env_prefers_namespaced_key() {
        let vars: HashMap<&str, &str> =
            [("GOALFLOW_MAX_STEPS", "3"), ("MAX_REASONING_STEPS", "9")]
                .into_iter()
                .collect();
        let config =
            OrchestratorConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.max_steps, 3);
    }

    #[test]
    fn env_garbage_is_config_error() {
        let result = OrchestratorConfig::from_lookup(|k| {
            (k == "GOALFLOW_MAX_STEPS").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(FlowError::Config(_))));
    }

    #[test]
    fn immediate_retry_has_no_delay() {
        let retry = RetryConfig::immediate(4);
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.base_delay_ms, 0);
    }
}
