//! Monitor configuration
//!
//! Values come from code (`MonitorConfig::builder()`), the environment
//! (`MonitorConfig::from_env()`) or JSON (`MonitorConfig::from_json_str`).
//! Durations are expressed in milliseconds when serialized.
//!
//! | Variable                          | Field                  | Default |
//! |-----------------------------------|------------------------|---------|
//! | `BOARDWATCH_MAX_TASKS`            | `max_tasks`            | 2       |
//! | `BOARDWATCH_SHUTDOWN_TIMEOUT_MS`  | `shutdown_timeout`     | 5000    |
//! | `BOARDWATCH_SOURCE_BACKOFF_MS`    | `source_error_backoff` | 100     |

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_MAX_TASKS: &str = "BOARDWATCH_MAX_TASKS";
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "BOARDWATCH_SHUTDOWN_TIMEOUT_MS";
pub const ENV_SOURCE_BACKOFF_MS: &str = "BOARDWATCH_SOURCE_BACKOFF_MS";

/// Configuration for a [`Monitor`](crate::Monitor)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Concurrency limit for device jobs, at least 1
    /// Default: 2
    pub max_tasks: usize,

    /// How long `stop` waits for running jobs before abandoning them
    /// Default: 5 seconds
    #[serde(with = "millis", rename = "shutdown_timeout_ms")]
    pub shutdown_timeout: Duration,

    /// Pause after a source error before waiting for events again
    /// Default: 100 milliseconds
    #[serde(with = "millis", rename = "source_error_backoff_ms")]
    pub source_error_backoff: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_tasks: 2,
            shutdown_timeout: Duration::from_secs(5),
            source_error_backoff: Duration::from_millis(100),
        }
    }
}

impl MonitorConfig {
    pub fn builder() -> MonitorConfigBuilder {
        MonitorConfigBuilder::default()
    }

    /// Defaults overridden by `BOARDWATCH_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable name
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_MAX_TASKS) {
            config.max_tasks = parse_env(ENV_MAX_TASKS, &value)?;
        }
        if let Some(value) = lookup(ENV_SHUTDOWN_TIMEOUT_MS) {
            let millis = parse_env(ENV_SHUTDOWN_TIMEOUT_MS, &value)?;
            config.shutdown_timeout = Duration::from_millis(millis);
        }
        if let Some(value) = lookup(ENV_SOURCE_BACKOFF_MS) {
            let millis = parse_env(ENV_SOURCE_BACKOFF_MS, &value)?;
            config.source_error_backoff = Duration::from_millis(millis);
        }

        Ok(config.normalized())
    }

    /// Parse a JSON object; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values that cannot be clamped into range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_error_backoff.is_zero() {
            return Err(ConfigError::Invalid(
                "source_error_backoff must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    fn normalized(mut self) -> Self {
        self.max_tasks = self.max_tasks.max(1);
        self
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name,
        value: value.to_string(),
    })
}

/// Builder for [`MonitorConfig`]
#[derive(Debug, Clone, Default)]
pub struct MonitorConfigBuilder {
    config: MonitorConfig,
}

impl MonitorConfigBuilder {
    pub fn max_tasks(mut self, max_tasks: usize) -> Self {
        self.config.max_tasks = max_tasks;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    pub fn source_error_backoff(mut self, backoff: Duration) -> Self {
        self.config.source_error_backoff = backoff;
        self
    }

    /// Build the configuration, clamping `max_tasks` to at least 1
    pub fn build(self) -> MonitorConfig {
        self.config.normalized()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.max_tasks, 2);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(5000));
        assert_eq!(config.source_error_backoff, Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_clamps_max_tasks() {
        let config = MonitorConfig::builder()
            .max_tasks(0)
            .shutdown_timeout(Duration::from_millis(250))
            .build();
        assert_eq!(config.max_tasks, 1);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_from_lookup_overrides_defaults() {
        let config = MonitorConfig::from_lookup(lookup(&[
            (ENV_MAX_TASKS, "4"),
            (ENV_SOURCE_BACKOFF_MS, " 20 "),
        ]))
        .unwrap();

        assert_eq!(config.max_tasks, 4);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.source_error_backoff, Duration::from_millis(20));
    }

    #[rstest]
    #[case(ENV_MAX_TASKS, "many")]
    #[case(ENV_SHUTDOWN_TIMEOUT_MS, "-1")]
    #[case(ENV_SOURCE_BACKOFF_MS, "1.5")]
    fn test_invalid_env_values(#[case] name: &'static str, #[case] value: &str) {
        let err = MonitorConfig::from_lookup(lookup(&[(name, value)])).unwrap_err();
        match err {
            ConfigError::InvalidEnv { name: got, value: raw } => {
                assert_eq!(got, name);
                assert_eq!(raw, value);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_json_partial_and_round_trip() {
        let json = r#"{ "max_tasks": 0, "shutdown_timeout_ms": 1500 }"#;
        let config = MonitorConfig::from_json_str(json).unwrap();
        assert_eq!(config.max_tasks, 1);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(1500));
        assert_eq!(config.source_error_backoff, Duration::from_millis(100));

        let json = config.to_json_string().unwrap();
        assert_eq!(MonitorConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            MonitorConfig::from_json_str("{ \"max_tasks\": \"two\" }"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_zero_backoff_is_invalid() {
        let config = MonitorConfig::builder()
            .source_error_backoff(Duration::ZERO)
            .build();
        assert!(config.validate().is_err());
    }
}
