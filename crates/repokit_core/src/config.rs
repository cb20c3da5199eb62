//! Runtime configuration for units of work, caching and logging.
//!
//! # Responsibility
//! - Hold the tunables callers may override: cache TTL, fallback audit
//!   identity, SQLite busy timeout and log level.
//! - Load them from JSON and from `REPOKIT_*` environment variables.
//!
//! # Invariants
//! - A validated config has a positive TTL, a non-blank system user and a
//!   known log level.

use crate::context::user::SYSTEM_USER;
use crate::db::StoreOptions;
use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const ENV_CACHE_TTL_SECS: &str = "REPOKIT_CACHE_TTL_SECS";
pub const ENV_SYSTEM_USER: &str = "REPOKIT_SYSTEM_USER";
pub const ENV_BUSY_TIMEOUT_MS: &str = "REPOKIT_BUSY_TIMEOUT_MS";
pub const ENV_LOG_LEVEL: &str = "REPOKIT_LOG_LEVEL";

const KNOWN_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    InvalidValue { key: &'static str, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "config is not valid JSON: {err}"),
            Self::InvalidValue { key, message } => write!(f, "invalid `{key}`: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::InvalidValue { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub cache_ttl_secs: u64,
    pub system_user: String,
    pub busy_timeout_ms: u64,
    pub log_level: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            system_user: SYSTEM_USER.to_string(),
            busy_timeout_ms: 5000,
            log_level: default_log_level().to_string(),
        }
    }
}

impl CoreConfig {
    /// Parses a JSON object; missing keys keep their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `REPOKIT_*` overrides read through `lookup`, then validates.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(raw) = lookup(ENV_CACHE_TTL_SECS) {
            self.cache_ttl_secs = parse_number(ENV_CACHE_TTL_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_SYSTEM_USER) {
            self.system_user = raw;
        }
        if let Some(raw) = lookup(ENV_BUSY_TIMEOUT_MS) {
            self.busy_timeout_ms = parse_number(ENV_BUSY_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LOG_LEVEL) {
            self.log_level = raw;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "cache_ttl_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.system_user.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "system_user",
                message: "must not be blank".to_string(),
            });
        }
        let level = self.log_level.trim().to_ascii_lowercase();
        if !KNOWN_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "log_level",
                message: format!(
                    "unsupported level `{}`; expected trace|debug|info|warn|error",
                    self.log_level
                ),
            });
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }
}

fn parse_number(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            message: format!("`{raw}` is not a non-negative integer: {err}"),
        })
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig, ENV_CACHE_TTL_SECS, ENV_SYSTEM_USER};
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn defaults_match_documented_values() {
        let config = CoreConfig::default();
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.system_user, "System");
        assert_eq!(config.store_options().busy_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn json_keeps_defaults_for_missing_keys() {
        let config = CoreConfig::from_json_str(r#"{ "cache_ttl_secs": 30 }"#).unwrap();
        assert_eq!(config.cache_ttl_secs, 30);
        assert_eq!(config.busy_timeout_ms, 5000);
    }

    #[test]
    fn overrides_are_parsed_and_validated() {
        let vars = HashMap::from([
            (ENV_CACHE_TTL_SECS, "60".to_string()),
            (ENV_SYSTEM_USER, "batch".to_string()),
        ]);
        let config = CoreConfig::default()
            .with_overrides(|key| vars.get(key).cloned())
            .unwrap();
        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.system_user, "batch");

        let bad = HashMap::from([(ENV_CACHE_TTL_SECS, "soon".to_string())]);
        let err = CoreConfig::default()
            .with_overrides(|key| bad.get(key).cloned())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "REPOKIT_CACHE_TTL_SECS", .. }));
    }

    #[test]
    fn zero_ttl_and_unknown_level_are_rejected() {
        assert!(CoreConfig::from_json_str(r#"{ "cache_ttl_secs": 0 }"#).is_err());
        assert!(CoreConfig::from_json_str(r#"{ "log_level": "loud" }"#).is_err());
        assert!(matches!(
            CoreConfig::from_json_str("{"),
            Err(ConfigError::Parse(_))
        ));
    }
}
