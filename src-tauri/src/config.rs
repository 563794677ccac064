use std::env;

use thiserror::Error;
use tracing::warn;

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),
}

/// Connection settings for the hosted backend. Both values are required at
/// startup; a missing value aborts the launch instead of falling back to a
/// placeholder that can never work.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub anon_key: String,
    pub debounce_ms: u64,
}

impl RemoteConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: require("SCHOOLHUB_REMOTE_URL")?,
            anon_key: require("SCHOOLHUB_ANON_KEY")?,
            debounce_ms: try_load("SCHOOLHUB_DEBOUNCE_MS", DEFAULT_DEBOUNCE_MS),
        })
    }
}

fn require(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn try_load(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value: {e}, using default {default}");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_endpoint_fails_fast() {
        // not set in the test environment
        assert!(matches!(
            require("SCHOOLHUB_TEST_UNSET_URL"),
            Err(ConfigError::Missing("SCHOOLHUB_TEST_UNSET_URL"))
        ));
    }
}
