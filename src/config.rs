//! # Configuration
//!
//! Process configuration is read once at startup from environment variables.
//! Command-line flags (see [`crate::cli`]) override the environment.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `GENAI_ADDR` | `0.0.0.0:8000` | listen address |
//! | `GENAI_WORKERS` | `4` | HTTP worker threads |
//! | `GENAI_ENV` | `development` | selects the CORS allow-list |
//! | `GENAI_SLOW_REQUEST_MS` | `3000` | requests slower than this log at WARN |
//!
//! Logging variables are documented in [`crate::logging`]; per-request
//! settings in [`crate::app::Settings`].

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::logging::LogConfig;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_SLOW_REQUEST_MS: u64 = 3000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("expected development or production, got {other}")),
        }
    }
}

/// Parse `var` through `lookup`, falling back to `default` when unset or empty.
pub(crate) fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                value: raw.clone(),
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

pub(crate) fn string_var(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: &str,
) -> String {
    lookup(var).unwrap_or_else(|| default.to_string())
}

pub(crate) fn process_env(var: &str) -> Option<String> {
    env::var(var).ok()
}

/// Server-level configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub addr: SocketAddr,
    pub workers: usize,
    pub environment: Environment,
    pub slow_request_threshold: Duration,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            workers: DEFAULT_WORKERS,
            environment: Environment::Development,
            slow_request_threshold: Duration::from_millis(DEFAULT_SLOW_REQUEST_MS),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let addr = parse_var(&lookup, "GENAI_ADDR", SocketAddr::from(([0, 0, 0, 0], 8000)))?;
        let workers: usize = parse_var(&lookup, "GENAI_WORKERS", DEFAULT_WORKERS)?;
        if workers == 0 {
            return Err(ConfigError::Invalid {
                var: "GENAI_WORKERS",
                value: "0".to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }
        let environment = parse_var(&lookup, "GENAI_ENV", Environment::Development)?;
        let slow_ms: u64 = parse_var(&lookup, "GENAI_SLOW_REQUEST_MS", DEFAULT_SLOW_REQUEST_MS)?;

        Ok(Self {
            addr,
            workers,
            environment,
            slow_request_threshold: Duration::from_millis(slow_ms),
            log: LogConfig::from_lookup(&lookup),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.addr.to_string(), DEFAULT_ADDR);
        assert_eq!(config.workers, 4);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.slow_request_threshold, Duration::from_secs(3));
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("GENAI_ADDR", "127.0.0.1:9000"),
            ("GENAI_ENV", "production"),
            ("GENAI_WORKERS", "2"),
            ("GENAI_SLOW_REQUEST_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.addr.port(), 9000);
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.workers, 2);
        assert_eq!(config.slow_request_threshold, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = AppConfig::from_lookup(lookup(&[("GENAI_WORKERS", "many")])).unwrap_err();
        assert!(err.to_string().starts_with("GENAI_WORKERS=\"many\" is invalid"));

        assert!(AppConfig::from_lookup(lookup(&[("GENAI_WORKERS", "0")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("GENAI_ENV", "staging")])).is_err());
    }
}
