//! Configuration for the rejoin pipeline
//!
//! Defaults, environment-variable overrides, TOML file loading, and
//! validation. Environment variables follow `REJOIN_<SECTION>_<KEY>`.

use crate::core_accept::RetryPolicy;
use crate::ratelimit::{Budget, Endpoint};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Per-endpoint rate-limit budgets
    pub ratelimit: RateLimitConfig,

    /// Auto-accept retry policy
    pub retry: RetryPolicy,

    /// Access code issuance
    pub codes: CodeConfig,
}

/// Independent budget per rate-limited endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub request_room_code: Budget,
    pub knock: Budget,
    pub auto_join: Budget,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            request_room_code: Budget::new(Duration::from_secs(120), 120),
            knock: Budget::new(Duration::from_secs(120), 120),
            auto_join: Budget::new(Duration::from_secs(120), 60),
        }
    }
}

impl RateLimitConfig {
    /// Budget table keyed by endpoint, for the limiter
    pub fn budgets(&self) -> HashMap<Endpoint, Budget> {
        let mut budgets = HashMap::new();
        budgets.insert(Endpoint::RequestRoomCode, self.request_room_code.clone());
        budgets.insert(Endpoint::Knock, self.knock.clone());
        budgets.insert(Endpoint::AutoJoin, self.auto_join.clone());
        budgets
    }
}

/// Access code issuance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeConfig {
    /// Optional lifetime; `None` keeps a code valid until superseded
    #[serde(default, with = "humantime_serde::option")]
    pub ttl: Option<Duration>,
}

impl Default for CodeConfig {
    fn default() -> Self {
        CodeConfig { ttl: None }
    }
}

impl Config {
    /// Load configuration from environment variables over defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(max) = env::var("REJOIN_RATELIMIT_KNOCK_MAX_REQUESTS") {
            config.ratelimit.knock.max_requests = max
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid knock budget: {}", e)))?;
        }
        if let Ok(max) = env::var("REJOIN_RATELIMIT_AUTO_JOIN_MAX_REQUESTS") {
            config.ratelimit.auto_join.max_requests = max.parse().map_err(|e| {
                ConfigError::InvalidValue(format!("Invalid auto-join budget: {}", e))
            })?;
        }
        if let Ok(attempts) = env::var("REJOIN_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid max attempts: {}", e)))?;
        }
        if let Ok(base) = env::var("REJOIN_RETRY_BASE_DELAY_MS") {
            let millis: u64 = base
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid base delay: {}", e)))?;
            config.retry.base_delay = Duration::from_millis(millis);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, budget) in [
            ("request_room_code", &self.ratelimit.request_room_code),
            ("knock", &self.ratelimit.knock),
            ("auto_join", &self.ratelimit.auto_join),
        ] {
            if budget.max_requests == 0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} budget must allow at least one request",
                    name
                )));
            }
            if budget.window.is_zero() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} window must be at least one second",
                    name
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "retry max_attempts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
