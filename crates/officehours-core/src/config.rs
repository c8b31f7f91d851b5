//! Shared configuration defaults.
//!
//! Collects the timing constants used by queues and the dispatcher together
//! with environment accessors that fall back to those defaults, so the
//! crates never repeat the same literals.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Role names consulted during authorization.
pub mod roles {
    /// Top administrative role.
    pub const BOT_ADMIN: &str = "Bot Admin";
    /// Helper role.
    pub const STAFF: &str = "Staff";
    /// Verified membership in the organizational unit.
    pub const VERIFIED: &str = "Verified Email";
}

/// Queue timing defaults.
pub mod queue {
    /// Period of the background tick (24h).
    pub const DEFAULT_TICK_PERIOD_SECS: u64 = 24 * 60 * 60;
    /// Upper bound of the random jitter added to the tick period.
    pub const DEFAULT_TICK_JITTER_SECS: u64 = 10 * 60;
    /// Bounded wait applied to every collaborator call.
    pub const DEFAULT_COLLABORATOR_TIMEOUT_MS: u64 = 10_000;
}

/// Dispatcher defaults.
pub mod dispatch {
    /// Placeholder reply sent before routing.
    pub const DEFAULT_PLACEHOLDER: &str = "Processing command...";
    /// Context name used when a request's origin is unknown.
    pub const UNKNOWN_ORIGIN: &str = "unknown";
}

/// Environment variable names.
pub mod env_vars {
    use super::queue;

    pub const TICK_PERIOD_SECS: &str = "OFFICEHOURS_TICK_PERIOD_SECS";
    pub const TICK_JITTER_SECS: &str = "OFFICEHOURS_TICK_JITTER_SECS";
    pub const COLLABORATOR_TIMEOUT_MS: &str = "OFFICEHOURS_COLLABORATOR_TIMEOUT_MS";

    /// Tick period from the environment, or the default.
    pub fn tick_period_secs() -> u64 {
        std::env::var(TICK_PERIOD_SECS)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(queue::DEFAULT_TICK_PERIOD_SECS)
    }

    /// Tick jitter from the environment, or the default.
    pub fn tick_jitter_secs() -> u64 {
        std::env::var(TICK_JITTER_SECS)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(queue::DEFAULT_TICK_JITTER_SECS)
    }

    /// Collaborator timeout from the environment, or the default.
    pub fn collaborator_timeout_ms() -> u64 {
        std::env::var(COLLABORATOR_TIMEOUT_MS)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(queue::DEFAULT_COLLABORATOR_TIMEOUT_MS)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Runtime knobs for queues and the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Background tick period in seconds
    pub tick_period_secs: u64,
    /// Maximum random jitter added to each tick, in seconds
    pub tick_jitter_secs: u64,
    /// Bounded wait around render/notify/hook/log calls, in milliseconds
    pub collaborator_timeout_ms: u64,
    /// Text of the placeholder reply
    pub placeholder: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            tick_period_secs: queue::DEFAULT_TICK_PERIOD_SECS,
            tick_jitter_secs: queue::DEFAULT_TICK_JITTER_SECS,
            collaborator_timeout_ms: queue::DEFAULT_COLLABORATOR_TIMEOUT_MS,
            placeholder: dispatch::DEFAULT_PLACEHOLDER.to_string(),
        }
    }
}

impl CoreConfig {
    /// Defaults overridden by whatever environment variables are set.
    pub fn from_env() -> Self {
        Self {
            tick_period_secs: env_vars::tick_period_secs(),
            tick_jitter_secs: env_vars::tick_jitter_secs(),
            collaborator_timeout_ms: env_vars::collaborator_timeout_ms(),
            ..Default::default()
        }
    }

    /// Parse a TOML fragment; missing keys keep their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would spin the tick loop or disable timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_period_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "tick_period_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.collaborator_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "collaborator_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(self.tick_period_secs)
    }

    pub fn tick_jitter(&self) -> Duration {
        Duration::from_secs(self.tick_jitter_secs)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }
}
