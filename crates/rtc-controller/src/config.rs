//! RTC controller configuration.
//!
//! Configuration is loaded from environment variables.

use common::config::{LoggingConfig, LoggingConfigError};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default cap on concurrently live sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 8;

/// Default bounded mailbox size per session actor.
pub const DEFAULT_SESSION_MAILBOX: usize = 256;

/// Default time a session gets to leave its room on shutdown.
pub const DEFAULT_SESSION_SHUTDOWN_TIMEOUT_MS: u64 = 5000;

/// Default controller ID prefix.
pub const DEFAULT_CONTROLLER_ID_PREFIX: &str = "rtc";

/// RTC controller configuration.
#[derive(Clone)]
pub struct Config {
    /// Application ID used by the loopback scenario when entering rooms.
    pub sdk_app_id: u32,

    /// Unique identifier for this controller instance.
    pub controller_id: String,

    /// Maximum sessions alive at once (default: 8).
    pub max_sessions: usize,

    /// Bounded mailbox capacity of each session actor (default: 256).
    pub session_mailbox: usize,

    /// Grace period for each session during shutdown (default: 5 s).
    pub session_shutdown_timeout: Duration,

    pub logging: LoggingConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("sdk_app_id", &self.sdk_app_id)
            .field("controller_id", &self.controller_id)
            .field("max_sessions", &self.max_sessions)
            .field("session_mailbox", &self.session_mailbox)
            .field("session_shutdown_timeout", &self.session_shutdown_timeout)
            .field("logging", &self.logging)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl From<LoggingConfigError> for ConfigError {
    fn from(err: LoggingConfigError) -> Self {
        ConfigError::InvalidValue(err.to_string())
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let raw_app_id = vars
            .get("RTC_SDK_APP_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("RTC_SDK_APP_ID".to_string()))?;
        let sdk_app_id = raw_app_id
            .parse::<u32>()
            .ok()
            .filter(|id| *id != 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(format!(
                    "RTC_SDK_APP_ID must be a non-zero u32, got '{raw_app_id}'"
                ))
            })?;

        let max_sessions = vars
            .get("RTC_MAX_SESSIONS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_SESSIONS);
        if max_sessions == 0 {
            return Err(ConfigError::InvalidValue(
                "RTC_MAX_SESSIONS must be at least 1".to_string(),
            ));
        }

        let session_mailbox = vars
            .get("RTC_SESSION_MAILBOX")
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_SESSION_MAILBOX);

        let session_shutdown_timeout = Duration::from_millis(
            vars.get("RTC_SESSION_SHUTDOWN_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SESSION_SHUTDOWN_TIMEOUT_MS),
        );

        let controller_id = vars.get("RTC_CONTROLLER_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_CONTROLLER_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        let logging = LoggingConfig::from_vars(vars)?;

        Ok(Config {
            sdk_app_id,
            controller_id,
            max_sessions,
            session_mailbox,
            session_shutdown_timeout,
            logging,
        })
    }
}
