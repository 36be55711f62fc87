//! Shared configuration types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Default tracing filter directive.
pub const DEFAULT_LOG_FILTER: &str = "rtc_controller=debug";

/// Logging configuration consumed by binaries when installing a subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoggingConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

impl LoggingConfig {
    /// Read `RTC_LOG_FILTER` and `RTC_JSON_LOGS` from a variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, LoggingConfigError> {
        let log_filter = vars
            .get("RTC_LOG_FILTER")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let json_logs = match vars.get("RTC_JSON_LOGS").map(String::as_str) {
            None | Some("" | "0" | "false") => false,
            Some("1" | "true") => true,
            Some(other) => {
                return Err(LoggingConfigError::InvalidValue {
                    name: "RTC_JSON_LOGS".to_string(),
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            log_filter,
            json_logs,
        })
    }
}
