/// 等待表配置

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::WaitlistError;
use crate::frame::HEADER_LEN;
use crate::token::TokenStrategy;

/// 配置错误
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for field '{field}': {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl From<ConfigError> for WaitlistError {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::InvalidValue { field, value, reason } => {
                WaitlistError::config_error(field, format!("{} ({})", reason, value))
            }
        }
    }
}

/// Largest payload a single frame can carry
pub const MAX_SINGLE_FRAME_PAYLOAD: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitlistConfig {
    /// How often the reaper scans for expired asynchronous calls
    pub reap_interval: Duration,
    /// Payloads at least this long go through the block transfer
    pub max_frame_payload: usize,
    pub token_strategy: TokenStrategy,
    /// Tokens tried before giving up on a colliding registration
    pub max_token_attempts: usize,
}

impl Default for WaitlistConfig {
    fn default() -> Self {
        Self {
            reap_interval: Duration::from_millis(20),
            max_frame_payload: 1024,
            token_strategy: TokenStrategy::Sequential,
            max_token_attempts: 16,
        }
    }
}

impl WaitlistConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn with_max_frame_payload(mut self, limit: usize) -> Self {
        self.max_frame_payload = limit;
        self
    }

    pub fn with_token_strategy(mut self, strategy: TokenStrategy) -> Self {
        self.token_strategy = strategy;
        self
    }

    pub fn with_max_token_attempts(mut self, attempts: usize) -> Self {
        self.max_token_attempts = attempts;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reap_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "reap_interval".to_string(),
                value: format!("{:?}", self.reap_interval),
                reason: "reap interval must be greater than zero".to_string(),
            });
        }

        if self.max_frame_payload == 0 || self.max_frame_payload > MAX_SINGLE_FRAME_PAYLOAD {
            return Err(ConfigError::InvalidValue {
                field: "max_frame_payload".to_string(),
                value: self.max_frame_payload.to_string(),
                reason: format!("must be between 1 and {}", MAX_SINGLE_FRAME_PAYLOAD),
            });
        }

        if self.max_token_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_token_attempts".to_string(),
                value: "0".to_string(),
                reason: "at least one token attempt is required".to_string(),
            });
        }

        Ok(())
    }

    /// Largest on-wire frame this configuration produces
    pub fn max_frame_len(&self) -> usize {
        HEADER_LEN + self.max_frame_payload
    }
}
