//! Sync session configuration

use crate::sync::retry::RetryPolicy;
use crate::sync::state::DEFAULT_STATE_BUFFER;
use crate::transport::ble::{GattProfile, DEFAULT_CONNECT_TIMEOUT};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),
}

/// Tuning knobs for a [`crate::sync::SyncSession`]
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Time between sync ticks
    pub sync_interval: Duration,
    /// Bound on one connection attempt
    pub connect_timeout: Duration,
    /// Bound on one characteristic write, acknowledgment included
    pub write_timeout: Duration,
    /// Connection attempts before the session stops (per connect phase)
    pub max_connect_attempts: u32,
    /// Retries of a failed write within one tick
    pub write_retry_limit: u32,
    /// Pause between write retries
    pub write_retry_delay: Duration,
    /// Delay between connection attempts
    pub reconnect_backoff: RetryPolicy,
    /// Fixes older than this are not sent (`None` sends any fix)
    pub max_location_age: Option<Duration>,
    /// Per-subscriber state buffer
    pub state_buffer: usize,
    /// Characteristics to write
    pub profile: GattProfile,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(60),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: Duration::from_secs(10),
            max_connect_attempts: 5,
            write_retry_limit: 3,
            write_retry_delay: Duration::from_millis(500),
            reconnect_backoff: RetryPolicy::default(),
            max_location_age: Some(Duration::from_secs(600)),
            state_buffer: DEFAULT_STATE_BUFFER,
            profile: GattProfile::default(),
        }
    }
}

impl SyncConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "sync_interval must be > 0".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() || self.write_timeout.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be > 0".to_string()));
        }
        if self.max_connect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_connect_attempts must be at least 1".to_string(),
            ));
        }
        if self.state_buffer == 0 {
            return Err(ConfigError::Invalid(
                "state_buffer must be at least 1".to_string(),
            ));
        }
        if self.reconnect_backoff.initial > self.reconnect_backoff.max {
            return Err(ConfigError::Invalid(
                "reconnect backoff initial delay exceeds its maximum".to_string(),
            ));
        }
        Ok(())
    }
}
