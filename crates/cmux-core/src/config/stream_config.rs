//! Stream manager tuning

use crate::error::{CmuxError, CmuxResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum spacing between partial writes (500 ms)
pub const PARTIAL_WRITE_INTERVAL_MS: u64 = 500;

/// Upper bound on waiting for provider usage after a stream ends (1 s)
pub const USAGE_TIMEOUT_MS: u64 = 1000;

/// Broadcast buffer for outbound events
pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub partial_write_interval_ms: u64,
    pub usage_timeout_ms: u64,
    pub event_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            partial_write_interval_ms: PARTIAL_WRITE_INTERVAL_MS,
            usage_timeout_ms: USAGE_TIMEOUT_MS,
            event_capacity: EVENT_CAPACITY,
        }
    }
}

impl StreamConfig {
    pub fn partial_write_interval(&self) -> Duration {
        Duration::from_millis(self.partial_write_interval_ms)
    }

    pub fn usage_timeout(&self) -> Duration {
        Duration::from_millis(self.usage_timeout_ms)
    }

    pub fn validate(&self) -> CmuxResult<()> {
        if self.partial_write_interval_ms == 0 {
            return Err(CmuxError::invalid_field(
                "stream.partial_write_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.usage_timeout_ms == 0 {
            return Err(CmuxError::invalid_field(
                "stream.usage_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.event_capacity == 0 {
            return Err(CmuxError::invalid_field(
                "stream.event_capacity",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}
