//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pause before restarting a consumer that died unexpectedly
    #[serde(rename = "consumer-backoff-ms")]
    pub consumer_backoff_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            consumer_backoff_ms: 1_000,
        }
    }
}

impl SchedulerConfig {
    /// Get the restart backoff as a Duration
    pub fn consumer_backoff(&self) -> Duration {
        Duration::from_millis(self.consumer_backoff_ms)
    }
}
