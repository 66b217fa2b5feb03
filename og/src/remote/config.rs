//! Batch fetch configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pacing for sequential remote fetches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Pause between consecutive requests in a batch
    #[serde(rename = "request-delay-ms")]
    pub request_delay_ms: u64,

    /// Wait used when a rate-limited result carries no advice
    #[serde(rename = "default-rate-limit-wait-secs")]
    pub default_rate_limit_wait_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 2_000,
            default_rate_limit_wait_secs: 60,
        }
    }
}

impl FetchConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn default_rate_limit_wait(&self) -> Duration {
        Duration::from_secs(self.default_rate_limit_wait_secs)
    }
}
