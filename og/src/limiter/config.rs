//! Rate limiter configuration

use eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sliding-window quota for outbound calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Max calls accepted per window
    pub limit: usize,

    /// Window length in seconds
    #[serde(rename = "window-secs")]
    pub window_secs: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            limit: 30,
            window_secs: 60,
        }
    }
}

impl LimiterConfig {
    /// Get the window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Reject quotas that could never admit a call
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(eyre!("limiter.limit must be at least 1"));
        }
        if self.window_secs == 0 {
            return Err(eyre!("limiter.window-secs must be at least 1"));
        }
        Ok(())
    }
}
