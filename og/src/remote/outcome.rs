//! Remote call results and errors

use std::time::Duration;
use thiserror::Error;

/// Classified result of one remote fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome<T> {
    Success(T),

    /// The remote reports the key does not exist
    NotFound,

    /// Refused for quota reasons, locally or by the remote
    RateLimited { wait: Option<Duration> },

    Error(String),
}

impl<T> RemoteOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, RemoteOutcome::Success(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RemoteOutcome::RateLimited { .. })
    }

    /// Advised wait when rate limited
    pub fn advised_wait(&self) -> Option<Duration> {
        match self {
            RemoteOutcome::RateLimited { wait } => *wait,
            _ => None,
        }
    }

    pub fn payload(&self) -> Option<&T> {
        match self {
            RemoteOutcome::Success(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn into_payload(self) -> Option<T> {
        match self {
            RemoteOutcome::Success(payload) => Some(payload),
            _ => None,
        }
    }

    /// Short status label for reports
    pub fn status(&self) -> &'static str {
        match self {
            RemoteOutcome::Success(_) => "success",
            RemoteOutcome::NotFound => "not_found",
            RemoteOutcome::RateLimited { .. } => "rate_limited",
            RemoteOutcome::Error(_) => "error",
        }
    }
}

/// Failures where no response came back from the remote
///
/// These calls are not counted against the rate limit.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Remote unreachable: {0}")]
    Unreachable(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),
}
