//! Deployment-tunable knobs for the registration and push paths.

use serde::Deserialize;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_PUSH_TIMEOUT_MS: u64 = 30_000;

/// Timeouts and retry cadence for the streamer engines.
///
/// All registration wire calls use `request_timeout` and, on failure, are
/// rescheduled after `retry_delay` for as long as the stream stays open.
/// Pushes are single-attempt and only bounded by `push_timeout`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    pub request_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub push_timeout_ms: u64,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            push_timeout_ms: DEFAULT_PUSH_TIMEOUT_MS,
        }
    }
}

impl StreamerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }
}
