//! Sink configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENDPOINT_ENV: &str = "TELEMETRY_ENDPOINT";
pub const KEY_ENV: &str = "TELEMETRY_KEY";

/// HTTP sink configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Collector URL the batch is POSTed to
    pub endpoint: Option<String>,
    /// Value of the `X-Telemetry-Key` header
    pub key: Option<String>,
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry
    pub initial_backoff_ms: u64,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            endpoint: None,
            key: None,
            max_attempts: 3,
            initial_backoff_ms: 500,
            timeout_secs: 30,
        }
    }
}

impl SinkConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        SinkConfig {
            endpoint: std::env::var(ENDPOINT_ENV).ok().filter(|v| !v.is_empty()),
            key: std::env::var(KEY_ENV).ok().filter(|v| !v.is_empty()),
            ..Self::default()
        }
    }

    /// Create config for a specific endpoint
    pub fn new(endpoint: &str) -> Self {
        SinkConfig {
            endpoint: Some(endpoint.to_string()),
            ..Self::default()
        }
    }

    /// Set the telemetry key
    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_backoff_ms(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }
}
