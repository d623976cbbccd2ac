//! Configuration management.
//!
//! Layered loading: built-in defaults, then an optional `covenant.toml` in
//! the working directory, then `COVENANT_`-prefixed environment variables.

use crate::error::{CoreError, Result};
use crate::retry::{ExponentialWaitStrategy, RetryConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// This connector's participant id, recorded in issued agreements
    pub participant_id: String,
    /// How long a fetched lease shields an entity from other runners
    pub lease_duration_ms: u64,
    /// State driver tick interval
    pub poll_interval_ms: u64,
    /// Entities leased per state per poll cycle
    pub batch_size: usize,
    /// Last permitted attempt number per state (1-based)
    pub retry_limit: u32,
    /// Exponential backoff base delay
    pub backoff_base_ms: u64,
    /// Exponential backoff cap
    pub backoff_max_ms: u64,
    /// Bounded command queue capacity
    pub command_queue_capacity: usize,
    /// Processed-protocol-message ids retained per negotiation
    pub dedup_window: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            participant_id: "anonymous".to_string(),
            lease_duration_ms: 60_000,
            poll_interval_ms: 500,
            batch_size: 5,
            retry_limit: 5,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            command_queue_capacity: 1_024,
            dedup_window: 256,
        }
    }
}

impl CoreConfig {
    /// Load configuration from `covenant.toml` and the environment
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("covenant").required(false))
            .add_source(config::Environment::with_prefix("COVENANT"))
            .build()
            .map_err(|e| CoreError::Configuration(e.to_string()))?;
        settings
            .try_deserialize()
            .map_err(|e| CoreError::Configuration(e.to_string()))
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            retry_limit: self.retry_limit,
        }
    }

    pub fn wait_strategy(&self) -> ExponentialWaitStrategy {
        ExponentialWaitStrategy::new(self.backoff_base_ms, self.backoff_max_ms)
    }
}
