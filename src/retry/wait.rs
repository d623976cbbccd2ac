//! Pluggable backoff strategies.
//!
//! A wait strategy is a pure function from the number of observed failures to
//! a delay in milliseconds. The progression engine feeds it
//! `state_count - 1`, so the first retry consults the strategy with a
//! failure count of 1.

use serde::{Deserialize, Serialize};

/// Pure backoff function: failures observed so far to delay before the next
/// attempt
pub trait WaitStrategy: Send + Sync {
    fn retry_in_millis(&self, failure_count: u32) -> u64;
}

/// Constant delay regardless of failure count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWaitStrategy {
    pub delay_ms: u64,
}

impl WaitStrategy for FixedWaitStrategy {
    fn retry_in_millis(&self, _failure_count: u32) -> u64 {
        self.delay_ms
    }
}

/// Exponential backoff: `base * 2^(failures - 1)`, capped at `max_delay_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExponentialWaitStrategy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl ExponentialWaitStrategy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }
}

impl WaitStrategy for ExponentialWaitStrategy {
    fn retry_in_millis(&self, failure_count: u32) -> u64 {
        if failure_count == 0 {
            return 0;
        }
        let exponent = failure_count.saturating_sub(1).min(32);
        self.base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms)
    }
}

/// Per-failure-count schedule table; the last entry repeats once the count
/// runs past the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterWaitStrategy {
    pub delays_ms: Vec<u64>,
}

impl CounterWaitStrategy {
    pub fn new(delays_ms: Vec<u64>) -> Self {
        Self { delays_ms }
    }
}

impl WaitStrategy for CounterWaitStrategy {
    fn retry_in_millis(&self, failure_count: u32) -> u64 {
        if self.delays_ms.is_empty() || failure_count == 0 {
            return 0;
        }
        let index = (failure_count as usize - 1).min(self.delays_ms.len() - 1);
        self.delays_ms[index]
    }
}
