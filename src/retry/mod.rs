//! # Retry-Driven Progression Engine
//!
//! Decides, for a leased entity, whether its unit of work should run now or
//! be deferred, runs it, and classifies the outcome. One generic engine
//! parameterized over the work's own outcome classification replaces
//! per-result-type subclassing.
//!
//! ## Numeric semantics
//!
//! `state_count` is 1-based: attempt #1 is the first entry into the state.
//! An entity with `state_count <= 1` is always eligible. Otherwise the wait
//! strategy is consulted with `state_count - 1` failures and the entity is
//! eligible once `now >= state_timestamp + delay`.
//!
//! The retry budget is checked before the work runs: once `state_count`
//! exceeds `retry_limit`, the attempt chain is exhausted and no further side
//! effect is issued. `retry_limit` itself is the last permitted attempt.
//! Fatal outcomes bypass the budget entirely.

pub mod wait;

use crate::clock::Clock;
use crate::entity::StatefulEntity;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

pub use wait::{CounterWaitStrategy, ExponentialWaitStrategy, FixedWaitStrategy, WaitStrategy};

/// Outcome reported by a unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    Success,
    /// Transient failure; re-attempted within the retry budget
    Retryable(String),
    /// Irrecoverable by construction, e.g. a malformed response
    Fatal(String),
}

/// Classified result of driving one entity once
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    Succeeded,
    /// Not yet eligible; the caller leaves the state untouched and releases
    /// the lease
    Deferred { retry_in_ms: u64 },
    /// Transient failure within budget; the caller re-enters the same state
    FailedRetryable { detail: String },
    /// Retry budget spent; terminal for this attempt chain
    FailedExhausted { detail: String },
    /// Fatal failure; terminal regardless of remaining budget
    FatalError { detail: String },
}

/// Immutable retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Last permitted attempt number (1-based)
    pub retry_limit: u32,
}

/// Generic progression engine shared by all entity managers
pub struct ProgressionEngine {
    config: RetryConfig,
    strategy: Arc<dyn WaitStrategy>,
    clock: Arc<dyn Clock>,
    on_delay: Option<Box<dyn Fn(&str, u64) + Send + Sync>>,
}

impl ProgressionEngine {
    pub fn new(config: RetryConfig, strategy: Arc<dyn WaitStrategy>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            strategy,
            clock,
            on_delay: None,
        }
    }

    /// Install a callback invoked whenever an entity is skipped as not yet
    /// eligible
    pub fn with_on_delay(mut self, on_delay: Box<dyn Fn(&str, u64) + Send + Sync>) -> Self {
        self.on_delay = Some(on_delay);
        self
    }

    pub fn retry_limit(&self) -> u32 {
        self.config.retry_limit
    }

    /// Milliseconds until the entity becomes eligible, or `None` when it may
    /// run now
    pub fn remaining_delay(&self, entity: &impl StatefulEntity) -> Option<u64> {
        if entity.state_count() <= 1 {
            return None;
        }
        let delay = self.strategy.retry_in_millis(entity.state_count() - 1);
        let eligible_at = entity.state_timestamp_ms() + delay as i64;
        let now = self.clock.now_ms();
        if now >= eligible_at {
            None
        } else {
            Some((eligible_at - now) as u64)
        }
    }

    /// True once the attempt chain has spent its budget
    pub fn retries_exhausted(&self, entity: &impl StatefulEntity) -> bool {
        entity.state_count() > self.config.retry_limit
    }

    /// Drive one entity: budget check, eligibility check, then the unit of
    /// work. The work itself must not block on long waits; slow asynchronous
    /// operations report `Retryable` and are re-driven later.
    pub async fn process<E, F, Fut>(&self, entity: &E, work: F) -> Processed
    where
        E: StatefulEntity,
        F: FnOnce() -> Fut,
        Fut: Future<Output = WorkOutcome>,
    {
        if self.retries_exhausted(entity) {
            let detail = format!(
                "retry limit of {} exceeded after {} attempts",
                self.config.retry_limit,
                entity.state_count() - 1
            );
            debug!(entity_id = entity.id(), %detail, "Retries exhausted");
            return Processed::FailedExhausted { detail };
        }

        if let Some(retry_in_ms) = self.remaining_delay(entity) {
            if let Some(on_delay) = &self.on_delay {
                on_delay(entity.id(), retry_in_ms);
            }
            return Processed::Deferred { retry_in_ms };
        }

        match work().await {
            WorkOutcome::Success => Processed::Succeeded,
            WorkOutcome::Retryable(detail) => Processed::FailedRetryable { detail },
            WorkOutcome::Fatal(detail) => Processed::FatalError { detail },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entity::{ContractNegotiation, ParticipantRole};
    use crate::state_machine::NegotiationState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn requesting_negotiation(state_timestamp_ms: i64) -> ContractNegotiation {
        ContractNegotiation::builder()
            .role(ParticipantRole::Consumer)
            .counter_party_id("provider-1")
            .counter_party_address("https://provider.example.com/dsp")
            .protocol("dataspace-protocol-http")
            .state(NegotiationState::Requesting)
            .state_timestamp_ms(state_timestamp_ms)
            .build()
            .unwrap()
    }

    fn engine(retry_limit: u32, clock: Arc<ManualClock>) -> ProgressionEngine {
        ProgressionEngine::new(
            RetryConfig { retry_limit },
            Arc::new(FixedWaitStrategy { delay_ms: 1_000 }),
            clock,
        )
    }

    #[tokio::test]
    async fn test_first_attempt_is_always_eligible() {
        let clock = Arc::new(ManualClock::new(0));
        let engine = engine(3, clock);
        let entity = requesting_negotiation(1_000_000);

        let result = engine
            .process(&entity, || async { WorkOutcome::Success })
            .await;
        assert_eq!(result, Processed::Succeeded);
    }

    #[tokio::test]
    async fn test_backoff_defers_until_delay_elapses() {
        let clock = Arc::new(ManualClock::new(10_000));
        let engine = engine(5, clock.clone());

        let mut entity = requesting_negotiation(0);
        entity.transition_requesting().unwrap(); // state_count -> 2
        let ts = entity.state_timestamp_ms();
        clock.set(ts + 400);

        let result = engine
            .process(&entity, || async { WorkOutcome::Success })
            .await;
        assert_eq!(result, Processed::Deferred { retry_in_ms: 600 });

        clock.set(ts + 1_000);
        let result = engine
            .process(&entity, || async { WorkOutcome::Success })
            .await;
        assert_eq!(result, Processed::Succeeded);
    }

    #[tokio::test]
    async fn test_exhaustion_skips_the_unit_of_work() {
        let clock = Arc::new(ManualClock::new(0));
        let engine = engine(2, clock.clone());
        let calls = AtomicU32::new(0);

        let mut entity = requesting_negotiation(0);
        entity.transition_requesting().unwrap();
        entity.transition_requesting().unwrap(); // state_count -> 3, past the limit
        clock.set(entity.state_timestamp_ms() + 10_000);

        let result = engine
            .process(&entity, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                WorkOutcome::Retryable("boom".into())
            })
            .await;

        assert!(matches!(result, Processed::FailedExhausted { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fatal_bypasses_budget_and_eligibility_applies() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let engine = engine(5, clock);
        let entity = requesting_negotiation(0);

        let result = engine
            .process(&entity, || async {
                WorkOutcome::Fatal("malformed response".into())
            })
            .await;
        assert_eq!(
            result,
            Processed::FatalError {
                detail: "malformed response".into()
            }
        );
    }

    #[tokio::test]
    async fn test_on_delay_callback_fires_for_ineligible_entities() {
        let clock = Arc::new(ManualClock::new(0));
        let delayed = Arc::new(AtomicU32::new(0));
        let delayed_clone = delayed.clone();
        let engine = engine(5, clock.clone()).with_on_delay(Box::new(move |_, _| {
            delayed_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let mut entity = requesting_negotiation(0);
        entity.transition_requesting().unwrap();
        clock.set(entity.state_timestamp_ms()); // delay not yet elapsed

        let result = engine
            .process(&entity, || async { WorkOutcome::Success })
            .await;
        assert!(matches!(result, Processed::Deferred { .. }));
        assert_eq!(delayed.load(Ordering::SeqCst), 1);
    }
}
