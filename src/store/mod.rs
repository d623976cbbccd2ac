//! # Lease-Backed Entity Store
//!
//! ## Architecture: Distributed Mutual Exclusion via Leasing
//!
//! The store is the only mutation gate shared by horizontally-scaled
//! instances. `lease_and_fetch_next_for_state` atomically selects and leases
//! a batch of entities; `update` performs a compare-against-lease-owner swap
//! and clears the lease on success. Leasing rather than locking is the point:
//! a crashed runner needs no liveness detection, its leases simply expire and
//! another instance picks the entities up.
//!
//! Within one fetch, entities are returned oldest-`state_timestamp` first
//! (id tie-break) so long-stalled entities are never starved. Across
//! instances leasing guarantees mutual exclusion, not ordering.

pub mod memory;

use crate::entity::{ContractNegotiation, CorrelatedEntity, StatefulEntity, TransferProcess};
use crate::error::CoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{InMemoryEntityStore, InMemoryNegotiationStore, InMemoryTransferProcessStore};

/// Time-bounded ownership claim on a stored entity.
///
/// Not part of the domain model: the store attaches it to the persisted
/// envelope. An entity is actionable by a runner only if unleased or the
/// lease has expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub leased_by: String,
    pub leased_at_ms: i64,
    pub lease_duration_ms: u64,
}

impl Lease {
    pub fn new(leased_by: impl Into<String>, leased_at_ms: i64, lease_duration_ms: u64) -> Self {
        Self {
            leased_by: leased_by.into(),
            leased_at_ms,
            lease_duration_ms,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.leased_at_ms + self.lease_duration_ms as i64
    }

    /// True when `owner` may mutate under this lease
    pub fn permits(&self, owner: &str, now_ms: i64) -> bool {
        self.leased_by == owner || self.is_expired(now_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("entity not found: {id}")]
    NotFound { id: String },

    /// Another runner holds an unexpired lease; the stored entity is untouched
    #[error("entity {id} is leased by {held_by}")]
    LeaseConflict { id: String, held_by: String },
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id } => CoreError::NotFound(id),
            StoreError::LeaseConflict { id, .. } => CoreError::LeaseConflict { id },
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence contract for lease-managed stateful entities.
///
/// `owner` identifies the calling runner instance; every mutating operation
/// compares it against the stored lease.
#[async_trait]
pub trait StatefulEntityStore<E: StatefulEntity + Clone>: Send + Sync {
    /// Insert or replace by id. Rejected only when another runner holds an
    /// unexpired lease on an existing entity.
    async fn create(&self, entity: E) -> StoreResult<()>;

    /// Fetch without leasing
    async fn find(&self, id: &str) -> StoreResult<Option<E>>;

    /// Atomically select up to `batch_size` entities in `state_code` whose
    /// lease is absent or expired, ordered oldest-`state_timestamp` first
    /// (id tie-break), lease each to `owner`, and return them.
    async fn lease_and_fetch_next_for_state(
        &self,
        state_code: i32,
        batch_size: usize,
        owner: &str,
    ) -> StoreResult<Vec<E>>;

    /// Atomically fetch one entity and lease it to `owner`. Used by
    /// out-of-band mutators (protocol service, command runner) so they
    /// compose with the polling loop through the same exclusion gate.
    async fn find_by_id_and_lease(&self, id: &str, owner: &str) -> StoreResult<E>;

    /// Persist a mutated entity. Requires `owner` to hold the lease or the
    /// entity to be unleased; clears the lease on success. On conflict no
    /// stored field changes.
    async fn update(&self, entity: E, owner: &str) -> StoreResult<()>;

    /// Remove an entity under the same lease precondition as `update`
    async fn delete(&self, id: &str, owner: &str) -> StoreResult<()>;

    /// Release a lease without mutating the entity, e.g. when a leased
    /// entity turns out not to be retry-eligible yet
    async fn release(&self, id: &str, owner: &str) -> StoreResult<()>;
}

/// Store extension for entities addressable by the counter-party's id
#[async_trait]
pub trait CorrelatedEntityStore<E: CorrelatedEntity + Clone>: StatefulEntityStore<E> {
    /// Fetch by the counter-party's local id for the same logical process,
    /// without leasing
    async fn find_by_correlation_id(&self, correlation_id: &str) -> StoreResult<Option<E>>;
}

/// Contract negotiation persistence surface
pub trait ContractNegotiationStore: CorrelatedEntityStore<ContractNegotiation> {}

/// Transfer process persistence surface
pub trait TransferProcessStore: CorrelatedEntityStore<TransferProcess> {}

impl<S> ContractNegotiationStore for S where S: CorrelatedEntityStore<ContractNegotiation> {}
impl<S> TransferProcessStore for S where S: CorrelatedEntityStore<TransferProcess> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_expiry() {
        let lease = Lease::new("runner-a", 1_000, 500);
        assert!(!lease.is_expired(1_200));
        assert!(lease.is_expired(1_500));
        assert!(lease.is_expired(2_000));
    }

    #[test]
    fn test_lease_permits_owner_or_expired() {
        let lease = Lease::new("runner-a", 1_000, 500);
        assert!(lease.permits("runner-a", 1_100));
        assert!(!lease.permits("runner-b", 1_100));
        assert!(lease.permits("runner-b", 1_600));
    }
}
