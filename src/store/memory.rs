//! In-memory store implementation.
//!
//! The default store for embedded deployments and tests. All lease semantics
//! live behind a single write lock, which makes every store operation the
//! atomic compare-and-swap the contract requires.

use super::{CorrelatedEntityStore, Lease, StatefulEntityStore, StoreError, StoreResult};
use crate::clock::{Clock, SystemClock};
use crate::entity::{ContractNegotiation, CorrelatedEntity, StatefulEntity, TransferProcess};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Default lease duration applied by `lease_and_fetch_next_for_state`
pub const DEFAULT_LEASE_DURATION_MS: u64 = 60_000;

#[derive(Debug, Clone)]
struct StoredEnvelope<E> {
    entity: E,
    lease: Option<Lease>,
}

/// Generic in-memory lease-backed store
pub struct InMemoryEntityStore<E> {
    entities: RwLock<HashMap<String, StoredEnvelope<E>>>,
    clock: Arc<dyn Clock>,
    lease_duration_ms: u64,
}

pub type InMemoryNegotiationStore = InMemoryEntityStore<ContractNegotiation>;
pub type InMemoryTransferProcessStore = InMemoryEntityStore<TransferProcess>;

impl<E> Default for InMemoryEntityStore<E> {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), DEFAULT_LEASE_DURATION_MS)
    }
}

impl<E> InMemoryEntityStore<E> {
    pub fn new(clock: Arc<dyn Clock>, lease_duration_ms: u64) -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            clock,
            lease_duration_ms,
        }
    }

    fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }
}

impl<E: StatefulEntity + Clone> InMemoryEntityStore<E> {
    fn check_lease(envelope: &StoredEnvelope<E>, owner: &str, now_ms: i64) -> StoreResult<()> {
        match &envelope.lease {
            Some(lease) if !lease.permits(owner, now_ms) => Err(StoreError::LeaseConflict {
                id: envelope.entity.id().to_string(),
                held_by: lease.leased_by.clone(),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<E: StatefulEntity + Clone + 'static> StatefulEntityStore<E> for InMemoryEntityStore<E> {
    async fn create(&self, entity: E) -> StoreResult<()> {
        let now_ms = self.now_ms();
        let mut entities = self.entities.write();
        if let Some(existing) = entities.get(entity.id()) {
            Self::check_lease(existing, "", now_ms)?;
        }
        entities.insert(
            entity.id().to_string(),
            StoredEnvelope {
                entity,
                lease: None,
            },
        );
        Ok(())
    }

    async fn find(&self, id: &str) -> StoreResult<Option<E>> {
        Ok(self
            .entities
            .read()
            .get(id)
            .map(|envelope| envelope.entity.clone()))
    }

    async fn lease_and_fetch_next_for_state(
        &self,
        state_code: i32,
        batch_size: usize,
        owner: &str,
    ) -> StoreResult<Vec<E>> {
        let now_ms = self.now_ms();
        let mut entities = self.entities.write();

        let mut candidates: Vec<&String> = entities
            .iter()
            .filter(|(_, envelope)| {
                envelope.entity.state_code() == state_code
                    && envelope
                        .lease
                        .as_ref()
                        .map_or(true, |lease| lease.is_expired(now_ms))
            })
            .map(|(id, _)| id)
            .collect();

        // Oldest-stalled first; id tie-break keeps the order deterministic
        candidates.sort_by_key(|id| {
            let envelope = &entities[*id];
            (envelope.entity.state_timestamp_ms(), (*id).clone())
        });
        candidates.truncate(batch_size);

        let selected: Vec<String> = candidates.into_iter().cloned().collect();
        let mut leased = Vec::with_capacity(selected.len());
        for id in selected {
            let envelope = entities.get_mut(&id).expect("selected id is present");
            envelope.lease = Some(Lease::new(owner, now_ms, self.lease_duration_ms));
            leased.push(envelope.entity.clone());
        }

        if !leased.is_empty() {
            debug!(
                state_code,
                leased_count = leased.len(),
                owner,
                "Leased batch for state"
            );
        }
        Ok(leased)
    }

    async fn find_by_id_and_lease(&self, id: &str, owner: &str) -> StoreResult<E> {
        let now_ms = self.now_ms();
        let mut entities = self.entities.write();
        let envelope = entities.get_mut(id).ok_or_else(|| StoreError::NotFound {
            id: id.to_string(),
        })?;
        Self::check_lease(envelope, owner, now_ms)?;
        envelope.lease = Some(Lease::new(owner, now_ms, self.lease_duration_ms));
        Ok(envelope.entity.clone())
    }

    async fn update(&self, entity: E, owner: &str) -> StoreResult<()> {
        let now_ms = self.now_ms();
        let mut entities = self.entities.write();
        let envelope = entities
            .get_mut(entity.id())
            .ok_or_else(|| StoreError::NotFound {
                id: entity.id().to_string(),
            })?;
        Self::check_lease(envelope, owner, now_ms)?;
        envelope.entity = entity;
        envelope.lease = None;
        Ok(())
    }

    async fn delete(&self, id: &str, owner: &str) -> StoreResult<()> {
        let now_ms = self.now_ms();
        let mut entities = self.entities.write();
        let envelope = entities.get(id).ok_or_else(|| StoreError::NotFound {
            id: id.to_string(),
        })?;
        Self::check_lease(envelope, owner, now_ms)?;
        entities.remove(id);
        Ok(())
    }

    async fn release(&self, id: &str, owner: &str) -> StoreResult<()> {
        let now_ms = self.now_ms();
        let mut entities = self.entities.write();
        let envelope = entities.get_mut(id).ok_or_else(|| StoreError::NotFound {
            id: id.to_string(),
        })?;
        Self::check_lease(envelope, owner, now_ms)?;
        envelope.lease = None;
        Ok(())
    }
}

#[async_trait]
impl<E: CorrelatedEntity + Clone + 'static> CorrelatedEntityStore<E> for InMemoryEntityStore<E> {
    async fn find_by_correlation_id(&self, correlation_id: &str) -> StoreResult<Option<E>> {
        Ok(self
            .entities
            .read()
            .values()
            .find(|envelope| envelope.entity.correlation_id() == Some(correlation_id))
            .map(|envelope| envelope.entity.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entity::ParticipantRole;
    use crate::state_machine::NegotiationState;

    fn negotiation(id: &str, state_timestamp_ms: i64) -> ContractNegotiation {
        ContractNegotiation::builder()
            .id(id)
            .role(ParticipantRole::Consumer)
            .counter_party_id("provider-1")
            .counter_party_address("https://provider.example.com/dsp")
            .protocol("dataspace-protocol-http")
            .state(NegotiationState::Requesting)
            .state_timestamp_ms(state_timestamp_ms)
            .build()
            .unwrap()
    }

    fn store_with_clock(clock: Arc<ManualClock>) -> InMemoryNegotiationStore {
        InMemoryEntityStore::new(clock, 1_000)
    }

    #[tokio::test]
    async fn test_create_is_idempotent_upsert() {
        let store = InMemoryNegotiationStore::default();
        let entity = negotiation("n-1", 100);
        store.create(entity.clone()).await.unwrap();
        store.create(entity).await.unwrap();
        assert!(store.find("n-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lease_fetch_orders_oldest_first() {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = store_with_clock(clock);
        store.create(negotiation("n-newer", 300)).await.unwrap();
        store.create(negotiation("n-oldest", 100)).await.unwrap();
        store.create(negotiation("n-middle", 200)).await.unwrap();

        let leased = store
            .lease_and_fetch_next_for_state(NegotiationState::Requesting.code(), 10, "runner-a")
            .await
            .unwrap();

        let ids: Vec<&str> = leased.iter().map(|n| n.id()).collect();
        assert_eq!(ids, vec!["n-oldest", "n-middle", "n-newer"]);
    }

    #[tokio::test]
    async fn test_leased_entities_are_skipped_until_expiry() {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = store_with_clock(clock.clone());
        store.create(negotiation("n-1", 100)).await.unwrap();

        let first = store
            .lease_and_fetch_next_for_state(NegotiationState::Requesting.code(), 10, "runner-a")
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        let second = store
            .lease_and_fetch_next_for_state(NegotiationState::Requesting.code(), 10, "runner-b")
            .await
            .unwrap();
        assert!(second.is_empty());

        clock.advance(1_500);
        let third = store
            .lease_and_fetch_next_for_state(NegotiationState::Requesting.code(), 10, "runner-b")
            .await
            .unwrap();
        assert_eq!(third.len(), 1);
    }

    #[tokio::test]
    async fn test_update_by_non_owner_fails_without_mutation() {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = store_with_clock(clock);
        store.create(negotiation("n-1", 100)).await.unwrap();

        let mut leased = store
            .lease_and_fetch_next_for_state(NegotiationState::Requesting.code(), 1, "runner-a")
            .await
            .unwrap()
            .remove(0);
        leased.transition_requested().unwrap();

        let result = store.update(leased.clone(), "runner-b").await;
        assert!(matches!(result, Err(StoreError::LeaseConflict { .. })));

        let stored = store.find("n-1").await.unwrap().unwrap();
        assert_eq!(stored.state(), NegotiationState::Requesting);

        store.update(leased, "runner-a").await.unwrap();
        let stored = store.find("n-1").await.unwrap().unwrap();
        assert_eq!(stored.state(), NegotiationState::Requested);
    }

    #[tokio::test]
    async fn test_update_clears_lease() {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = store_with_clock(clock);
        store.create(negotiation("n-1", 100)).await.unwrap();

        let leased = store
            .lease_and_fetch_next_for_state(NegotiationState::Requesting.code(), 1, "runner-a")
            .await
            .unwrap()
            .remove(0);
        store.update(leased, "runner-a").await.unwrap();

        // Lease is gone, so another runner can lease immediately
        let refetched = store
            .find_by_id_and_lease("n-1", "runner-b")
            .await;
        assert!(refetched.is_ok());
    }

    #[tokio::test]
    async fn test_find_by_id_and_lease_conflicts_while_held() {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = store_with_clock(clock);
        store.create(negotiation("n-1", 100)).await.unwrap();

        store.find_by_id_and_lease("n-1", "runner-a").await.unwrap();
        let result = store.find_by_id_and_lease("n-1", "runner-b").await;
        assert!(matches!(result, Err(StoreError::LeaseConflict { .. })));

        // Re-leasing by the same owner extends the claim
        assert!(store.find_by_id_and_lease("n-1", "runner-a").await.is_ok());
    }

    #[tokio::test]
    async fn test_release_drops_lease_without_mutation() {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = store_with_clock(clock);
        store.create(negotiation("n-1", 100)).await.unwrap();

        store.find_by_id_and_lease("n-1", "runner-a").await.unwrap();
        store.release("n-1", "runner-a").await.unwrap();

        assert!(store.find_by_id_and_lease("n-1", "runner-b").await.is_ok());
    }

    #[tokio::test]
    async fn test_find_by_correlation_id() {
        let store = InMemoryNegotiationStore::default();
        let entity = ContractNegotiation::builder()
            .id("local-id")
            .role(ParticipantRole::Provider)
            .correlation_id("remote-id")
            .counter_party_id("consumer-1")
            .counter_party_address("https://consumer.example.com/dsp")
            .protocol("dataspace-protocol-http")
            .build()
            .unwrap();
        store.create(entity).await.unwrap();

        let found = store.find_by_correlation_id("remote-id").await.unwrap();
        assert_eq!(found.map(|n| n.id().to_string()), Some("local-id".into()));
        assert!(store
            .find_by_correlation_id("missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_requires_lease_precondition() {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = store_with_clock(clock);
        store.create(negotiation("n-1", 100)).await.unwrap();

        store.find_by_id_and_lease("n-1", "runner-a").await.unwrap();
        let result = store.delete("n-1", "runner-b").await;
        assert!(matches!(result, Err(StoreError::LeaseConflict { .. })));

        store.delete("n-1", "runner-a").await.unwrap();
        assert!(store.find("n-1").await.unwrap().is_none());
    }
}
