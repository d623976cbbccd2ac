//! End-to-end negotiation scenarios: retry budgets, idempotent message
//! application, and duplicate delivery over a flaky transport.

mod common;

use common::{consumer_negotiation, offer, provider_negotiation, StubDispatcher};
use covenant_core::clock::SystemClock;
use covenant_core::entity::StatefulEntity;
use covenant_core::events::{EventPublisher, NegotiationObservable};
use covenant_core::identity::{
    ClaimToken, StaticIdentityVerifier, TokenRepresentation, PARTICIPANT_ID_CLAIM,
};
use covenant_core::manager::{ContractNegotiationManager, ManagerSettings};
use covenant_core::protocol::{
    ContractOfferMessage, ContractRequestMessage, NegotiationProtocolService,
};
use covenant_core::retry::{FixedWaitStrategy, ProgressionEngine, RetryConfig};
use covenant_core::state_machine::NegotiationState;
use covenant_core::store::{
    ContractNegotiationStore, CorrelatedEntityStore, InMemoryNegotiationStore, StatefulEntityStore,
};
use covenant_core::CoreError;
use std::sync::Arc;

fn manager(
    store: Arc<dyn ContractNegotiationStore>,
    dispatcher: Arc<StubDispatcher>,
    retry_limit: u32,
) -> ContractNegotiationManager {
    let engine = ProgressionEngine::new(
        RetryConfig { retry_limit },
        Arc::new(FixedWaitStrategy { delay_ms: 0 }),
        Arc::new(SystemClock),
    );
    ContractNegotiationManager::new(
        store,
        dispatcher,
        engine,
        Arc::new(NegotiationObservable::new()),
        EventPublisher::default(),
        ManagerSettings::new("runner-a", "provider-self", 5),
    )
}

fn service(
    store: Arc<dyn ContractNegotiationStore>,
    verifier: Arc<StaticIdentityVerifier>,
) -> NegotiationProtocolService {
    NegotiationProtocolService::new(
        store,
        verifier,
        Arc::new(NegotiationObservable::new()),
        EventPublisher::default(),
        "runner-a",
    )
}

#[tokio::test]
async fn provider_send_failures_exhaust_the_retry_budget_without_extra_calls() {
    let store: Arc<dyn ContractNegotiationStore> = Arc::new(InMemoryNegotiationStore::default());
    let dispatcher = Arc::new(StubDispatcher::failing_always());
    let manager = manager(store.clone(), dispatcher.clone(), 2);

    manager.initiate(provider_negotiation("n-1")).await.unwrap();

    // Pass 1 cascades initial -> offering and spends attempt #1
    manager.process_states_once().await.unwrap();
    assert_eq!(
        store.find("n-1").await.unwrap().unwrap().state(),
        NegotiationState::Offering
    );

    // Attempt #2 spends the budget; the pass after it must not dispatch
    manager.process_states_once().await.unwrap();
    manager.process_states_once().await.unwrap();

    let stored = store.find("n-1").await.unwrap().unwrap();
    assert_eq!(stored.state(), NegotiationState::Terminated);
    assert!(stored.error_detail().unwrap().contains("retry limit"));
    assert_eq!(dispatcher.calls(), 2);
}

#[tokio::test]
async fn consumer_happy_path_sends_once_and_confirms() {
    let store: Arc<dyn ContractNegotiationStore> = Arc::new(InMemoryNegotiationStore::default());
    let dispatcher = Arc::new(StubDispatcher::succeeding());
    let manager = manager(store.clone(), dispatcher.clone(), 3);

    manager.initiate(consumer_negotiation("n-1")).await.unwrap();

    manager.process_states_once().await.unwrap();
    manager.process_states_once().await.unwrap();

    let stored = store.find("n-1").await.unwrap().unwrap();
    assert_eq!(stored.state(), NegotiationState::Requested);
    assert_eq!(dispatcher.calls(), 1);
}

#[tokio::test]
async fn transient_send_failure_recovers_on_a_later_pass() {
    let store: Arc<dyn ContractNegotiationStore> = Arc::new(InMemoryNegotiationStore::default());
    let dispatcher = Arc::new(StubDispatcher::failing_times(1));
    let manager = manager(store.clone(), dispatcher.clone(), 3);

    manager.initiate(consumer_negotiation("n-1")).await.unwrap();

    // The first pass cascades initial -> requesting and dispatches attempt
    // #1, which fails
    manager.process_states_once().await.unwrap();
    assert_eq!(
        store.find("n-1").await.unwrap().unwrap().state(),
        NegotiationState::Requesting
    );

    manager.process_states_once().await.unwrap(); // attempt #2 succeeds

    let stored = store.find("n-1").await.unwrap().unwrap();
    assert_eq!(stored.state(), NegotiationState::Requested);
    assert_eq!(stored.error_detail(), None);
    assert_eq!(dispatcher.calls(), 2);
}

fn request_message(message_id: &str) -> ContractRequestMessage {
    ContractRequestMessage {
        id: message_id.to_string(),
        process_id: None,
        consumer_pid: "cpid-1".to_string(),
        counter_party_id: "consumer-1".to_string(),
        counter_party_address: "https://consumer.example.com/dsp".to_string(),
        protocol: "dataspace-protocol-http".to_string(),
        offer: offer("offer-a"),
        callback_addresses: Vec::new(),
    }
}

#[tokio::test]
async fn replayed_contract_request_is_applied_exactly_once() {
    let store: Arc<dyn ContractNegotiationStore> = Arc::new(InMemoryNegotiationStore::default());
    let verifier = Arc::new(StaticIdentityVerifier::new());
    verifier.register(
        "consumer-token",
        ClaimToken::default().with_claim(PARTICIPANT_ID_CLAIM, "consumer-1"),
    );
    let service = service(store.clone(), verifier);
    let token = TokenRepresentation::new("consumer-token");

    let first = service
        .notify_requested(request_message("msg-1"), &token)
        .await
        .unwrap();
    let second = service
        .notify_requested(request_message("msg-1"), &token)
        .await
        .unwrap();

    assert_eq!(first.id(), second.id());
    let stored = store
        .find_by_correlation_id("cpid-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state(), NegotiationState::Requested);
    assert_eq!(stored.contract_offers().len(), 1);
}

#[tokio::test]
async fn unauthorized_token_is_rejected_without_mutation() {
    let store: Arc<dyn ContractNegotiationStore> = Arc::new(InMemoryNegotiationStore::default());
    let verifier = Arc::new(StaticIdentityVerifier::new());
    verifier.register(
        "intruder-token",
        ClaimToken::default().with_claim(PARTICIPANT_ID_CLAIM, "intruder"),
    );
    let service = service(store.clone(), verifier);

    let result = service
        .notify_requested(
            request_message("msg-1"),
            &TokenRepresentation::new("intruder-token"),
        )
        .await;

    assert!(matches!(result, Err(CoreError::Unauthorized(_))));
    assert!(store
        .find_by_correlation_id("cpid-1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn duplicate_offer_notifications_append_exactly_one_entry() {
    let store: Arc<dyn ContractNegotiationStore> = Arc::new(InMemoryNegotiationStore::default());
    let verifier = Arc::new(StaticIdentityVerifier::new());
    verifier.register(
        "provider-token",
        ClaimToken::default().with_claim(PARTICIPANT_ID_CLAIM, "provider-1"),
    );
    let service = Arc::new(service(store.clone(), verifier));
    let token = TokenRepresentation::new("provider-token");

    let mut negotiation = consumer_negotiation("n-c");
    negotiation.transition_requesting().unwrap();
    negotiation.transition_requested().unwrap();
    store.create(negotiation).await.unwrap();

    let message = ContractOfferMessage {
        id: "offer-msg-1".to_string(),
        process_id: "n-c".to_string(),
        counter_party_id: "provider-1".to_string(),
        counter_party_address: "https://provider.example.com/dsp".to_string(),
        protocol: "dataspace-protocol-http".to_string(),
        offer: offer("offer-b"),
    };

    // Flaky transport: the same notification arrives twice concurrently. One
    // application may lose the lease race; at-least-once delivery then
    // redelivers it.
    let (first, second) = tokio::join!(
        service.notify_offered(message.clone(), &token),
        service.notify_offered(message.clone(), &token)
    );
    for result in [first, second] {
        match result {
            Ok(_) | Err(CoreError::LeaseConflict { .. }) => {}
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }
    service.notify_offered(message, &token).await.unwrap();

    let stored = store.find("n-c").await.unwrap().unwrap();
    assert_eq!(stored.state(), NegotiationState::Offered);
    let new_offers = stored
        .contract_offers()
        .iter()
        .filter(|o| o.id == "offer-b")
        .count();
    assert_eq!(new_offers, 1);
}
