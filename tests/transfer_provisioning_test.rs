//! Transfer provisioning scenarios: response aggregation, asynchronous
//! resources, failure merging, and the deprovisioning mirror.

mod common;

use common::{
    manifest, ok_response, provider_transfer, provisioned_resource, RecordingTransferListener,
    StaticManifestGenerator, StubDispatcher, StubProvisioner,
};
use covenant_core::clock::SystemClock;
use covenant_core::entity::{ParticipantRole, StatefulEntity, TransferProcess};
use covenant_core::events::{EventPublisher, TransferObservable};
use covenant_core::manager::{ManagerSettings, TransferProcessManager};
use covenant_core::provision::{
    DeprovisionResponsesHandler, DeprovisionResult, DeprovisionedResource,
    ProvisionResponsesHandler, ProvisionResult,
};
use covenant_core::retry::{FixedWaitStrategy, ProgressionEngine, RetryConfig};
use covenant_core::state_machine::TransferState;
use covenant_core::store::{InMemoryTransferProcessStore, StatefulEntityStore, TransferProcessStore};
use covenant_core::vault::{InMemoryVault, Vault};
use std::sync::Arc;

struct Fixture {
    store: Arc<dyn TransferProcessStore>,
    vault: Arc<InMemoryVault>,
    observable: Arc<TransferObservable>,
    listener: Arc<RecordingTransferListener>,
}

impl Fixture {
    fn new() -> Self {
        let observable = Arc::new(TransferObservable::new());
        let listener = Arc::new(RecordingTransferListener::default());
        observable.register(listener.clone());
        Self {
            store: Arc::new(InMemoryTransferProcessStore::default()),
            vault: Arc::new(InMemoryVault::new()),
            observable,
            listener,
        }
    }

    fn provision_handler(&self) -> ProvisionResponsesHandler {
        ProvisionResponsesHandler::new(
            self.store.clone(),
            self.vault.clone(),
            self.observable.clone(),
            "runner-a",
        )
    }

    fn deprovision_handler(&self) -> DeprovisionResponsesHandler {
        DeprovisionResponsesHandler::new(
            self.store.clone(),
            self.vault.clone(),
            self.observable.clone(),
            "runner-a",
        )
    }
}

fn provisioning_transfer(id: &str, definition_ids: &[&str]) -> TransferProcess {
    let mut process = provider_transfer(id);
    process
        .transition_provisioning(manifest(definition_ids))
        .unwrap();
    process
}

#[tokio::test]
async fn async_second_resource_holds_the_process_in_requested_until_complete() {
    let fixture = Fixture::new();
    let handler = fixture.provision_handler();
    fixture
        .store
        .create(provisioning_transfer("t-1", &["def-1", "def-2"]))
        .await
        .unwrap();

    handler
        .handle(
            "t-1",
            vec![
                ProvisionResult::Ok(ok_response("def-1", Some("secret-1"), false)),
                ProvisionResult::Ok(ok_response("def-2", None, true)),
            ],
        )
        .await
        .unwrap();

    let stored = fixture.store.find("t-1").await.unwrap().unwrap();
    assert_eq!(stored.state(), TransferState::ProvisioningRequested);
    assert!(!stored.provisioning_complete());
    assert_eq!(fixture.listener.count_of("provisioning_requested"), 1);
    assert_eq!(fixture.listener.count_of("provisioned"), 0);
    assert!(fixture
        .vault
        .resolve_secret("ctx-1", "resource-def-1")
        .is_some());
    assert!(fixture
        .vault
        .resolve_secret("ctx-1", "resource-def-2")
        .is_none());

    // The upstream completion callback for the second resource arrives
    handler
        .handle(
            "t-1",
            vec![ProvisionResult::Ok(ok_response(
                "def-2",
                Some("secret-2"),
                false,
            ))],
        )
        .await
        .unwrap();

    let stored = fixture.store.find("t-1").await.unwrap().unwrap();
    assert_eq!(stored.state(), TransferState::Provisioned);
    assert!(stored.provisioning_complete());
    assert_eq!(fixture.listener.count_of("provisioned"), 1);
    assert!(fixture
        .vault
        .resolve_secret("ctx-1", "resource-def-1")
        .is_some());
    assert!(fixture
        .vault
        .resolve_secret("ctx-1", "resource-def-2")
        .is_some());
}

#[tokio::test]
async fn provisioning_failures_merge_into_one_composite_detail() {
    let fixture = Fixture::new();
    let handler = fixture.provision_handler();
    fixture
        .store
        .create(provisioning_transfer("t-1", &["def-1", "def-2"]))
        .await
        .unwrap();

    handler
        .handle(
            "t-1",
            vec![
                ProvisionResult::Failed {
                    resource_definition_id: "def-1".to_string(),
                    detail: "quota exceeded".to_string(),
                    fatal: true,
                },
                ProvisionResult::Failed {
                    resource_definition_id: "def-2".to_string(),
                    detail: "bucket name taken".to_string(),
                    fatal: false,
                },
            ],
        )
        .await
        .unwrap();

    // The provider must inform the counter-party before landing terminal
    let stored = fixture.store.find("t-1").await.unwrap().unwrap();
    assert_eq!(stored.state(), TransferState::Terminating);
    let detail = stored.error_detail().unwrap();
    assert!(detail.contains("quota exceeded"));
    assert!(detail.contains("bucket name taken"));
    assert_eq!(fixture.listener.count_of("terminating"), 1);
    assert_eq!(fixture.listener.count_of("provisioned"), 0);
}

#[tokio::test]
async fn consumer_provisioning_failure_lands_terminal_directly() {
    let fixture = Fixture::new();
    let handler = fixture.provision_handler();

    let mut process = TransferProcess::builder()
        .id("t-consumer")
        .role(ParticipantRole::Consumer)
        .counter_party_id("provider-1")
        .counter_party_address("https://provider.example.com/dsp")
        .protocol("dataspace-protocol-http")
        .agreement_id("agreement-1")
        .build()
        .unwrap();
    process.transition_provisioning(manifest(&["def-1"])).unwrap();
    fixture.store.create(process).await.unwrap();

    handler
        .handle(
            "t-consumer",
            vec![ProvisionResult::Failed {
                resource_definition_id: "def-1".to_string(),
                detail: "no capacity".to_string(),
                fatal: true,
            }],
        )
        .await
        .unwrap();

    let stored = fixture.store.find("t-consumer").await.unwrap().unwrap();
    assert_eq!(stored.state(), TransferState::Terminated);
    assert_eq!(fixture.listener.count_of("terminated"), 1);
}

fn deprovisioning_transfer(fixture: &Fixture, id: &str) -> TransferProcess {
    let mut process = TransferProcess::builder()
        .id(id)
        .role(ParticipantRole::Provider)
        .counter_party_id("consumer-1")
        .counter_party_address("https://consumer.example.com/dsp")
        .protocol("dataspace-protocol-http")
        .participant_context_id("ctx-1")
        .agreement_id("agreement-1")
        .state(TransferState::Completed)
        .build()
        .unwrap();
    process.add_provisioned_resource(provisioned_resource("res-1", "def-1"));
    process.add_provisioned_resource(provisioned_resource("res-2", "def-2"));
    process.transition_deprovisioning().unwrap();

    fixture
        .vault
        .store_secret("ctx-1", "resource-def-1", "secret-1")
        .unwrap();
    fixture
        .vault
        .store_secret("ctx-1", "resource-def-2", "secret-2")
        .unwrap();
    process
}

#[tokio::test]
async fn deprovisioning_mirrors_the_provisioning_aggregation() {
    let fixture = Fixture::new();
    let handler = fixture.deprovision_handler();
    fixture
        .store
        .create(deprovisioning_transfer(&fixture, "t-1"))
        .await
        .unwrap();

    handler
        .handle(
            "t-1",
            vec![DeprovisionResult::Ok(DeprovisionedResource {
                provisioned_resource_id: "res-1".to_string(),
                in_process: false,
            })],
        )
        .await
        .unwrap();

    let stored = fixture.store.find("t-1").await.unwrap().unwrap();
    assert_eq!(stored.state(), TransferState::DeprovisioningRequested);
    assert!(fixture.vault.resolve_secret("ctx-1", "resource-def-1").is_none());
    assert!(fixture.vault.resolve_secret("ctx-1", "resource-def-2").is_some());

    handler
        .handle(
            "t-1",
            vec![DeprovisionResult::Ok(DeprovisionedResource {
                provisioned_resource_id: "res-2".to_string(),
                in_process: false,
            })],
        )
        .await
        .unwrap();

    let stored = fixture.store.find("t-1").await.unwrap().unwrap();
    assert_eq!(stored.state(), TransferState::Deprovisioned);
    assert!(stored.deprovision_complete());
    assert!(fixture.vault.is_empty());
    assert_eq!(fixture.listener.count_of("deprovisioned"), 1);
}

#[tokio::test]
async fn fatal_deprovisioning_failure_records_the_error_terminally() {
    let fixture = Fixture::new();
    let handler = fixture.deprovision_handler();
    fixture
        .store
        .create(deprovisioning_transfer(&fixture, "t-1"))
        .await
        .unwrap();

    handler
        .handle(
            "t-1",
            vec![DeprovisionResult::Failed {
                provisioned_resource_id: "res-1".to_string(),
                detail: "resource is gone".to_string(),
                fatal: true,
            }],
        )
        .await
        .unwrap();

    let stored = fixture.store.find("t-1").await.unwrap().unwrap();
    assert_eq!(stored.state(), TransferState::Deprovisioned);
    assert!(stored.error_detail().unwrap().contains("resource is gone"));
}

fn transfer_manager(
    fixture: &Fixture,
    provisioner: Arc<StubProvisioner>,
    dispatcher: Arc<StubDispatcher>,
    definitions: &[&str],
) -> TransferProcessManager {
    let engine = ProgressionEngine::new(
        RetryConfig { retry_limit: 3 },
        Arc::new(FixedWaitStrategy { delay_ms: 0 }),
        Arc::new(SystemClock),
    );
    TransferProcessManager::new(
        fixture.store.clone(),
        dispatcher,
        provisioner,
        Arc::new(StaticManifestGenerator::new(manifest(definitions))),
        engine,
        fixture.vault.clone(),
        fixture.observable.clone(),
        EventPublisher::default(),
        ManagerSettings::new("runner-a", "provider-self", 5),
    )
}

#[tokio::test]
async fn provider_transfer_cascades_from_initial_to_started() {
    let fixture = Fixture::new();
    let provisioner = Arc::new(StubProvisioner::new());
    let dispatcher = Arc::new(StubDispatcher::succeeding());
    let manager = transfer_manager(&fixture, provisioner, dispatcher.clone(), &["def-1"]);

    manager.initiate(provider_transfer("t-1")).await.unwrap();
    manager.process_states_once().await.unwrap();

    let stored = fixture.store.find("t-1").await.unwrap().unwrap();
    assert_eq!(stored.state(), TransferState::Started);
    assert!(stored.provisioning_complete());
    assert_eq!(fixture.listener.count_of("provisioned"), 1);
    assert_eq!(fixture.listener.count_of("started"), 1);
    assert_eq!(dispatcher.calls(), 1);
}

#[tokio::test]
async fn empty_manifest_skips_provisioning_entirely() {
    let fixture = Fixture::new();
    let provisioner = Arc::new(StubProvisioner::new());
    let dispatcher = Arc::new(StubDispatcher::succeeding());
    let manager = transfer_manager(&fixture, provisioner, dispatcher.clone(), &[]);

    manager.initiate(provider_transfer("t-1")).await.unwrap();
    manager.process_states_once().await.unwrap();

    let stored = fixture.store.find("t-1").await.unwrap().unwrap();
    assert_eq!(stored.state(), TransferState::Started);
    assert_eq!(fixture.listener.count_of("provisioned"), 1);
}

#[tokio::test]
async fn suspend_and_resume_round_trip_through_the_manager() {
    let fixture = Fixture::new();
    let provisioner = Arc::new(StubProvisioner::new());
    let dispatcher = Arc::new(StubDispatcher::succeeding());
    let manager = transfer_manager(&fixture, provisioner, dispatcher.clone(), &[]);

    manager.initiate(provider_transfer("t-1")).await.unwrap();
    manager.process_states_once().await.unwrap();

    // Out-of-band suspension request staged directly on the entity
    let mut process = fixture
        .store
        .find_by_id_and_lease("t-1", "runner-a")
        .await
        .unwrap();
    process.transition_suspending("maintenance").unwrap();
    fixture.store.update(process, "runner-a").await.unwrap();

    manager.process_states_once().await.unwrap();
    let stored = fixture.store.find("t-1").await.unwrap().unwrap();
    assert_eq!(stored.state(), TransferState::Suspended);
    assert_eq!(fixture.listener.count_of("suspended"), 1);

    // Resume: suspended -> starting is re-driven by the polling loop
    let mut process = fixture
        .store
        .find_by_id_and_lease("t-1", "runner-a")
        .await
        .unwrap();
    process.transition_starting().unwrap();
    fixture.store.update(process, "runner-a").await.unwrap();

    manager.process_states_once().await.unwrap();
    let stored = fixture.store.find("t-1").await.unwrap().unwrap();
    assert_eq!(stored.state(), TransferState::Started);
}
