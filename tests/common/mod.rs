//! Shared stubs and factories for the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use covenant_core::entity::{
    ContractNegotiation, ContractOffer, ParticipantRole, Policy, TransferProcess,
};
use covenant_core::events::TransferProcessListener;
use covenant_core::protocol::{DispatchFailure, ProtocolMessage, RemoteMessageDispatcher};
use covenant_core::provision::{
    DeprovisionResult, DeprovisionedResource, ProvisionResponse, ProvisionResult,
    ProvisionedResource, Provisioner, ResourceDefinition, ResourceManifest,
    ResourceManifestGenerator, SecretToken,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Dispatcher whose first `fail_times` calls fail retryably
pub struct StubDispatcher {
    calls: AtomicU32,
    fail_times: u32,
}

impl StubDispatcher {
    pub fn succeeding() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_times: 0,
        }
    }

    pub fn failing_always() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_times: u32::MAX,
        }
    }

    pub fn failing_times(fail_times: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_times,
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteMessageDispatcher for StubDispatcher {
    async fn dispatch(&self, _message: ProtocolMessage) -> Result<(), DispatchFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_times {
            Err(DispatchFailure::retryable("connection refused"))
        } else {
            Ok(())
        }
    }
}

/// Generator returning a fixed manifest
pub struct StaticManifestGenerator {
    manifest: ResourceManifest,
}

impl StaticManifestGenerator {
    pub fn new(manifest: ResourceManifest) -> Self {
        Self { manifest }
    }
}

#[async_trait]
impl ResourceManifestGenerator for StaticManifestGenerator {
    async fn generate(&self, _process: &TransferProcess) -> covenant_core::Result<ResourceManifest> {
        Ok(self.manifest.clone())
    }
}

/// Provisioner answering from a per-definition result table
pub struct StubProvisioner {
    provision_results: Mutex<HashMap<String, ProvisionResult>>,
}

impl StubProvisioner {
    pub fn new() -> Self {
        Self {
            provision_results: Mutex::new(HashMap::new()),
        }
    }

    pub fn answer(&self, definition_id: &str, result: ProvisionResult) {
        self.provision_results
            .lock()
            .insert(definition_id.to_string(), result);
    }
}

#[async_trait]
impl Provisioner for StubProvisioner {
    async fn provision(
        &self,
        _process: &TransferProcess,
        definition: &ResourceDefinition,
    ) -> ProvisionResult {
        self.provision_results
            .lock()
            .get(&definition.id)
            .cloned()
            .unwrap_or_else(|| ProvisionResult::Ok(ok_response(&definition.id, None, false)))
    }

    async fn deprovision(
        &self,
        _process: &TransferProcess,
        resource: &ProvisionedResource,
    ) -> DeprovisionResult {
        DeprovisionResult::Ok(DeprovisionedResource {
            provisioned_resource_id: resource.id.clone(),
            in_process: false,
        })
    }
}

/// Listener recording transfer event names in arrival order
#[derive(Default)]
pub struct RecordingTransferListener {
    pub events: Mutex<Vec<String>>,
}

impl RecordingTransferListener {
    fn record(&self, event: &str) {
        self.events.lock().push(event.to_string());
    }

    pub fn count_of(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }
}

impl TransferProcessListener for RecordingTransferListener {
    fn initiated(&self, _: &TransferProcess) {
        self.record("initiated");
    }
    fn provisioning_requested(&self, _: &TransferProcess) {
        self.record("provisioning_requested");
    }
    fn provisioned(&self, _: &TransferProcess) {
        self.record("provisioned");
    }
    fn started(&self, _: &TransferProcess) {
        self.record("started");
    }
    fn suspended(&self, _: &TransferProcess) {
        self.record("suspended");
    }
    fn completed(&self, _: &TransferProcess) {
        self.record("completed");
    }
    fn terminating(&self, _: &TransferProcess) {
        self.record("terminating");
    }
    fn terminated(&self, _: &TransferProcess) {
        self.record("terminated");
    }
    fn deprovisioning_requested(&self, _: &TransferProcess) {
        self.record("deprovisioning_requested");
    }
    fn deprovisioned(&self, _: &TransferProcess) {
        self.record("deprovisioned");
    }
}

pub fn offer(id: &str) -> ContractOffer {
    ContractOffer {
        id: id.to_string(),
        asset_id: "asset-1".to_string(),
        policy: Policy::for_target("asset-1"),
    }
}

pub fn consumer_negotiation(id: &str) -> ContractNegotiation {
    ContractNegotiation::builder()
        .id(id)
        .role(ParticipantRole::Consumer)
        .counter_party_id("provider-1")
        .counter_party_address("https://provider.example.com/dsp")
        .protocol("dataspace-protocol-http")
        .contract_offer(offer("offer-1"))
        .build()
        .unwrap()
}

pub fn provider_negotiation(id: &str) -> ContractNegotiation {
    ContractNegotiation::builder()
        .id(id)
        .role(ParticipantRole::Provider)
        .correlation_id(format!("{id}-consumer-pid"))
        .counter_party_id("consumer-1")
        .counter_party_address("https://consumer.example.com/dsp")
        .protocol("dataspace-protocol-http")
        .contract_offer(offer("offer-1"))
        .build()
        .unwrap()
}

pub fn provider_transfer(id: &str) -> TransferProcess {
    TransferProcess::builder()
        .id(id)
        .role(ParticipantRole::Provider)
        .counter_party_id("consumer-1")
        .counter_party_address("https://consumer.example.com/dsp")
        .protocol("dataspace-protocol-http")
        .participant_context_id("ctx-1")
        .agreement_id("agreement-1")
        .build()
        .unwrap()
}

pub fn definition(id: &str) -> ResourceDefinition {
    ResourceDefinition {
        id: id.to_string(),
        name: format!("resource-{id}"),
        kind: "object-storage".to_string(),
        properties: HashMap::new(),
    }
}

pub fn manifest(ids: &[&str]) -> ResourceManifest {
    ResourceManifest::new(ids.iter().map(|id| definition(id)).collect())
}

pub fn provisioned_resource(id: &str, definition_id: &str) -> ProvisionedResource {
    ProvisionedResource {
        id: id.to_string(),
        resource_definition_id: definition_id.to_string(),
        name: format!("resource-{definition_id}"),
        data_address: None,
    }
}

pub fn ok_response(
    definition_id: &str,
    secret: Option<&str>,
    in_process: bool,
) -> ProvisionResponse {
    ProvisionResponse {
        resource: provisioned_resource(&format!("res-{definition_id}"), definition_id),
        secret_token: secret.map(|value| SecretToken {
            value: value.to_string(),
        }),
        in_process,
    }
}
