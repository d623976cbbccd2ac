//! # Transfer Process
//!
//! The persistent entity tracking a data transfer from provisioning through
//! completion and deprovisioning. The process does not count as provisioned
//! until every manifest definition has a matching provisioned resource; the
//! deprovisioning leg mirrors that condition over released resources.

use super::types::{CallbackAddress, DataAddress};
use super::{CorrelatedEntity, ParticipantRole, StatefulEntity};
use crate::error::{CoreError, Result};
use crate::provision::{DeprovisionedResource, ProvisionedResource, ResourceManifest};
use crate::state_machine::{StateMachineError, StateMachineResult, TransferState};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferProcess {
    id: String,
    role: ParticipantRole,
    state: TransferState,
    state_count: u32,
    state_timestamp_ms: i64,
    correlation_id: Option<String>,
    counter_party_id: String,
    counter_party_address: String,
    protocol: String,
    /// Scope under which issued secrets are stored in the vault
    participant_context_id: String,
    agreement_id: String,
    #[serde(default)]
    manifest: ResourceManifest,
    /// Provisioned resources keyed by resource id
    #[serde(default)]
    provisioned_resources: BTreeMap<String, ProvisionedResource>,
    /// Released resources keyed by provisioned resource id
    #[serde(default)]
    deprovisioned_resources: BTreeMap<String, DeprovisionedResource>,
    content_data_address: Option<DataAddress>,
    destination_data_address: Option<DataAddress>,
    /// Requested follow-up state while in `Stopping`
    stopping_subsequent: Option<TransferState>,
    suspension_reason: Option<String>,
    #[serde(default)]
    callback_addresses: Vec<CallbackAddress>,
    #[serde(default)]
    trace_context: HashMap<String, String>,
    error_detail: Option<String>,
    created_at_ms: i64,
    updated_at_ms: i64,
}

impl TransferProcess {
    pub fn builder() -> TransferProcessBuilder {
        TransferProcessBuilder::default()
    }

    pub fn role(&self) -> ParticipantRole {
        self.role
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn counter_party_id(&self) -> &str {
        &self.counter_party_id
    }

    pub fn counter_party_address(&self) -> &str {
        &self.counter_party_address
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn participant_context_id(&self) -> &str {
        &self.participant_context_id
    }

    pub fn agreement_id(&self) -> &str {
        &self.agreement_id
    }

    pub fn manifest(&self) -> &ResourceManifest {
        &self.manifest
    }

    pub fn provisioned_resources(&self) -> impl Iterator<Item = &ProvisionedResource> {
        self.provisioned_resources.values()
    }

    pub fn deprovisioned_resources(&self) -> impl Iterator<Item = &DeprovisionedResource> {
        self.deprovisioned_resources.values()
    }

    pub fn content_data_address(&self) -> Option<&DataAddress> {
        self.content_data_address.as_ref()
    }

    pub fn destination_data_address(&self) -> Option<&DataAddress> {
        self.destination_data_address.as_ref()
    }

    pub fn stopping_subsequent(&self) -> Option<TransferState> {
        self.stopping_subsequent
    }

    pub fn suspension_reason(&self) -> Option<&str> {
        self.suspension_reason.as_deref()
    }

    pub fn callback_addresses(&self) -> &[CallbackAddress] {
        &self.callback_addresses
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    pub fn updated_at_ms(&self) -> i64 {
        self.updated_at_ms
    }

    /// True iff every manifest definition has a matching provisioned resource
    pub fn provisioning_complete(&self) -> bool {
        self.manifest.definitions.iter().all(|definition| {
            self.provisioned_resources
                .values()
                .any(|resource| resource.resource_definition_id == definition.id)
        })
    }

    /// True iff every provisioned resource has been released
    pub fn deprovision_complete(&self) -> bool {
        self.provisioned_resources
            .keys()
            .all(|id| self.deprovisioned_resources.contains_key(id))
    }

    /// Manifest definitions without a provisioned resource yet
    pub fn pending_definitions(&self) -> Vec<&crate::provision::ResourceDefinition> {
        self.manifest
            .definitions
            .iter()
            .filter(|definition| {
                !self
                    .provisioned_resources
                    .values()
                    .any(|resource| resource.resource_definition_id == definition.id)
            })
            .collect()
    }

    /// Provisioned resources not yet released
    pub fn pending_deprovisioning(&self) -> Vec<&ProvisionedResource> {
        self.provisioned_resources
            .values()
            .filter(|resource| !self.deprovisioned_resources.contains_key(&resource.id))
            .collect()
    }

    pub fn add_provisioned_resource(&mut self, resource: ProvisionedResource) {
        self.provisioned_resources
            .insert(resource.id.clone(), resource);
        self.touch();
    }

    pub fn add_deprovisioned_resource(&mut self, resource: DeprovisionedResource) {
        self.deprovisioned_resources
            .insert(resource.provisioned_resource_id.clone(), resource);
        self.touch();
    }

    pub fn provisioned_resource(&self, resource_id: &str) -> Option<&ProvisionedResource> {
        self.provisioned_resources.get(resource_id)
    }

    /// Fold a provisioned data endpoint into the process: providers learn the
    /// content source, consumers the destination.
    pub fn apply_data_address(&mut self, address: DataAddress) {
        match self.role {
            ParticipantRole::Provider => self.content_data_address = Some(address),
            ParticipantRole::Consumer => self.destination_data_address = Some(address),
        }
        self.touch();
    }

    pub fn set_error_detail(&mut self, detail: Option<String>) {
        self.error_detail = detail;
    }

    // --- transitions -------------------------------------------------------

    /// Legal from: `Initial`, `Provisioning`. Installs the manifest.
    pub fn transition_provisioning(&mut self, manifest: ResourceManifest) -> StateMachineResult<()> {
        self.transition(
            TransferState::Provisioning,
            &[TransferState::Initial, TransferState::Provisioning],
        )?;
        self.manifest = manifest;
        Ok(())
    }

    /// Legal from: `Provisioning`, `ProvisioningRequested`
    pub fn transition_provisioning_requested(&mut self) -> StateMachineResult<()> {
        self.transition(
            TransferState::ProvisioningRequested,
            &[
                TransferState::Provisioning,
                TransferState::ProvisioningRequested,
            ],
        )
    }

    /// Legal from: `Initial`, `Provisioning`, `ProvisioningRequested`, `Provisioned`.
    ///
    /// `Initial` admits processes whose manifest is empty.
    pub fn transition_provisioned(&mut self) -> StateMachineResult<()> {
        self.transition(
            TransferState::Provisioned,
            &[
                TransferState::Initial,
                TransferState::Provisioning,
                TransferState::ProvisioningRequested,
                TransferState::Provisioned,
            ],
        )
    }

    /// Legal from: `Provisioned`, `Starting`, `Suspended` (resume)
    pub fn transition_starting(&mut self) -> StateMachineResult<()> {
        self.transition(
            TransferState::Starting,
            &[
                TransferState::Provisioned,
                TransferState::Starting,
                TransferState::Suspended,
            ],
        )
    }

    /// Legal from: `Starting`, `Started`, `Suspended`.
    ///
    /// `Suspended` admits the counter-party-driven resume confirmation.
    pub fn transition_started(&mut self) -> StateMachineResult<()> {
        self.transition(
            TransferState::Started,
            &[
                TransferState::Starting,
                TransferState::Started,
                TransferState::Suspended,
            ],
        )?;
        self.suspension_reason = None;
        self.stopping_subsequent = None;
        Ok(())
    }

    /// Legal from: `Started`, `Stopping`, `Suspending`
    pub fn transition_suspending(&mut self, reason: impl Into<String>) -> StateMachineResult<()> {
        self.transition(
            TransferState::Suspending,
            &[
                TransferState::Started,
                TransferState::Stopping,
                TransferState::Suspending,
            ],
        )?;
        self.suspension_reason = Some(reason.into());
        Ok(())
    }

    /// Legal from: `Suspending`, `Started` (counter-party initiated)
    pub fn transition_suspended(&mut self) -> StateMachineResult<()> {
        self.transition(
            TransferState::Suspended,
            &[TransferState::Suspending, TransferState::Started],
        )
    }

    /// Legal from: `Started`, `Stopping`. Provider only.
    ///
    /// Stages the transfer for `subsequent`, which must be one of
    /// `Completing`, `Terminating` or `Suspending`.
    pub fn transition_stopping(&mut self, subsequent: TransferState) -> StateMachineResult<()> {
        self.require_role(ParticipantRole::Provider, "stopping")?;
        if !matches!(
            subsequent,
            TransferState::Completing | TransferState::Terminating | TransferState::Suspending
        ) {
            return Err(StateMachineError::InvalidTransition {
                entity_id: self.id.clone(),
                from: TransferState::Stopping.to_string(),
                to: subsequent.to_string(),
            });
        }
        self.transition(
            TransferState::Stopping,
            &[TransferState::Started, TransferState::Stopping],
        )?;
        self.stopping_subsequent = Some(subsequent);
        Ok(())
    }

    /// Legal from: `Started`, `Stopping`, `Completing`
    pub fn transition_completing(&mut self) -> StateMachineResult<()> {
        self.transition(
            TransferState::Completing,
            &[
                TransferState::Started,
                TransferState::Stopping,
                TransferState::Completing,
            ],
        )
    }

    /// Legal from: `Completing`, `Started` (counter-party initiated)
    pub fn transition_completed(&mut self) -> StateMachineResult<()> {
        self.transition(
            TransferState::Completed,
            &[TransferState::Completing, TransferState::Started],
        )
    }

    /// Legal from: any state where the exchange has not yet ended
    pub fn transition_terminating(&mut self, reason: impl Into<String>) -> StateMachineResult<()> {
        if !self.state.can_be_terminated() {
            return Err(self.invalid_transition(TransferState::Terminating));
        }
        self.error_detail = Some(reason.into());
        self.force_transition(TransferState::Terminating);
        Ok(())
    }

    /// Legal from: any state where the exchange has not yet ended
    pub fn transition_terminated(&mut self, reason: Option<String>) -> StateMachineResult<()> {
        if self.state != TransferState::Terminating && !self.state.can_be_terminated() {
            return Err(self.invalid_transition(TransferState::Terminated));
        }
        if reason.is_some() {
            self.error_detail = reason;
        }
        self.force_transition(TransferState::Terminated);
        Ok(())
    }

    /// Legal from: `Completed`, `Terminated`, `Deprovisioning`
    pub fn transition_deprovisioning(&mut self) -> StateMachineResult<()> {
        self.transition(
            TransferState::Deprovisioning,
            &[
                TransferState::Completed,
                TransferState::Terminated,
                TransferState::Deprovisioning,
            ],
        )
    }

    /// Legal from: `Deprovisioning`, `DeprovisioningRequested`
    pub fn transition_deprovisioning_requested(&mut self) -> StateMachineResult<()> {
        self.transition(
            TransferState::DeprovisioningRequested,
            &[
                TransferState::Deprovisioning,
                TransferState::DeprovisioningRequested,
            ],
        )
    }

    /// Legal from: `Deprovisioning`, `DeprovisioningRequested`, `Deprovisioned`
    pub fn transition_deprovisioned(&mut self) -> StateMachineResult<()> {
        self.transition(
            TransferState::Deprovisioned,
            &[
                TransferState::Deprovisioning,
                TransferState::DeprovisioningRequested,
                TransferState::Deprovisioned,
            ],
        )
    }

    /// Terminal deprovisioning failure; records the combined failure detail
    pub fn transition_deprovisioned_with_error(
        &mut self,
        detail: impl Into<String>,
    ) -> StateMachineResult<()> {
        self.transition(
            TransferState::Deprovisioned,
            &[
                TransferState::Deprovisioning,
                TransferState::DeprovisioningRequested,
                TransferState::Deprovisioned,
            ],
        )?;
        self.error_detail = Some(detail.into());
        Ok(())
    }

    fn transition(
        &mut self,
        target: TransferState,
        allowed_from: &[TransferState],
    ) -> StateMachineResult<()> {
        if !allowed_from.contains(&self.state) {
            return Err(self.invalid_transition(target));
        }
        self.force_transition(target);
        Ok(())
    }

    fn force_transition(&mut self, target: TransferState) {
        self.state_count = if self.state == target {
            self.state_count + 1
        } else {
            1
        };
        self.state = target;
        self.state_timestamp_ms = Utc::now().timestamp_millis();
        self.updated_at_ms = self.state_timestamp_ms;
    }

    fn require_role(&self, role: ParticipantRole, transition: &str) -> StateMachineResult<()> {
        if self.role != role {
            return Err(StateMachineError::IllegalRole {
                transition: transition.to_string(),
                role: self.role.to_string(),
            });
        }
        Ok(())
    }

    fn invalid_transition(&self, target: TransferState) -> StateMachineError {
        StateMachineError::InvalidTransition {
            entity_id: self.id.clone(),
            from: self.state.to_string(),
            to: target.to_string(),
        }
    }

    fn touch(&mut self) {
        self.updated_at_ms = Utc::now().timestamp_millis();
    }
}

impl StatefulEntity for TransferProcess {
    fn id(&self) -> &str {
        &self.id
    }

    fn state_code(&self) -> i32 {
        self.state.code()
    }

    fn state_count(&self) -> u32 {
        self.state_count
    }

    fn state_timestamp_ms(&self) -> i64 {
        self.state_timestamp_ms
    }

    fn trace_context(&self) -> &HashMap<String, String> {
        &self.trace_context
    }

    fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }
}

impl CorrelatedEntity for TransferProcess {
    fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}

/// Builder producing a valid, not-yet-persisted transfer process
#[derive(Debug, Default)]
pub struct TransferProcessBuilder {
    id: Option<String>,
    role: Option<ParticipantRole>,
    correlation_id: Option<String>,
    counter_party_id: Option<String>,
    counter_party_address: Option<String>,
    protocol: Option<String>,
    participant_context_id: Option<String>,
    agreement_id: Option<String>,
    destination_data_address: Option<DataAddress>,
    callback_addresses: Vec<CallbackAddress>,
    trace_context: HashMap<String, String>,
    state: Option<TransferState>,
    state_timestamp_ms: Option<i64>,
}

impl TransferProcessBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn role(mut self, role: ParticipantRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn counter_party_id(mut self, id: impl Into<String>) -> Self {
        self.counter_party_id = Some(id.into());
        self
    }

    pub fn counter_party_address(mut self, address: impl Into<String>) -> Self {
        self.counter_party_address = Some(address.into());
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn participant_context_id(mut self, id: impl Into<String>) -> Self {
        self.participant_context_id = Some(id.into());
        self
    }

    pub fn agreement_id(mut self, id: impl Into<String>) -> Self {
        self.agreement_id = Some(id.into());
        self
    }

    pub fn destination_data_address(mut self, address: DataAddress) -> Self {
        self.destination_data_address = Some(address);
        self
    }

    pub fn callback_address(mut self, address: CallbackAddress) -> Self {
        self.callback_addresses.push(address);
        self
    }

    pub fn trace_context(mut self, trace_context: HashMap<String, String>) -> Self {
        self.trace_context = trace_context;
        self
    }

    /// Seed a specific state, for rehydration and tests
    pub fn state(mut self, state: TransferState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn state_timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.state_timestamp_ms = Some(timestamp_ms);
        self
    }

    pub fn build(self) -> Result<TransferProcess> {
        let role = self
            .role
            .ok_or_else(|| CoreError::Validation("transfer role is required".into()))?;
        let counter_party_id = self
            .counter_party_id
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CoreError::Validation("counter_party_id is required".into()))?;
        let counter_party_address = self
            .counter_party_address
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CoreError::Validation("counter_party_address is required".into()))?;
        let protocol = self
            .protocol
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CoreError::Validation("protocol is required".into()))?;
        let agreement_id = self
            .agreement_id
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CoreError::Validation("agreement_id is required".into()))?;

        let now_ms = Utc::now().timestamp_millis();
        Ok(TransferProcess {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            role,
            state: self.state.unwrap_or_default(),
            state_count: 1,
            state_timestamp_ms: self.state_timestamp_ms.unwrap_or(now_ms),
            correlation_id: self.correlation_id,
            counter_party_id,
            counter_party_address,
            protocol,
            participant_context_id: self
                .participant_context_id
                .unwrap_or_else(|| "default".to_string()),
            agreement_id,
            manifest: ResourceManifest::default(),
            provisioned_resources: BTreeMap::new(),
            deprovisioned_resources: BTreeMap::new(),
            content_data_address: None,
            destination_data_address: self.destination_data_address,
            stopping_subsequent: None,
            suspension_reason: None,
            callback_addresses: self.callback_addresses,
            trace_context: self.trace_context,
            error_detail: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        })
    }
}
