//! # Contract Negotiation
//!
//! The persistent entity tracking a multi-message contract negotiation with a
//! remote counter-party. Consumer and provider share the state enum; the
//! asymmetric transitions are guarded by the participant role.
//!
//! Exactly one of `id` / `correlation_id` is "mine" depending on the role:
//! the other identifies the same logical negotiation on the remote side.
//! Inbound protocol messages are deduplicated against a bounded window of
//! already-processed message ids, so at-least-once delivery never applies a
//! transition twice.

use super::types::{CallbackAddress, ContractAgreement, ContractOffer};
use super::{CorrelatedEntity, ParticipantRole, StatefulEntity};
use crate::error::{CoreError, Result};
use crate::state_machine::{NegotiationState, StateMachineError, StateMachineResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Default bound for the processed-protocol-message dedup window
pub const DEFAULT_DEDUP_WINDOW: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractNegotiation {
    id: String,
    role: ParticipantRole,
    state: NegotiationState,
    state_count: u32,
    state_timestamp_ms: i64,
    correlation_id: Option<String>,
    counter_party_id: String,
    counter_party_address: String,
    protocol: String,
    #[serde(default)]
    callback_addresses: Vec<CallbackAddress>,
    #[serde(default)]
    contract_offers: Vec<ContractOffer>,
    agreement: Option<ContractAgreement>,
    #[serde(default)]
    processed_message_ids: VecDeque<String>,
    dedup_window: usize,
    #[serde(default)]
    trace_context: HashMap<String, String>,
    error_detail: Option<String>,
    created_at_ms: i64,
    updated_at_ms: i64,
}

impl ContractNegotiation {
    pub fn builder() -> ContractNegotiationBuilder {
        ContractNegotiationBuilder::default()
    }

    pub fn role(&self) -> ParticipantRole {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
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

    pub fn callback_addresses(&self) -> &[CallbackAddress] {
        &self.callback_addresses
    }

    pub fn contract_offers(&self) -> &[ContractOffer] {
        &self.contract_offers
    }

    /// The most recent offer exchanged in this negotiation
    pub fn latest_offer(&self) -> Option<&ContractOffer> {
        self.contract_offers.last()
    }

    pub fn agreement(&self) -> Option<&ContractAgreement> {
        self.agreement.as_ref()
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    pub fn updated_at_ms(&self) -> i64 {
        self.updated_at_ms
    }

    pub fn add_contract_offer(&mut self, offer: ContractOffer) {
        self.contract_offers.push(offer);
        self.touch();
    }

    pub fn set_error_detail(&mut self, detail: Option<String>) {
        self.error_detail = detail;
    }

    /// Check the dedup window for an already-applied inbound message
    pub fn is_message_processed(&self, message_id: &str) -> bool {
        self.processed_message_ids.iter().any(|m| m == message_id)
    }

    /// Record an inbound message id, evicting the oldest entry once the
    /// window is full
    pub fn record_protocol_message(&mut self, message_id: impl Into<String>) {
        let message_id = message_id.into();
        if self.is_message_processed(&message_id) {
            return;
        }
        if self.processed_message_ids.len() >= self.dedup_window {
            self.processed_message_ids.pop_front();
        }
        self.processed_message_ids.push_back(message_id);
    }

    pub fn processed_message_count(&self) -> usize {
        self.processed_message_ids.len()
    }

    // --- transitions -------------------------------------------------------
    //
    // Predecessor sets are documented per method. Protocol-driven transitions
    // move directly to the `*ed` state: they represent facts the
    // counter-party already confirmed, not local intentions.

    /// Legal from: `Initial`, `Requesting`. Consumer only.
    pub fn transition_requesting(&mut self) -> StateMachineResult<()> {
        self.require_role(ParticipantRole::Consumer, "requesting")?;
        self.transition(
            NegotiationState::Requesting,
            &[NegotiationState::Initial, NegotiationState::Requesting],
        )
    }

    /// Legal from: `Initial`, `Requesting`, `Requested`, `Offered`.
    ///
    /// `Offered` admits the consumer counter-request that answers an offer.
    pub fn transition_requested(&mut self) -> StateMachineResult<()> {
        self.transition(
            NegotiationState::Requested,
            &[
                NegotiationState::Initial,
                NegotiationState::Requesting,
                NegotiationState::Requested,
                NegotiationState::Offered,
            ],
        )
    }

    /// Legal from: `Initial`, `Requested`, `Offering`, `Offered`. Provider only.
    pub fn transition_offering(&mut self) -> StateMachineResult<()> {
        self.require_role(ParticipantRole::Provider, "offering")?;
        self.transition(
            NegotiationState::Offering,
            &[
                NegotiationState::Initial,
                NegotiationState::Requested,
                NegotiationState::Offering,
                NegotiationState::Offered,
            ],
        )
    }

    /// Legal from: `Requested`, `Offering`, `Offered`.
    pub fn transition_offered(&mut self) -> StateMachineResult<()> {
        self.transition(
            NegotiationState::Offered,
            &[
                NegotiationState::Requested,
                NegotiationState::Offering,
                NegotiationState::Offered,
            ],
        )
    }

    /// Legal from: `Offered`, `Accepting`. Consumer only.
    pub fn transition_accepting(&mut self) -> StateMachineResult<()> {
        self.require_role(ParticipantRole::Consumer, "accepting")?;
        self.transition(
            NegotiationState::Accepting,
            &[NegotiationState::Offered, NegotiationState::Accepting],
        )
    }

    /// Legal from: `Offered`, `Accepting`, `Accepted`.
    pub fn transition_accepted(&mut self) -> StateMachineResult<()> {
        self.transition(
            NegotiationState::Accepted,
            &[
                NegotiationState::Offered,
                NegotiationState::Accepting,
                NegotiationState::Accepted,
            ],
        )
    }

    /// Legal from: `Requested`, `Accepted`, `Agreeing`. Provider only.
    pub fn transition_agreeing(&mut self) -> StateMachineResult<()> {
        self.require_role(ParticipantRole::Provider, "agreeing")?;
        self.transition(
            NegotiationState::Agreeing,
            &[
                NegotiationState::Requested,
                NegotiationState::Accepted,
                NegotiationState::Agreeing,
            ],
        )
    }

    /// Legal from: `Requested`, `Accepted`, `Agreeing`, `Agreed`.
    ///
    /// The consumer receives the agreement while still in `Requested` or
    /// `Accepted`; the provider confirms its own send from `Agreeing`.
    pub fn transition_agreed(&mut self, agreement: ContractAgreement) -> StateMachineResult<()> {
        self.transition(
            NegotiationState::Agreed,
            &[
                NegotiationState::Requested,
                NegotiationState::Accepted,
                NegotiationState::Agreeing,
                NegotiationState::Agreed,
            ],
        )?;
        self.agreement = Some(agreement);
        Ok(())
    }

    /// Legal from: `Agreed`, `Verifying`. Consumer only.
    pub fn transition_verifying(&mut self) -> StateMachineResult<()> {
        self.require_role(ParticipantRole::Consumer, "verifying")?;
        self.transition(
            NegotiationState::Verifying,
            &[NegotiationState::Agreed, NegotiationState::Verifying],
        )
    }

    /// Legal from: `Agreed`, `Verifying`, `Verified`.
    pub fn transition_verified(&mut self) -> StateMachineResult<()> {
        self.transition(
            NegotiationState::Verified,
            &[
                NegotiationState::Agreed,
                NegotiationState::Verifying,
                NegotiationState::Verified,
            ],
        )
    }

    /// Legal from: `Verified`, `Finalizing`. Provider only.
    pub fn transition_finalizing(&mut self) -> StateMachineResult<()> {
        self.require_role(ParticipantRole::Provider, "finalizing")?;
        self.transition(
            NegotiationState::Finalizing,
            &[NegotiationState::Verified, NegotiationState::Finalizing],
        )
    }

    /// Legal from: `Verifying`, `Verified`, `Finalizing`.
    pub fn transition_finalized(&mut self) -> StateMachineResult<()> {
        self.transition(
            NegotiationState::Finalized,
            &[
                NegotiationState::Verifying,
                NegotiationState::Verified,
                NegotiationState::Finalizing,
            ],
        )
    }

    /// Legal from: any non-terminal state
    pub fn transition_terminating(&mut self, reason: impl Into<String>) -> StateMachineResult<()> {
        if !self.state.can_be_terminated() {
            return Err(self.invalid_transition(NegotiationState::Terminating));
        }
        self.error_detail = Some(reason.into());
        self.force_transition(NegotiationState::Terminating);
        Ok(())
    }

    /// Legal from: any non-terminal state
    pub fn transition_terminated(&mut self, reason: Option<String>) -> StateMachineResult<()> {
        if self.state.is_terminal() {
            return Err(self.invalid_transition(NegotiationState::Terminated));
        }
        if reason.is_some() {
            self.error_detail = reason;
        }
        self.force_transition(NegotiationState::Terminated);
        Ok(())
    }

    fn transition(
        &mut self,
        target: NegotiationState,
        allowed_from: &[NegotiationState],
    ) -> StateMachineResult<()> {
        if !allowed_from.contains(&self.state) {
            return Err(self.invalid_transition(target));
        }
        self.force_transition(target);
        Ok(())
    }

    fn force_transition(&mut self, target: NegotiationState) {
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

    fn invalid_transition(&self, target: NegotiationState) -> StateMachineError {
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

impl StatefulEntity for ContractNegotiation {
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

impl CorrelatedEntity for ContractNegotiation {
    fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}

/// Builder producing a valid, not-yet-persisted negotiation
#[derive(Debug, Default)]
pub struct ContractNegotiationBuilder {
    id: Option<String>,
    role: Option<ParticipantRole>,
    correlation_id: Option<String>,
    counter_party_id: Option<String>,
    counter_party_address: Option<String>,
    protocol: Option<String>,
    callback_addresses: Vec<CallbackAddress>,
    contract_offers: Vec<ContractOffer>,
    trace_context: HashMap<String, String>,
    state: Option<NegotiationState>,
    state_timestamp_ms: Option<i64>,
    dedup_window: Option<usize>,
}

impl ContractNegotiationBuilder {
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

    pub fn callback_address(mut self, address: CallbackAddress) -> Self {
        self.callback_addresses.push(address);
        self
    }

    pub fn contract_offer(mut self, offer: ContractOffer) -> Self {
        self.contract_offers.push(offer);
        self
    }

    pub fn trace_context(mut self, trace_context: HashMap<String, String>) -> Self {
        self.trace_context = trace_context;
        self
    }

    /// Seed a specific state, for rehydration and tests
    pub fn state(mut self, state: NegotiationState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn state_timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.state_timestamp_ms = Some(timestamp_ms);
        self
    }

    pub fn dedup_window(mut self, window: usize) -> Self {
        self.dedup_window = Some(window);
        self
    }

    pub fn build(self) -> Result<ContractNegotiation> {
        let role = self
            .role
            .ok_or_else(|| CoreError::Validation("negotiation role is required".into()))?;
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

        let now_ms = Utc::now().timestamp_millis();
        Ok(ContractNegotiation {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            role,
            state: self.state.unwrap_or_default(),
            state_count: 1,
            state_timestamp_ms: self.state_timestamp_ms.unwrap_or(now_ms),
            correlation_id: self.correlation_id,
            counter_party_id,
            counter_party_address,
            protocol,
            callback_addresses: self.callback_addresses,
            contract_offers: self.contract_offers,
            agreement: None,
            processed_message_ids: VecDeque::new(),
            dedup_window: self.dedup_window.unwrap_or(DEFAULT_DEDUP_WINDOW),
            trace_context: self.trace_context,
            error_detail: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        })
    }
}
