//! # Contract Negotiation Manager
//!
//! Drives leased negotiations through their send-states. Every `*ing` state
//! wraps one dispatcher send in the progression engine: success confirms the
//! matching `*ed` state, a transient failure re-enters the same state with a
//! bumped attempt count, and an exhausted budget or fatal failure lands the
//! negotiation in `Terminated` with the failure detail attached.

use super::driver::StateProcessor;
use super::ManagerSettings;
use crate::entity::{
    ContractAgreement, ContractNegotiation, CorrelatedEntity, ParticipantRole, StatefulEntity,
};
use crate::error::{CoreError, Result};
use crate::events::{EventPublisher, NegotiationObservable};
use crate::protocol::{
    new_message_id, ContractEventMessage, ContractRequestMessage, ContractTerminationMessage,
    ContractVerificationMessage, NegotiationEventKind, ProtocolMessage, RemoteMessageDispatcher,
};
use crate::retry::{Processed, ProgressionEngine, WorkOutcome};
use crate::state_machine::{NegotiationState, StateMachineResult};
use crate::store::{ContractNegotiationStore, StatefulEntityStore};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const MONITORED_STATES: [NegotiationState; 8] = [
    NegotiationState::Initial,
    NegotiationState::Requesting,
    NegotiationState::Offering,
    NegotiationState::Accepting,
    NegotiationState::Agreeing,
    NegotiationState::Verifying,
    NegotiationState::Finalizing,
    NegotiationState::Terminating,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleEvent {
    Initiated,
    Requested,
    Offered,
    Accepted,
    Agreed,
    Verified,
    Finalized,
    Terminated,
}

pub struct ContractNegotiationManager {
    store: Arc<dyn ContractNegotiationStore>,
    dispatcher: Arc<dyn RemoteMessageDispatcher>,
    engine: ProgressionEngine,
    observable: Arc<NegotiationObservable>,
    publisher: EventPublisher,
    settings: ManagerSettings,
}

impl ContractNegotiationManager {
    pub fn new(
        store: Arc<dyn ContractNegotiationStore>,
        dispatcher: Arc<dyn RemoteMessageDispatcher>,
        engine: ProgressionEngine,
        observable: Arc<NegotiationObservable>,
        publisher: EventPublisher,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            store,
            dispatcher,
            engine,
            observable,
            publisher,
            settings,
        }
    }

    /// Persist a freshly built negotiation and hand it to the polling loop
    pub async fn initiate(&self, negotiation: ContractNegotiation) -> Result<String> {
        let id = negotiation.id().to_string();
        self.store.create(negotiation.clone()).await?;
        info!(negotiation_id = %id, role = %negotiation.role(), "Negotiation initiated");
        self.notify(&negotiation, LifecycleEvent::Initiated);
        Ok(id)
    }

    /// One pass over all monitored states
    #[instrument(skip(self), fields(owner_id = %self.settings.owner_id))]
    pub async fn process_states_once(&self) -> Result<usize> {
        let mut processed = 0;
        for state in MONITORED_STATES {
            let batch = self
                .store
                .lease_and_fetch_next_for_state(
                    state.code(),
                    self.settings.batch_size,
                    &self.settings.owner_id,
                )
                .await?;
            for negotiation in batch {
                let id = negotiation.id().to_string();
                if let Err(err) = self.process_entity(state, negotiation).await {
                    warn!(
                        negotiation_id = %id,
                        state = %state,
                        error = %err,
                        "Failed to drive negotiation; releasing lease"
                    );
                    let _ = self.store.release(&id, &self.settings.owner_id).await;
                }
                processed += 1;
            }
        }
        Ok(processed)
    }

    async fn process_entity(
        &self,
        state: NegotiationState,
        mut negotiation: ContractNegotiation,
    ) -> Result<()> {
        match state {
            NegotiationState::Initial => {
                match negotiation.role() {
                    ParticipantRole::Consumer => negotiation.transition_requesting()?,
                    ParticipantRole::Provider => negotiation.transition_offering()?,
                }
                self.store
                    .update(negotiation, &self.settings.owner_id)
                    .await?;
                Ok(())
            }
            NegotiationState::Requesting => {
                let message = match self.request_message(&negotiation) {
                    Ok(message) => message,
                    Err(detail) => return self.fail_terminal(negotiation, detail).await,
                };
                self.drive_send(
                    negotiation,
                    message,
                    |n| n.transition_requested(),
                    |n| n.transition_requesting(),
                    LifecycleEvent::Requested,
                )
                .await
            }
            NegotiationState::Offering => {
                let message = match self.offer_message(&negotiation) {
                    Ok(message) => message,
                    Err(detail) => return self.fail_terminal(negotiation, detail).await,
                };
                self.drive_send(
                    negotiation,
                    message,
                    |n| n.transition_offered(),
                    |n| n.transition_offering(),
                    LifecycleEvent::Offered,
                )
                .await
            }
            NegotiationState::Accepting => {
                let message = self.event_message(&negotiation, NegotiationEventKind::Accepted);
                self.drive_send(
                    negotiation,
                    message,
                    |n| n.transition_accepted(),
                    |n| n.transition_accepting(),
                    LifecycleEvent::Accepted,
                )
                .await
            }
            NegotiationState::Agreeing => {
                let agreement = match self.build_agreement(&negotiation) {
                    Ok(agreement) => agreement,
                    Err(detail) => return self.fail_terminal(negotiation, detail).await,
                };
                let message = self.agreement_message(&negotiation, agreement.clone());
                self.drive_send(
                    negotiation,
                    message,
                    move |n| n.transition_agreed(agreement),
                    |n| n.transition_agreeing(),
                    LifecycleEvent::Agreed,
                )
                .await
            }
            NegotiationState::Verifying => {
                let message = self.verification_message(&negotiation);
                self.drive_send(
                    negotiation,
                    message,
                    |n| n.transition_verified(),
                    |n| n.transition_verifying(),
                    LifecycleEvent::Verified,
                )
                .await
            }
            NegotiationState::Finalizing => {
                let message = self.event_message(&negotiation, NegotiationEventKind::Finalized);
                self.drive_send(
                    negotiation,
                    message,
                    |n| n.transition_finalized(),
                    |n| n.transition_finalizing(),
                    LifecycleEvent::Finalized,
                )
                .await
            }
            NegotiationState::Terminating => {
                let message = self.termination_message(&negotiation);
                self.drive_send(
                    negotiation,
                    message,
                    |n| n.transition_terminated(None),
                    |n| {
                        let reason = n.error_detail().unwrap_or("terminated").to_string();
                        n.transition_terminating(reason)
                    },
                    LifecycleEvent::Terminated,
                )
                .await
            }
            other => Err(CoreError::Validation(format!(
                "state {other} is not driven by the negotiation manager"
            ))),
        }
    }

    /// Send `message` under the retry budget, then apply the matching
    /// confirmed transition
    async fn drive_send<S, R>(
        &self,
        mut negotiation: ContractNegotiation,
        message: ProtocolMessage,
        on_success: S,
        reenter: R,
        event: LifecycleEvent,
    ) -> Result<()>
    where
        S: FnOnce(&mut ContractNegotiation) -> StateMachineResult<()>,
        R: FnOnce(&mut ContractNegotiation) -> StateMachineResult<()>,
    {
        let outcome = self
            .engine
            .process(&negotiation, || async {
                match self.dispatcher.dispatch(message).await {
                    Ok(()) => WorkOutcome::Success,
                    Err(failure) if failure.fatal => WorkOutcome::Fatal(failure.detail),
                    Err(failure) => WorkOutcome::Retryable(failure.detail),
                }
            })
            .await;

        match outcome {
            Processed::Succeeded => {
                negotiation.set_error_detail(None);
                on_success(&mut negotiation)?;
                self.store
                    .update(negotiation.clone(), &self.settings.owner_id)
                    .await?;
                self.notify(&negotiation, event);
                Ok(())
            }
            Processed::Deferred { .. } => {
                self.store
                    .release(negotiation.id(), &self.settings.owner_id)
                    .await?;
                Ok(())
            }
            Processed::FailedRetryable { detail } => {
                warn!(
                    negotiation_id = negotiation.id(),
                    attempt = negotiation.state_count(),
                    %detail,
                    "Send failed; will retry"
                );
                reenter(&mut negotiation)?;
                negotiation.set_error_detail(Some(detail));
                self.store
                    .update(negotiation, &self.settings.owner_id)
                    .await?;
                Ok(())
            }
            Processed::FailedExhausted { detail } | Processed::FatalError { detail } => {
                self.fail_terminal(negotiation, detail).await
            }
        }
    }

    /// Land the negotiation in its terminal failure state with the detail
    /// attached
    async fn fail_terminal(
        &self,
        mut negotiation: ContractNegotiation,
        detail: String,
    ) -> Result<()> {
        warn!(
            negotiation_id = negotiation.id(),
            %detail,
            "Negotiation failed terminally"
        );
        negotiation.transition_terminated(Some(detail))?;
        self.store
            .update(negotiation.clone(), &self.settings.owner_id)
            .await?;
        self.notify(&negotiation, LifecycleEvent::Terminated);
        Ok(())
    }

    fn request_message(
        &self,
        negotiation: &ContractNegotiation,
    ) -> std::result::Result<ProtocolMessage, String> {
        let offer = negotiation
            .latest_offer()
            .ok_or_else(|| "negotiation has no offer to request".to_string())?;
        Ok(ProtocolMessage::ContractRequest(ContractRequestMessage {
            id: new_message_id(),
            process_id: negotiation.correlation_id().map(str::to_string),
            consumer_pid: negotiation.id().to_string(),
            counter_party_id: negotiation.counter_party_id().to_string(),
            counter_party_address: negotiation.counter_party_address().to_string(),
            protocol: negotiation.protocol().to_string(),
            offer: offer.clone(),
            callback_addresses: negotiation.callback_addresses().to_vec(),
        }))
    }

    fn offer_message(
        &self,
        negotiation: &ContractNegotiation,
    ) -> std::result::Result<ProtocolMessage, String> {
        let offer = negotiation
            .latest_offer()
            .ok_or_else(|| "negotiation has no offer to send".to_string())?;
        Ok(ProtocolMessage::ContractOffer(
            crate::protocol::ContractOfferMessage {
                id: new_message_id(),
                process_id: self.remote_process_id(negotiation),
                counter_party_id: negotiation.counter_party_id().to_string(),
                counter_party_address: negotiation.counter_party_address().to_string(),
                protocol: negotiation.protocol().to_string(),
                offer: offer.clone(),
            },
        ))
    }

    fn agreement_message(
        &self,
        negotiation: &ContractNegotiation,
        agreement: ContractAgreement,
    ) -> ProtocolMessage {
        ProtocolMessage::ContractAgreement(crate::protocol::ContractAgreementMessage {
            id: new_message_id(),
            process_id: self.remote_process_id(negotiation),
            counter_party_id: negotiation.counter_party_id().to_string(),
            counter_party_address: negotiation.counter_party_address().to_string(),
            protocol: negotiation.protocol().to_string(),
            agreement,
        })
    }

    fn verification_message(&self, negotiation: &ContractNegotiation) -> ProtocolMessage {
        ProtocolMessage::ContractVerification(ContractVerificationMessage {
            id: new_message_id(),
            process_id: self.remote_process_id(negotiation),
            counter_party_id: negotiation.counter_party_id().to_string(),
            counter_party_address: negotiation.counter_party_address().to_string(),
            protocol: negotiation.protocol().to_string(),
        })
    }

    fn event_message(
        &self,
        negotiation: &ContractNegotiation,
        kind: NegotiationEventKind,
    ) -> ProtocolMessage {
        ProtocolMessage::ContractEvent(ContractEventMessage {
            id: new_message_id(),
            process_id: self.remote_process_id(negotiation),
            counter_party_id: negotiation.counter_party_id().to_string(),
            counter_party_address: negotiation.counter_party_address().to_string(),
            protocol: negotiation.protocol().to_string(),
            kind,
        })
    }

    fn termination_message(&self, negotiation: &ContractNegotiation) -> ProtocolMessage {
        ProtocolMessage::ContractTermination(ContractTerminationMessage {
            id: new_message_id(),
            process_id: self.remote_process_id(negotiation),
            counter_party_id: negotiation.counter_party_id().to_string(),
            counter_party_address: negotiation.counter_party_address().to_string(),
            protocol: negotiation.protocol().to_string(),
            reason: negotiation.error_detail().map(str::to_string),
        })
    }

    /// The provider issues the agreement from the latest offer if the
    /// negotiation does not carry one yet
    fn build_agreement(
        &self,
        negotiation: &ContractNegotiation,
    ) -> std::result::Result<ContractAgreement, String> {
        if let Some(agreement) = negotiation.agreement() {
            return Ok(agreement.clone());
        }
        let offer = negotiation
            .latest_offer()
            .ok_or_else(|| "negotiation has no offer to issue an agreement for".to_string())?;
        Ok(ContractAgreement {
            id: Uuid::new_v4().to_string(),
            provider_id: self.settings.participant_id.clone(),
            consumer_id: negotiation.counter_party_id().to_string(),
            asset_id: offer.asset_id.clone(),
            policy: offer.policy.clone(),
            signed_at_ms: Utc::now().timestamp_millis(),
        })
    }

    /// The counter-party's id for this negotiation, used as the process id
    /// in outbound messages
    fn remote_process_id(&self, negotiation: &ContractNegotiation) -> String {
        negotiation
            .correlation_id()
            .unwrap_or(negotiation.id())
            .to_string()
    }

    fn notify(&self, negotiation: &ContractNegotiation, event: LifecycleEvent) {
        let name = match event {
            LifecycleEvent::Initiated => "initiated",
            LifecycleEvent::Requested => "requested",
            LifecycleEvent::Offered => "offered",
            LifecycleEvent::Accepted => "accepted",
            LifecycleEvent::Agreed => "agreed",
            LifecycleEvent::Verified => "verified",
            LifecycleEvent::Finalized => "finalized",
            LifecycleEvent::Terminated => "terminated",
        };
        self.publisher
            .publish_entity_event("negotiation", negotiation.id(), name);
        self.observable.invoke_for_each(|listener| match event {
            LifecycleEvent::Initiated => listener.initiated(negotiation),
            LifecycleEvent::Requested => listener.requested(negotiation),
            LifecycleEvent::Offered => listener.offered(negotiation),
            LifecycleEvent::Accepted => listener.accepted(negotiation),
            LifecycleEvent::Agreed => listener.agreed(negotiation),
            LifecycleEvent::Verified => listener.verified(negotiation),
            LifecycleEvent::Finalized => listener.finalized(negotiation),
            LifecycleEvent::Terminated => listener.terminated(negotiation),
        });
    }
}

#[async_trait]
impl StateProcessor for ContractNegotiationManager {
    fn name(&self) -> &str {
        "contract-negotiation"
    }

    async fn process_once(&self) -> Result<usize> {
        self.process_states_once().await
    }
}
