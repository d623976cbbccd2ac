//! # Inbound Protocol Message Application
//!
//! Applies counter-party messages to local negotiations over an
//! at-least-once transport. Every notification follows the same shape:
//! verify the caller's token, resolve the local entity through the lease
//! gate, validate the caller against the recorded counter-party, then apply
//! the mutation exactly once: a message id already present in the entity's
//! dedup window makes the whole call a no-op success.
//!
//! Message-id recording and the state transition land in one store update,
//! so a redelivered message can never observe half of its own effect.
//! Inbound transitions target the `*ed` states directly: they are facts the
//! counter-party has already confirmed.

use super::messages::{
    ContractAgreementMessage, ContractEventMessage, ContractOfferMessage, ContractRequestMessage,
    ContractTerminationMessage, ContractVerificationMessage, NegotiationEventKind,
};
use crate::entity::negotiation::DEFAULT_DEDUP_WINDOW;
use crate::entity::{ContractNegotiation, ParticipantRole, StatefulEntity};
use crate::error::{CoreError, Result};
use crate::events::{EventPublisher, NegotiationObservable};
use crate::identity::{ClaimToken, IdentityVerifier, TokenRepresentation};
use crate::store::{
    ContractNegotiationStore, CorrelatedEntityStore, StatefulEntityStore, StoreError,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Lifecycle event emitted after a successful application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NegotiationEvent {
    Requested,
    Offered,
    Accepted,
    Agreed,
    Verified,
    Finalized,
    Terminated,
}

/// Applies inbound counter-party messages to local negotiations
pub struct NegotiationProtocolService {
    store: Arc<dyn ContractNegotiationStore>,
    verifier: Arc<dyn IdentityVerifier>,
    observable: Arc<NegotiationObservable>,
    publisher: EventPublisher,
    owner_id: String,
    dedup_window: usize,
}

impl NegotiationProtocolService {
    pub fn new(
        store: Arc<dyn ContractNegotiationStore>,
        verifier: Arc<dyn IdentityVerifier>,
        observable: Arc<NegotiationObservable>,
        publisher: EventPublisher,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            verifier,
            observable,
            publisher,
            owner_id: owner_id.into(),
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }

    /// Override the processed-message retention window for entities this
    /// service creates
    pub fn with_dedup_window(mut self, dedup_window: usize) -> Self {
        self.dedup_window = dedup_window;
        self
    }

    /// Apply a contract request. Without a provider process id this creates
    /// a brand-new provider-side negotiation; otherwise it continues the
    /// existing exchange.
    #[instrument(skip(self, message, token), fields(message_id = %message.id))]
    pub async fn notify_requested(
        &self,
        message: ContractRequestMessage,
        token: &TokenRepresentation,
    ) -> Result<ContractNegotiation> {
        let claims = self.verifier.verify(token).await?;

        let process_id = match message.process_id.clone() {
            Some(process_id) => process_id,
            None => {
                // A redelivered initial request must find the entity it
                // already created rather than create a second one
                match self
                    .store
                    .find_by_correlation_id(&message.consumer_pid)
                    .await?
                {
                    Some(existing) => existing.id().to_string(),
                    None => return self.create_requested(message, &claims).await,
                }
            }
        };

        let offer = message.offer.clone();
        self.apply(
            &process_id,
            &message.id,
            &message.counter_party_id,
            &claims,
            NegotiationEvent::Requested,
            |negotiation| {
                negotiation.add_contract_offer(offer);
                negotiation.transition_requested()?;
                Ok(())
            },
        )
        .await
    }

    /// Apply a provider counter-offer
    #[instrument(skip(self, message, token), fields(message_id = %message.id))]
    pub async fn notify_offered(
        &self,
        message: ContractOfferMessage,
        token: &TokenRepresentation,
    ) -> Result<ContractNegotiation> {
        let claims = self.verifier.verify(token).await?;
        let offer = message.offer.clone();
        self.apply(
            &message.process_id,
            &message.id,
            &message.counter_party_id,
            &claims,
            NegotiationEvent::Offered,
            |negotiation| {
                negotiation.add_contract_offer(offer);
                negotiation.transition_offered()?;
                Ok(())
            },
        )
        .await
    }

    /// Apply an acceptance or finalization event
    #[instrument(skip(self, message, token), fields(message_id = %message.id))]
    pub async fn notify_event(
        &self,
        message: ContractEventMessage,
        token: &TokenRepresentation,
    ) -> Result<ContractNegotiation> {
        match message.kind {
            NegotiationEventKind::Accepted => self.notify_accepted(message, token).await,
            NegotiationEventKind::Finalized => self.notify_finalized(message, token).await,
        }
    }

    /// Apply the counter-party's acceptance of the latest offer
    pub async fn notify_accepted(
        &self,
        message: ContractEventMessage,
        token: &TokenRepresentation,
    ) -> Result<ContractNegotiation> {
        let claims = self.verifier.verify(token).await?;
        self.apply(
            &message.process_id,
            &message.id,
            &message.counter_party_id,
            &claims,
            NegotiationEvent::Accepted,
            |negotiation| {
                negotiation.transition_accepted()?;
                Ok(())
            },
        )
        .await
    }

    /// Apply the provider-issued agreement
    #[instrument(skip(self, message, token), fields(message_id = %message.id))]
    pub async fn notify_agreed(
        &self,
        message: ContractAgreementMessage,
        token: &TokenRepresentation,
    ) -> Result<ContractNegotiation> {
        let claims = self.verifier.verify(token).await?;
        let agreement = message.agreement.clone();
        self.apply(
            &message.process_id,
            &message.id,
            &message.counter_party_id,
            &claims,
            NegotiationEvent::Agreed,
            |negotiation| {
                negotiation.transition_agreed(agreement)?;
                Ok(())
            },
        )
        .await
    }

    /// Apply the consumer's agreement verification
    #[instrument(skip(self, message, token), fields(message_id = %message.id))]
    pub async fn notify_verified(
        &self,
        message: ContractVerificationMessage,
        token: &TokenRepresentation,
    ) -> Result<ContractNegotiation> {
        let claims = self.verifier.verify(token).await?;
        self.apply(
            &message.process_id,
            &message.id,
            &message.counter_party_id,
            &claims,
            NegotiationEvent::Verified,
            |negotiation| {
                negotiation.transition_verified()?;
                Ok(())
            },
        )
        .await
    }

    /// Apply the provider's finalization event
    pub async fn notify_finalized(
        &self,
        message: ContractEventMessage,
        token: &TokenRepresentation,
    ) -> Result<ContractNegotiation> {
        let claims = self.verifier.verify(token).await?;
        self.apply(
            &message.process_id,
            &message.id,
            &message.counter_party_id,
            &claims,
            NegotiationEvent::Finalized,
            |negotiation| {
                negotiation.transition_finalized()?;
                Ok(())
            },
        )
        .await
    }

    /// Apply a termination notice
    #[instrument(skip(self, message, token), fields(message_id = %message.id))]
    pub async fn notify_terminated(
        &self,
        message: ContractTerminationMessage,
        token: &TokenRepresentation,
    ) -> Result<ContractNegotiation> {
        let claims = self.verifier.verify(token).await?;
        let reason = message.reason.clone();
        self.apply(
            &message.process_id,
            &message.id,
            &message.counter_party_id,
            &claims,
            NegotiationEvent::Terminated,
            |negotiation| {
                negotiation.transition_terminated(reason)?;
                Ok(())
            },
        )
        .await
    }

    async fn create_requested(
        &self,
        message: ContractRequestMessage,
        claims: &ClaimToken,
    ) -> Result<ContractNegotiation> {
        validate_identity(claims, &message.counter_party_id)?;

        let mut builder = ContractNegotiation::builder()
            .role(ParticipantRole::Provider)
            .correlation_id(message.consumer_pid.clone())
            .counter_party_id(message.counter_party_id)
            .counter_party_address(message.counter_party_address)
            .protocol(message.protocol)
            .dedup_window(self.dedup_window);
        for callback in message.callback_addresses {
            builder = builder.callback_address(callback);
        }
        let mut negotiation = builder.build()?;

        negotiation.record_protocol_message(&message.id);
        negotiation.add_contract_offer(message.offer);
        negotiation.transition_requested()?;

        self.store.create(negotiation.clone()).await?;
        info!(
            negotiation_id = negotiation.id(),
            "Created provider negotiation from contract request"
        );
        self.notify(&negotiation, NegotiationEvent::Requested);
        Ok(negotiation)
    }

    /// The shared verify-resolve-guard-mutate-persist pipeline
    async fn apply<F>(
        &self,
        process_id: &str,
        message_id: &str,
        counter_party_id: &str,
        claims: &ClaimToken,
        event: NegotiationEvent,
        mutate: F,
    ) -> Result<ContractNegotiation>
    where
        F: FnOnce(&mut ContractNegotiation) -> Result<()>,
    {
        let mut negotiation = self.resolve_leased(process_id).await?;

        let guarded: Result<bool> = (|| {
            validate_identity(claims, negotiation.counter_party_id())?;
            if counter_party_id != negotiation.counter_party_id() {
                return Err(CoreError::Validation(format!(
                    "message counter-party {counter_party_id} does not match negotiation"
                )));
            }
            if negotiation.is_message_processed(message_id) {
                debug!(message_id, "Message already applied; skipping");
                return Ok(false);
            }
            negotiation.record_protocol_message(message_id);
            mutate(&mut negotiation)?;
            Ok(true)
        })();

        match guarded {
            Ok(true) => {
                self.store
                    .update(negotiation.clone(), &self.owner_id)
                    .await?;
                self.notify(&negotiation, event);
                Ok(negotiation)
            }
            Ok(false) => {
                self.store.release(negotiation.id(), &self.owner_id).await?;
                Ok(negotiation)
            }
            Err(err) => {
                self.store.release(negotiation.id(), &self.owner_id).await?;
                Err(err)
            }
        }
    }

    /// Resolve by the local id, falling back to correlation-id lookup for
    /// callers that conflate provider and consumer ids
    async fn resolve_leased(&self, process_id: &str) -> Result<ContractNegotiation> {
        match self
            .store
            .find_by_id_and_lease(process_id, &self.owner_id)
            .await
        {
            Ok(negotiation) => Ok(negotiation),
            Err(StoreError::NotFound { .. }) => {
                let correlated = self
                    .store
                    .find_by_correlation_id(process_id)
                    .await?
                    .ok_or_else(|| CoreError::NotFound(process_id.to_string()))?;
                Ok(self
                    .store
                    .find_by_id_and_lease(correlated.id(), &self.owner_id)
                    .await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn notify(&self, negotiation: &ContractNegotiation, event: NegotiationEvent) {
        let name = match event {
            NegotiationEvent::Requested => "requested",
            NegotiationEvent::Offered => "offered",
            NegotiationEvent::Accepted => "accepted",
            NegotiationEvent::Agreed => "agreed",
            NegotiationEvent::Verified => "verified",
            NegotiationEvent::Finalized => "finalized",
            NegotiationEvent::Terminated => "terminated",
        };
        self.publisher
            .publish_entity_event("negotiation", negotiation.id(), name);
        self.observable.invoke_for_each(|listener| match event {
            NegotiationEvent::Requested => listener.requested(negotiation),
            NegotiationEvent::Offered => listener.offered(negotiation),
            NegotiationEvent::Accepted => listener.accepted(negotiation),
            NegotiationEvent::Agreed => listener.agreed(negotiation),
            NegotiationEvent::Verified => listener.verified(negotiation),
            NegotiationEvent::Finalized => listener.finalized(negotiation),
            NegotiationEvent::Terminated => listener.terminated(negotiation),
        });
    }
}

fn validate_identity(claims: &ClaimToken, counter_party_id: &str) -> Result<()> {
    match claims.participant_id() {
        Some(participant) if participant == counter_party_id => Ok(()),
        Some(participant) => Err(CoreError::Unauthorized(format!(
            "token subject {participant} does not match counter-party {counter_party_id}"
        ))),
        None => Err(CoreError::Unauthorized(
            "token carries no participant identity".into(),
        )),
    }
}
