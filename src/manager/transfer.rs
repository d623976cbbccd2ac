//! # Transfer Process Manager
//!
//! Drives leased transfer processes through provisioning, the data exchange
//! lifecycle, and deprovisioning. The provisioning and deprovisioning states
//! fan out one provisioner call per pending resource and fold the results
//! through the response aggregators; the signalling states wrap a dispatcher
//! send in the progression engine the same way the negotiation manager does.

use super::driver::StateProcessor;
use super::ManagerSettings;
use crate::entity::{CorrelatedEntity, StatefulEntity, TransferProcess};
use crate::error::{CoreError, Result};
use crate::events::{EventPublisher, TransferObservable};
use crate::protocol::{
    new_message_id, ProtocolMessage, RemoteMessageDispatcher, TransferSignalKind,
    TransferSignalMessage,
};
use crate::provision::{
    DeprovisionResponsesHandler, ProvisionResponsesHandler, Provisioner, ResourceManifestGenerator,
};
use crate::retry::{Processed, ProgressionEngine, WorkOutcome};
use crate::state_machine::{StateMachineResult, TransferState};
use crate::store::{StatefulEntityStore, TransferProcessStore};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const MONITORED_STATES: [TransferState; 9] = [
    TransferState::Initial,
    TransferState::Provisioning,
    TransferState::Provisioned,
    TransferState::Starting,
    TransferState::Suspending,
    TransferState::Stopping,
    TransferState::Completing,
    TransferState::Terminating,
    TransferState::Deprovisioning,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleEvent {
    Initiated,
    Provisioned,
    Started,
    Suspended,
    Completed,
    Terminated,
    Deprovisioned,
}

pub struct TransferProcessManager {
    store: Arc<dyn TransferProcessStore>,
    dispatcher: Arc<dyn RemoteMessageDispatcher>,
    provisioner: Arc<dyn Provisioner>,
    manifest_generator: Arc<dyn ResourceManifestGenerator>,
    provision_handler: ProvisionResponsesHandler,
    deprovision_handler: DeprovisionResponsesHandler,
    engine: ProgressionEngine,
    observable: Arc<TransferObservable>,
    publisher: EventPublisher,
    settings: ManagerSettings,
}

impl TransferProcessManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn TransferProcessStore>,
        dispatcher: Arc<dyn RemoteMessageDispatcher>,
        provisioner: Arc<dyn Provisioner>,
        manifest_generator: Arc<dyn ResourceManifestGenerator>,
        engine: ProgressionEngine,
        vault: Arc<dyn crate::vault::Vault>,
        observable: Arc<TransferObservable>,
        publisher: EventPublisher,
        settings: ManagerSettings,
    ) -> Self {
        let provision_handler = ProvisionResponsesHandler::new(
            store.clone(),
            vault.clone(),
            observable.clone(),
            settings.owner_id.clone(),
        );
        let deprovision_handler = DeprovisionResponsesHandler::new(
            store.clone(),
            vault,
            observable.clone(),
            settings.owner_id.clone(),
        );
        Self {
            store,
            dispatcher,
            provisioner,
            manifest_generator,
            provision_handler,
            deprovision_handler,
            engine,
            observable,
            publisher,
            settings,
        }
    }

    /// Persist a freshly built transfer process and hand it to the polling loop
    pub async fn initiate(&self, process: TransferProcess) -> Result<String> {
        let id = process.id().to_string();
        self.store.create(process.clone()).await?;
        info!(process_id = %id, role = %process.role(), "Transfer process initiated");
        self.notify(&process, LifecycleEvent::Initiated);
        Ok(id)
    }

    /// Entry point for asynchronous provisioning completion callbacks
    pub async fn handle_provision_results(
        &self,
        process_id: &str,
        results: Vec<crate::provision::ProvisionResult>,
    ) -> Result<()> {
        self.provision_handler.handle(process_id, results).await
    }

    /// Entry point for asynchronous deprovisioning completion callbacks
    pub async fn handle_deprovision_results(
        &self,
        process_id: &str,
        results: Vec<crate::provision::DeprovisionResult>,
    ) -> Result<()> {
        self.deprovision_handler.handle(process_id, results).await
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
            for process in batch {
                let id = process.id().to_string();
                if let Err(err) = self.process_entity(state, process).await {
                    warn!(
                        process_id = %id,
                        state = %state,
                        error = %err,
                        "Failed to drive transfer process; releasing lease"
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
        state: TransferState,
        mut process: TransferProcess,
    ) -> Result<()> {
        match state {
            TransferState::Initial => match self.manifest_generator.generate(&process).await {
                Ok(manifest) if manifest.is_empty() => {
                    process.transition_provisioned()?;
                    self.store
                        .update(process.clone(), &self.settings.owner_id)
                        .await?;
                    self.notify(&process, LifecycleEvent::Provisioned);
                    Ok(())
                }
                Ok(manifest) => {
                    process.transition_provisioning(manifest)?;
                    self.store
                        .update(process, &self.settings.owner_id)
                        .await?;
                    Ok(())
                }
                Err(err) => self.fail_terminal(process, err.to_string()).await,
            },
            TransferState::Provisioning => self.drive_provisioning(process).await,
            TransferState::Provisioned => {
                match process.role() {
                    crate::entity::ParticipantRole::Provider => {
                        process.transition_starting()?;
                        self.store
                            .update(process, &self.settings.owner_id)
                            .await?;
                    }
                    // The consumer waits for the provider's start signal
                    crate::entity::ParticipantRole::Consumer => {
                        self.store
                            .release(process.id(), &self.settings.owner_id)
                            .await?;
                    }
                }
                Ok(())
            }
            TransferState::Starting => {
                let message = self.signal_message(&process, TransferSignalKind::Start, None);
                self.drive_send(
                    process,
                    message,
                    |p| p.transition_started(),
                    |p| p.transition_starting(),
                    LifecycleEvent::Started,
                )
                .await
            }
            TransferState::Suspending => {
                let reason = process.suspension_reason().unwrap_or("suspended").to_string();
                let message = self.signal_message(
                    &process,
                    TransferSignalKind::Suspension,
                    Some(reason.clone()),
                );
                self.drive_send(
                    process,
                    message,
                    |p| p.transition_suspended(),
                    move |p| p.transition_suspending(reason),
                    LifecycleEvent::Suspended,
                )
                .await
            }
            TransferState::Stopping => self.drive_stopping(process).await,
            TransferState::Completing => {
                let message = self.signal_message(&process, TransferSignalKind::Completion, None);
                self.drive_send(
                    process,
                    message,
                    |p| p.transition_completed(),
                    |p| p.transition_completing(),
                    LifecycleEvent::Completed,
                )
                .await
            }
            TransferState::Terminating => {
                let reason = process.error_detail().map(str::to_string);
                let message =
                    self.signal_message(&process, TransferSignalKind::Termination, reason);
                self.drive_send(
                    process,
                    message,
                    |p| p.transition_terminated(None),
                    |p| {
                        let reason = p.error_detail().unwrap_or("terminated").to_string();
                        p.transition_terminating(reason)
                    },
                    LifecycleEvent::Terminated,
                )
                .await
            }
            TransferState::Deprovisioning => self.drive_deprovisioning(process).await,
            other => Err(CoreError::Validation(format!(
                "state {other} is not driven by the transfer manager"
            ))),
        }
    }

    /// Fan out provisioner calls for every pending definition and fold the
    /// results through the aggregator, under the retry budget
    async fn drive_provisioning(&self, mut process: TransferProcess) -> Result<()> {
        let pending: Vec<_> = process
            .pending_definitions()
            .into_iter()
            .cloned()
            .collect();

        let outcome = self
            .engine
            .process(&process, || async {
                let results = join_all(
                    pending
                        .iter()
                        .map(|definition| self.provisioner.provision(&process, definition)),
                )
                .await;
                match self.provision_handler.handle(process.id(), results).await {
                    Ok(()) => WorkOutcome::Success,
                    Err(CoreError::Fatal(detail)) => WorkOutcome::Fatal(detail),
                    Err(err) => WorkOutcome::Retryable(err.to_string()),
                }
            })
            .await;

        match outcome {
            // The aggregator persisted the process and released the lease
            Processed::Succeeded => Ok(()),
            Processed::Deferred { .. } => {
                self.store
                    .release(process.id(), &self.settings.owner_id)
                    .await?;
                Ok(())
            }
            Processed::FailedRetryable { detail } => {
                warn!(
                    process_id = process.id(),
                    attempt = process.state_count(),
                    %detail,
                    "Provisioning pass failed; will retry"
                );
                let manifest = process.manifest().clone();
                process.transition_provisioning(manifest)?;
                process.set_error_detail(Some(detail));
                self.store
                    .update(process, &self.settings.owner_id)
                    .await?;
                Ok(())
            }
            Processed::FailedExhausted { detail } | Processed::FatalError { detail } => {
                self.fail_terminal(process, detail).await
            }
        }
    }

    /// Mirror of `drive_provisioning` for the deprovisioning leg
    async fn drive_deprovisioning(&self, mut process: TransferProcess) -> Result<()> {
        let pending: Vec<_> = process
            .pending_deprovisioning()
            .into_iter()
            .cloned()
            .collect();

        let outcome = self
            .engine
            .process(&process, || async {
                let results = join_all(
                    pending
                        .iter()
                        .map(|resource| self.provisioner.deprovision(&process, resource)),
                )
                .await;
                match self
                    .deprovision_handler
                    .handle(process.id(), results)
                    .await
                {
                    Ok(()) => WorkOutcome::Success,
                    Err(CoreError::Fatal(detail)) => WorkOutcome::Fatal(detail),
                    Err(err) => WorkOutcome::Retryable(err.to_string()),
                }
            })
            .await;

        match outcome {
            Processed::Succeeded => Ok(()),
            Processed::Deferred { .. } => {
                self.store
                    .release(process.id(), &self.settings.owner_id)
                    .await?;
                Ok(())
            }
            Processed::FailedRetryable { detail } => {
                warn!(
                    process_id = process.id(),
                    attempt = process.state_count(),
                    %detail,
                    "Deprovisioning pass failed; will retry"
                );
                process.transition_deprovisioning()?;
                process.set_error_detail(Some(detail));
                self.store
                    .update(process, &self.settings.owner_id)
                    .await?;
                Ok(())
            }
            Processed::FailedExhausted { detail } | Processed::FatalError { detail } => {
                process.transition_deprovisioned_with_error(detail)?;
                self.store
                    .update(process.clone(), &self.settings.owner_id)
                    .await?;
                self.notify(&process, LifecycleEvent::Deprovisioned);
                Ok(())
            }
        }
    }

    /// Resolve the staged follow-up transition recorded by
    /// `transition_stopping`
    async fn drive_stopping(&self, mut process: TransferProcess) -> Result<()> {
        let Some(subsequent) = process.stopping_subsequent() else {
            return self
                .fail_terminal(process, "stopping without a requested subsequent state".into())
                .await;
        };
        match subsequent {
            TransferState::Completing => process.transition_completing()?,
            TransferState::Terminating => {
                let reason = process.error_detail().unwrap_or("stopped").to_string();
                process.transition_terminating(reason)?;
            }
            TransferState::Suspending => {
                let reason = process.suspension_reason().unwrap_or("suspended").to_string();
                process.transition_suspending(reason)?;
            }
            other => {
                return self
                    .fail_terminal(
                        process,
                        format!("illegal staged transition to {other}"),
                    )
                    .await;
            }
        }
        self.store
            .update(process, &self.settings.owner_id)
            .await?;
        Ok(())
    }

    /// Send `message` under the retry budget, then apply the matching
    /// confirmed transition
    async fn drive_send<S, R>(
        &self,
        mut process: TransferProcess,
        message: ProtocolMessage,
        on_success: S,
        reenter: R,
        event: LifecycleEvent,
    ) -> Result<()>
    where
        S: FnOnce(&mut TransferProcess) -> StateMachineResult<()>,
        R: FnOnce(&mut TransferProcess) -> StateMachineResult<()>,
    {
        let outcome = self
            .engine
            .process(&process, || async {
                match self.dispatcher.dispatch(message).await {
                    Ok(()) => WorkOutcome::Success,
                    Err(failure) if failure.fatal => WorkOutcome::Fatal(failure.detail),
                    Err(failure) => WorkOutcome::Retryable(failure.detail),
                }
            })
            .await;

        match outcome {
            Processed::Succeeded => {
                process.set_error_detail(None);
                on_success(&mut process)?;
                self.store
                    .update(process.clone(), &self.settings.owner_id)
                    .await?;
                self.notify(&process, event);
                Ok(())
            }
            Processed::Deferred { .. } => {
                self.store
                    .release(process.id(), &self.settings.owner_id)
                    .await?;
                Ok(())
            }
            Processed::FailedRetryable { detail } => {
                warn!(
                    process_id = process.id(),
                    attempt = process.state_count(),
                    %detail,
                    "Send failed; will retry"
                );
                reenter(&mut process)?;
                process.set_error_detail(Some(detail));
                self.store
                    .update(process, &self.settings.owner_id)
                    .await?;
                Ok(())
            }
            Processed::FailedExhausted { detail } | Processed::FatalError { detail } => {
                self.fail_terminal(process, detail).await
            }
        }
    }

    /// Land the process in its terminal failure state with the detail attached
    async fn fail_terminal(&self, mut process: TransferProcess, detail: String) -> Result<()> {
        warn!(process_id = process.id(), %detail, "Transfer process failed terminally");
        let event = if process.state().can_be_terminated() {
            process.transition_terminated(Some(detail))?;
            LifecycleEvent::Terminated
        } else {
            process.transition_deprovisioned_with_error(detail)?;
            LifecycleEvent::Deprovisioned
        };
        self.store
            .update(process.clone(), &self.settings.owner_id)
            .await?;
        self.notify(&process, event);
        Ok(())
    }

    fn signal_message(
        &self,
        process: &TransferProcess,
        kind: TransferSignalKind,
        reason: Option<String>,
    ) -> ProtocolMessage {
        ProtocolMessage::TransferSignal(TransferSignalMessage {
            id: new_message_id(),
            process_id: process
                .correlation_id()
                .unwrap_or(process.id())
                .to_string(),
            counter_party_id: process.counter_party_id().to_string(),
            counter_party_address: process.counter_party_address().to_string(),
            protocol: process.protocol().to_string(),
            kind,
            reason,
        })
    }

    fn notify(&self, process: &TransferProcess, event: LifecycleEvent) {
        let name = match event {
            LifecycleEvent::Initiated => "initiated",
            LifecycleEvent::Provisioned => "provisioned",
            LifecycleEvent::Started => "started",
            LifecycleEvent::Suspended => "suspended",
            LifecycleEvent::Completed => "completed",
            LifecycleEvent::Terminated => "terminated",
            LifecycleEvent::Deprovisioned => "deprovisioned",
        };
        self.publisher
            .publish_entity_event("transfer", process.id(), name);
        self.observable.invoke_for_each(|listener| match event {
            LifecycleEvent::Initiated => listener.initiated(process),
            LifecycleEvent::Provisioned => listener.provisioned(process),
            LifecycleEvent::Started => listener.started(process),
            LifecycleEvent::Suspended => listener.suspended(process),
            LifecycleEvent::Completed => listener.completed(process),
            LifecycleEvent::Terminated => listener.terminated(process),
            LifecycleEvent::Deprovisioned => listener.deprovisioned(process),
        });
    }
}

#[async_trait]
impl StateProcessor for TransferProcessManager {
    fn name(&self) -> &str {
        "transfer-process"
    }

    async fn process_once(&self) -> Result<usize> {
        self.process_states_once().await
    }
}
