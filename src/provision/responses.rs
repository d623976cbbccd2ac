//! # Provisioning Response Aggregators
//!
//! Resources are provisioned and released as a unit from the caller's
//! perspective: a transfer process must not look provisioned until every
//! manifest entry is ready, yet one slow asynchronous resource must not
//! block progress reporting for the rest. The handlers therefore fold N
//! sub-results into exactly one state transition, merging failures into a
//! single composite detail instead of reporting them one by one.
//!
//! Handlers fetch the target process through the lease gate, so aggregation
//! composes with the polling loop and with concurrent callbacks for the same
//! process.

use super::{DeprovisionResult, ProvisionResult};
use crate::entity::{ParticipantRole, StatefulEntity, TransferProcess};
use crate::error::Result;
use crate::events::TransferObservable;
use crate::state_machine::TransferState;
use crate::store::{StatefulEntityStore, TransferProcessStore};
use crate::vault::Vault;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Lifecycle event produced by one aggregation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregateEvent {
    Provisioned,
    ProvisioningRequested,
    Terminating,
    Terminated,
    Deprovisioned,
    DeprovisioningRequested,
    None,
}

/// Folds asynchronous provisioning results into one transition
pub struct ProvisionResponsesHandler {
    store: Arc<dyn TransferProcessStore>,
    vault: Arc<dyn Vault>,
    observable: Arc<TransferObservable>,
    owner_id: String,
}

impl ProvisionResponsesHandler {
    pub fn new(
        store: Arc<dyn TransferProcessStore>,
        vault: Arc<dyn Vault>,
        observable: Arc<TransferObservable>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            vault,
            observable,
            owner_id: owner_id.into(),
        }
    }

    /// Apply a batch of provisioning results to the process
    #[instrument(skip(self, results), fields(owner_id = %self.owner_id))]
    pub async fn handle(&self, process_id: &str, results: Vec<ProvisionResult>) -> Result<()> {
        let mut process = self
            .store
            .find_by_id_and_lease(process_id, &self.owner_id)
            .await?;

        // Late or duplicate callbacks for an already-advanced process are a no-op
        if process.state().code() > TransferState::Provisioned.code() {
            debug!(
                process_id,
                state = %process.state(),
                "Ignoring provisioning results for already-advanced process"
            );
            self.store.release(process_id, &self.owner_id).await?;
            return Ok(());
        }

        let mut failures: Vec<String> = Vec::new();
        for result in &results {
            match result {
                ProvisionResult::Failed {
                    resource_definition_id,
                    detail,
                    ..
                } => failures.push(format!("{resource_definition_id}: {detail}")),
                ProvisionResult::Ok(response) => {
                    if let Some(secret) = &response.secret_token {
                        self.vault.store_secret(
                            process.participant_context_id(),
                            &response.resource.name,
                            &secret.value,
                        )?;
                    }
                }
            }
        }

        if !failures.is_empty() {
            let detail = format!("provisioning failed: {}", failures.join("; "));
            warn!(process_id, %detail, "Aborting transfer after provisioning failures");
            let event = match process.role() {
                ParticipantRole::Provider => {
                    process.transition_terminating(detail)?;
                    AggregateEvent::Terminating
                }
                ParticipantRole::Consumer => {
                    process.transition_terminated(Some(detail))?;
                    AggregateEvent::Terminated
                }
            };
            self.persist_and_notify(process, event).await?;
            return Ok(());
        }

        let mut any_in_process = false;
        for result in results {
            if let ProvisionResult::Ok(response) = result {
                if response.in_process {
                    any_in_process = true;
                    continue;
                }
                if let Some(address) = response.resource.data_address.clone() {
                    process.apply_data_address(address);
                }
                process.add_provisioned_resource(response.resource);
            }
        }

        let event = if process.provisioning_complete() {
            process.transition_provisioned()?;
            AggregateEvent::Provisioned
        } else if any_in_process {
            process.transition_provisioning_requested()?;
            AggregateEvent::ProvisioningRequested
        } else {
            // More synchronous responses expected; state stays put
            AggregateEvent::None
        };

        self.persist_and_notify(process, event).await
    }

    async fn persist_and_notify(
        &self,
        process: TransferProcess,
        event: AggregateEvent,
    ) -> Result<()> {
        self.store.update(process.clone(), &self.owner_id).await?;
        notify(&self.observable, &process, event);
        Ok(())
    }
}

/// Folds asynchronous deprovisioning results into one transition; the
/// structural mirror of [`ProvisionResponsesHandler`]
pub struct DeprovisionResponsesHandler {
    store: Arc<dyn TransferProcessStore>,
    vault: Arc<dyn Vault>,
    observable: Arc<TransferObservable>,
    owner_id: String,
}

impl DeprovisionResponsesHandler {
    pub fn new(
        store: Arc<dyn TransferProcessStore>,
        vault: Arc<dyn Vault>,
        observable: Arc<TransferObservable>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            vault,
            observable,
            owner_id: owner_id.into(),
        }
    }

    /// Apply a batch of deprovisioning results to the process
    #[instrument(skip(self, results), fields(owner_id = %self.owner_id))]
    pub async fn handle(&self, process_id: &str, results: Vec<DeprovisionResult>) -> Result<()> {
        let mut process = self
            .store
            .find_by_id_and_lease(process_id, &self.owner_id)
            .await?;

        if process.state() == TransferState::Deprovisioned {
            debug!(process_id, "Ignoring deprovisioning results for released process");
            self.store.release(process_id, &self.owner_id).await?;
            return Ok(());
        }

        // Only fatal failures abort the leg; transient ones are re-driven
        let failures: Vec<String> = results
            .iter()
            .filter_map(|result| match result {
                DeprovisionResult::Failed {
                    provisioned_resource_id,
                    detail,
                    fatal: true,
                } => Some(format!("{provisioned_resource_id}: {detail}")),
                _ => None,
            })
            .collect();

        if !failures.is_empty() {
            let detail = format!("deprovisioning failed: {}", failures.join("; "));
            warn!(process_id, %detail, "Recording deprovisioning failure");
            process.transition_deprovisioned_with_error(detail)?;
            self.persist_and_notify(process, AggregateEvent::Deprovisioned)
                .await?;
            return Ok(());
        }

        let mut any_in_process = false;
        let mut any_folded = false;
        for result in results {
            if let DeprovisionResult::Ok(resource) = result {
                if resource.in_process {
                    any_in_process = true;
                    continue;
                }
                any_folded = true;
                if let Some(provisioned) = process.provisioned_resource(&resource.provisioned_resource_id)
                {
                    let name = provisioned.name.clone();
                    let scope = process.participant_context_id().to_string();
                    if self.vault.delete_secret(&scope, &name).is_err() {
                        // The provisioner never issued a secret for this resource
                        debug!(process_id, resource = %name, "No secret to delete");
                    }
                }
                process.add_deprovisioned_resource(resource);
            }
        }

        let event = if process.deprovision_complete() {
            process.transition_deprovisioned()?;
            AggregateEvent::Deprovisioned
        } else if any_in_process || any_folded {
            // Partial progress: the remaining resources are still pending upstream
            process.transition_deprovisioning_requested()?;
            AggregateEvent::DeprovisioningRequested
        } else {
            AggregateEvent::None
        };

        self.persist_and_notify(process, event).await
    }

    async fn persist_and_notify(
        &self,
        process: TransferProcess,
        event: AggregateEvent,
    ) -> Result<()> {
        self.store.update(process.clone(), &self.owner_id).await?;
        notify(&self.observable, &process, event);
        Ok(())
    }
}

fn notify(observable: &TransferObservable, process: &TransferProcess, event: AggregateEvent) {
    match event {
        AggregateEvent::Provisioned => {
            info!(process_id = process.id(), "Transfer process provisioned");
            observable.invoke_for_each(|listener| listener.provisioned(process));
        }
        AggregateEvent::ProvisioningRequested => {
            observable.invoke_for_each(|listener| listener.provisioning_requested(process));
        }
        AggregateEvent::Terminating => {
            observable.invoke_for_each(|listener| listener.terminating(process));
        }
        AggregateEvent::Terminated => {
            observable.invoke_for_each(|listener| listener.terminated(process));
        }
        AggregateEvent::Deprovisioned => {
            info!(process_id = process.id(), "Transfer process deprovisioned");
            observable.invoke_for_each(|listener| listener.deprovisioned(process));
        }
        AggregateEvent::DeprovisioningRequested => {
            observable.invoke_for_each(|listener| listener.deprovisioning_requested(process));
        }
        AggregateEvent::None => {}
    }
}
