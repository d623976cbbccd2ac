// Provisioning model and collaborator seams
//
// A transfer process carries a resource manifest: the ordered list of
// resources that must exist before the transfer may start. Provisioners are
// external collaborators invoked once per definition; their asynchronous
// results are folded back into the process by the response handlers.

pub mod responses;

use crate::entity::types::DataAddress;
use crate::entity::TransferProcess;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use responses::{DeprovisionResponsesHandler, ProvisionResponsesHandler};

/// A single resource that must be provisioned before the transfer starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub id: String,
    /// Human-readable name, also the vault key for the issued secret
    pub name: String,
    /// Provisioner-specific type discriminator
    pub kind: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Declarative list of provisioning steps required before a transfer may start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceManifest {
    pub definitions: Vec<ResourceDefinition>,
}

impl ResourceManifest {
    pub fn new(definitions: Vec<ResourceDefinition>) -> Self {
        Self { definitions }
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// A resource that has been provisioned for a transfer process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    pub id: String,
    /// The manifest definition this resource satisfies
    pub resource_definition_id: String,
    pub name: String,
    /// Address of the provisioned data endpoint, if the resource created one
    pub data_address: Option<DataAddress>,
}

/// Record of a released resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeprovisionedResource {
    pub provisioned_resource_id: String,
    #[serde(default)]
    pub in_process: bool,
}

/// Secret issued alongside a provisioned resource, stored in the vault keyed
/// by `(participant_context_id, resource_name)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretToken {
    pub value: String,
}

/// Successful provisioning output for one resource definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionResponse {
    pub resource: ProvisionedResource,
    pub secret_token: Option<SecretToken>,
    /// True when provisioning continues asynchronously upstream; the
    /// completed resource arrives through a later callback
    #[serde(default)]
    pub in_process: bool,
}

/// Outcome of provisioning one resource definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProvisionResult {
    Ok(ProvisionResponse),
    Failed {
        resource_definition_id: String,
        detail: String,
        fatal: bool,
    },
}

/// Outcome of releasing one provisioned resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeprovisionResult {
    Ok(DeprovisionedResource),
    Failed {
        provisioned_resource_id: String,
        detail: String,
        fatal: bool,
    },
}

/// External collaborator that provisions and releases resources.
///
/// Implementations classify their own failures: a `Failed` result with
/// `fatal: true` aborts the transfer; transport-level trouble should be
/// retried inside the provisioner or surfaced as non-fatal.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(
        &self,
        process: &TransferProcess,
        definition: &ResourceDefinition,
    ) -> ProvisionResult;

    async fn deprovision(
        &self,
        process: &TransferProcess,
        resource: &ProvisionedResource,
    ) -> DeprovisionResult;
}

/// External collaborator producing the manifest for a transfer process
#[async_trait]
pub trait ResourceManifestGenerator: Send + Sync {
    async fn generate(&self, process: &TransferProcess) -> crate::Result<ResourceManifest>;
}
