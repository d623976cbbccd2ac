use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque pointer to data, described by a type discriminator plus free-form
/// properties. The core never interprets the properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAddress {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl DataAddress {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Usage policy attached to offers and agreements. Constraint evaluation is
/// delegated to the policy engine collaborator; the core treats the
/// constraint document as opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub assigner: Option<String>,
    pub assignee: Option<String>,
    pub target: Option<String>,
    #[serde(default)]
    pub constraints: serde_json::Value,
}

impl Policy {
    pub fn empty() -> Self {
        Self {
            assigner: None,
            assignee: None,
            target: None,
            constraints: serde_json::Value::Null,
        }
    }

    pub fn for_target(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::empty()
        }
    }
}

/// A contract offer exchanged during negotiation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractOffer {
    pub id: String,
    pub asset_id: String,
    pub policy: Policy,
}

/// The finalized agreement produced by a successful negotiation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractAgreement {
    pub id: String,
    pub provider_id: String,
    pub consumer_id: String,
    pub asset_id: String,
    pub policy: Policy,
    pub signed_at_ms: i64,
}

/// Endpoint a caller registered for lifecycle event callbacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackAddress {
    pub uri: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub transactional: bool,
}
