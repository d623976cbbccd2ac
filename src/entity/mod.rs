// Stateful entity model for the control-plane
//
// Entities are created in an unsaved initial state by a builder, persisted
// through the store, and afterwards mutated only through named transition
// methods. Direct state assignment is not exposed; the transition methods
// enforce the legal predecessor set and maintain the state-count/timestamp
// mechanics the retry engine depends on.

pub mod negotiation;
pub mod transfer;
pub mod types;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub use negotiation::{ContractNegotiation, ContractNegotiationBuilder};
pub use transfer::{TransferProcess, TransferProcessBuilder};
pub use types::{CallbackAddress, ContractAgreement, ContractOffer, DataAddress, Policy};

/// Role this instance plays in a negotiation or transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Consumer,
    Provider,
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Consumer => write!(f, "consumer"),
            Self::Provider => write!(f, "provider"),
        }
    }
}

/// Common surface of the persistent, lease-managed entities.
///
/// `state_count` is 1-based: the first entry into a state is attempt #1.
/// Re-entering the current state increments it; entering a different state
/// resets it. `state_timestamp_ms` is stamped on every transition and is the
/// base for retry eligibility and lease-fetch ordering.
pub trait StatefulEntity: Send + Sync {
    fn id(&self) -> &str;
    fn state_code(&self) -> i32;
    fn state_count(&self) -> u32;
    fn state_timestamp_ms(&self) -> i64;
    fn trace_context(&self) -> &HashMap<String, String>;
    fn error_detail(&self) -> Option<&str>;
}

/// Entities that carry the counter-party's local id for the same logical
/// process, enabling lookup by either side's identifier.
pub trait CorrelatedEntity: StatefulEntity {
    fn correlation_id(&self) -> Option<&str>;
}
