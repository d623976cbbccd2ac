//! Protocol message model.
//!
//! Wire-format (de)serialization lives in the transform layer; the core only
//! sees these already-decoded shapes. Every message carries its own unique
//! `id`, which doubles as the idempotency key for inbound application, and a
//! `process_id` referencing the receiver's local entity.

use crate::entity::types::{CallbackAddress, ContractAgreement, ContractOffer};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Consumer-initiated contract request. `process_id` is empty on the very
/// first message of an exchange; the provider then creates its own entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRequestMessage {
    pub id: String,
    pub process_id: Option<String>,
    /// The consumer's local id for this negotiation
    pub consumer_pid: String,
    pub counter_party_id: String,
    pub counter_party_address: String,
    pub protocol: String,
    pub offer: ContractOffer,
    #[serde(default)]
    pub callback_addresses: Vec<CallbackAddress>,
}

/// Provider counter-offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractOfferMessage {
    pub id: String,
    pub process_id: String,
    pub counter_party_id: String,
    pub counter_party_address: String,
    pub protocol: String,
    pub offer: ContractOffer,
}

/// Provider-issued agreement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractAgreementMessage {
    pub id: String,
    pub process_id: String,
    pub counter_party_id: String,
    pub counter_party_address: String,
    pub protocol: String,
    pub agreement: ContractAgreement,
}

/// Consumer confirmation that the agreement was received and checked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractVerificationMessage {
    pub id: String,
    pub process_id: String,
    pub counter_party_id: String,
    pub counter_party_address: String,
    pub protocol: String,
}

/// Negotiation event kinds carried by [`ContractEventMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationEventKind {
    Accepted,
    Finalized,
}

/// Counter-party notification of a confirmed lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractEventMessage {
    pub id: String,
    pub process_id: String,
    pub counter_party_id: String,
    pub counter_party_address: String,
    pub protocol: String,
    pub kind: NegotiationEventKind,
}

/// Negotiation termination notice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractTerminationMessage {
    pub id: String,
    pub process_id: String,
    pub counter_party_id: String,
    pub counter_party_address: String,
    pub protocol: String,
    pub reason: Option<String>,
}

/// Transfer lifecycle signals sent to the counter-party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferSignalKind {
    Start,
    Completion,
    Suspension,
    Termination,
}

/// Outbound transfer lifecycle message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferSignalMessage {
    pub id: String,
    pub process_id: String,
    pub counter_party_id: String,
    pub counter_party_address: String,
    pub protocol: String,
    pub kind: TransferSignalKind,
    pub reason: Option<String>,
}

/// Union of all protocol messages handed to the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum ProtocolMessage {
    ContractRequest(ContractRequestMessage),
    ContractOffer(ContractOfferMessage),
    ContractAgreement(ContractAgreementMessage),
    ContractVerification(ContractVerificationMessage),
    ContractEvent(ContractEventMessage),
    ContractTermination(ContractTerminationMessage),
    TransferSignal(TransferSignalMessage),
}

impl ProtocolMessage {
    /// The message's own unique id
    pub fn id(&self) -> &str {
        match self {
            Self::ContractRequest(m) => &m.id,
            Self::ContractOffer(m) => &m.id,
            Self::ContractAgreement(m) => &m.id,
            Self::ContractVerification(m) => &m.id,
            Self::ContractEvent(m) => &m.id,
            Self::ContractTermination(m) => &m.id,
            Self::TransferSignal(m) => &m.id,
        }
    }

    /// Address of the receiving counter-party
    pub fn counter_party_address(&self) -> &str {
        match self {
            Self::ContractRequest(m) => &m.counter_party_address,
            Self::ContractOffer(m) => &m.counter_party_address,
            Self::ContractAgreement(m) => &m.counter_party_address,
            Self::ContractVerification(m) => &m.counter_party_address,
            Self::ContractEvent(m) => &m.counter_party_address,
            Self::ContractTermination(m) => &m.counter_party_address,
            Self::TransferSignal(m) => &m.counter_party_address,
        }
    }
}

/// Fresh message id
pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::types::Policy;

    #[test]
    fn test_protocol_message_accessors() {
        let message = ProtocolMessage::ContractRequest(ContractRequestMessage {
            id: "msg-1".to_string(),
            process_id: None,
            consumer_pid: "consumer-pid-1".to_string(),
            counter_party_id: "consumer-1".to_string(),
            counter_party_address: "https://consumer.example.com/dsp".to_string(),
            protocol: "dataspace-protocol-http".to_string(),
            offer: ContractOffer {
                id: "offer-1".to_string(),
                asset_id: "asset-1".to_string(),
                policy: Policy::for_target("asset-1"),
            },
            callback_addresses: Vec::new(),
        });

        assert_eq!(message.id(), "msg-1");
        assert_eq!(
            message.counter_party_address(),
            "https://consumer.example.com/dsp"
        );
    }

    #[test]
    fn test_message_serde_tagging() {
        let message = ProtocolMessage::ContractEvent(ContractEventMessage {
            id: "msg-2".to_string(),
            process_id: "n-1".to_string(),
            counter_party_id: "provider-1".to_string(),
            counter_party_address: "https://provider.example.com/dsp".to_string(),
            protocol: "dataspace-protocol-http".to_string(),
            kind: NegotiationEventKind::Finalized,
        });

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["message_type"], "contract_event");
        assert_eq!(json["kind"], "finalized");
    }
}
