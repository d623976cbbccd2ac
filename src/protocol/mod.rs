// Protocol layer: message model, outbound dispatch seam, inbound application
//
// The dispatcher is the outbound boundary; HTTP plumbing and transport-level
// retry live behind it. The service module applies inbound messages to local
// entities idempotently.

pub mod messages;
pub mod service;

use async_trait::async_trait;

pub use messages::{
    new_message_id, ContractAgreementMessage, ContractEventMessage, ContractOfferMessage,
    ContractRequestMessage, ContractTerminationMessage, ContractVerificationMessage,
    NegotiationEventKind, ProtocolMessage, TransferSignalKind, TransferSignalMessage,
};
pub use service::NegotiationProtocolService;

/// Failure reported by the dispatcher for one send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchFailure {
    pub detail: String,
    /// True for malformed-by-construction failures that retrying cannot fix
    pub fatal: bool,
}

impl DispatchFailure {
    pub fn retryable(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            fatal: false,
        }
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            fatal: true,
        }
    }
}

/// Outbound message boundary.
///
/// Implementations are expected to be asynchronous and non-blocking from the
/// caller's perspective; the polling loop never waits on a slow transport
/// beyond this call.
#[async_trait]
pub trait RemoteMessageDispatcher: Send + Sync {
    async fn dispatch(&self, message: ProtocolMessage) -> Result<(), DispatchFailure>;
}
