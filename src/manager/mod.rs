// Entity managers and the polling loop
//
// Each running instance drives its own polling loop: lease a batch of
// entities per monitored state, run the retry-driven progression over each,
// persist the result. Out-of-band mutations (protocol messages, commands)
// enter the same entities through the same lease gate, so the loops compose
// safely with them.

pub mod driver;
pub mod negotiation;
pub mod transfer;

pub use driver::{StateDriver, StateProcessor};
pub use negotiation::ContractNegotiationManager;
pub use transfer::TransferProcessManager;

/// Immutable per-instance settings shared by the managers
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Lease owner identity of this runner instance
    pub owner_id: String,
    /// This connector's participant id, recorded in issued agreements
    pub participant_id: String,
    /// Entities leased per state per poll cycle
    pub batch_size: usize,
}

impl ManagerSettings {
    pub fn new(
        owner_id: impl Into<String>,
        participant_id: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            participant_id: participant_id.into(),
            batch_size,
        }
    }
}
