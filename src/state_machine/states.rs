use serde::{Deserialize, Serialize};
use std::fmt;

/// Contract negotiation state definitions, shared by consumer and provider.
///
/// The `*ing` states represent "about to send/act"; the `*ed` states are
/// confirmed, durable facts. Each state carries a stable integer code used
/// for persistence and for the lease-backed state polling queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    /// Initial state when the negotiation is created
    Initial,
    /// Consumer is about to send a contract request
    Requesting,
    /// Contract request confirmed by the counter-party
    Requested,
    /// Provider is about to send a contract offer
    Offering,
    /// Contract offer confirmed
    Offered,
    /// Consumer is about to accept the latest offer
    Accepting,
    /// Acceptance confirmed
    Accepted,
    /// Provider is about to send the agreement
    Agreeing,
    /// Agreement confirmed
    Agreed,
    /// Consumer is about to send the agreement verification
    Verifying,
    /// Agreement verification confirmed
    Verified,
    /// Provider is about to finalize the negotiation
    Finalizing,
    /// Negotiation finalized, agreement in force
    Finalized,
    /// Either party is about to terminate the negotiation
    Terminating,
    /// Negotiation terminated
    Terminated,
}

impl NegotiationState {
    /// Stable integer code for persistence and state polling
    pub fn code(&self) -> i32 {
        match self {
            Self::Initial => 50,
            Self::Requesting => 100,
            Self::Requested => 200,
            Self::Offering => 300,
            Self::Offered => 400,
            Self::Accepting => 700,
            Self::Accepted => 800,
            Self::Agreeing => 825,
            Self::Agreed => 850,
            Self::Verifying => 1050,
            Self::Verified => 1100,
            Self::Finalizing => 1150,
            Self::Finalized => 1200,
            Self::Terminating => 1300,
            Self::Terminated => 1400,
        }
    }

    /// Resolve a state from its persisted integer code
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            50 => Some(Self::Initial),
            100 => Some(Self::Requesting),
            200 => Some(Self::Requested),
            300 => Some(Self::Offering),
            400 => Some(Self::Offered),
            700 => Some(Self::Accepting),
            800 => Some(Self::Accepted),
            825 => Some(Self::Agreeing),
            850 => Some(Self::Agreed),
            1050 => Some(Self::Verifying),
            1100 => Some(Self::Verified),
            1150 => Some(Self::Finalizing),
            1200 => Some(Self::Finalized),
            1300 => Some(Self::Terminating),
            1400 => Some(Self::Terminated),
            _ => None,
        }
    }

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Terminated)
    }

    /// Check if a termination may still be initiated from this state
    pub fn can_be_terminated(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Requesting => write!(f, "requesting"),
            Self::Requested => write!(f, "requested"),
            Self::Offering => write!(f, "offering"),
            Self::Offered => write!(f, "offered"),
            Self::Accepting => write!(f, "accepting"),
            Self::Accepted => write!(f, "accepted"),
            Self::Agreeing => write!(f, "agreeing"),
            Self::Agreed => write!(f, "agreed"),
            Self::Verifying => write!(f, "verifying"),
            Self::Verified => write!(f, "verified"),
            Self::Finalizing => write!(f, "finalizing"),
            Self::Finalized => write!(f, "finalized"),
            Self::Terminating => write!(f, "terminating"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

impl std::str::FromStr for NegotiationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(Self::Initial),
            "requesting" => Ok(Self::Requesting),
            "requested" => Ok(Self::Requested),
            "offering" => Ok(Self::Offering),
            "offered" => Ok(Self::Offered),
            "accepting" => Ok(Self::Accepting),
            "accepted" => Ok(Self::Accepted),
            "agreeing" => Ok(Self::Agreeing),
            "agreed" => Ok(Self::Agreed),
            "verifying" => Ok(Self::Verifying),
            "verified" => Ok(Self::Verified),
            "finalizing" => Ok(Self::Finalizing),
            "finalized" => Ok(Self::Finalized),
            "terminating" => Ok(Self::Terminating),
            "terminated" => Ok(Self::Terminated),
            _ => Err(format!("Invalid negotiation state: {s}")),
        }
    }
}

impl Default for NegotiationState {
    fn default() -> Self {
        Self::Initial
    }
}

/// Transfer process state definitions.
///
/// The provisioning and deprovisioning legs each have a `*_requested`
/// intermediate for resources that are still provisioning asynchronously
/// upstream. `Stopping` is a provider-only staging state entered while a
/// subsequent completing/terminating/suspending transition is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// Initial state when the transfer process is created
    Initial,
    /// Resources from the manifest are being provisioned
    Provisioning,
    /// At least one resource is provisioning asynchronously upstream
    ProvisioningRequested,
    /// Every manifest resource is provisioned
    Provisioned,
    /// Provider is about to signal transfer start
    Starting,
    /// Transfer is running
    Started,
    /// Either party is about to suspend the transfer
    Suspending,
    /// Transfer suspended, resumable via starting
    Suspended,
    /// Provider-only staging state before completing, terminating or suspending
    Stopping,
    /// Either party is about to signal completion
    Completing,
    /// Transfer completed
    Completed,
    /// Either party is about to terminate the transfer
    Terminating,
    /// Transfer terminated
    Terminated,
    /// Provisioned resources are being released
    Deprovisioning,
    /// At least one resource is deprovisioning asynchronously upstream
    DeprovisioningRequested,
    /// Every provisioned resource is released
    Deprovisioned,
}

impl TransferState {
    /// Stable integer code for persistence and state polling
    pub fn code(&self) -> i32 {
        match self {
            Self::Initial => 100,
            Self::Provisioning => 200,
            Self::ProvisioningRequested => 250,
            Self::Provisioned => 300,
            Self::Starting => 400,
            Self::Started => 500,
            Self::Suspending => 550,
            Self::Suspended => 600,
            Self::Stopping => 650,
            Self::Completing => 700,
            Self::Completed => 800,
            Self::Terminating => 825,
            Self::Terminated => 850,
            Self::Deprovisioning => 900,
            Self::DeprovisioningRequested => 950,
            Self::Deprovisioned => 1000,
        }
    }

    /// Resolve a state from its persisted integer code
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            100 => Some(Self::Initial),
            200 => Some(Self::Provisioning),
            250 => Some(Self::ProvisioningRequested),
            300 => Some(Self::Provisioned),
            400 => Some(Self::Starting),
            500 => Some(Self::Started),
            550 => Some(Self::Suspending),
            600 => Some(Self::Suspended),
            650 => Some(Self::Stopping),
            700 => Some(Self::Completing),
            800 => Some(Self::Completed),
            825 => Some(Self::Terminating),
            850 => Some(Self::Terminated),
            900 => Some(Self::Deprovisioning),
            950 => Some(Self::DeprovisioningRequested),
            1000 => Some(Self::Deprovisioned),
            _ => None,
        }
    }

    /// Check if this is the final state (nothing left to release)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deprovisioned)
    }

    /// Check if the data exchange itself has ended (deprovisioning may follow)
    pub fn is_ended(&self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::Terminated
                | Self::Deprovisioning
                | Self::DeprovisioningRequested
                | Self::Deprovisioned
        )
    }

    /// Check if a termination may still be initiated from this state
    pub fn can_be_terminated(&self) -> bool {
        !self.is_ended()
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::ProvisioningRequested => write!(f, "provisioning_requested"),
            Self::Provisioned => write!(f, "provisioned"),
            Self::Starting => write!(f, "starting"),
            Self::Started => write!(f, "started"),
            Self::Suspending => write!(f, "suspending"),
            Self::Suspended => write!(f, "suspended"),
            Self::Stopping => write!(f, "stopping"),
            Self::Completing => write!(f, "completing"),
            Self::Completed => write!(f, "completed"),
            Self::Terminating => write!(f, "terminating"),
            Self::Terminated => write!(f, "terminated"),
            Self::Deprovisioning => write!(f, "deprovisioning"),
            Self::DeprovisioningRequested => write!(f, "deprovisioning_requested"),
            Self::Deprovisioned => write!(f, "deprovisioned"),
        }
    }
}

impl std::str::FromStr for TransferState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(Self::Initial),
            "provisioning" => Ok(Self::Provisioning),
            "provisioning_requested" => Ok(Self::ProvisioningRequested),
            "provisioned" => Ok(Self::Provisioned),
            "starting" => Ok(Self::Starting),
            "started" => Ok(Self::Started),
            "suspending" => Ok(Self::Suspending),
            "suspended" => Ok(Self::Suspended),
            "stopping" => Ok(Self::Stopping),
            "completing" => Ok(Self::Completing),
            "completed" => Ok(Self::Completed),
            "terminating" => Ok(Self::Terminating),
            "terminated" => Ok(Self::Terminated),
            "deprovisioning" => Ok(Self::Deprovisioning),
            "deprovisioning_requested" => Ok(Self::DeprovisioningRequested),
            "deprovisioned" => Ok(Self::Deprovisioned),
            _ => Err(format!("Invalid transfer state: {s}")),
        }
    }
}

impl Default for TransferState {
    fn default() -> Self {
        Self::Initial
    }
}
