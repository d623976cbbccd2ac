// State machine module for the control-plane entities
//
// Provides the negotiation and transfer process state enums with their stable
// integer codes, plus the transition error types. The transition methods
// themselves live on the entities; legality is enforced per method against a
// documented predecessor set.

pub mod errors;
pub mod states;

// Re-export main types for convenient access
pub use errors::{StateMachineError, StateMachineResult};
pub use states::{NegotiationState, TransferState};
