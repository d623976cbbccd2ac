use thiserror::Error;

/// Errors raised by entity state transitions.
///
/// An invalid transition is a programming-error-class failure: the caller
/// invoked a transition method outside its documented predecessor set. It is
/// treated as fatal by the progression engine and never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateMachineError {
    #[error("invalid transition for {entity_id}: {from} -> {to}")]
    InvalidTransition {
        entity_id: String,
        from: String,
        to: String,
    },

    #[error("transition {transition} is not legal for the {role} role")]
    IllegalRole { transition: String, role: String },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;

impl From<StateMachineError> for crate::error::CoreError {
    fn from(err: StateMachineError) -> Self {
        crate::error::CoreError::Fatal(err.to_string())
    }
}
