//! Policy engine collaborator seam.
//!
//! The core consumes constraint evaluation as `evaluate(scope, policy,
//! context)`; the policy language semantics live entirely behind this trait.

use crate::entity::Policy;
use crate::error::Result;
use std::collections::HashMap;

/// Evaluation context handed to the policy engine
#[derive(Debug, Clone, Default)]
pub struct PolicyContext {
    pub participant_id: String,
    pub attributes: HashMap<String, String>,
}

impl PolicyContext {
    pub fn for_participant(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            attributes: HashMap::new(),
        }
    }
}

pub trait PolicyEngine: Send + Sync {
    /// Evaluate `policy` under `scope`, returning the effective policy or a
    /// validation failure
    fn evaluate(&self, scope: &str, policy: &Policy, context: &PolicyContext) -> Result<Policy>;
}

/// Engine that admits every policy; the default for embedded deployments
/// where evaluation happens upstream
#[derive(Debug, Default)]
pub struct PermitAllPolicyEngine;

impl PolicyEngine for PermitAllPolicyEngine {
    fn evaluate(&self, _scope: &str, policy: &Policy, _context: &PolicyContext) -> Result<Policy> {
        Ok(policy.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permit_all_returns_policy_unchanged() {
        let engine = PermitAllPolicyEngine;
        let policy = Policy::for_target("asset-1");
        let result = engine
            .evaluate(
                "contract.negotiation",
                &policy,
                &PolicyContext::for_participant("consumer-1"),
            )
            .unwrap();
        assert_eq!(result, policy);
    }
}
