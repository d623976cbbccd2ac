//! Identity verification collaborator.
//!
//! Every inbound protocol message carries a token; the verifier turns it
//! into a claim set or an unauthorized failure. Real implementations sit in
//! the identity extension layer; the static verifier here backs embedded
//! deployments and tests.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Claim identifying the calling participant
pub const PARTICIPANT_ID_CLAIM: &str = "client_id";

/// Opaque token as received from the counter-party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRepresentation {
    pub token: String,
}

impl TokenRepresentation {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

/// Verified claim set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimToken {
    pub claims: HashMap<String, String>,
}

impl ClaimToken {
    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }

    pub fn claim(&self, key: &str) -> Option<&str> {
        self.claims.get(key).map(String::as_str)
    }

    pub fn participant_id(&self) -> Option<&str> {
        self.claim(PARTICIPANT_ID_CLAIM)
    }
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &TokenRepresentation) -> Result<ClaimToken>;
}

/// Static token registry for embedded deployments and tests
#[derive(Debug, Default)]
pub struct StaticIdentityVerifier {
    tokens: RwLock<HashMap<String, ClaimToken>>,
}

impl StaticIdentityVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: impl Into<String>, claims: ClaimToken) {
        self.tokens.write().insert(token.into(), claims);
    }
}

#[async_trait]
impl IdentityVerifier for StaticIdentityVerifier {
    async fn verify(&self, token: &TokenRepresentation) -> Result<ClaimToken> {
        self.tokens
            .read()
            .get(&token.token)
            .cloned()
            .ok_or_else(|| CoreError::Unauthorized("unknown token".into()))
    }
}
