//! Secret vault collaborator.
//!
//! Secrets issued by provisioners are written at most once per successful
//! provisioning result and deleted at most once per successful
//! deprovisioning result, keyed by `(scope, key)` where the scope is the
//! participant context and the key the resource name.

use crate::error::{CoreError, Result};
use dashmap::DashMap;

pub trait Vault: Send + Sync {
    fn store_secret(&self, scope: &str, key: &str, value: &str) -> Result<()>;
    fn delete_secret(&self, scope: &str, key: &str) -> Result<()>;
    fn resolve_secret(&self, scope: &str, key: &str) -> Option<String>;
}

/// Process-local vault for embedded deployments and tests
#[derive(Debug, Default)]
pub struct InMemoryVault {
    secrets: DashMap<(String, String), String>,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl Vault for InMemoryVault {
    fn store_secret(&self, scope: &str, key: &str, value: &str) -> Result<()> {
        self.secrets
            .insert((scope.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn delete_secret(&self, scope: &str, key: &str) -> Result<()> {
        self.secrets
            .remove(&(scope.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound(format!("secret {scope}/{key}")))
    }

    fn resolve_secret(&self, scope: &str, key: &str) -> Option<String> {
        self.secrets
            .get(&(scope.to_string(), key.to_string()))
            .map(|entry| entry.clone())
    }
}
