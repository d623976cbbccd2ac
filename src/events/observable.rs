//! Listener registries for entity lifecycle notifications.
//!
//! Notification is fire-and-forget: a panicking listener is logged and
//! isolated so it can never block the remaining listeners or the calling
//! manager.

use crate::entity::{ContractNegotiation, TransferProcess};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// Registry of listeners of type `L`
pub struct Observable<L: ?Sized> {
    listeners: RwLock<Vec<Arc<L>>>,
}

impl<L: ?Sized> Default for Observable<L> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<L: ?Sized> Observable<L> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<L>) {
        self.listeners.write().push(listener);
    }

    /// Invoke `f` for every registered listener, isolating panics
    pub fn invoke_for_each(&self, f: impl Fn(&L)) {
        let listeners: Vec<Arc<L>> = self.listeners.read().clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| f(&listener))).is_err() {
                error!("Entity event listener panicked; continuing with remaining listeners");
            }
        }
    }
}

/// Contract negotiation lifecycle listener; every hook defaults to a no-op
#[allow(unused_variables)]
pub trait NegotiationListener: Send + Sync {
    fn initiated(&self, negotiation: &ContractNegotiation) {}
    fn requested(&self, negotiation: &ContractNegotiation) {}
    fn offered(&self, negotiation: &ContractNegotiation) {}
    fn accepted(&self, negotiation: &ContractNegotiation) {}
    fn agreed(&self, negotiation: &ContractNegotiation) {}
    fn verified(&self, negotiation: &ContractNegotiation) {}
    fn finalized(&self, negotiation: &ContractNegotiation) {}
    fn terminated(&self, negotiation: &ContractNegotiation) {}
}

/// Transfer process lifecycle listener; every hook defaults to a no-op
#[allow(unused_variables)]
pub trait TransferProcessListener: Send + Sync {
    fn initiated(&self, process: &TransferProcess) {}
    fn provisioning_requested(&self, process: &TransferProcess) {}
    fn provisioned(&self, process: &TransferProcess) {}
    fn started(&self, process: &TransferProcess) {}
    fn suspended(&self, process: &TransferProcess) {}
    fn completed(&self, process: &TransferProcess) {}
    fn terminating(&self, process: &TransferProcess) {}
    fn terminated(&self, process: &TransferProcess) {}
    fn deprovisioning_requested(&self, process: &TransferProcess) {}
    fn deprovisioned(&self, process: &TransferProcess) {}
}

pub type NegotiationObservable = Observable<dyn NegotiationListener>;
pub type TransferObservable = Observable<dyn TransferProcessListener>;
