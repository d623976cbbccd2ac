#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Covenant Core
//!
//! Rust core of a dataspace control-plane: long-running contract
//! negotiations and transfer processes that survive restarts and run
//! correctly across horizontally-scaled instances sharing one store. Remote
//! counter-parties interoperate over an asynchronous, at-least-once
//! protocol.
//!
//! ## Architecture
//!
//! Each running instance drives a polling loop that leases a batch of
//! entities per monitored state, runs the retry-driven progression engine
//! over each, and persists the result. Leasing is the sole mutual-exclusion
//! mechanism: it self-heals on crash because an orphaned lease simply
//! expires. Inbound protocol messages and out-of-band commands mutate the
//! same entities through the same lease gate.
//!
//! ## Module Organization
//!
//! - [`entity`] - Stateful entities, builders and transition methods
//! - [`state_machine`] - State enums, codes and transition errors
//! - [`store`] - Lease-backed store contract and the in-memory implementation
//! - [`retry`] - Wait strategies and the progression engine
//! - [`provision`] - Resource manifests, provisioner seam, response aggregators
//! - [`protocol`] - Message model, dispatcher seam, idempotent inbound application
//! - [`commands`] - Bounded command queue and runner
//! - [`manager`] - Per-entity managers and the polling loop driver
//! - [`events`] - Listener registries and the broadcast event publisher
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust
//! use covenant_core::entity::{ContractNegotiation, ParticipantRole};
//! use covenant_core::store::{InMemoryNegotiationStore, StatefulEntityStore};
//!
//! # async fn example() -> covenant_core::Result<()> {
//! let store = InMemoryNegotiationStore::default();
//!
//! let negotiation = ContractNegotiation::builder()
//!     .role(ParticipantRole::Consumer)
//!     .counter_party_id("provider-1")
//!     .counter_party_address("https://provider.example.com/dsp")
//!     .protocol("dataspace-protocol-http")
//!     .build()?;
//!
//! store.create(negotiation).await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod commands;
pub mod config;
pub mod entity;
pub mod error;
pub mod events;
pub mod identity;
pub mod logging;
pub mod manager;
pub mod policy;
pub mod protocol;
pub mod provision;
pub mod retry;
pub mod state_machine;
pub mod store;
pub mod vault;

pub use config::CoreConfig;
pub use error::{CoreError, Result};
