//! # Command Queue & Runner
//!
//! Bounded FIFO of out-of-band mutation requests, drained from the same
//! polling cadence that drives the state loops. Commands are fire-and-forget:
//! a handler that reports "not applicable" drops the command without retry,
//! and queue overflow is a caller-visible failure rather than silent loss.

use crate::entity::{ContractNegotiation, TransferProcess};
use crate::error::{CoreError, Result};
use crate::manager::StateProcessor;
use crate::state_machine::TransferState;
use crate::store::{ContractNegotiationStore, StatefulEntityStore, TransferProcessStore};
use async_trait::async_trait;
use chrono::Utc;
use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Requested out-of-band mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandKind {
    TerminateNegotiation { reason: String },
    TerminateTransfer { reason: String },
    SuspendTransfer { reason: String },
    ResumeTransfer,
    CompleteTransfer,
}

impl CommandKind {
    /// Registry key for handler dispatch
    pub fn tag(&self) -> CommandTag {
        match self {
            Self::TerminateNegotiation { .. } => CommandTag::TerminateNegotiation,
            Self::TerminateTransfer { .. } => CommandTag::TerminateTransfer,
            Self::SuspendTransfer { .. } => CommandTag::SuspendTransfer,
            Self::ResumeTransfer => CommandTag::ResumeTransfer,
            Self::CompleteTransfer => CommandTag::CompleteTransfer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandTag {
    TerminateNegotiation,
    TerminateTransfer,
    SuspendTransfer,
    ResumeTransfer,
    CompleteTransfer,
}

/// A command targeting one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCommand {
    pub id: String,
    pub entity_id: String,
    pub kind: CommandKind,
    pub submitted_at_ms: i64,
}

impl EntityCommand {
    pub fn new(entity_id: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entity_id: entity_id.into(),
            kind,
            submitted_at_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// Bounded FIFO of pending commands
pub struct CommandQueue {
    queue: ArrayQueue<EntityCommand>,
    capacity: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            capacity,
        }
    }

    /// Submit a command; returns immediately. Overflow is surfaced to the
    /// caller instead of growing without bound.
    pub fn enqueue(&self, command: EntityCommand) -> Result<()> {
        self.queue.push(command).map_err(|_| CoreError::QueueFull {
            capacity: self.capacity,
        })
    }

    /// Dequeue up to `max` commands
    pub fn drain(&self, max: usize) -> Vec<EntityCommand> {
        let mut drained = Vec::new();
        while drained.len() < max {
            match self.queue.pop() {
                Some(command) => drained.push(command),
                None => break,
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Handler resolved from the tag-keyed registry. Returning `false` signals
/// "not applicable from the current state": the entity is left untouched and
/// the command dropped.
pub enum CommandHandler {
    Negotiation(Box<dyn Fn(&mut ContractNegotiation, &EntityCommand) -> bool + Send + Sync>),
    Transfer(Box<dyn Fn(&mut TransferProcess, &EntityCommand) -> bool + Send + Sync>),
}

/// Drains the queue and applies commands through the lease gate
pub struct CommandRunner {
    queue: Arc<CommandQueue>,
    negotiation_store: Arc<dyn ContractNegotiationStore>,
    transfer_store: Arc<dyn TransferProcessStore>,
    handlers: HashMap<CommandTag, CommandHandler>,
    owner_id: String,
    batch_size: usize,
}

impl CommandRunner {
    pub fn new(
        queue: Arc<CommandQueue>,
        negotiation_store: Arc<dyn ContractNegotiationStore>,
        transfer_store: Arc<dyn TransferProcessStore>,
        owner_id: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        let mut runner = Self {
            queue,
            negotiation_store,
            transfer_store,
            handlers: HashMap::new(),
            owner_id: owner_id.into(),
            batch_size,
        };
        runner.register_default_handlers();
        runner
    }

    /// Replace or add a handler for one command tag
    pub fn register(&mut self, tag: CommandTag, handler: CommandHandler) {
        self.handlers.insert(tag, handler);
    }

    /// Drain one batch and apply each command. Per-command failures are
    /// logged and dropped; commands are never retried by this engine.
    #[instrument(skip(self), fields(owner_id = %self.owner_id))]
    pub async fn run_once(&self) -> usize {
        let commands = self.queue.drain(self.batch_size);
        let mut applied = 0;
        for command in commands {
            match self.dispatch(&command).await {
                Ok(true) => applied += 1,
                Ok(false) => {
                    debug!(
                        command_id = %command.id,
                        entity_id = %command.entity_id,
                        "Command not applicable from current state; dropped"
                    );
                }
                Err(err) => {
                    warn!(
                        command_id = %command.id,
                        entity_id = %command.entity_id,
                        error = %err,
                        "Dropping failed command"
                    );
                }
            }
        }
        applied
    }

    async fn dispatch(&self, command: &EntityCommand) -> Result<bool> {
        let handler = self
            .handlers
            .get(&command.kind.tag())
            .ok_or_else(|| CoreError::Validation(format!("no handler for {:?}", command.kind)))?;

        match handler {
            CommandHandler::Negotiation(apply) => {
                let mut entity = self
                    .negotiation_store
                    .find_by_id_and_lease(&command.entity_id, &self.owner_id)
                    .await?;
                if apply(&mut entity, command) {
                    self.negotiation_store
                        .update(entity, &self.owner_id)
                        .await?;
                    Ok(true)
                } else {
                    self.negotiation_store
                        .release(&command.entity_id, &self.owner_id)
                        .await?;
                    Ok(false)
                }
            }
            CommandHandler::Transfer(apply) => {
                let mut entity = self
                    .transfer_store
                    .find_by_id_and_lease(&command.entity_id, &self.owner_id)
                    .await?;
                if apply(&mut entity, command) {
                    self.transfer_store.update(entity, &self.owner_id).await?;
                    Ok(true)
                } else {
                    self.transfer_store
                        .release(&command.entity_id, &self.owner_id)
                        .await?;
                    Ok(false)
                }
            }
        }
    }

    fn register_default_handlers(&mut self) {
        self.register(
            CommandTag::TerminateNegotiation,
            CommandHandler::Negotiation(Box::new(|negotiation, command| {
                let CommandKind::TerminateNegotiation { reason } = &command.kind else {
                    return false;
                };
                negotiation.transition_terminating(reason.clone()).is_ok()
            })),
        );
        self.register(
            CommandTag::TerminateTransfer,
            CommandHandler::Transfer(Box::new(|transfer, command| {
                let CommandKind::TerminateTransfer { reason } = &command.kind else {
                    return false;
                };
                transfer.transition_terminating(reason.clone()).is_ok()
            })),
        );
        self.register(
            CommandTag::SuspendTransfer,
            CommandHandler::Transfer(Box::new(|transfer, command| {
                let CommandKind::SuspendTransfer { reason } = &command.kind else {
                    return false;
                };
                transfer.transition_suspending(reason.clone()).is_ok()
            })),
        );
        self.register(
            CommandTag::ResumeTransfer,
            CommandHandler::Transfer(Box::new(|transfer, _| {
                transfer.state() == TransferState::Suspended
                    && transfer.transition_starting().is_ok()
            })),
        );
        self.register(
            CommandTag::CompleteTransfer,
            CommandHandler::Transfer(Box::new(|transfer, _| {
                transfer.transition_completing().is_ok()
            })),
        );
    }
}

#[async_trait]
impl StateProcessor for CommandRunner {
    fn name(&self) -> &str {
        "command-runner"
    }

    async fn process_once(&self) -> Result<usize> {
        Ok(self.run_once().await)
    }
}
