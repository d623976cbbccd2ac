//! Generic polling loop over registered state processors.
//!
//! The driver owns no scheduling smarts: it ticks at a fixed interval, runs
//! every processor once per tick, and logs per-processor failures without
//! halting the loop. Graceful shutdown flows through a watch channel.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// One pass over a manager's monitored states
#[async_trait]
pub trait StateProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// Lease and drive one batch per monitored state; returns the number of
    /// entities processed
    async fn process_once(&self) -> Result<usize>;
}

/// Fixed-interval polling loop
pub struct StateDriver {
    processors: Vec<Arc<dyn StateProcessor>>,
    poll_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl StateDriver {
    pub fn new(poll_interval: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            processors: Vec::new(),
            poll_interval,
            shutdown_tx,
        }
    }

    pub fn register(&mut self, processor: Arc<dyn StateProcessor>) {
        self.processors.push(processor);
    }

    /// Signal the loop to stop after the current tick
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Run until shutdown is signalled
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut interval = tokio::time::interval(self.poll_interval);
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            processors = self.processors.len(),
            "🔄 State driver started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("State driver stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Run every processor once; one processor's failure never blocks the rest
    pub async fn tick(&self) {
        for processor in &self.processors {
            match processor.process_once().await {
                Ok(processed) if processed > 0 => {
                    debug!(processor = processor.name(), processed, "Processed batch");
                }
                Ok(_) => {}
                Err(err) => {
                    error!(
                        processor = processor.name(),
                        error = %err,
                        "Processor pass failed; continuing"
                    );
                }
            }
        }
    }
}
