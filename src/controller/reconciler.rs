//! Node event reconciliation loop
//!
//! Every `Added` event starts an independent workflow for that node:
//! wait for its external address, then update the configured providers.
//! Workflows run as tracked tasks so a slow node never holds up the watch.
//! At most [`DEFAULT_MAX_CONCURRENT_NODES`] of them (or the configured limit)
//! run at once; the rest wait for a slot.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use super::dispatch::{Dispatcher, ProviderResult};
use super::resolver::{AddressResolver, Outcome, ReconciliationAttempt};
use crate::node::{EventKind, NodeEvent};
use crate::{Error, Result};

/// Default bound on node workflows running at the same time
pub const DEFAULT_MAX_CONCURRENT_NODES: usize = 8;

/// Result of reconciling one node
#[derive(Debug)]
pub struct ReconciliationReport {
    /// Address resolution record
    pub attempt: ReconciliationAttempt,
    /// One entry per provider called; empty when resolution did not succeed
    pub results: Vec<ProviderResult>,
}

/// Consumes node events and drives per-node workflows
#[derive(Clone)]
pub struct Reconciler {
    resolver: Arc<AddressResolver>,
    dispatcher: Arc<Dispatcher>,
    tasks: TaskTracker,
    slots: Arc<Semaphore>,
}

impl Reconciler {
    /// Create a reconciler from its two stages
    pub fn new(resolver: AddressResolver, dispatcher: Dispatcher) -> Self {
        Self {
            resolver: Arc::new(resolver),
            dispatcher: Arc::new(dispatcher),
            tasks: TaskTracker::new(),
            slots: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_NODES)),
        }
    }

    /// Bound the number of node workflows running at once (at least one)
    pub fn with_max_concurrent(mut self, limit: usize) -> Self {
        self.slots = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    /// Number of node workflows still running
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait until every spawned workflow has finished
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Consume `events` until the stream fails, ends, or `shutdown` fires
    ///
    /// Returns `Ok(())` only when shutdown was requested. A stream that ends
    /// on its own returns [`Error::WatchClosed`]; a stream failure is returned
    /// as is. Workflows already started keep running across a failed session
    /// and are aborted when `shutdown` fires.
    pub async fn run<S>(&self, events: S, shutdown: CancellationToken) -> Result<()>
    where
        S: Stream<Item = Result<NodeEvent>> + Send,
    {
        let mut events = std::pin::pin!(events);
        info!("Watching for new nodes");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(in_flight = self.in_flight(), "Shutdown requested, no longer accepting node events");
                    return Ok(());
                }
                next = events.next() => match next {
                    Some(Ok(event)) => self.handle_event(event, &shutdown),
                    Some(Err(Error::MalformedEvent(msg))) => {
                        warn!(error = %msg, "Skipping malformed node event");
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(Error::WatchClosed),
                }
            }
        }
    }

    fn handle_event(&self, event: NodeEvent, shutdown: &CancellationToken) {
        if event.kind != EventKind::Added {
            debug!(kind = %event.kind, "Ignoring node event");
            return;
        }

        let node = match event.snapshot() {
            Ok(node) => node,
            Err(e) => {
                warn!(error = %e, "Skipping Added event without a valid node");
                return;
            }
        };

        info!(node = %node.name, "New node observed");
        let this = self.clone();
        let shutdown = shutdown.clone();
        self.tasks.spawn(async move {
            let work = async {
                if this.slots.available_permits() == 0 {
                    debug!(node = %node.name, "Waiting for a free reconciliation slot");
                }
                // the semaphore is never closed
                let Ok(_slot) = this.slots.acquire().await else {
                    return;
                };
                this.reconcile_node(&node.name).await;
            };

            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(node = %node.name, "Reconciliation aborted by shutdown");
                }
                _ = work => {}
            }
        });
    }

    /// Resolve one node's address and update the providers
    ///
    /// Provider dispatch only starts once an address is resolved.
    #[instrument(skip(self), fields(node = %node_name))]
    pub async fn reconcile_node(&self, node_name: &str) -> ReconciliationReport {
        let attempt = self.resolver.resolve(node_name).await;

        let results = match attempt.outcome {
            Outcome::Resolved(ip) => {
                info!(
                    %ip,
                    attempts = attempt.attempts,
                    elapsed_ms = attempt.elapsed.as_millis() as u64,
                    "External IP resolved"
                );
                self.dispatcher.dispatch(ip, node_name).await
            }
            Outcome::TimedOut => {
                warn!(
                    attempts = attempt.attempts,
                    elapsed_ms = attempt.elapsed.as_millis() as u64,
                    "Skipping record update: no ExternalIP after timeout"
                );
                Vec::new()
            }
            Outcome::NodeGone => {
                info!("Skipping record update: node no longer exists");
                Vec::new()
            }
        };

        ReconciliationReport { attempt, results }
    }
}
