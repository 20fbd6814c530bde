//! The node-level state machine: epoch-routed consensus plus the mempool.

use keystone_bft::{DriverError, EpochManager};
use keystone_core::{Action, Event, StateMachine};
use keystone_mempool::Mempool;
use keystone_types::Hash;
use std::time::Duration;
use tracing::error;

/// Wraps the [`EpochManager`] and the [`Mempool`] behind the [`StateMachine`]
/// seam the runner drives.
///
/// Safety-state persistence failures are unrecoverable: the node must not
/// vote again without durable state, so the machine latches the error and
/// goes silent. The runner checks [`NodeStateMachine::poisoned`] and shuts
/// down.
pub struct NodeStateMachine {
    epoch_manager: EpochManager,
    mempool: Mempool,
    fatal: Option<DriverError>,
}

impl NodeStateMachine {
    pub fn new(epoch_manager: EpochManager, mempool: Mempool) -> Self {
        NodeStateMachine {
            epoch_manager,
            mempool,
            fatal: None,
        }
    }

    /// Enter the first round. Called once by the runner before the event loop.
    pub fn start(&mut self) -> Vec<Action> {
        self.epoch_manager.start(&self.mempool)
    }

    pub fn poisoned(&self) -> Option<&DriverError> {
        self.fatal.as_ref()
    }

    pub fn epoch_manager(&self) -> &EpochManager {
        &self.epoch_manager
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }
}

impl StateMachine for NodeStateMachine {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        if self.fatal.is_some() {
            return Vec::new();
        }
        if let Event::TransactionSubmitted(transaction) = event {
            self.mempool.add(transaction);
            return Vec::new();
        }

        match self.epoch_manager.handle(event, &self.mempool) {
            Ok(actions) => {
                for action in &actions {
                    if let Action::CommitVertices { vertices, .. } = action {
                        let committed: Vec<Hash> = vertices
                            .iter()
                            .flat_map(|v| v.vertex().payload().iter().map(|tx| tx.hash()))
                            .collect();
                        self.mempool.remove_committed(&committed);
                    }
                }
                actions
            }
            Err(e) => {
                error!(error = %e, "Consensus halted");
                self.fatal = Some(e);
                Vec::new()
            }
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.epoch_manager.set_time(now);
    }
}
