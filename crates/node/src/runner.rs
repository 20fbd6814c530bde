//! The async runner: owns the state machine and does all I/O.
//!
//! Single-task event aggregator: events arrive on one mpsc channel, the
//! state machine reduces them synchronously, and the resulting actions are
//! executed here (network sends, timer scheduling, commit hand-off).

use crate::state::NodeStateMachine;
use crate::timers::TimerManager;
use keystone_core::{Action, Event, OutboundMessage, StateComputer, StateMachine};
use keystone_types::ValidatorId;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("consensus halted: {0}")]
    ConsensusHalted(String),
}

/// How messages leave this node. Implementations push onto their transport
/// without blocking the event loop.
pub trait NetworkAdapter: Send {
    fn broadcast(&mut self, message: OutboundMessage);
    fn send(&mut self, to: ValidatorId, message: OutboundMessage);
}

pub struct NodeRunner {
    state: NodeStateMachine,
    event_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<Event>,
    timers: TimerManager,
    network: Box<dyn NetworkAdapter>,
    state_computer: Arc<dyn StateComputer>,
}

impl NodeRunner {
    pub fn new(
        state: NodeStateMachine,
        network: Box<dyn NetworkAdapter>,
        state_computer: Arc<dyn StateComputer>,
        channel_capacity: usize,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(channel_capacity);
        let timers = TimerManager::new(event_tx.clone());
        NodeRunner {
            state,
            event_rx,
            event_tx,
            timers,
            network,
            state_computer,
        }
    }

    /// Clone this to feed events from the network or transaction ingress.
    pub fn event_sender(&self) -> mpsc::Sender<Event> {
        self.event_tx.clone()
    }

    /// Run until the event channel closes or consensus halts.
    pub async fn run(mut self) -> Result<(), RunnerError> {
        info!("Node runner starting");
        self.state.set_time(wall_clock());
        for action in self.state.start() {
            self.execute(action);
        }

        while let Some(event) = self.event_rx.recv().await {
            debug!(kind = event.type_name(), "Event received");
            self.state.set_time(wall_clock());
            for action in self.state.handle(event) {
                self.execute(action);
            }
            if let Some(e) = self.state.poisoned() {
                error!(error = %e, "Stopping runner");
                return Err(RunnerError::ConsensusHalted(e.to_string()));
            }
        }
        info!("Event channel closed, node runner stopping");
        Ok(())
    }

    fn execute(&mut self, action: Action) {
        match action {
            Action::Broadcast { message } => self.network.broadcast(message),
            Action::Send { to, message } => self.network.send(to, message),
            Action::ScheduleTimeout { timeout, delay } => self.timers.schedule(timeout, delay),
            Action::CommitVertices {
                vertices,
                commit_qc,
            } => {
                // Commits are durability work; keep them off the event loop.
                let computer = self.state_computer.clone();
                tokio::task::spawn_blocking(move || {
                    computer.commit(&vertices, &commit_qc);
                });
            }
            Action::ReportByzantine(evidence) => {
                warn!(?evidence, "Byzantine behavior detected");
            }
        }
    }
}

fn wall_clock() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_bft::test_utils::FixedStateComputer;
    use keystone_bft::{BftConfig, EpochManager};
    use keystone_mempool::{Mempool, MempoolConfig};
    use keystone_storage::InMemorySafetyStore;
    use keystone_types::test_utils::validator_set;
    use keystone_types::{Epoch, LedgerHeader};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingNetwork {
        broadcasts: Arc<Mutex<Vec<OutboundMessage>>>,
    }

    impl NetworkAdapter for RecordingNetwork {
        fn broadcast(&mut self, message: OutboundMessage) {
            self.broadcasts.lock().unwrap().push(message);
        }

        fn send(&mut self, _to: ValidatorId, _message: OutboundMessage) {}
    }

    #[tokio::test]
    async fn test_round_timeout_produces_broadcast_vote() {
        let (keys, set) = validator_set(4);
        let computer = Arc::new(FixedStateComputer::new());
        let config = BftConfig {
            timeout_base: Duration::from_millis(10),
            ..BftConfig::default()
        };
        let manager = EpochManager::new(
            ValidatorId(0),
            keys[0].clone(),
            Epoch::GENESIS,
            set,
            LedgerHeader::genesis(),
            computer.clone(),
            Arc::new(InMemorySafetyStore::new()),
            config,
        )
        .unwrap();
        let state =
            NodeStateMachine::new(manager, Mempool::new(MempoolConfig::default()));

        let network = RecordingNetwork::default();
        let broadcasts = network.broadcasts.clone();
        let runner = NodeRunner::new(state, Box::new(network), computer, 64);

        let handle = tokio::spawn(runner.run());
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        let broadcasts = broadcasts.lock().unwrap();
        assert!(
            broadcasts.iter().any(|m| matches!(
                m,
                OutboundMessage::Vote(vote) if vote.is_timeout()
            )),
            "an unanswered round must end in a broadcast timeout vote"
        );
    }
}
