//! Epoch lifecycle: routes events to the current epoch's driver and swaps
//! drivers when a committed vertex carries the next validator set.
//!
//! Events for a past epoch are dropped; events for a future epoch are held in
//! a bounded buffer and replayed once this node reaches that epoch.

use crate::config::BftConfig;
use crate::driver::{ConsensusDriver, DriverError};
use keystone_core::{Action, Event, StateComputer, TransactionSource};
use keystone_storage::SafetyStateStore;
use keystone_types::{
    Epoch, ExecutedVertex, HighQc, KeyPair, LedgerHeader, QuorumCertificate, Round, ValidatorId,
    ValidatorSet, Vertex,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct EpochManager {
    self_id: ValidatorId,
    keys: KeyPair,
    config: BftConfig,
    state_computer: Arc<dyn StateComputer>,
    safety_store: Arc<dyn SafetyStateStore>,
    driver: ConsensusDriver,
    buffered: VecDeque<Event>,
    now: Duration,
}

impl EpochManager {
    /// Build the manager, and the driver for `epoch`, on top of the committed
    /// ledger header the epoch is anchored on. For the genesis epoch the
    /// anchor is [`LedgerHeader::genesis`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_id: ValidatorId,
        keys: KeyPair,
        epoch: Epoch,
        validator_set: ValidatorSet,
        anchor: LedgerHeader,
        state_computer: Arc<dyn StateComputer>,
        safety_store: Arc<dyn SafetyStateStore>,
        config: BftConfig,
    ) -> Result<Self, DriverError> {
        let (root, high_qc) = epoch_anchor(epoch, &anchor);
        let driver = ConsensusDriver::new(
            self_id,
            keys.clone(),
            epoch,
            validator_set,
            root,
            high_qc,
            state_computer.clone(),
            safety_store.clone(),
            config.clone(),
        )?;
        Ok(EpochManager {
            self_id,
            keys,
            config,
            state_computer,
            safety_store,
            driver,
            buffered: VecDeque::new(),
            now: Duration::ZERO,
        })
    }

    pub fn current_epoch(&self) -> Epoch {
        self.driver.epoch()
    }

    pub fn driver(&self) -> &ConsensusDriver {
        &self.driver
    }

    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
        self.driver.set_time(now);
    }

    pub fn start(&mut self, transactions: &dyn TransactionSource) -> Vec<Action> {
        self.driver.start(transactions)
    }

    pub fn handle(
        &mut self,
        event: Event,
        transactions: &dyn TransactionSource,
    ) -> Result<Vec<Action>, DriverError> {
        let current = self.current_epoch();
        match event.epoch() {
            Some(epoch) if epoch < current => {
                debug!(%epoch, %current, kind = event.type_name(), "Dropping stale-epoch event");
                return Ok(Vec::new());
            }
            Some(epoch) if epoch > current => {
                debug!(%epoch, %current, kind = event.type_name(), "Buffering future-epoch event");
                if self.buffered.len() >= self.config.max_buffered_epoch_events {
                    self.buffered.pop_front();
                }
                self.buffered.push_back(event);
                return Ok(Vec::new());
            }
            _ => {}
        }

        let mut actions = self.driver.handle(event, transactions)?;

        // A committed vertex carrying the next validator set ends the epoch.
        // Rotation can cascade when replayed buffered events commit again.
        let mut scan_from = 0;
        while let Some(anchor) = epoch_change_anchor(&actions[scan_from..]) {
            scan_from = actions.len();
            actions.extend(self.rotate_epoch(anchor, transactions)?);
        }

        Ok(actions)
    }

    fn rotate_epoch(
        &mut self,
        anchor: LedgerHeader,
        transactions: &dyn TransactionSource,
    ) -> Result<Vec<Action>, DriverError> {
        let Some(next_set) = anchor.next_validator_set.clone() else {
            return Ok(Vec::new());
        };
        let next_epoch = anchor.epoch.next();
        // A set nobody can lead would wedge the whole epoch; leader election
        // requires nonzero total power.
        if next_set.is_empty() || next_set.total_voting_power() == 0 {
            warn!(
                epoch = %next_epoch,
                "Ignoring epoch change with a degenerate validator set"
            );
            return Ok(Vec::new());
        }
        info!(
            epoch = %next_epoch,
            validators = next_set.len(),
            "Epoch change committed, rotating driver"
        );

        let (root, high_qc) = epoch_anchor(next_epoch, &anchor);
        let mut driver = ConsensusDriver::new(
            self.self_id,
            self.keys.clone(),
            next_epoch,
            next_set.clone(),
            root,
            high_qc,
            self.state_computer.clone(),
            self.safety_store.clone(),
            self.config.clone(),
        )?;
        driver.set_time(self.now);
        self.driver = driver;

        if !next_set.contains(self.self_id) {
            warn!(epoch = %next_epoch, "This node is not in the new validator set");
        }
        let mut actions = self.driver.start(transactions);

        // Replay what arrived early for this epoch; anything further in the
        // future stays buffered.
        let replay: Vec<Event> = {
            let mut kept = VecDeque::new();
            let mut replay = Vec::new();
            for event in self.buffered.drain(..) {
                if event.epoch() == Some(next_epoch) {
                    replay.push(event);
                } else {
                    kept.push_back(event);
                }
            }
            self.buffered = kept;
            replay
        };
        for event in replay {
            actions.extend(self.driver.handle(event, transactions)?);
        }

        Ok(actions)
    }
}

/// The ledger header of the last committed vertex that ends its epoch, if any
/// of the given actions commit one.
fn epoch_change_anchor(actions: &[Action]) -> Option<LedgerHeader> {
    actions
        .iter()
        .flat_map(|action| match action {
            Action::CommitVertices { vertices, .. } => vertices.as_slice(),
            _ => &[],
        })
        .filter(|v| v.ledger_header().is_epoch_change())
        .next_back()
        .map(|v| v.ledger_header().clone())
}

/// The epoch-initial root vertex and certificates derived from a committed
/// anchor header. Deterministic, so every validator starts the epoch from the
/// same root without exchanging messages.
fn epoch_anchor(epoch: Epoch, anchor: &LedgerHeader) -> (ExecutedVertex, HighQc) {
    let root_vertex = Vertex::epoch_initial(epoch, anchor.timestamp_ms).with_id();
    let root_header = LedgerHeader {
        epoch,
        round: Round::initial(),
        state_version: anchor.state_version,
        state_root: anchor.state_root,
        timestamp_ms: anchor.timestamp_ms,
        next_validator_set: None,
    };
    let qc = QuorumCertificate::epoch_initial(root_vertex.hash(), root_header.clone());
    (
        ExecutedVertex::new(root_vertex, root_header),
        HighQc::initial(qc),
    )
}
