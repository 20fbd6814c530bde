//! The per-epoch consensus driver.
//!
//! One driver instance runs one epoch: it owns the vertex store, safety
//! rules, pending votes and pacemaker for that epoch's validator set, and
//! reduces incoming events to actions. The epoch manager constructs and
//! retires driver instances; events for other epochs never reach one.

use crate::config::BftConfig;
use crate::election::{ProposerElection, WeightedRotatingLeaders};
use crate::pacemaker::{ExponentialTimeoutCalculator, Pacemaker, RoundUpdate};
use crate::pending_votes::{PendingVotes, RoundQuorum, VoteProcessingResult, VoteRejectedReason};
use crate::proposal_generator::ProposalGenerator;
use crate::safety_rules::SafetyRules;
use crate::vertex_store::{InsertError, InsertQcResult, VertexStore};
use keystone_core::{
    Action, Event, OutboundMessage, ProposalMessage, ScheduledTimeout, StateComputer,
    TransactionSource, VertexRequest, VertexResponse,
};
use keystone_storage::{SafetyStateStore, StorageError};
use keystone_types::signing;
use keystone_types::{
    Epoch, ExecutedVertex, Hash, HighQc, KeyPair, Round, ValidatorId, ValidatorSet, Vote,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Unrecoverable driver failures. Anything else is handled by dropping the
/// offending message.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("safety state persistence failed: {0}")]
    Storage(#[from] StorageError),
}

pub struct ConsensusDriver {
    self_id: ValidatorId,
    epoch: Epoch,
    validator_set: ValidatorSet,
    round_update: RoundUpdate,
    vertex_store: VertexStore,
    pending_votes: PendingVotes,
    safety: SafetyRules,
    pacemaker: Pacemaker,
    generator: ProposalGenerator,
    election: Box<dyn ProposerElection>,
    // Proposals whose parent is being fetched, keyed by the missing vertex.
    parked_proposals: HashMap<Hash, Vec<ProposalMessage>>,
    config: BftConfig,
    now_ms: u64,
}

impl ConsensusDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_id: ValidatorId,
        keys: KeyPair,
        epoch: Epoch,
        validator_set: ValidatorSet,
        root: ExecutedVertex,
        high_qc: HighQc,
        state_computer: Arc<dyn StateComputer>,
        safety_store: Arc<dyn SafetyStateStore>,
        config: BftConfig,
    ) -> Result<Self, DriverError> {
        let election: Box<dyn ProposerElection> =
            Box::new(WeightedRotatingLeaders::new(&validator_set));
        let safety = SafetyRules::new(
            self_id,
            keys,
            epoch,
            validator_set.clone(),
            safety_store,
            config.verified_certificate_cache,
        )?;
        let vertex_store = VertexStore::new(
            root,
            high_qc.clone(),
            state_computer,
            config.max_stored_vertices,
        );
        let round_update = RoundUpdate::from_high_qc(epoch, high_qc, election.as_ref());
        let pacemaker = Pacemaker::new(
            self_id,
            ExponentialTimeoutCalculator::new(
                config.timeout_base,
                config.timeout_rate,
                config.timeout_max_exponent,
            ),
        );
        let generator = ProposalGenerator::new(self_id, config.max_proposal_transactions);
        Ok(ConsensusDriver {
            self_id,
            epoch,
            validator_set,
            round_update,
            vertex_store,
            pending_votes: PendingVotes::new(),
            safety,
            pacemaker,
            generator,
            election,
            parked_proposals: HashMap::new(),
            config,
            now_ms: 0,
        })
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn current_round(&self) -> Round {
        self.round_update.current_round
    }

    pub fn high_qc(&self) -> &HighQc {
        self.vertex_store.high_qc()
    }

    pub fn validator_set(&self) -> &ValidatorSet {
        &self.validator_set
    }

    pub fn set_time(&mut self, now: Duration) {
        self.now_ms = now.as_millis() as u64;
    }

    /// Enter the initial round. Called once after construction.
    pub fn start(&mut self, transactions: &dyn TransactionSource) -> Vec<Action> {
        self.pacemaker.start_round(
            &self.round_update,
            &self.safety,
            &self.vertex_store,
            &self.generator,
            transactions,
            self.now_ms,
        )
    }

    pub fn handle(
        &mut self,
        event: Event,
        transactions: &dyn TransactionSource,
    ) -> Result<Vec<Action>, DriverError> {
        match event {
            Event::ProposalReceived(proposal) => self.process_proposal(*proposal, transactions),
            Event::VoteReceived(vote) => self.process_vote(*vote, transactions),
            Event::LocalTimeout(timeout) => self.process_local_timeout(timeout),
            Event::VertexRequestReceived { from, request } => {
                Ok(self.process_vertex_request(from, request))
            }
            Event::VertexResponseReceived { from, response } => {
                self.process_vertex_response(from, response, transactions)
            }
            // Handled upstream by the node; nothing for consensus to do.
            Event::TransactionSubmitted(_) => Ok(Vec::new()),
        }
    }

    fn process_proposal(
        &mut self,
        proposal: ProposalMessage,
        transactions: &dyn TransactionSource,
    ) -> Result<Vec<Action>, DriverError> {
        let vertex = proposal.vertex.clone().with_id();
        let round = vertex.round();

        let Some(proposer) = vertex.vertex().proposer else {
            debug!(round = %round, "Dropping proposal without a proposer");
            return Ok(Vec::new());
        };
        if self.election.leader_for(round) != proposer {
            warn!(round = %round, author = %proposer, "Dropping proposal from non-leader");
            return Ok(Vec::new());
        }
        let Some(public_key) = self.validator_set.public_key(proposer) else {
            debug!(author = %proposer, "Dropping proposal from unknown validator");
            return Ok(Vec::new());
        };
        if public_key
            .verify(&signing::proposal_message(&vertex.hash()), &proposal.signature)
            .is_err()
        {
            warn!(round = %round, author = %proposer, "Dropping proposal with bad signature");
            return Ok(Vec::new());
        }
        if let Err(e) = self.safety.verify_high_qc(&proposal.high_qc) {
            warn!(round = %round, error = %e, "Dropping proposal with invalid certificates");
            return Ok(Vec::new());
        }
        if let Some(parent_qc) = vertex.vertex().parent_qc() {
            if let Err(e) = self.safety.verify_qc(parent_qc) {
                warn!(round = %round, error = %e, "Dropping proposal with invalid parent QC");
                return Ok(Vec::new());
            }
        }

        let mut actions = self.sync_up(&proposal.high_qc, proposer)?;
        actions.extend(self.maybe_advance_round(transactions));

        match self.vertex_store.insert_vertex(vertex) {
            Ok(executed) => {
                if executed.round() == self.round_update.current_round {
                    actions.extend(self.pacemaker.vote_on_vertex(
                        &executed,
                        &self.round_update,
                        &mut self.safety,
                        &self.vertex_store,
                        self.now_ms,
                    )?);
                } else {
                    trace!(
                        round = %executed.round(),
                        current = %self.round_update.current_round,
                        "Inserted proposal vertex outside the current round"
                    );
                }
            }
            Err(InsertError::MissingParent(parent)) => {
                debug!(round = %round, parent = ?parent, "Parking proposal, fetching parent");
                if self.parked_proposals.len() < self.config.max_pending_proposals {
                    self.parked_proposals
                        .entry(parent)
                        .or_default()
                        .push(proposal);
                }
                actions.push(self.request_vertices(parent, proposer));
            }
            Err(e) => debug!(round = %round, error = %e, "Dropping proposal vertex"),
        }

        Ok(actions)
    }

    fn process_vote(
        &mut self,
        vote: Vote,
        transactions: &dyn TransactionSource,
    ) -> Result<Vec<Action>, DriverError> {
        let Some(public_key) = self.validator_set.public_key(vote.author) else {
            debug!(author = %vote.author, "Dropping vote from unknown validator");
            return Ok(Vec::new());
        };
        let vote_message =
            signing::vote_message(vote.epoch, &vote.vote_data.hash(), vote.timestamp_ms);
        if public_key.verify(&vote_message, &vote.signature).is_err() {
            warn!(author = %vote.author, "Dropping vote with bad signature");
            return Ok(Vec::new());
        }
        if let Some(timeout_signature) = &vote.timeout_signature {
            let timeout_message = signing::timeout_message(vote.epoch, vote.round());
            if public_key
                .verify(&timeout_message, timeout_signature)
                .is_err()
            {
                warn!(author = %vote.author, "Dropping vote with bad timeout signature");
                return Ok(Vec::new());
            }
        }
        if let Err(e) = self.safety.verify_high_qc(&vote.high_qc) {
            warn!(author = %vote.author, error = %e, "Dropping vote with invalid certificates");
            return Ok(Vec::new());
        }

        let mut actions = self.sync_up(&vote.high_qc, vote.author)?;
        actions.extend(self.maybe_advance_round(transactions));

        if vote.round() != self.round_update.current_round {
            trace!(
                round = %vote.round(),
                current = %self.round_update.current_round,
                "Ignoring vote outside the current round"
            );
            return Ok(actions);
        }
        // Undisturbed votes are aggregated by the next leader only. Timeout
        // votes are everyone's business.
        if self.round_update.next_leader != self.self_id && !vote.is_timeout() {
            trace!(author = %vote.author, "Not the next leader, ignoring regular vote");
            return Ok(actions);
        }

        match self.pending_votes.insert_vote(&vote, &self.validator_set) {
            VoteProcessingResult::Accepted => {}
            VoteProcessingResult::Rejected(VoteRejectedReason::DoubleVote(evidence)) => {
                warn!(author = %vote.author, round = %vote.round(), "Double vote detected");
                actions.push(Action::ReportByzantine(*evidence));
            }
            VoteProcessingResult::Rejected(reason) => {
                trace!(author = %vote.author, ?reason, "Vote rejected");
            }
            VoteProcessingResult::Quorum(RoundQuorum::Regular(qc)) => {
                debug!(round = %qc.round(), "Quorum certificate formed");
                match self.vertex_store.insert_qc(qc) {
                    InsertQcResult::Inserted { committed } => {
                        if let Some(update) = committed {
                            actions.push(Action::CommitVertices {
                                vertices: update.vertices,
                                commit_qc: update.commit_qc,
                            });
                        }
                    }
                    InsertQcResult::VertexMissing => {
                        actions.push(self.request_vertices(vote.vertex_id(), vote.author));
                    }
                    InsertQcResult::Ignored => {}
                }
                actions.extend(self.maybe_advance_round(transactions));
            }
            VoteProcessingResult::Quorum(RoundQuorum::Timeout(tc)) => {
                debug!(round = %tc.round, "Timeout certificate formed");
                self.vertex_store.insert_timeout_certificate(tc);
                actions.extend(self.maybe_advance_round(transactions));
            }
        }

        Ok(actions)
    }

    fn process_local_timeout(
        &mut self,
        timeout: ScheduledTimeout,
    ) -> Result<Vec<Action>, DriverError> {
        if timeout.epoch != self.epoch || timeout.round != self.round_update.current_round {
            trace!(round = %timeout.round, "Ignoring stale timeout");
            return Ok(Vec::new());
        }
        self.pacemaker
            .process_local_timeout(
                timeout,
                &self.round_update,
                &mut self.safety,
                &mut self.vertex_store,
                self.now_ms,
            )
            .map_err(Into::into)
    }

    fn process_vertex_request(&self, from: ValidatorId, request: VertexRequest) -> Vec<Action> {
        match self
            .vertex_store
            .get_vertices(request.vertex_id, request.count)
        {
            Some(vertices) => vec![Action::Send {
                to: from,
                message: OutboundMessage::VertexResponse(Box::new(VertexResponse {
                    vertices: vertices.into_iter().map(|v| v.vertex().clone()).collect(),
                })),
            }],
            None => {
                debug!(from = %from, vertex = ?request.vertex_id, "Cannot serve vertex request");
                Vec::new()
            }
        }
    }

    fn process_vertex_response(
        &mut self,
        from: ValidatorId,
        response: VertexResponse,
        transactions: &dyn TransactionSource,
    ) -> Result<Vec<Action>, DriverError> {
        let mut actions = Vec::new();
        // Responses arrive newest first; insert oldest first.
        for vertex in response.vertices.into_iter().rev() {
            let vertex = vertex.clone().with_id();
            if let Some(parent_qc) = vertex.vertex().parent_qc() {
                if let Err(e) = self.safety.verify_qc(parent_qc) {
                    warn!(from = %from, error = %e, "Dropping vertex response with invalid QC");
                    return Ok(actions);
                }
            }
            match self.vertex_store.insert_vertex(vertex.clone()) {
                Ok(_) => {
                    if let Some(waiting) = self.parked_proposals.remove(&vertex.hash()) {
                        for proposal in waiting {
                            actions.extend(self.process_proposal(proposal, transactions)?);
                        }
                    }
                }
                Err(InsertError::MissingParent(parent)) => {
                    actions.push(self.request_vertices(parent, from));
                    break;
                }
                Err(e) => {
                    debug!(from = %from, error = %e, "Dropping synced vertex");
                    break;
                }
            }
        }
        actions.extend(self.maybe_advance_round(transactions));
        Ok(actions)
    }

    /// Fold a peer's certificate view into ours; commits and sync requests
    /// may fall out of it. Certificates must already be verified.
    fn sync_up(&mut self, high_qc: &HighQc, sender: ValidatorId) -> Result<Vec<Action>, DriverError> {
        let mut actions = Vec::new();
        for qc in [&high_qc.highest_committed_qc, &high_qc.highest_qc] {
            match self.vertex_store.insert_qc(qc.clone()) {
                InsertQcResult::Inserted { committed } => {
                    if let Some(update) = committed {
                        actions.push(Action::CommitVertices {
                            vertices: update.vertices,
                            commit_qc: update.commit_qc,
                        });
                    }
                }
                InsertQcResult::VertexMissing => {
                    actions.push(self.request_vertices(qc.certified_vertex_id(), sender));
                }
                InsertQcResult::Ignored => {}
            }
        }
        if let Some(tc) = &high_qc.highest_tc {
            self.vertex_store.insert_timeout_certificate(tc.clone());
        }
        Ok(actions)
    }

    /// Advance into a new round when the high QC has moved past the current
    /// one. Rounds advance on certificates only.
    fn maybe_advance_round(&mut self, transactions: &dyn TransactionSource) -> Vec<Action> {
        let high_qc = self.vertex_store.high_qc();
        if high_qc.highest_round() < self.round_update.current_round {
            return Vec::new();
        }
        self.round_update =
            RoundUpdate::from_high_qc(self.epoch, high_qc.clone(), self.election.as_ref());
        self.pacemaker.start_round(
            &self.round_update,
            &self.safety,
            &self.vertex_store,
            &self.generator,
            transactions,
            self.now_ms,
        )
    }

    fn request_vertices(&self, vertex_id: Hash, from: ValidatorId) -> Action {
        Action::Send {
            to: from,
            message: OutboundMessage::VertexRequest(VertexRequest {
                vertex_id,
                count: self.config.sync_request_count,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{genesis_setup, FixedStateComputer, StaticTransactionSource};
    use keystone_storage::InMemorySafetyStore;
    use keystone_types::test_utils::deterministic_keypair;
    use keystone_types::Vertex;

    fn drivers(n: u64) -> Vec<ConsensusDriver> {
        let (keys, set, root, high_qc) = genesis_setup(n as usize);
        (0..n)
            .map(|i| {
                ConsensusDriver::new(
                    ValidatorId(i),
                    keys[i as usize].clone(),
                    Epoch::GENESIS,
                    set.clone(),
                    root.clone(),
                    high_qc.clone(),
                    Arc::new(FixedStateComputer::new()),
                    Arc::new(InMemorySafetyStore::new()),
                    BftConfig::default(),
                )
                .unwrap()
            })
            .collect()
    }

    fn broadcast_proposal(actions: &[Action]) -> Option<ProposalMessage> {
        actions.iter().find_map(|a| match a {
            Action::Broadcast {
                message: OutboundMessage::Proposal(p),
            } => Some((**p).clone()),
            _ => None,
        })
    }

    fn sent_votes(actions: &[Action]) -> Vec<(ValidatorId, Vote)> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send {
                    to,
                    message: OutboundMessage::Vote(v),
                } => Some((*to, (**v).clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_exactly_one_driver_proposes_round_one() {
        let mut drivers = drivers(4);
        let source = StaticTransactionSource::empty();

        let mut proposals = 0;
        for driver in &mut drivers {
            let actions = driver.start(&source);
            assert!(
                matches!(actions[0], Action::ScheduleTimeout { .. }),
                "every driver schedules the round-1 timeout"
            );
            if broadcast_proposal(&actions).is_some() {
                proposals += 1;
            }
        }
        assert_eq!(proposals, 1);
    }

    #[test]
    fn test_full_round_forms_qc_and_advances() {
        let mut drivers = drivers(4);
        let source = StaticTransactionSource::empty();

        let mut proposal = None;
        for driver in &mut drivers {
            if let Some(p) = broadcast_proposal(&driver.start(&source)) {
                proposal = Some(p);
            }
        }
        let proposal = proposal.expect("round 1 has a leader");

        // Everyone receives the proposal and votes to the next leader.
        let mut votes = Vec::new();
        for driver in &mut drivers {
            let actions = driver
                .handle(
                    Event::ProposalReceived(Box::new(proposal.clone())),
                    &source,
                )
                .unwrap();
            votes.extend(sent_votes(&actions));
        }
        assert_eq!(votes.len(), 4);
        let aggregator = votes[0].0;
        assert!(votes.iter().all(|(to, _)| *to == aggregator));

        // The third distinct vote forms the QC; the aggregator moves on.
        for (i, (_, vote)) in votes.into_iter().enumerate() {
            let driver = &mut drivers[aggregator.0 as usize];
            driver
                .handle(Event::VoteReceived(Box::new(vote)), &source)
                .unwrap();
            let expected = if i < 2 { Round::of(1) } else { Round::of(2) };
            assert_eq!(driver.current_round(), expected, "after vote {i}");
        }
        assert_eq!(
            drivers[aggregator.0 as usize].high_qc().highest_qc.round(),
            Round::of(1)
        );
    }

    #[test]
    fn test_proposal_from_non_leader_dropped() {
        let mut drivers = drivers(4);
        let source = StaticTransactionSource::empty();
        let leader = {
            let actions = drivers
                .iter_mut()
                .map(|d| d.start(&source))
                .collect::<Vec<_>>();
            actions
                .iter()
                .position(|a| broadcast_proposal(a).is_some())
                .unwrap() as u64
        };
        let impostor = (leader + 1) % 4;

        let (keys, _, _, high_qc) = genesis_setup(4);
        let vertex = Vertex::create(
            high_qc.highest_qc.clone(),
            Round::of(1),
            vec![],
            ValidatorId(impostor),
            100,
        )
        .with_id();
        let signature = keys[impostor as usize].sign(&signing::proposal_message(&vertex.hash()));
        let forged = ProposalMessage {
            vertex: vertex.vertex().clone(),
            signature,
            high_qc,
        };

        let victim = ((impostor + 1) % 4) as usize;
        let actions = drivers[victim]
            .handle(Event::ProposalReceived(Box::new(forged)), &source)
            .unwrap();
        assert!(actions.is_empty());
        assert_eq!(drivers[victim].current_round(), Round::of(1));
    }

    #[test]
    fn test_proposal_with_bad_signature_dropped() {
        let mut drivers = drivers(4);
        let source = StaticTransactionSource::empty();

        let mut proposal = None;
        for driver in &mut drivers {
            if let Some(p) = broadcast_proposal(&driver.start(&source)) {
                proposal = Some(p);
            }
        }
        let mut proposal = proposal.unwrap();
        let outsider = deterministic_keypair(99);
        proposal.signature = outsider.sign(&signing::proposal_message(&Hash::of(b"wrong")));

        let actions = drivers[0]
            .handle(Event::ProposalReceived(Box::new(proposal)), &source)
            .unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn test_stale_timeout_ignored() {
        let mut drivers = drivers(4);
        let source = StaticTransactionSource::empty();
        drivers[0].start(&source);

        let stale = ScheduledTimeout::initial(Epoch::GENESIS, Round::of(9));
        let actions = drivers[0]
            .handle(Event::LocalTimeout(stale), &source)
            .unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn test_vertex_request_served_from_store() {
        let mut drivers = drivers(4);
        let source = StaticTransactionSource::empty();
        let root_id = drivers[0].high_qc().highest_qc.certified_vertex_id();

        let actions = drivers[0]
            .handle(
                Event::VertexRequestReceived {
                    from: ValidatorId(3),
                    request: VertexRequest {
                        vertex_id: root_id,
                        count: 4,
                    },
                },
                &source,
            )
            .unwrap();
        let [Action::Send {
            to,
            message: OutboundMessage::VertexResponse(response),
        }] = &actions[..]
        else {
            panic!("expected a vertex response, got {actions:?}");
        };
        assert_eq!(*to, ValidatorId(3));
        assert_eq!(response.vertices.len(), 1);
    }

    #[test]
    fn test_unknown_vertex_request_unanswered() {
        let mut drivers = drivers(4);
        let source = StaticTransactionSource::empty();
        let actions = drivers[0]
            .handle(
                Event::VertexRequestReceived {
                    from: ValidatorId(3),
                    request: VertexRequest {
                        vertex_id: Hash::of(b"unknown"),
                        count: 4,
                    },
                },
                &source,
            )
            .unwrap();
        assert!(actions.is_empty());
    }
}
