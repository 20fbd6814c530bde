//! The pacemaker: keeps rounds moving.
//!
//! A round only ever advances on a certificate (QC or TC), never on raw vote
//! counts. While a round is undisturbed, votes go to the next round's leader;
//! once the local timeout fires the round is marked timed out, the previous
//! vote is re-broadcast with a timeout signature (or a deterministic fallback
//! vertex is voted on), and every subsequent vote is broadcast so the whole
//! set can assemble the timeout certificate.

use crate::election::ProposerElection;
use crate::proposal_generator::ProposalGenerator;
use crate::safety_rules::{SafetyError, SafetyRules};
use crate::vertex_store::VertexStore;
use keystone_core::{
    Action, OutboundMessage, ProposalMessage, ScheduledTimeout, TransactionSource,
};
use keystone_storage::StorageError;
use keystone_types::{Epoch, ExecutedVertex, HighQc, Round, ValidatorId, Vertex, Vote};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStatus {
    /// No timeout so far in this round.
    Undisturbed,
    /// The local timeout fired at least once.
    TimedOut,
}

/// Exponential round-timeout backoff:
/// `timeout(n) = base * rate^min(n, max_exponent)` where `n` counts
/// consecutive uncommitted rounds.
#[derive(Debug, Clone)]
pub struct ExponentialTimeoutCalculator {
    base: Duration,
    rate: f64,
    max_exponent: u32,
}

impl ExponentialTimeoutCalculator {
    pub fn new(base: Duration, rate: f64, max_exponent: u32) -> Self {
        ExponentialTimeoutCalculator {
            base,
            rate,
            max_exponent,
        }
    }

    pub fn timeout(&self, uncommitted_rounds: u64) -> Duration {
        let exponent = uncommitted_rounds.min(self.max_exponent as u64) as i32;
        self.base.mul_f64(self.rate.powi(exponent))
    }
}

/// Everything that defines the current round, derived from the high QC.
#[derive(Debug, Clone)]
pub struct RoundUpdate {
    pub epoch: Epoch,
    pub current_round: Round,
    pub leader: ValidatorId,
    pub next_leader: ValidatorId,
    pub high_qc: HighQc,
}

impl RoundUpdate {
    pub fn from_high_qc(epoch: Epoch, high_qc: HighQc, election: &dyn ProposerElection) -> Self {
        let current_round = high_qc.highest_round().next();
        RoundUpdate {
            epoch,
            current_round,
            leader: election.leader_for(current_round),
            next_leader: election.leader_for(current_round.next()),
            high_qc,
        }
    }

    /// Rounds since the last commit, exclusive of the current one. Drives
    /// the timeout backoff.
    pub fn uncommitted_rounds(&self) -> u64 {
        self.current_round
            .number()
            .saturating_sub(self.high_qc.highest_committed_qc.round().number())
            .saturating_sub(1)
    }
}

pub struct Pacemaker {
    self_id: ValidatorId,
    round_status: RoundStatus,
    calculator: ExponentialTimeoutCalculator,
}

impl Pacemaker {
    pub fn new(self_id: ValidatorId, calculator: ExponentialTimeoutCalculator) -> Self {
        Pacemaker {
            self_id,
            round_status: RoundStatus::Undisturbed,
            calculator,
        }
    }

    pub fn round_status(&self) -> RoundStatus {
        self.round_status
    }

    /// Enter a round: schedule its timeout and, when this node leads it,
    /// broadcast a proposal.
    #[allow(clippy::too_many_arguments)]
    pub fn start_round(
        &mut self,
        round_update: &RoundUpdate,
        safety: &SafetyRules,
        vertex_store: &VertexStore,
        generator: &ProposalGenerator,
        transactions: &dyn TransactionSource,
        now_ms: u64,
    ) -> Vec<Action> {
        self.round_status = RoundStatus::Undisturbed;

        let delay = self.calculator.timeout(round_update.uncommitted_rounds());
        let mut actions = vec![Action::ScheduleTimeout {
            timeout: ScheduledTimeout::initial(round_update.epoch, round_update.current_round),
            delay,
        }];

        info!(
            round = %round_update.current_round,
            leader = %round_update.leader,
            timeout_ms = delay.as_millis() as u64,
            "Round started"
        );

        if round_update.leader == self.self_id {
            let vertex = generator.generate(vertex_store, round_update, transactions, now_ms);
            let parent_round = vertex
                .vertex()
                .parent_header()
                .map(|h| h.round)
                .unwrap_or_else(Round::initial);
            match safety.sign_proposal(vertex.hash(), parent_round) {
                Ok(signature) => {
                    debug!(round = %round_update.current_round, vertex = ?vertex.hash(), "Proposing");
                    actions.push(Action::Broadcast {
                        message: OutboundMessage::Proposal(Box::new(ProposalMessage {
                            vertex: vertex.vertex().clone(),
                            signature,
                            high_qc: vertex_store.high_qc().clone(),
                        })),
                    });
                }
                Err(e) => warn!(error = %e, "Refusing to propose"),
            }
        }

        actions
    }

    /// A vertex for the current round was inserted: vote on it if safe.
    pub fn vote_on_vertex(
        &mut self,
        executed: &ExecutedVertex,
        round_update: &RoundUpdate,
        safety: &mut SafetyRules,
        vertex_store: &VertexStore,
        now_ms: u64,
    ) -> Result<Vec<Action>, StorageError> {
        match safety.create_vote(executed, vertex_store.high_qc().clone(), now_ms) {
            Ok(vote) => Ok(vec![self.dispatch_vote(vote, round_update)]),
            Err(SafetyError::Storage(e)) => Err(e),
            Err(e) => {
                debug!(round = %executed.round(), reason = %e, "Not voting");
                Ok(Vec::new())
            }
        }
    }

    /// The round timeout fired (for the current round; the driver drops
    /// stale timeouts). Resend the previous vote with a timeout signature,
    /// or vote on the fallback vertex, and reschedule the timer.
    pub fn process_local_timeout(
        &mut self,
        timeout: ScheduledTimeout,
        round_update: &RoundUpdate,
        safety: &mut SafetyRules,
        vertex_store: &mut VertexStore,
        now_ms: u64,
    ) -> Result<Vec<Action>, StorageError> {
        self.round_status = RoundStatus::TimedOut;
        warn!(
            round = %round_update.current_round,
            count = timeout.count,
            "Round timed out"
        );

        let delay = self.calculator.timeout(round_update.uncommitted_rounds());
        let mut actions = vec![Action::ScheduleTimeout {
            timeout: timeout.next(),
            delay,
        }];

        let vote = match safety.last_vote(round_update.current_round) {
            Some(previous) => safety.timeout_vote(previous)?,
            None => {
                match self.fallback_vote(round_update, safety, vertex_store, now_ms)? {
                    Some(vote) => vote,
                    None => return Ok(actions),
                }
            }
        };
        actions.push(Action::Broadcast {
            message: OutboundMessage::Vote(Box::new(vote)),
        });
        Ok(actions)
    }

    /// Insert the deterministic fallback vertex for the timed-out round and
    /// vote on it. `None` when voting is not possible (already voted on a
    /// conflicting vertex that has since been retired, fallback parent
    /// missing, ...).
    fn fallback_vote(
        &mut self,
        round_update: &RoundUpdate,
        safety: &mut SafetyRules,
        vertex_store: &mut VertexStore,
        now_ms: u64,
    ) -> Result<Option<Vote>, StorageError> {
        let fallback = Vertex::fallback(
            round_update.high_qc.highest_qc.clone(),
            round_update.current_round,
            round_update.leader,
        )
        .with_id();

        let executed = match vertex_store.insert_vertex(fallback) {
            Ok(executed) => executed,
            Err(e) => {
                debug!(reason = %e, "Cannot insert fallback vertex");
                return Ok(None);
            }
        };

        match safety.create_vote(&executed, vertex_store.high_qc().clone(), now_ms) {
            Ok(vote) => Ok(Some(safety.timeout_vote(vote)?)),
            Err(SafetyError::Storage(e)) => Err(e),
            Err(e) => {
                debug!(reason = %e, "Cannot vote on fallback vertex");
                Ok(None)
            }
        }
    }

    /// Undisturbed votes go to the validator that will aggregate them: the
    /// next round's leader. After a timeout everyone aggregates, so
    /// broadcast.
    fn dispatch_vote(&self, vote: Vote, round_update: &RoundUpdate) -> Action {
        let message = OutboundMessage::Vote(Box::new(vote));
        match self.round_status {
            RoundStatus::Undisturbed => Action::Send {
                to: round_update.next_leader,
                message,
            },
            RoundStatus::TimedOut => Action::Broadcast { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::RotatingLeaders;
    use crate::test_utils::{genesis_setup, FixedStateComputer, StaticTransactionSource};
    use keystone_storage::InMemorySafetyStore;
    use std::sync::Arc;

    fn calculator() -> ExponentialTimeoutCalculator {
        ExponentialTimeoutCalculator::new(Duration::from_millis(1000), 2.0, 4)
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let calc = calculator();
        assert_eq!(calc.timeout(0), Duration::from_millis(1000));
        assert_eq!(calc.timeout(1), Duration::from_millis(2000));
        assert_eq!(calc.timeout(3), Duration::from_millis(8000));
        // Capped at exponent 4.
        assert_eq!(calc.timeout(4), Duration::from_millis(16000));
        assert_eq!(calc.timeout(40), Duration::from_millis(16000));
    }

    #[test]
    fn test_round_update_uncommitted_rounds() {
        let (_, set, _, high_qc) = genesis_setup(4);
        let election = RotatingLeaders::new(&set);
        let update = RoundUpdate::from_high_qc(Epoch::GENESIS, high_qc, &election);
        // Round 1, committed round 0: nothing uncommitted between them.
        assert_eq!(update.current_round, Round::of(1));
        assert_eq!(update.uncommitted_rounds(), 0);
    }

    #[test]
    fn test_leader_proposes_on_round_start() {
        let (keys, set, root, high_qc) = genesis_setup(4);
        let election = RotatingLeaders::new(&set);
        let update = RoundUpdate::from_high_qc(Epoch::GENESIS, high_qc.clone(), &election);
        assert_eq!(update.leader, ValidatorId(1));

        let vertex_store = VertexStore::new(
            root,
            high_qc,
            Arc::new(FixedStateComputer::new()),
            64,
        );
        let safety = SafetyRules::new(
            ValidatorId(1),
            keys[1].clone(),
            Epoch::GENESIS,
            set,
            Arc::new(InMemorySafetyStore::new()),
            16,
        )
        .unwrap();
        let generator = ProposalGenerator::new(ValidatorId(1), 8);
        let mut pacemaker = Pacemaker::new(ValidatorId(1), calculator());

        let actions = pacemaker.start_round(
            &update,
            &safety,
            &vertex_store,
            &generator,
            &StaticTransactionSource::empty(),
            100,
        );
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[0], Action::ScheduleTimeout { .. }));
        let Action::Broadcast {
            message: OutboundMessage::Proposal(proposal),
        } = &actions[1]
        else {
            panic!("leader should broadcast a proposal");
        };
        assert_eq!(proposal.vertex.round, Round::of(1));
        assert_eq!(proposal.vertex.proposer, Some(ValidatorId(1)));
    }

    #[test]
    fn test_non_leader_only_schedules_timeout() {
        let (keys, set, root, high_qc) = genesis_setup(4);
        let election = RotatingLeaders::new(&set);
        let update = RoundUpdate::from_high_qc(Epoch::GENESIS, high_qc.clone(), &election);

        let vertex_store =
            VertexStore::new(root, high_qc, Arc::new(FixedStateComputer::new()), 64);
        let safety = SafetyRules::new(
            ValidatorId(0),
            keys[0].clone(),
            Epoch::GENESIS,
            set,
            Arc::new(InMemorySafetyStore::new()),
            16,
        )
        .unwrap();
        let generator = ProposalGenerator::new(ValidatorId(0), 8);
        let mut pacemaker = Pacemaker::new(ValidatorId(0), calculator());

        let actions = pacemaker.start_round(
            &update,
            &safety,
            &vertex_store,
            &generator,
            &StaticTransactionSource::empty(),
            100,
        );
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], Action::ScheduleTimeout { .. }));
    }

    #[test]
    fn test_timeout_broadcasts_fallback_vote_and_reschedules() {
        let (keys, set, root, high_qc) = genesis_setup(4);
        let election = RotatingLeaders::new(&set);
        let update = RoundUpdate::from_high_qc(Epoch::GENESIS, high_qc.clone(), &election);

        let mut vertex_store =
            VertexStore::new(root, high_qc, Arc::new(FixedStateComputer::new()), 64);
        let mut safety = SafetyRules::new(
            ValidatorId(0),
            keys[0].clone(),
            Epoch::GENESIS,
            set,
            Arc::new(InMemorySafetyStore::new()),
            16,
        )
        .unwrap();
        let mut pacemaker = Pacemaker::new(ValidatorId(0), calculator());

        let timeout = ScheduledTimeout::initial(Epoch::GENESIS, update.current_round);
        let actions = pacemaker
            .process_local_timeout(timeout, &update, &mut safety, &mut vertex_store, 100)
            .unwrap();

        assert_eq!(pacemaker.round_status(), RoundStatus::TimedOut);
        assert_eq!(actions.len(), 2);
        let Action::ScheduleTimeout { timeout: next, .. } = &actions[0] else {
            panic!("expected a rescheduled timeout");
        };
        assert_eq!(next.count, 1);
        let Action::Broadcast {
            message: OutboundMessage::Vote(vote),
        } = &actions[1]
        else {
            panic!("expected a broadcast timeout vote");
        };
        assert!(vote.is_timeout());
        assert_eq!(vote.round(), update.current_round);
    }

    #[test]
    fn test_timeout_resends_previous_vote_with_timeout_flag() {
        let (keys, set, root, high_qc) = genesis_setup(4);
        let election = RotatingLeaders::new(&set);
        let update = RoundUpdate::from_high_qc(Epoch::GENESIS, high_qc.clone(), &election);

        let mut vertex_store =
            VertexStore::new(root, high_qc, Arc::new(FixedStateComputer::new()), 64);
        let mut safety = SafetyRules::new(
            ValidatorId(0),
            keys[0].clone(),
            Epoch::GENESIS,
            set,
            Arc::new(InMemorySafetyStore::new()),
            16,
        )
        .unwrap();
        let mut pacemaker = Pacemaker::new(ValidatorId(0), calculator());

        // Vote normally first.
        let generator = ProposalGenerator::new(ValidatorId(0), 8);
        let proposal = generator.generate(
            &vertex_store,
            &update,
            &StaticTransactionSource::empty(),
            100,
        );
        let executed = vertex_store.insert_vertex(proposal).unwrap();
        let voted = pacemaker
            .vote_on_vertex(&executed, &update, &mut safety, &vertex_store, 100)
            .unwrap();
        let Action::Send { message: OutboundMessage::Vote(original), .. } = &voted[0] else {
            panic!("expected a vote sent to the next leader");
        };
        assert!(!original.is_timeout());

        // Then the round times out: same vote, now with a timeout signature.
        let timeout = ScheduledTimeout::initial(Epoch::GENESIS, update.current_round);
        let actions = pacemaker
            .process_local_timeout(timeout, &update, &mut safety, &mut vertex_store, 200)
            .unwrap();
        let Action::Broadcast {
            message: OutboundMessage::Vote(resent),
        } = &actions[1]
        else {
            panic!("expected a broadcast vote");
        };
        assert!(resent.is_timeout());
        assert_eq!(resent.vote_data, original.vote_data);
    }
}
