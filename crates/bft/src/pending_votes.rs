//! Vote aggregation into quorum and timeout certificates.

use keystone_core::ByzantineEvent;
use keystone_types::{
    Hash, QuorumCertificate, Round, TimeoutCertificate, TimestampedSignature, ValidationState,
    ValidatorId, ValidatorSet, Vote,
};
use std::collections::HashMap;
use tracing::trace;

/// A quorum formed in a round.
#[derive(Debug, Clone)]
pub enum RoundQuorum {
    Regular(QuorumCertificate),
    Timeout(TimeoutCertificate),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteRejectedReason {
    /// Author is not in the validator set.
    InvalidAuthor,
    /// Identical vote already counted.
    DuplicateVote,
    /// Same round, different vote data: equivocation.
    DoubleVote(Box<ByzantineEvent>),
}

#[derive(Debug, Clone)]
pub enum VoteProcessingResult {
    /// Counted, no quorum yet.
    Accepted,
    Rejected(VoteRejectedReason),
    Quorum(RoundQuorum),
}

#[derive(Debug, Clone, Copy)]
struct PreviousVote {
    round: Round,
    vote_data_hash: Hash,
    is_timeout: bool,
}

/// Collects votes of one epoch instance. Only the latest vote per author
/// counts: a vote for a newer round silently retires the author's earlier
/// signatures.
#[derive(Default)]
pub struct PendingVotes {
    vote_state: HashMap<Hash, ValidationState>,
    timeout_state: HashMap<Round, ValidationState>,
    previous_votes: HashMap<ValidatorId, PreviousVote>,
}

impl PendingVotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_vote(&mut self, vote: &Vote, set: &ValidatorSet) -> VoteProcessingResult {
        if !set.contains(vote.author) {
            return VoteProcessingResult::Rejected(VoteRejectedReason::InvalidAuthor);
        }

        let vote_data_hash = vote.vote_data.hash();

        if let Some(previous) = self.previous_votes.get(&vote.author).copied() {
            if previous.round == vote.round() {
                if previous.vote_data_hash != vote_data_hash {
                    return VoteProcessingResult::Rejected(VoteRejectedReason::DoubleVote(
                        Box::new(ByzantineEvent::DoubleVote {
                            author: vote.author,
                            epoch: vote.epoch,
                            round: vote.round(),
                            first_vote_data: previous.vote_data_hash,
                            second_vote_data: vote_data_hash,
                        }),
                    ));
                }
                // Same vote data again. Only legitimate as an upgrade that
                // adds a timeout signature.
                if previous.is_timeout || !vote.is_timeout() {
                    return VoteProcessingResult::Rejected(VoteRejectedReason::DuplicateVote);
                }
            } else if vote.round() < previous.round {
                return VoteProcessingResult::Rejected(VoteRejectedReason::DuplicateVote);
            } else {
                // Newer round: the old vote no longer counts.
                self.retire(previous, vote.author, set);
            }
        }

        self.previous_votes.insert(
            vote.author,
            PreviousVote {
                round: vote.round(),
                vote_data_hash,
                is_timeout: vote.is_timeout(),
            },
        );

        let vote_signature = TimestampedSignature {
            timestamp_ms: vote.timestamp_ms,
            signature: vote.signature,
        };
        let vote_state = self.vote_state.entry(vote_data_hash).or_default();
        vote_state.add_signature(set, vote.author, vote_signature);
        trace!(
            author = %vote.author,
            round = %vote.round(),
            power = vote_state.accumulated_power(),
            "Vote counted"
        );
        if vote_state.complete(set) {
            let qc =
                QuorumCertificate::new(vote.vote_data.clone(), vote_state.signatures().clone());
            return VoteProcessingResult::Quorum(RoundQuorum::Regular(qc));
        }

        if let Some(timeout_signature) = vote.timeout_signature {
            let timeout_state = self.timeout_state.entry(vote.round()).or_default();
            timeout_state.add_signature(
                set,
                vote.author,
                TimestampedSignature {
                    timestamp_ms: vote.timestamp_ms,
                    signature: timeout_signature,
                },
            );
            if timeout_state.complete(set) {
                let tc = TimeoutCertificate::new(
                    vote.epoch,
                    vote.round(),
                    timeout_state.signatures().clone(),
                );
                return VoteProcessingResult::Quorum(RoundQuorum::Timeout(tc));
            }
        }

        VoteProcessingResult::Accepted
    }

    fn retire(&mut self, previous: PreviousVote, author: ValidatorId, set: &ValidatorSet) {
        if let Some(state) = self.vote_state.get_mut(&previous.vote_data_hash) {
            state.remove_signature(set, author);
            if state.is_empty() {
                self.vote_state.remove(&previous.vote_data_hash);
            }
        }
        if previous.is_timeout {
            if let Some(state) = self.timeout_state.get_mut(&previous.round) {
                state.remove_signature(set, author);
                if state.is_empty() {
                    self.timeout_state.remove(&previous.round);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::header_at;
    use keystone_types::signing;
    use keystone_types::test_utils::validator_set;
    use keystone_types::{Epoch, HighQc, KeyPair, LedgerHeader, VoteData};

    fn vote_data(round: u64, tag: &str) -> VoteData {
        VoteData {
            proposed: header_at(Epoch::GENESIS, round, tag),
            parent: header_at(Epoch::GENESIS, round - 1, "parent"),
            committed: None,
        }
    }

    fn make_vote(
        keys: &KeyPair,
        author: u64,
        vote_data: VoteData,
        timeout: bool,
    ) -> Vote {
        let timestamp_ms = 100;
        let signature = keys.sign(&signing::vote_message(
            Epoch::GENESIS,
            &vote_data.hash(),
            timestamp_ms,
        ));
        let round = vote_data.proposed.round;
        let timeout_signature =
            timeout.then(|| keys.sign(&signing::timeout_message(Epoch::GENESIS, round)));
        let high_qc = HighQc::initial(QuorumCertificate::epoch_initial(
            Hash::of(b"root"),
            LedgerHeader::genesis(),
        ));
        Vote {
            author: ValidatorId(author),
            epoch: Epoch::GENESIS,
            vote_data,
            timestamp_ms,
            signature,
            high_qc,
            timeout_signature,
        }
    }

    #[test]
    fn test_quorum_at_exactly_third_distinct_vote_of_four() {
        let (keys, set) = validator_set(4);
        let mut pending = PendingVotes::new();
        let data = vote_data(1, "proposal");

        for i in 0..2u64 {
            let result = pending.insert_vote(
                &make_vote(&keys[i as usize], i, data.clone(), false),
                &set,
            );
            assert!(
                matches!(result, VoteProcessingResult::Accepted),
                "vote {i} should not form a quorum"
            );
        }

        let result = pending.insert_vote(&make_vote(&keys[2], 2, data.clone(), false), &set);
        let VoteProcessingResult::Quorum(RoundQuorum::Regular(qc)) = result else {
            panic!("third vote should form a QC, got {result:?}");
        };
        assert_eq!(qc.signatures().len(), 3);
        assert_eq!(qc.vote_data(), &data);
    }

    #[test]
    fn test_duplicate_vote_not_double_counted() {
        let (keys, set) = validator_set(4);
        let mut pending = PendingVotes::new();
        let data = vote_data(1, "proposal");

        let vote = make_vote(&keys[0], 0, data.clone(), false);
        assert!(matches!(
            pending.insert_vote(&vote, &set),
            VoteProcessingResult::Accepted
        ));
        assert!(matches!(
            pending.insert_vote(&vote, &set),
            VoteProcessingResult::Rejected(VoteRejectedReason::DuplicateVote)
        ));
    }

    #[test]
    fn test_unknown_author_rejected() {
        let (keys, set) = validator_set(4);
        let mut pending = PendingVotes::new();
        let vote = make_vote(&keys[0], 17, vote_data(1, "proposal"), false);
        assert!(matches!(
            pending.insert_vote(&vote, &set),
            VoteProcessingResult::Rejected(VoteRejectedReason::InvalidAuthor)
        ));
    }

    #[test]
    fn test_double_vote_yields_evidence() {
        let (keys, set) = validator_set(4);
        let mut pending = PendingVotes::new();

        let first = vote_data(1, "first");
        let second = vote_data(1, "second");
        pending.insert_vote(&make_vote(&keys[0], 0, first.clone(), false), &set);
        let result = pending.insert_vote(&make_vote(&keys[0], 0, second.clone(), false), &set);

        let VoteProcessingResult::Rejected(VoteRejectedReason::DoubleVote(evidence)) = result
        else {
            panic!("expected equivocation evidence, got {result:?}");
        };
        let ByzantineEvent::DoubleVote {
            author,
            round,
            first_vote_data,
            second_vote_data,
            ..
        } = *evidence;
        assert_eq!(author, ValidatorId(0));
        assert_eq!(round, Round::of(1));
        assert_eq!(first_vote_data, first.hash());
        assert_eq!(second_vote_data, second.hash());
    }

    #[test]
    fn test_timeout_upgrade_is_not_equivocation() {
        let (keys, set) = validator_set(4);
        let mut pending = PendingVotes::new();
        let data = vote_data(1, "proposal");

        pending.insert_vote(&make_vote(&keys[0], 0, data.clone(), false), &set);
        let result = pending.insert_vote(&make_vote(&keys[0], 0, data, true), &set);
        assert!(
            matches!(result, VoteProcessingResult::Accepted),
            "timeout upgrade should be accepted, got {result:?}"
        );
    }

    #[test]
    fn test_latest_round_wins_retires_old_signature() {
        let (keys, set) = validator_set(4);
        let mut pending = PendingVotes::new();
        let round1 = vote_data(1, "r1");

        // Two votes land on round 1, then validator 0 moves to round 2.
        pending.insert_vote(&make_vote(&keys[0], 0, round1.clone(), false), &set);
        pending.insert_vote(&make_vote(&keys[1], 1, round1.clone(), false), &set);
        pending.insert_vote(&make_vote(&keys[0], 0, vote_data(2, "r2"), false), &set);

        // Validator 2 joins round 1: only 2 signatures remain there, so no
        // quorum even with this third author.
        let result = pending.insert_vote(&make_vote(&keys[2], 2, round1, false), &set);
        assert!(matches!(result, VoteProcessingResult::Accepted));
    }

    #[test]
    fn test_timeout_certificate_forms_from_timeout_votes() {
        let (keys, set) = validator_set(4);
        let mut pending = PendingVotes::new();

        // Validators time out round 1 while voting for divergent vertices;
        // the timeout signatures still aggregate.
        for i in 0..2u64 {
            let data = vote_data(1, &format!("divergent-{i}"));
            let result =
                pending.insert_vote(&make_vote(&keys[i as usize], i, data, true), &set);
            assert!(matches!(result, VoteProcessingResult::Accepted));
        }
        let data = vote_data(1, "divergent-2");
        let result = pending.insert_vote(&make_vote(&keys[2], 2, data, true), &set);
        let VoteProcessingResult::Quorum(RoundQuorum::Timeout(tc)) = result else {
            panic!("expected a timeout certificate, got {result:?}");
        };
        assert_eq!(tc.round, Round::of(1));
        assert_eq!(tc.signatures().len(), 3);
    }

    #[test]
    fn test_stale_round_vote_rejected() {
        let (keys, set) = validator_set(4);
        let mut pending = PendingVotes::new();
        pending.insert_vote(&make_vote(&keys[0], 0, vote_data(5, "r5"), false), &set);
        let result = pending.insert_vote(&make_vote(&keys[0], 0, vote_data(4, "r4"), false), &set);
        assert!(matches!(
            result,
            VoteProcessingResult::Rejected(VoteRejectedReason::DuplicateVote)
        ));
    }
}
