//! Voting safety rules.
//!
//! Two checks stand between a proposal and a vote:
//!
//! 1. the vote round must be strictly greater than the last voted round, and
//! 2. the proposal's parent round must not be below the locked round.
//!
//! The updated safety state is persisted through the [`SafetyStateStore`]
//! BEFORE the vote is handed back. If the persist fails, no vote exists; a
//! validator that crashes right after persisting simply reloads the state
//! and refuses to vote again in that round.

use keystone_types::signing;
use keystone_types::{
    Epoch, ExecutedVertex, Hash, HighQc, KeyPair, QuorumCertificate, Round, SafetyState,
    Signature, TimeoutCertificate, ValidatorId, ValidatorSet, Vote, VoteData,
};
use keystone_storage::{SafetyStateStore, StorageError};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("{round} is not after last voted {last_voted}")]
    AlreadyVoted { round: Round, last_voted: Round },
    #[error("parent {parent} is below locked {locked}")]
    LockedRoundViolation { parent: Round, locked: Round },
    #[error("cannot vote on an epoch-initial vertex")]
    EpochInitialVertex,
    #[error("quorum certificate invalid: {reason}")]
    InvalidQc { reason: &'static str },
    #[error("timeout certificate invalid: {reason}")]
    InvalidTc { reason: &'static str },
    #[error("safety state persistence failed: {0}")]
    Storage(#[from] StorageError),
}

pub struct SafetyRules {
    self_id: ValidatorId,
    keys: KeyPair,
    validator_set: ValidatorSet,
    store: Arc<dyn SafetyStateStore>,
    state: SafetyState,
    // Certificates already verified against the validator set, by hash.
    verified_certificates: LruCache<Hash, ()>,
}

impl SafetyRules {
    /// Load persisted state for `epoch`, or start from the epoch-initial
    /// state when nothing (or only an older epoch) is on disk.
    pub fn new(
        self_id: ValidatorId,
        keys: KeyPair,
        epoch: Epoch,
        validator_set: ValidatorSet,
        store: Arc<dyn SafetyStateStore>,
        certificate_cache: usize,
    ) -> Result<Self, StorageError> {
        let state = match store.get()? {
            Some(state) if state.epoch == epoch => {
                debug!(
                    %epoch,
                    locked_round = %state.locked_round,
                    last_voted_round = %state.last_voted_round(),
                    "Recovered safety state"
                );
                state
            }
            _ => SafetyState::initial(epoch),
        };
        let cache_size = NonZeroUsize::new(certificate_cache).unwrap_or(NonZeroUsize::MIN);
        Ok(SafetyRules {
            self_id,
            keys,
            validator_set,
            store,
            state,
            verified_certificates: LruCache::new(cache_size),
        })
    }

    pub fn state(&self) -> &SafetyState {
        &self.state
    }

    /// Vote on an executed vertex if it is safe to do so. Persists the
    /// updated safety state before returning the vote.
    pub fn create_vote(
        &mut self,
        executed: &ExecutedVertex,
        high_qc: HighQc,
        timestamp_ms: u64,
    ) -> Result<Vote, SafetyError> {
        let round = executed.round();
        let last_voted = self.state.last_voted_round();
        if round <= last_voted {
            return Err(SafetyError::AlreadyVoted { round, last_voted });
        }

        let vertex = executed.vertex();
        let parent = vertex
            .parent_header()
            .cloned()
            .ok_or(SafetyError::EpochInitialVertex)?;
        if parent.round < self.state.locked_round {
            return Err(SafetyError::LockedRoundViolation {
                parent: parent.round,
                locked: self.state.locked_round,
            });
        }

        // A QC over this vertex's parent makes the grandparent the head of a
        // 2-chain; move the lock up to it.
        let new_locked = vertex
            .grandparent_header()
            .map(|gp| gp.round)
            .filter(|r| *r > self.state.locked_round);

        let committed = vertex.grandparent_header().and_then(|gp| {
            let direct = round == parent.round.next() && parent.round == gp.round.next();
            (direct && !gp.round.is_initial()).then(|| gp.clone())
        });

        let vote_data = VoteData {
            proposed: executed.bft_header(),
            parent,
            committed,
        };
        let signature = self.keys.sign(&signing::vote_message(
            self.state.epoch,
            &vote_data.hash(),
            timestamp_ms,
        ));
        let vote = Vote {
            author: self.self_id,
            epoch: self.state.epoch,
            vote_data,
            timestamp_ms,
            signature,
            high_qc,
            timeout_signature: None,
        };

        if let Some(locked) = new_locked {
            self.state.locked_round = locked;
        }
        self.state.last_vote = Some(vote.clone());
        self.store.put(&self.state)?;

        trace!(%round, locked = %self.state.locked_round, "Vote created");
        Ok(vote)
    }

    /// Add a timeout signature to a vote and persist the result. Idempotent:
    /// a vote that already carries one is returned unchanged.
    pub fn timeout_vote(&mut self, vote: Vote) -> Result<Vote, StorageError> {
        if vote.is_timeout() {
            return Ok(vote);
        }
        let timeout_signature = self
            .keys
            .sign(&signing::timeout_message(vote.epoch, vote.round()));
        let vote = Vote {
            timeout_signature: Some(timeout_signature),
            ..vote
        };
        self.state.last_vote = Some(vote.clone());
        self.store.put(&self.state)?;
        debug!(round = %vote.round(), "Timeout vote created");
        Ok(vote)
    }

    /// The persisted last vote, but only if it was cast in exactly `round`.
    pub fn last_vote(&self, round: Round) -> Option<Vote> {
        self.state
            .last_vote
            .as_ref()
            .filter(|v| v.round() == round)
            .cloned()
    }

    /// Sign a vertex this node is proposing. Refuses to propose against its
    /// own lock.
    pub fn sign_proposal(&self, vertex_id: Hash, parent_round: Round) -> Result<Signature, SafetyError> {
        if parent_round < self.state.locked_round {
            return Err(SafetyError::LockedRoundViolation {
                parent: parent_round,
                locked: self.state.locked_round,
            });
        }
        Ok(self.keys.sign(&signing::proposal_message(&vertex_id)))
    }

    /// Verify a QC's signature set carries quorum power from the current
    /// validator set. Epoch-initial certificates are implied valid by the
    /// committed header they anchor on.
    pub fn verify_qc(&mut self, qc: &QuorumCertificate) -> Result<(), SafetyError> {
        if qc.is_epoch_initial() {
            return Ok(());
        }
        let hash = qc.hash();
        if self.verified_certificates.contains(&hash) {
            return Ok(());
        }

        let vote_data_hash = qc.vote_data().hash();
        let mut power = 0u64;
        for (author, ts_sig) in qc.signatures() {
            let info = self
                .validator_set
                .get(*author)
                .ok_or(SafetyError::InvalidQc {
                    reason: "signer not in validator set",
                })?;
            let message =
                signing::vote_message(qc.epoch(), &vote_data_hash, ts_sig.timestamp_ms);
            info.public_key
                .verify(&message, &ts_sig.signature)
                .map_err(|_| SafetyError::InvalidQc {
                    reason: "bad signature",
                })?;
            power += info.voting_power;
        }
        if power < self.validator_set.quorum_threshold() {
            return Err(SafetyError::InvalidQc {
                reason: "insufficient voting power",
            });
        }

        self.verified_certificates.put(hash, ());
        Ok(())
    }

    pub fn verify_tc(&mut self, tc: &TimeoutCertificate) -> Result<(), SafetyError> {
        let hash = tc.hash();
        if self.verified_certificates.contains(&hash) {
            return Ok(());
        }

        let message = signing::timeout_message(tc.epoch, tc.round);
        let mut power = 0u64;
        for (author, ts_sig) in tc.signatures() {
            let info = self
                .validator_set
                .get(*author)
                .ok_or(SafetyError::InvalidTc {
                    reason: "signer not in validator set",
                })?;
            info.public_key
                .verify(&message, &ts_sig.signature)
                .map_err(|_| SafetyError::InvalidTc {
                    reason: "bad signature",
                })?;
            power += info.voting_power;
        }
        if power < self.validator_set.quorum_threshold() {
            return Err(SafetyError::InvalidTc {
                reason: "insufficient voting power",
            });
        }

        self.verified_certificates.put(hash, ());
        Ok(())
    }

    pub fn verify_high_qc(&mut self, high_qc: &HighQc) -> Result<(), SafetyError> {
        self.verify_qc(&high_qc.highest_qc)?;
        self.verify_qc(&high_qc.highest_committed_qc)?;
        if let Some(tc) = &high_qc.highest_tc {
            self.verify_tc(tc)?;
        }
        Ok(())
    }
}
