//! Ledger headers produced by the state computer.

use crate::hash::Hash;
use crate::identifiers::{Epoch, Round};
use crate::validator::ValidatorSet;
use serde::{Deserialize, Serialize};

/// Summary of the ledger state that results from executing a vertex.
///
/// Produced by `prepare` (speculatively, side-effect-free) and finalized on
/// commit. A header carrying `next_validator_set` marks the end of its epoch
/// once committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHeader {
    pub epoch: Epoch,
    pub round: Round,
    pub state_version: u64,
    pub state_root: Hash,
    pub timestamp_ms: u64,
    pub next_validator_set: Option<ValidatorSet>,
}

impl LedgerHeader {
    /// The committed header an epoch is anchored on, at the epoch-initial
    /// round.
    pub fn epoch_initial(
        epoch: Epoch,
        state_version: u64,
        state_root: Hash,
        timestamp_ms: u64,
    ) -> Self {
        LedgerHeader {
            epoch,
            round: Round::initial(),
            state_version,
            state_root,
            timestamp_ms,
            next_validator_set: None,
        }
    }

    pub fn genesis() -> Self {
        Self::epoch_initial(Epoch::GENESIS, 0, Hash::ZERO, 0)
    }

    pub fn is_epoch_change(&self) -> bool {
        self.next_validator_set.is_some()
    }
}
