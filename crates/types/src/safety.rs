//! Persisted voting-safety state.

use crate::identifiers::{Epoch, Round};
use crate::vote::Vote;
use serde::{Deserialize, Serialize};

/// The state a validator must never lose: everything needed to avoid voting
/// twice in a round or voting against a lock after a crash.
///
/// Persisted before any vote leaves the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyState {
    pub epoch: Epoch,
    /// The highest 2-chain head seen; never vote for a proposal whose parent
    /// round is below this.
    pub locked_round: Round,
    pub last_vote: Option<Vote>,
}

impl SafetyState {
    pub fn initial(epoch: Epoch) -> Self {
        SafetyState {
            epoch,
            locked_round: Round::initial(),
            last_vote: None,
        }
    }

    pub fn last_voted_round(&self) -> Round {
        self.last_vote
            .as_ref()
            .map(|v| v.round())
            .unwrap_or_else(Round::initial)
    }
}
