//! Votes and the headers they certify.

use crate::certificates::HighQc;
use crate::crypto::Signature;
use crate::hash::Hash;
use crate::identifiers::{Epoch, Round, ValidatorId};
use crate::ledger::LedgerHeader;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A consensus header: a vertex together with the ledger state its execution
/// would produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BftHeader {
    pub round: Round,
    pub vertex_id: Hash,
    pub ledger_header: LedgerHeader,
}

impl BftHeader {
    pub fn new(round: Round, vertex_id: Hash, ledger_header: LedgerHeader) -> Self {
        BftHeader {
            round,
            vertex_id,
            ledger_header,
        }
    }
}

/// What a vote certifies: the proposed vertex, its parent, and (when the
/// 3-chain rule allows) the header that becomes committed once this vote data
/// gathers a quorum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteData {
    pub proposed: BftHeader,
    pub parent: BftHeader,
    pub committed: Option<BftHeader>,
}

impl VoteData {
    pub fn hash(&self) -> Hash {
        Hash::of_encoded(self)
    }
}

/// A signed vote for one vertex in one round.
///
/// `timeout_signature` is present when the author has timed out the round; it
/// signs (epoch, round) only, so timeout signatures over divergent vote data
/// still aggregate into a timeout certificate.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub author: ValidatorId,
    pub epoch: Epoch,
    pub vote_data: VoteData,
    pub timestamp_ms: u64,
    pub signature: Signature,
    pub high_qc: HighQc,
    pub timeout_signature: Option<Signature>,
}

impl Vote {
    pub fn round(&self) -> Round {
        self.vote_data.proposed.round
    }

    pub fn vertex_id(&self) -> Hash {
        self.vote_data.proposed.vertex_id
    }

    pub fn is_timeout(&self) -> bool {
        self.timeout_signature.is_some()
    }
}

impl fmt::Debug for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vote")
            .field("author", &self.author)
            .field("epoch", &self.epoch)
            .field("round", &self.round())
            .field("vertex", &self.vertex_id())
            .field("timeout", &self.is_timeout())
            .finish()
    }
}
