//! Shared fixtures for consensus tests.

use keystone_core::{StateComputer, TransactionSource};
use keystone_types::test_utils::validator_set;
use keystone_types::{
    BftHeader, Epoch, ExecutedVertex, Hash, HighQc, KeyPair, LedgerHeader, QuorumCertificate,
    Round, Transaction, ValidatorSet, Vertex, VertexWithHash, VoteData,
};
use std::collections::HashSet;
use std::sync::Mutex;

/// A deterministic state computer: every vertex prepares successfully with a
/// header derived from the vertex itself, and commits are recorded for
/// assertions. Optionally emits an epoch change at a configured round.
pub struct FixedStateComputer {
    committed: Mutex<Vec<Hash>>,
    epoch_change_at: Option<(Round, ValidatorSet)>,
}

impl FixedStateComputer {
    pub fn new() -> Self {
        FixedStateComputer {
            committed: Mutex::new(Vec::new()),
            epoch_change_at: None,
        }
    }

    /// Produce `next_validator_set` in the header of vertices at `round`.
    pub fn with_epoch_change_at(round: Round, next_set: ValidatorSet) -> Self {
        FixedStateComputer {
            committed: Mutex::new(Vec::new()),
            epoch_change_at: Some((round, next_set)),
        }
    }

    /// Hashes of committed vertices, in commit order.
    pub fn committed(&self) -> Vec<Hash> {
        self.committed.lock().unwrap().clone()
    }
}

impl Default for FixedStateComputer {
    fn default() -> Self {
        Self::new()
    }
}

impl StateComputer for FixedStateComputer {
    fn prepare(
        &self,
        _ancestors: &[ExecutedVertex],
        vertex: &VertexWithHash,
    ) -> Option<LedgerHeader> {
        let next_validator_set = match &self.epoch_change_at {
            Some((round, set)) if *round == vertex.round() => Some(set.clone()),
            _ => None,
        };
        Some(LedgerHeader {
            epoch: vertex.epoch(),
            round: vertex.round(),
            state_version: vertex.round().number(),
            state_root: Hash::of(vertex.hash().as_bytes()),
            timestamp_ms: vertex.vertex().timestamp_ms,
            next_validator_set,
        })
    }

    fn commit(&self, vertices: &[ExecutedVertex], _proof: &QuorumCertificate) {
        let mut committed = self.committed.lock().unwrap();
        committed.extend(vertices.iter().map(|v| v.hash()));
    }
}

/// A fixed list of transactions handed out to proposals.
pub struct StaticTransactionSource {
    transactions: Vec<Transaction>,
}

impl StaticTransactionSource {
    pub fn new(transactions: Vec<Transaction>) -> Self {
        StaticTransactionSource { transactions }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl TransactionSource for StaticTransactionSource {
    fn transactions_for_proposal(&self, max: usize, exclude: &HashSet<Hash>) -> Vec<Transaction> {
        self.transactions
            .iter()
            .filter(|tx| !exclude.contains(&tx.hash()))
            .take(max)
            .cloned()
            .collect()
    }
}

/// Keys, validator set and the genesis root vertex + high QC for `n` equal
/// validators.
pub fn genesis_setup(n: usize) -> (Vec<KeyPair>, ValidatorSet, ExecutedVertex, HighQc) {
    let (keys, set) = validator_set(n);
    let (root, high_qc) = epoch_anchor(Epoch::GENESIS, LedgerHeader::genesis());
    (keys, set, root, high_qc)
}

/// The epoch-initial root vertex and high QC anchored on a committed header.
pub fn epoch_anchor(epoch: Epoch, anchor: LedgerHeader) -> (ExecutedVertex, HighQc) {
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

/// The vote data a correct validator produces for an executed vertex,
/// including the 3-chain committed header when the rounds line up.
pub fn vote_data_for(executed: &ExecutedVertex) -> VoteData {
    let vertex = executed.vertex();
    let parent = vertex
        .parent_header()
        .cloned()
        .expect("test vertices always have parents");
    let committed = vertex.grandparent_header().and_then(|gp| {
        let direct = executed.round() == parent.round.next() && parent.round == gp.round.next();
        (direct && !gp.round.is_initial()).then(|| gp.clone())
    });
    VoteData {
        proposed: executed.bft_header(),
        parent,
        committed,
    }
}

/// An unsigned certificate over an executed vertex. Only for store-level
/// tests that skip signature verification.
pub fn qc_over(executed: &ExecutedVertex) -> QuorumCertificate {
    QuorumCertificate::new(vote_data_for(executed), Default::default())
}

/// A header for an arbitrary round, for hand-built vote data.
pub fn header_at(epoch: Epoch, round: u64, tag: &str) -> BftHeader {
    let vertex_id = Hash::of(tag.as_bytes());
    BftHeader::new(
        Round::of(round),
        vertex_id,
        LedgerHeader {
            epoch,
            round: Round::of(round),
            state_version: round,
            state_root: Hash::of(tag.as_bytes()),
            timestamp_ms: round * 100,
            next_validator_set: None,
        },
    )
}
