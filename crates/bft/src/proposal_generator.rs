//! Builds the vertex a leader proposes.

use crate::pacemaker::RoundUpdate;
use crate::vertex_store::VertexStore;
use keystone_core::TransactionSource;
use keystone_types::{Hash, Vertex, VertexWithHash};
use std::collections::HashSet;

pub struct ProposalGenerator {
    self_id: keystone_types::ValidatorId,
    max_transactions: usize,
}

impl ProposalGenerator {
    pub fn new(self_id: keystone_types::ValidatorId, max_transactions: usize) -> Self {
        ProposalGenerator {
            self_id,
            max_transactions,
        }
    }

    /// A vertex extending the highest QC, filled with transactions that are
    /// not already pending in the uncommitted chain below it. The timestamp
    /// never runs backwards relative to the parent.
    pub fn generate(
        &self,
        vertex_store: &VertexStore,
        round_update: &RoundUpdate,
        transactions: &dyn TransactionSource,
        now_ms: u64,
    ) -> VertexWithHash {
        let parent_qc = round_update.high_qc.highest_qc.clone();

        let pending: HashSet<Hash> = vertex_store
            .path_from_root(parent_qc.certified_vertex_id())
            .iter()
            .flat_map(|v| v.vertex().payload().iter().map(|tx| tx.hash()))
            .collect();
        let payload = transactions.transactions_for_proposal(self.max_transactions, &pending);

        let parent_timestamp = parent_qc.proposed().ledger_header.timestamp_ms;
        let timestamp_ms = now_ms.max(parent_timestamp);

        Vertex::create(
            parent_qc,
            round_update.current_round,
            payload,
            self.self_id,
            timestamp_ms,
        )
        .with_id()
    }
}
