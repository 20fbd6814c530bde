//! Vertices: the units of the proposal DAG.

use crate::certificates::QuorumCertificate;
use crate::hash::Hash;
use crate::identifiers::{Epoch, Round, ValidatorId};
use crate::ledger::LedgerHeader;
use crate::transaction::Transaction;
use crate::vote::BftHeader;
use serde::{Deserialize, Serialize};

/// A proposed extension of the chain: a payload anchored on a parent via the
/// parent's quorum certificate.
///
/// `parent_qc` and `proposer` are `None` only for the epoch-initial vertex,
/// which is implicitly committed and never voted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
    pub epoch: Epoch,
    pub round: Round,
    parent_qc: Option<QuorumCertificate>,
    payload: Vec<Transaction>,
    pub proposer: Option<ValidatorId>,
    pub timestamp_ms: u64,
}

impl Vertex {
    pub fn create(
        parent_qc: QuorumCertificate,
        round: Round,
        payload: Vec<Transaction>,
        proposer: ValidatorId,
        timestamp_ms: u64,
    ) -> Self {
        Vertex {
            epoch: parent_qc.epoch(),
            round,
            parent_qc: Some(parent_qc),
            payload,
            proposer: Some(proposer),
            timestamp_ms,
        }
    }

    /// The root vertex an epoch starts from.
    pub fn epoch_initial(epoch: Epoch, timestamp_ms: u64) -> Self {
        Vertex {
            epoch,
            round: Round::initial(),
            parent_qc: None,
            payload: Vec::new(),
            proposer: None,
            timestamp_ms,
        }
    }

    /// The vertex voted on when a round times out. Every field is derived
    /// deterministically from the parent QC and the round's leader, so all
    /// validators compute the same vertex hash without communicating.
    pub fn fallback(parent_qc: QuorumCertificate, round: Round, leader: ValidatorId) -> Self {
        let timestamp_ms = parent_qc.proposed().ledger_header.timestamp_ms;
        Vertex {
            epoch: parent_qc.epoch(),
            round,
            parent_qc: Some(parent_qc),
            payload: Vec::new(),
            proposer: Some(leader),
            timestamp_ms,
        }
    }

    pub fn parent_qc(&self) -> Option<&QuorumCertificate> {
        self.parent_qc.as_ref()
    }

    /// `None` for the epoch-initial vertex.
    pub fn parent_id(&self) -> Option<Hash> {
        self.parent_qc.as_ref().map(|qc| qc.certified_vertex_id())
    }

    pub fn parent_header(&self) -> Option<&BftHeader> {
        self.parent_qc.as_ref().map(|qc| qc.proposed())
    }

    pub fn grandparent_header(&self) -> Option<&BftHeader> {
        self.parent_qc.as_ref().map(|qc| qc.parent())
    }

    pub fn payload(&self) -> &[Transaction] {
        &self.payload
    }

    pub fn is_epoch_initial(&self) -> bool {
        self.parent_qc.is_none()
    }

    pub fn with_id(self) -> VertexWithHash {
        let hash = Hash::of_encoded(&self);
        VertexWithHash { vertex: self, hash }
    }
}

/// A vertex paired with its content hash, computed once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexWithHash {
    vertex: Vertex,
    hash: Hash,
}

impl VertexWithHash {
    pub fn vertex(&self) -> &Vertex {
        &self.vertex
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn round(&self) -> Round {
        self.vertex.round
    }

    pub fn epoch(&self) -> Epoch {
        self.vertex.epoch
    }
}

/// A vertex that passed speculative execution, together with the ledger
/// header `prepare` produced for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedVertex {
    vertex: VertexWithHash,
    ledger_header: LedgerHeader,
}

impl ExecutedVertex {
    pub fn new(vertex: VertexWithHash, ledger_header: LedgerHeader) -> Self {
        ExecutedVertex {
            vertex,
            ledger_header,
        }
    }

    pub fn vertex_with_hash(&self) -> &VertexWithHash {
        &self.vertex
    }

    pub fn vertex(&self) -> &Vertex {
        self.vertex.vertex()
    }

    pub fn hash(&self) -> Hash {
        self.vertex.hash()
    }

    pub fn round(&self) -> Round {
        self.vertex.round()
    }

    pub fn ledger_header(&self) -> &LedgerHeader {
        &self.ledger_header
    }

    pub fn bft_header(&self) -> BftHeader {
        BftHeader::new(self.round(), self.hash(), self.ledger_header.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::QuorumCertificate;

    #[test]
    fn test_vertex_hash_changes_with_payload() {
        let qc = QuorumCertificate::epoch_initial(Hash::of(b"root"), LedgerHeader::genesis());
        let a = Vertex::create(
            qc.clone(),
            Round::of(1),
            vec![Transaction(b"a".to_vec())],
            ValidatorId(0),
            100,
        )
        .with_id();
        let b = Vertex::create(
            qc,
            Round::of(1),
            vec![Transaction(b"b".to_vec())],
            ValidatorId(0),
            100,
        )
        .with_id();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_fallback_vertex_is_deterministic() {
        let qc = QuorumCertificate::epoch_initial(Hash::of(b"root"), LedgerHeader::genesis());
        let a = Vertex::fallback(qc.clone(), Round::of(3), ValidatorId(2)).with_id();
        let b = Vertex::fallback(qc, Round::of(3), ValidatorId(2)).with_id();
        assert_eq!(a.hash(), b.hash());
        assert!(a.vertex().payload().is_empty());
    }

    #[test]
    fn test_epoch_initial_vertex_has_no_parent() {
        let v = Vertex::epoch_initial(Epoch::GENESIS, 0);
        assert!(v.is_epoch_initial());
        assert!(v.parent_id().is_none());
    }
}
