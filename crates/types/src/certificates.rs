//! Quorum and timeout certificates.

use crate::crypto::Signature;
use crate::hash::Hash;
use crate::identifiers::{Epoch, Round, ValidatorId};
use crate::ledger::LedgerHeader;
use crate::vote::{BftHeader, VoteData};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A vote signature together with the timestamp it covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampedSignature {
    pub timestamp_ms: u64,
    pub signature: Signature,
}

/// Proof that a quorum of validators voted for the same `VoteData`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCertificate {
    vote_data: VoteData,
    signatures: BTreeMap<ValidatorId, TimestampedSignature>,
}

impl QuorumCertificate {
    pub fn new(
        vote_data: VoteData,
        signatures: BTreeMap<ValidatorId, TimestampedSignature>,
    ) -> Self {
        QuorumCertificate {
            vote_data,
            signatures,
        }
    }

    /// The certificate an epoch starts from. Carries no signatures; it is
    /// implied valid by the committed ledger header it is anchored on, with
    /// proposed == parent == committed at the epoch-initial round.
    pub fn epoch_initial(vertex_id: Hash, ledger_header: LedgerHeader) -> Self {
        let header = BftHeader::new(ledger_header.round, vertex_id, ledger_header);
        QuorumCertificate {
            vote_data: VoteData {
                proposed: header.clone(),
                parent: header.clone(),
                committed: Some(header),
            },
            signatures: BTreeMap::new(),
        }
    }

    pub fn is_epoch_initial(&self) -> bool {
        self.signatures.is_empty()
            && self.vote_data.proposed == self.vote_data.parent
            && self.vote_data.proposed.round.is_initial()
    }

    pub fn vote_data(&self) -> &VoteData {
        &self.vote_data
    }

    pub fn proposed(&self) -> &BftHeader {
        &self.vote_data.proposed
    }

    pub fn parent(&self) -> &BftHeader {
        &self.vote_data.parent
    }

    pub fn committed_header(&self) -> Option<&BftHeader> {
        self.vote_data.committed.as_ref()
    }

    pub fn round(&self) -> Round {
        self.vote_data.proposed.round
    }

    pub fn epoch(&self) -> Epoch {
        self.vote_data.proposed.ledger_header.epoch
    }

    pub fn certified_vertex_id(&self) -> Hash {
        self.vote_data.proposed.vertex_id
    }

    pub fn signatures(&self) -> &BTreeMap<ValidatorId, TimestampedSignature> {
        &self.signatures
    }

    pub fn hash(&self) -> Hash {
        Hash::of_encoded(self)
    }
}

/// Proof that a quorum of validators timed out the same (epoch, round).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutCertificate {
    pub epoch: Epoch,
    pub round: Round,
    signatures: BTreeMap<ValidatorId, TimestampedSignature>,
}

impl TimeoutCertificate {
    pub fn new(
        epoch: Epoch,
        round: Round,
        signatures: BTreeMap<ValidatorId, TimestampedSignature>,
    ) -> Self {
        TimeoutCertificate {
            epoch,
            round,
            signatures,
        }
    }

    pub fn signatures(&self) -> &BTreeMap<ValidatorId, TimestampedSignature> {
        &self.signatures
    }

    pub fn hash(&self) -> Hash {
        Hash::of_encoded(self)
    }
}

/// The highest certificates a node knows of. Exchanged on every proposal and
/// vote so peers can catch up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighQc {
    pub highest_qc: QuorumCertificate,
    pub highest_committed_qc: QuorumCertificate,
    pub highest_tc: Option<TimeoutCertificate>,
}

impl HighQc {
    pub fn initial(epoch_initial_qc: QuorumCertificate) -> Self {
        HighQc {
            highest_qc: epoch_initial_qc.clone(),
            highest_committed_qc: epoch_initial_qc,
            highest_tc: None,
        }
    }

    /// The highest round any carried certificate certifies; the next round
    /// to run is one past this.
    pub fn highest_round(&self) -> Round {
        let qc_round = self.highest_qc.round();
        match &self.highest_tc {
            Some(tc) if tc.round > qc_round => tc.round,
            _ => qc_round,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_initial_qc_shape() {
        let header = LedgerHeader::genesis();
        let qc = QuorumCertificate::epoch_initial(Hash::of(b"root"), header);
        assert!(qc.is_epoch_initial());
        assert_eq!(qc.round(), Round::initial());
        assert_eq!(qc.proposed(), qc.parent());
        assert_eq!(qc.committed_header(), Some(qc.proposed()));
    }

    #[test]
    fn test_high_qc_highest_round_prefers_tc_when_higher() {
        let qc = QuorumCertificate::epoch_initial(Hash::of(b"root"), LedgerHeader::genesis());
        let mut high_qc = HighQc::initial(qc);
        assert_eq!(high_qc.highest_round(), Round::initial());

        high_qc.highest_tc = Some(TimeoutCertificate::new(
            Epoch::GENESIS,
            Round::of(5),
            BTreeMap::new(),
        ));
        assert_eq!(high_qc.highest_round(), Round::of(5));
    }
}
