//! Domain-separated signing messages.
//!
//! Every signature in the protocol covers a message prefixed with a domain
//! tag, so a signature produced for one purpose can never be replayed as
//! another (a vote signature is not a timeout signature is not a proposal
//! signature).

use crate::hash::Hash;
use crate::identifiers::{Epoch, Round};

const DOMAIN_VOTE: &[u8] = b"keystone/vote/v1";
const DOMAIN_TIMEOUT: &[u8] = b"keystone/timeout/v1";
const DOMAIN_PROPOSAL: &[u8] = b"keystone/proposal/v1";

/// The message signed by a vote: the vote data hash bound to epoch and
/// timestamp.
pub fn vote_message(epoch: Epoch, vote_data_hash: &Hash, timestamp_ms: u64) -> Vec<u8> {
    let mut msg = Vec::with_capacity(DOMAIN_VOTE.len() + 8 + 8 + 32);
    msg.extend_from_slice(DOMAIN_VOTE);
    msg.extend_from_slice(&epoch.number().to_le_bytes());
    msg.extend_from_slice(&timestamp_ms.to_le_bytes());
    msg.extend_from_slice(vote_data_hash.as_bytes());
    msg
}

/// The message signed by a timeout signature: just (epoch, round), so
/// timeout signatures over different vote data still aggregate into one
/// timeout certificate.
pub fn timeout_message(epoch: Epoch, round: Round) -> Vec<u8> {
    let mut msg = Vec::with_capacity(DOMAIN_TIMEOUT.len() + 8 + 8);
    msg.extend_from_slice(DOMAIN_TIMEOUT);
    msg.extend_from_slice(&epoch.number().to_le_bytes());
    msg.extend_from_slice(&round.number().to_le_bytes());
    msg
}

/// The message signed by a proposer over its proposed vertex.
pub fn proposal_message(vertex_id: &Hash) -> Vec<u8> {
    let mut msg = Vec::with_capacity(DOMAIN_PROPOSAL.len() + 32);
    msg.extend_from_slice(DOMAIN_PROPOSAL);
    msg.extend_from_slice(vertex_id.as_bytes());
    msg
}
