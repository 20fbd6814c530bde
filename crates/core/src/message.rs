//! Wire messages exchanged between validators.

use keystone_types::{Hash, HighQc, Signature, Vertex, Vote};
use serde::{Deserialize, Serialize};

/// A leader's proposal for a round: the vertex plus the proposer's signature
/// over the vertex hash and the proposer's view of the highest certificates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalMessage {
    pub vertex: Vertex,
    pub signature: Signature,
    pub high_qc: HighQc,
}

/// Request for `count` vertices starting at `vertex_id` and walking parent
/// links toward the root. Sent when a proposal references an unknown parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexRequest {
    pub vertex_id: Hash,
    pub count: u64,
}

/// Answer to a [`VertexRequest`]: vertices ordered from the requested one
/// down toward the root (newest first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexResponse {
    pub vertices: Vec<Vertex>,
}

/// Everything this node can put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundMessage {
    Proposal(Box<ProposalMessage>),
    Vote(Box<Vote>),
    VertexRequest(VertexRequest),
    VertexResponse(Box<VertexResponse>),
}

impl OutboundMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::Proposal(_) => "Proposal",
            OutboundMessage::Vote(_) => "Vote",
            OutboundMessage::VertexRequest(_) => "VertexRequest",
            OutboundMessage::VertexResponse(_) => "VertexResponse",
        }
    }
}
