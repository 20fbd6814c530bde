//! Events fed into the consensus state machine by the runner.

use crate::message::{ProposalMessage, VertexRequest, VertexResponse};
use keystone_types::{Epoch, Round, Transaction, ValidatorId, Vote};
use serde::{Deserialize, Serialize};

/// A round timeout as scheduled. Carried back verbatim when the timer fires;
/// a fired timeout whose (epoch, round) is no longer current is simply
/// ignored, which is how stale timers are "cancelled".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduledTimeout {
    pub epoch: Epoch,
    pub round: Round,
    /// How many times this round has already timed out.
    pub count: u32,
}

impl ScheduledTimeout {
    pub fn initial(epoch: Epoch, round: Round) -> Self {
        ScheduledTimeout {
            epoch,
            round,
            count: 0,
        }
    }

    pub fn next(&self) -> Self {
        ScheduledTimeout {
            epoch: self.epoch,
            round: self.round,
            count: self.count + 1,
        }
    }
}

/// Input to [`crate::StateMachine::handle`].
#[derive(Debug, Clone)]
pub enum Event {
    /// A proposal arrived from the network.
    ProposalReceived(Box<ProposalMessage>),
    /// A vote arrived from the network.
    VoteReceived(Box<Vote>),
    /// A previously scheduled round timeout fired.
    LocalTimeout(ScheduledTimeout),
    /// A peer asked for a chain of vertices (it is missing a parent).
    VertexRequestReceived {
        from: ValidatorId,
        request: VertexRequest,
    },
    /// A peer answered a vertex request.
    VertexResponseReceived {
        from: ValidatorId,
        response: VertexResponse,
    },
    /// A client submitted a transaction to this node.
    TransactionSubmitted(Transaction),
}

impl Event {
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::ProposalReceived(_) => "ProposalReceived",
            Event::VoteReceived(_) => "VoteReceived",
            Event::LocalTimeout(_) => "LocalTimeout",
            Event::VertexRequestReceived { .. } => "VertexRequestReceived",
            Event::VertexResponseReceived { .. } => "VertexResponseReceived",
            Event::TransactionSubmitted(_) => "TransactionSubmitted",
        }
    }

    /// The epoch this event belongs to, if it is epoch-scoped. Sync
    /// request/response traffic and local submissions are epoch-agnostic.
    pub fn epoch(&self) -> Option<Epoch> {
        match self {
            Event::ProposalReceived(proposal) => Some(proposal.vertex.epoch),
            Event::VoteReceived(vote) => Some(vote.epoch),
            Event::LocalTimeout(timeout) => Some(timeout.epoch),
            Event::VertexRequestReceived { .. }
            | Event::VertexResponseReceived { .. }
            | Event::TransactionSubmitted(_) => None,
        }
    }
}
