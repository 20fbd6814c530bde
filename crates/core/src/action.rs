//! Actions emitted by the consensus state machine for the runner to execute.

use crate::event::ScheduledTimeout;
use crate::message::OutboundMessage;
use keystone_types::{Epoch, ExecutedVertex, Hash, QuorumCertificate, Round, ValidatorId};
use std::time::Duration;

/// Evidence of protocol misbehavior, surfaced for slashing / reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ByzantineEvent {
    /// One author produced two different votes for the same round.
    DoubleVote {
        author: ValidatorId,
        epoch: Epoch,
        round: Round,
        first_vote_data: Hash,
        second_vote_data: Hash,
    },
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone)]
pub enum Action {
    /// Send a message to every validator (including self delivery where the
    /// runner chooses to loop back).
    Broadcast { message: OutboundMessage },
    /// Send a message to a single validator.
    Send {
        to: ValidatorId,
        message: OutboundMessage,
    },
    /// Arrange for `Event::LocalTimeout(timeout)` after `delay`.
    ScheduleTimeout {
        timeout: ScheduledTimeout,
        delay: Duration,
    },
    /// Hand committed vertices to the execution layer, in commit order.
    /// Fire-and-forget: consensus proceeds without waiting for execution.
    CommitVertices {
        vertices: Vec<ExecutedVertex>,
        commit_qc: QuorumCertificate,
    },
    /// Misbehavior evidence for the reporting pipeline.
    ReportByzantine(ByzantineEvent),
}

impl Action {
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Broadcast { .. } => "Broadcast",
            Action::Send { .. } => "Send",
            Action::ScheduleTimeout { .. } => "ScheduleTimeout",
            Action::CommitVertices { .. } => "CommitVertices",
            Action::ReportByzantine(_) => "ReportByzantine",
        }
    }
}
