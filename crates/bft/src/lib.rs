//! The keystone consensus protocol: a chained BFT engine.
//!
//! Responsibilities are split the same way as the event model suggests:
//!
//! - [`VertexStore`]: the DAG of uncommitted proposals, anchored at the last
//!   committed vertex; commits and prunes on quorum certificates.
//! - [`SafetyRules`]: decides whether voting is safe and persists the
//!   safety-critical state before any vote leaves the node.
//! - [`PendingVotes`]: aggregates vote signatures into quorum and timeout
//!   certificates.
//! - [`Pacemaker`]: keeps rounds moving; schedules timeouts with exponential
//!   backoff and produces proposals and (timeout) votes.
//! - [`ConsensusDriver`]: the per-epoch reducer wiring the above together.
//! - [`EpochManager`]: routes events by epoch and rotates the machinery when
//!   a committed header changes the validator set.
//!
//! Everything here is synchronous and deterministic; all I/O is delegated to
//! the runner through actions.

mod config;
mod driver;
mod election;
mod epoch_manager;
mod pacemaker;
mod pending_votes;
mod proposal_generator;
mod safety_rules;
mod vertex_store;

pub mod test_utils;

pub use config::BftConfig;
pub use driver::{ConsensusDriver, DriverError};
pub use election::{ProposerElection, RotatingLeaders, WeightedRotatingLeaders};
pub use epoch_manager::EpochManager;
pub use pacemaker::{ExponentialTimeoutCalculator, Pacemaker, RoundStatus, RoundUpdate};
pub use pending_votes::{PendingVotes, RoundQuorum, VoteProcessingResult, VoteRejectedReason};
pub use proposal_generator::ProposalGenerator;
pub use safety_rules::{SafetyError, SafetyRules};
pub use vertex_store::{CommittedUpdate, InsertError, InsertQcResult, VertexStore};
