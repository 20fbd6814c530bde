//! Seams between the consensus core and its host.

use crate::action::Action;
use crate::event::Event;
use keystone_types::{
    ExecutedVertex, Hash, LedgerHeader, QuorumCertificate, Transaction, VertexWithHash,
};
use std::collections::HashSet;
use std::time::Duration;

/// A synchronous, deterministic event reducer. All I/O happens in the runner;
/// the machine only mutates itself and returns actions.
pub trait StateMachine {
    fn handle(&mut self, event: Event) -> Vec<Action>;

    /// Inject the current wall-clock time. Called by the runner before each
    /// `handle`; protocol code never reads the clock directly.
    fn set_time(&mut self, now: Duration);
}

/// The execution layer as consensus sees it.
pub trait StateComputer: Send + Sync {
    /// Speculatively execute a vertex on top of its uncommitted ancestors
    /// (root-most first) and report the resulting ledger header, or `None`
    /// to reject the vertex. MUST be side-effect-free: prepared state only
    /// becomes real on `commit`.
    fn prepare(
        &self,
        ancestors: &[ExecutedVertex],
        vertex: &VertexWithHash,
    ) -> Option<LedgerHeader>;

    /// Durably apply committed vertices, in order, under the given proof.
    fn commit(&self, vertices: &[ExecutedVertex], proof: &QuorumCertificate);
}

/// Where a leader gets payloads for its proposals.
pub trait TransactionSource {
    /// Up to `max` transactions, excluding any whose hash is in `exclude`
    /// (already pending in uncommitted ancestors).
    fn transactions_for_proposal(&self, max: usize, exclude: &HashSet<Hash>) -> Vec<Transaction>;
}
