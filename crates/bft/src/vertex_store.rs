//! The vertex store: the DAG of uncommitted proposals.
//!
//! The store is anchored at the root, the most recently committed vertex.
//! Inserting a vertex speculatively executes it (via `StateComputer::prepare`)
//! on top of its uncommitted ancestors. Inserting a quorum certificate whose
//! committed header is past the root commits the path from the root to that
//! header, makes the committed vertex the new root, and prunes every branch
//! that is not a descendant of it.

use keystone_core::StateComputer;
use keystone_types::{
    ExecutedVertex, Hash, HighQc, QuorumCertificate, Round, TimeoutCertificate, VertexWithHash,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InsertError {
    #[error("missing parent vertex {0:?}")]
    MissingParent(Hash),
    #[error("vertex belongs to a different epoch")]
    WrongEpoch,
    #[error("unexpected epoch-initial vertex")]
    UnexpectedEpochInitial,
    #[error("vertex store is full")]
    Full,
    #[error("vertex rejected by execution prepare")]
    PrepareRejected,
}

/// Outcome of inserting a quorum certificate.
#[derive(Debug)]
pub enum InsertQcResult {
    /// Certificate accepted; `committed` is set when it advanced the root.
    Inserted { committed: Option<CommittedUpdate> },
    /// The certified vertex is not in the store; the caller should sync.
    VertexMissing,
    /// Stale or duplicate certificate, no state change.
    Ignored,
}

/// Vertices committed by one certificate, in commit (chain) order.
#[derive(Debug, Clone)]
pub struct CommittedUpdate {
    pub vertices: Vec<ExecutedVertex>,
    pub commit_qc: QuorumCertificate,
}

pub struct VertexStore {
    state_computer: Arc<dyn StateComputer>,
    root: ExecutedVertex,
    vertices: HashMap<Hash, ExecutedVertex>,
    children: HashMap<Hash, Vec<Hash>>,
    high_qc: HighQc,
    max_vertices: usize,
}

impl VertexStore {
    pub fn new(
        root: ExecutedVertex,
        high_qc: HighQc,
        state_computer: Arc<dyn StateComputer>,
        max_vertices: usize,
    ) -> Self {
        VertexStore {
            state_computer,
            root,
            vertices: HashMap::new(),
            children: HashMap::new(),
            high_qc,
            max_vertices,
        }
    }

    pub fn root(&self) -> &ExecutedVertex {
        &self.root
    }

    pub fn high_qc(&self) -> &HighQc {
        &self.high_qc
    }

    pub fn contains(&self, vertex_id: Hash) -> bool {
        self.get(vertex_id).is_some()
    }

    pub fn get(&self, vertex_id: Hash) -> Option<&ExecutedVertex> {
        if vertex_id == self.root.hash() {
            Some(&self.root)
        } else {
            self.vertices.get(&vertex_id)
        }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Insert a vertex whose parent is already present, executing it
    /// speculatively. Re-inserting a known vertex is a no-op returning the
    /// stored result.
    pub fn insert_vertex(&mut self, vertex: VertexWithHash) -> Result<ExecutedVertex, InsertError> {
        if let Some(existing) = self.get(vertex.hash()) {
            return Ok(existing.clone());
        }
        if vertex.epoch() != self.root.vertex().epoch {
            return Err(InsertError::WrongEpoch);
        }
        let parent_id = vertex
            .vertex()
            .parent_id()
            .ok_or(InsertError::UnexpectedEpochInitial)?;
        if !self.contains(parent_id) {
            return Err(InsertError::MissingParent(parent_id));
        }
        if self.vertices.len() >= self.max_vertices {
            return Err(InsertError::Full);
        }

        let ancestors = self.uncommitted_chain_to(parent_id);
        let ledger_header = self
            .state_computer
            .prepare(&ancestors, &vertex)
            .ok_or(InsertError::PrepareRejected)?;

        trace!(
            vertex = ?vertex.hash(),
            round = %vertex.round(),
            "Vertex inserted"
        );

        let executed = ExecutedVertex::new(vertex, ledger_header);
        self.children
            .entry(parent_id)
            .or_default()
            .push(executed.hash());
        self.vertices.insert(executed.hash(), executed.clone());
        Ok(executed)
    }

    /// Insert a quorum certificate. Commits when its committed header is past
    /// the root.
    pub fn insert_qc(&mut self, qc: QuorumCertificate) -> InsertQcResult {
        if !self.contains(qc.certified_vertex_id()) {
            return InsertQcResult::VertexMissing;
        }

        let commits_newer = qc
            .committed_header()
            .map(|c| c.round > self.root.round())
            .unwrap_or(false);
        if qc.round() < self.root.round()
            || (qc.round() <= self.high_qc.highest_qc.round() && !commits_newer)
        {
            return InsertQcResult::Ignored;
        }

        if qc.round() > self.high_qc.highest_qc.round() {
            self.high_qc.highest_qc = qc.clone();
        }

        let committed = if commits_newer {
            // unwrap-free: commits_newer implies the header is present
            let committed_id = qc
                .committed_header()
                .map(|c| c.vertex_id)
                .unwrap_or_else(|| self.root.hash());
            self.high_qc.highest_committed_qc = qc.clone();
            Some(self.commit(committed_id, qc))
        } else {
            None
        };

        InsertQcResult::Inserted { committed }
    }

    /// Keep the highest timeout certificate seen.
    pub fn insert_timeout_certificate(&mut self, tc: TimeoutCertificate) -> bool {
        match &self.high_qc.highest_tc {
            Some(current) if current.round >= tc.round => false,
            _ => {
                debug!(round = %tc.round, "Timeout certificate inserted");
                self.high_qc.highest_tc = Some(tc);
                true
            }
        }
    }

    /// The uncommitted chain from just past the root down to `vertex_id`,
    /// inclusive, oldest first. Empty if `vertex_id` is the root.
    pub fn path_from_root(&self, vertex_id: Hash) -> Vec<ExecutedVertex> {
        self.uncommitted_chain_to(vertex_id)
    }

    /// Up to `count` vertices walking parent links from `vertex_id` toward
    /// the root, newest first. `None` if the starting vertex is unknown.
    pub fn get_vertices(&self, vertex_id: Hash, count: u64) -> Option<Vec<VertexWithHash>> {
        let mut current = self.get(vertex_id)?;
        let mut result = Vec::new();
        for _ in 0..count {
            result.push(current.vertex_with_hash().clone());
            let Some(parent_id) = current.vertex().parent_id() else {
                break;
            };
            match self.get(parent_id) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Some(result)
    }

    fn uncommitted_chain_to(&self, vertex_id: Hash) -> Vec<ExecutedVertex> {
        let mut chain = VecDeque::new();
        let mut current = vertex_id;
        while current != self.root.hash() {
            match self.vertices.get(&current) {
                Some(v) => {
                    chain.push_front(v.clone());
                    match v.vertex().parent_id() {
                        Some(parent) => current = parent,
                        None => break,
                    }
                }
                None => break,
            }
        }
        chain.into()
    }

    fn commit(&mut self, committed_id: Hash, commit_qc: QuorumCertificate) -> CommittedUpdate {
        let path = self.uncommitted_chain_to(committed_id);
        debug_assert!(!path.is_empty(), "commit target must be past the root");

        let new_root = path.last().cloned().unwrap_or_else(|| self.root.clone());

        // Everything that is not a descendant of the new root goes away:
        // the committed path itself and all pruned siblings.
        let mut keep: HashSet<Hash> = HashSet::new();
        let mut frontier = vec![new_root.hash()];
        while let Some(id) = frontier.pop() {
            if let Some(children) = self.children.get(&id) {
                for child in children {
                    if keep.insert(*child) {
                        frontier.push(*child);
                    }
                }
            }
        }

        let before = self.vertices.len();
        self.vertices.retain(|id, _| keep.contains(id));
        self.children
            .retain(|id, _| keep.contains(id) || *id == new_root.hash());

        info!(
            round = %new_root.round(),
            vertex = ?new_root.hash(),
            committed = path.len(),
            pruned = (before - self.vertices.len()).saturating_sub(path.len()),
            "Committed"
        );

        self.root = new_root;
        CommittedUpdate {
            vertices: path,
            commit_qc,
        }
    }
}
