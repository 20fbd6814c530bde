//! Consensus configuration.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BftConfig {
    /// Base round timeout before any backoff applies.
    pub timeout_base: Duration,
    /// Multiplier applied per consecutive uncommitted round.
    pub timeout_rate: f64,
    /// Cap on the backoff exponent.
    pub timeout_max_exponent: u32,
    /// Maximum transactions packed into one proposal.
    pub max_proposal_transactions: usize,
    /// Maximum uncommitted vertices held by the vertex store.
    pub max_stored_vertices: usize,
    /// Maximum events buffered for a future epoch.
    pub max_buffered_epoch_events: usize,
    /// Maximum proposals parked while their parent is being fetched.
    pub max_pending_proposals: usize,
    /// How many vertices to ask for per sync request.
    pub sync_request_count: u64,
    /// Size of the verified-certificate cache.
    pub verified_certificate_cache: usize,
}

impl Default for BftConfig {
    fn default() -> Self {
        BftConfig {
            timeout_base: Duration::from_millis(1000),
            timeout_rate: 1.2,
            timeout_max_exponent: 6,
            max_proposal_transactions: 64,
            max_stored_vertices: 1024,
            max_buffered_epoch_events: 64,
            max_pending_proposals: 64,
            sync_request_count: 8,
            verified_certificate_cache: 256,
        }
    }
}
