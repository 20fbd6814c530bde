//! Node assembly: the state machine, timers and the async runner.

mod runner;
mod state;
mod timers;

pub use runner::{NetworkAdapter, NodeRunner, RunnerError};
pub use state::NodeStateMachine;
pub use timers::TimerManager;

/// Install the global tracing subscriber, filtered by `RUST_LOG`. Safe to
/// call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
