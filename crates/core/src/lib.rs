//! Event and action model for the keystone consensus engine.
//!
//! Protocol logic is written as synchronous state machines:
//!
//! - **Synchronous**: events are handled one at a time, to completion.
//! - **Deterministic**: the same event sequence produces the same actions.
//! - **Pure-ish**: handlers mutate their own state but perform no I/O;
//!   everything with a side effect is returned as an [`Action`] for the
//!   runner to execute.
//!
//! The runner owns the clock, the network, the timers and commit dispatch.

mod action;
mod event;
mod message;
mod traits;

pub use action::{Action, ByzantineEvent};
pub use event::{Event, ScheduledTimeout};
pub use message::{OutboundMessage, ProposalMessage, VertexRequest, VertexResponse};
pub use traits::{StateComputer, StateMachine, TransactionSource};
