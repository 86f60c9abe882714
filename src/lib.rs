//! Chartpax: a replicated chart-editing backend. A central dispatcher runs a
//! single-proposer Paxos vote across a fixed roster of replicas for every
//! state-changing operation, then broadcasts the decided operation for all
//! replicas to apply.

#[macro_use]
mod utils;

pub mod paxos;
pub mod server;
pub mod manager;
pub mod client;

pub use utils::{logger_init, password_digest, session_token, ChartpaxError};

pub use paxos::{Proposal, Promise, VoteNumber};
pub use server::{ApiReply, ApiRequest, RejectReason, Replica, ReplicaId};
pub use manager::{
    CtrlReactor, CtrlReply, CtrlRequest, Dispatcher, DispatcherConfig,
    ReplicaStatus,
};
pub use client::{ClientApiStub, ClientCtrlStub, EditorSession};
