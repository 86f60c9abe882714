//! Single-proposer two-phase voting: proposal records, the per-replica
//! acceptor state machine, and the stateless proposer algorithm run by the
//! dispatcher.

mod proposal;
mod acceptor;
mod proposer;

pub use proposal::{Proposal, Promise, VoteNumber};
pub use acceptor::{Acceptor, AcceptorLink};
pub use proposer::{Proposer, VoteOutcome};
