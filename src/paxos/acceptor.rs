//! Per-replica acceptor state machine and the async seam the proposer
//! talks to it through.

use crate::utils::ChartpaxError;
use crate::server::ReplicaId;
use crate::paxos::{Proposal, Promise};

use async_trait::async_trait;

/// Acceptor holding the highest proposal it has promised so far. Volatile:
/// a restarted replica gets a fresh one.
#[derive(Debug)]
pub struct Acceptor {
    /// ID of the replica owning this acceptor, used as log prefix.
    me: ReplicaId,

    /// Highest proposal promised; the empty proposal initially.
    last_promised: Proposal,
}

impl Acceptor {
    /// Creates a fresh acceptor that has promised nothing.
    pub fn new(me: ReplicaId) -> Self {
        Acceptor {
            me,
            last_promised: Proposal::default(),
        }
    }

    /// Handles a prepare request. Promises `proposal` iff its vote number is
    /// strictly higher than anything promised before, returning the proposal
    /// held before the update. A missing proposal is an invalid argument.
    pub fn on_prepare(
        &mut self,
        proposal: Option<&Proposal>,
    ) -> Result<Promise, ChartpaxError> {
        let proposal = match proposal {
            Some(p) => p,
            None => {
                return logged_err!(
                    self.me;
                    "invalid argument: prepare without a proposal"
                )
            }
        };

        if proposal.outranks(&self.last_promised) {
            let previous =
                std::mem::replace(&mut self.last_promised, proposal.clone());
            pf_trace!(self.me; "promised vote {}", proposal.vote());
            Ok(Promise::granted(previous))
        } else {
            pf_debug!(
                self.me;
                "rejected prepare vote {} <= promised {}",
                proposal.vote(),
                self.last_promised.vote()
            );
            Ok(Promise::rejected())
        }
    }

    /// Handles an accept request: true iff `proposal` equals the currently
    /// promised one by value.
    pub fn on_accept(&self, proposal: &Proposal) -> bool {
        *proposal == self.last_promised
    }

    /// The proposal currently promised.
    pub fn last_promised(&self) -> &Proposal {
        &self.last_promised
    }
}

/// Remote-call seam through which the proposer reaches one acceptor. Errors
/// are treated by the proposer as non-acks.
#[async_trait]
pub trait AcceptorLink: Send + Sync {
    /// ID of the replica behind this link.
    fn acceptor_id(&self) -> ReplicaId;

    /// Forwards a prepare request.
    async fn prepare(
        &self,
        proposal: &Proposal,
    ) -> Result<Promise, ChartpaxError>;

    /// Forwards an accept request.
    async fn accept(&self, proposal: &Proposal) -> Result<bool, ChartpaxError>;
}
