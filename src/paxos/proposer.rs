//! Stateless two-phase proposer algorithm.

use std::sync::Arc;

use crate::paxos::{AcceptorLink, Proposal};

use futures::future::join_all;

use tokio::time::{self, Duration};

/// Result of one prepare/accept run, kept for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteOutcome {
    /// Whether both phases reached majority.
    pub accepted: bool,

    /// Majority threshold used.
    pub majority: usize,

    /// Number of promises collected in phase 1.
    pub promised: usize,

    /// Number of accepts collected in phase 2; zero if phase 2 never ran.
    pub acked: usize,
}

/// The proposer role. Holds no state between runs.
pub struct Proposer;

impl Proposer {
    /// Majority threshold over `population` acceptors.
    #[inline]
    pub fn majority(population: usize) -> usize {
        population / 2 + 1
    }

    /// Drives `proposal` through prepare then accept across `acceptors`.
    /// Each remote call is bounded by `timeout`; errors and timeouts count as
    /// non-acks. An empty acceptor set is always rejected.
    pub async fn prepare(
        proposal: &Proposal,
        acceptors: &[Arc<dyn AcceptorLink>],
        timeout: Duration,
    ) -> VoteOutcome {
        let majority = Self::majority(acceptors.len());
        let mut outcome = VoteOutcome {
            accepted: false,
            majority,
            promised: 0,
            acked: 0,
        };

        // phase 1: prepare
        let promises = join_all(acceptors.iter().map(|link| async move {
            match time::timeout(timeout, link.prepare(proposal)).await {
                Ok(Ok(promise)) => promise.ack,
                Ok(Err(e)) => {
                    pf_debug!("d"; "prepare to {} failed: {}",
                                   link.acceptor_id(), e);
                    false
                }
                Err(_) => {
                    pf_debug!("d"; "prepare to {} timed out",
                                   link.acceptor_id());
                    false
                }
            }
        }))
        .await;
        outcome.promised = promises.into_iter().filter(|ack| *ack).count();
        if outcome.promised < majority {
            pf_debug!("d"; "vote {} rejected in prepare: {}/{}",
                           proposal.vote(), outcome.promised, majority);
            return outcome;
        }

        // phase 2: accept
        let accepts = join_all(acceptors.iter().map(|link| async move {
            match time::timeout(timeout, link.accept(proposal)).await {
                Ok(Ok(ack)) => ack,
                Ok(Err(e)) => {
                    pf_debug!("d"; "accept to {} failed: {}",
                                   link.acceptor_id(), e);
                    false
                }
                Err(_) => {
                    pf_debug!("d"; "accept to {} timed out",
                                   link.acceptor_id());
                    false
                }
            }
        }))
        .await;
        outcome.acked = accepts.into_iter().filter(|ack| *ack).count();
        if outcome.acked < majority {
            pf_debug!("d"; "vote {} rejected in accept: {}/{}",
                           proposal.vote(), outcome.acked, majority);
            return outcome;
        }

        outcome.accepted = true;
        outcome
    }
}

#[cfg(test)]
mod proposer_tests {
    use super::*;
    use crate::paxos::{Acceptor, Promise};
    use crate::server::ReplicaId;
    use crate::utils::ChartpaxError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Behavior {
        Honest,
        Unreachable,
        Slow,
        RefuseAccept,
    }

    struct FakeLink {
        id: ReplicaId,
        acceptor: Mutex<Acceptor>,
        behavior: Behavior,
    }

    impl FakeLink {
        fn new(id: ReplicaId, behavior: Behavior) -> Arc<dyn AcceptorLink> {
            Arc::new(FakeLink {
                id,
                acceptor: Mutex::new(Acceptor::new(id)),
                behavior,
            })
        }
    }

    #[async_trait]
    impl AcceptorLink for FakeLink {
        fn acceptor_id(&self) -> ReplicaId {
            self.id
        }

        async fn prepare(
            &self,
            proposal: &Proposal,
        ) -> Result<Promise, ChartpaxError> {
            match self.behavior {
                Behavior::Unreachable => {
                    Err(ChartpaxError::msg("connection refused"))
                }
                Behavior::Slow => {
                    time::sleep(Duration::from_secs(5)).await;
                    Ok(Promise::rejected())
                }
                _ => self.acceptor.lock().on_prepare(Some(proposal)),
            }
        }

        async fn accept(
            &self,
            proposal: &Proposal,
        ) -> Result<bool, ChartpaxError> {
            match self.behavior {
                Behavior::Unreachable => {
                    Err(ChartpaxError::msg("connection refused"))
                }
                Behavior::RefuseAccept => Ok(false),
                Behavior::Slow => {
                    time::sleep(Duration::from_secs(5)).await;
                    Ok(false)
                }
                Behavior::Honest => Ok(self.acceptor.lock().on_accept(proposal)),
            }
        }
    }

    fn links(behaviors: &[Behavior]) -> Vec<Arc<dyn AcceptorLink>> {
        behaviors
            .iter()
            .enumerate()
            .map(|(i, b)| FakeLink::new(i as ReplicaId, *b))
            .collect()
    }

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[test]
    fn majority_thresholds() {
        assert_eq!(Proposer::majority(0), 1);
        assert_eq!(Proposer::majority(1), 1);
        assert_eq!(Proposer::majority(2), 2);
        assert_eq!(Proposer::majority(3), 2);
        assert_eq!(Proposer::majority(4), 3);
        assert_eq!(Proposer::majority(5), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_set_rejected() {
        let outcome =
            Proposer::prepare(&Proposal::new(1, "x"), &[], TIMEOUT).await;
        assert!(!outcome.accepted);
        assert_eq!(outcome.promised, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn single_acceptor() {
        use Behavior::*;
        let p = Proposal::new(1, "x");
        assert!(Proposer::prepare(&p, &links(&[Honest]), TIMEOUT).await.accepted);
        assert!(
            !Proposer::prepare(&p, &links(&[Unreachable]), TIMEOUT)
                .await
                .accepted
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn two_acceptors_tie_fails() {
        use Behavior::*;
        let p = Proposal::new(1, "x");
        assert!(
            Proposer::prepare(&p, &links(&[Honest, Honest]), TIMEOUT)
                .await
                .accepted
        );
        let outcome =
            Proposer::prepare(&p, &links(&[Honest, Unreachable]), TIMEOUT)
                .await;
        assert!(!outcome.accepted);
        assert_eq!(outcome.promised, 1);
        assert_eq!(outcome.majority, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn three_acceptors() {
        use Behavior::*;
        let p = Proposal::new(1, "x");
        let outcome =
            Proposer::prepare(&p, &links(&[Honest, Honest, Slow]), TIMEOUT)
                .await;
        assert!(outcome.accepted);
        assert_eq!(outcome.promised, 2);
        assert_eq!(outcome.acked, 2);

        let outcome = Proposer::prepare(
            &p,
            &links(&[Honest, Unreachable, Slow]),
            TIMEOUT,
        )
        .await;
        assert!(!outcome.accepted);
        assert_eq!(outcome.acked, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn five_acceptors_accept_phase() {
        use Behavior::*;
        let p = Proposal::new(1, "x");
        let outcome = Proposer::prepare(
            &p,
            &links(&[Honest, Honest, Honest, RefuseAccept, RefuseAccept]),
            TIMEOUT,
        )
        .await;
        assert!(outcome.accepted);
        assert_eq!(outcome.promised, 5);
        assert_eq!(outcome.acked, 3);

        // promises reach majority but accepts do not
        let outcome = Proposer::prepare(
            &p,
            &links(&[Honest, Honest, RefuseAccept, RefuseAccept, Unreachable]),
            TIMEOUT,
        )
        .await;
        assert!(!outcome.accepted);
        assert_eq!(outcome.promised, 4);
        assert_eq!(outcome.acked, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stale_vote_rejected() {
        let acceptors = links(&[Behavior::Honest; 3]);
        let newer = Proposal::new(7, "newer");
        assert!(Proposer::prepare(&newer, &acceptors, TIMEOUT).await.accepted);
        let older = Proposal::new(6, "older");
        let outcome = Proposer::prepare(&older, &acceptors, TIMEOUT).await;
        assert!(!outcome.accepted);
        assert_eq!(outcome.promised, 0);
    }
}
