//! Dispatcher core: roster slots, vote issuing, and learn broadcast.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::utils::ChartpaxError;
use crate::paxos::{AcceptorLink, Proposal, Proposer, VoteNumber};
use crate::server::{
    allocator_for_pool, Coordinator, ExternalApi, Replica, ReplicaId,
};
use crate::manager::{DispatcherConfig, ReplicaStatus};

use async_trait::async_trait;

use futures::future::join_all;

use parking_lot::RwLock;

use rand::Rng;

use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

/// State of one roster position. A slot holds a replica instance iff its
/// status is not `Dead`.
pub(crate) struct Slot {
    pub(crate) status: ReplicaStatus,

    /// The in-process replica instance.
    pub(crate) replica: Option<Arc<Replica>>,

    /// Its client API listener, if serving over TCP.
    pub(crate) api: Option<ExternalApi>,

    /// Its periodic artifact snapshot ticker.
    pub(crate) ticker: Option<JoinHandle<()>>,

    /// A restart is in progress.
    pub(crate) restarting: bool,
}

impl Slot {
    fn dead() -> Self {
        Slot {
            status: ReplicaStatus::Dead,
            replica: None,
            api: None,
            ticker: None,
            restarting: false,
        }
    }

    /// Stops the listener and ticker and hands back the replica instance.
    pub(crate) fn teardown(&mut self) -> Option<Arc<Replica>> {
        if let Some(api) = self.api.take() {
            api.shutdown();
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.replica.take()
    }
}

/// The central dispatcher. The only proposer; assumed never to fail.
pub struct Dispatcher {
    /// Configuration parameters struct.
    pub(crate) config: DispatcherConfig,

    /// Parent directory of replicas' data roots.
    base_dir: PathBuf,

    /// IP to serve replica client APIs on; `None` keeps replicas in-process
    /// only.
    api_ip: Option<IpAddr>,

    /// Fixed replica roster, in assignment order.
    pub(crate) roster: Vec<ReplicaId>,

    /// Roster slots. Never held across an `.await`.
    pub(crate) slots: RwLock<HashMap<ReplicaId, Slot>>,

    /// Last vote number issued.
    vote_no: AtomicU64,

    /// Handle on myself given to replicas as their coordinator.
    me: Weak<Dispatcher>,
}

// Dispatcher public API implementation
impl Dispatcher {
    /// Creates the dispatcher and brings every roster replica up, reloading
    /// persisted artifacts where present.
    pub async fn new_and_setup(
        config: DispatcherConfig,
        api_ip: Option<IpAddr>,
        roster: Vec<ReplicaId>,
    ) -> Result<Arc<Self>, ChartpaxError> {
        if roster.is_empty() {
            return logged_err!("d"; "empty replica roster");
        }
        let unique: HashSet<_> = roster.iter().collect();
        if unique.len() != roster.len() {
            return logged_err!("d"; "duplicate ids in roster {:?}", roster);
        }
        if config.rpc_timeout_ms == 0 {
            return logged_err!("d"; "invalid rpc_timeout_ms 0");
        }
        if config.base_dir.is_empty() {
            return logged_err!("d"; "empty base_dir");
        }

        let base_dir = PathBuf::from(&config.base_dir);
        tokio::fs::create_dir_all(&base_dir).await?;

        let dispatcher = Arc::new_cyclic(|me| Dispatcher {
            config,
            base_dir,
            api_ip,
            slots: RwLock::new(
                roster.iter().map(|id| (*id, Slot::dead())).collect(),
            ),
            roster,
            vote_no: AtomicU64::new(0),
            me: me.clone(),
        });

        for &id in &dispatcher.roster {
            let replica = dispatcher.spawn_replica(id).await?;
            dispatcher.activate(id, replica).await?;
        }

        pf_info!("d"; "dispatcher up with roster {:?}", dispatcher.roster);
        Ok(dispatcher)
    }

    #[inline]
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    #[inline]
    pub fn roster(&self) -> &[ReplicaId] {
        &self.roster
    }

    /// Last vote number issued.
    pub fn last_vote(&self) -> VoteNumber {
        self.vote_no.load(Ordering::SeqCst)
    }

    /// The in-process instance of a non-dead replica.
    pub fn replica(&self, id: ReplicaId) -> Option<Arc<Replica>> {
        self.slots.read().get(&id).and_then(|s| s.replica.clone())
    }

    /// Client API address of a non-dead replica serving over TCP.
    pub fn api_addr(&self, id: ReplicaId) -> Option<SocketAddr> {
        self.slots
            .read()
            .get(&id)
            .and_then(|s| s.api.as_ref().map(|api| api.local_addr()))
    }

    /// Persists every live replica's artifacts and stops all listeners.
    pub async fn shutdown(&self) {
        for replica in self.live_replicas(None) {
            if let Err(e) = replica.save_artifacts().await {
                pf_error!("d"; "error saving artifacts of {}: {}",
                               replica.id(), e);
            }
        }
        let mut slots = self.slots.write();
        for slot in slots.values_mut() {
            slot.teardown();
            slot.status = ReplicaStatus::Dead;
        }
        pf_info!("d"; "dispatcher shut down");
    }
}

// Dispatcher internal helpers
impl Dispatcher {
    #[inline]
    pub(crate) fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.config.rpc_timeout_ms)
    }

    /// Creates a fresh replica instance for `id`, not yet serving.
    pub(crate) async fn spawn_replica(
        &self,
        id: ReplicaId,
    ) -> Result<Arc<Replica>, ChartpaxError> {
        let coordinator: Weak<dyn Coordinator> = self.me.clone();
        Replica::new_and_setup(
            id,
            &self.base_dir,
            allocator_for_pool(self.config.channel_pool_size),
            coordinator,
        )
        .await
    }

    /// Starts serving `replica` and installs it as `EmptyLive`.
    pub(crate) async fn activate(
        &self,
        id: ReplicaId,
        replica: Arc<Replica>,
    ) -> Result<(), ChartpaxError> {
        let api = match self.api_ip {
            Some(ip) => Some(
                ExternalApi::new_and_setup(
                    id,
                    SocketAddr::new(ip, id),
                    Arc::downgrade(&replica),
                )
                .await?,
            ),
            None => None,
        };
        let ticker = if self.config.snapshot_interval_ms > 0 {
            Some(replica.spawn_snapshot_ticker(Duration::from_millis(
                self.config.snapshot_interval_ms,
            )))
        } else {
            None
        };

        let mut slots = self.slots.write();
        let slot = match slots.get_mut(&id) {
            Some(slot) => slot,
            None => return logged_err!("d"; "unknown replica {}", id),
        };
        *slot = Slot {
            status: ReplicaStatus::EmptyLive,
            replica: Some(replica),
            api,
            ticker,
            restarting: false,
        };
        Ok(())
    }

    /// Non-dead replicas in roster order, optionally skipping one.
    pub(crate) fn live_replicas(
        &self,
        except: Option<ReplicaId>,
    ) -> Vec<Arc<Replica>> {
        let slots = self.slots.read();
        self.roster
            .iter()
            .filter(|id| Some(**id) != except)
            .filter_map(|id| slots.get(id))
            .filter(|slot| slot.status.is_live())
            .filter_map(|slot| slot.replica.clone())
            .collect()
    }

    /// Delivers `decided` to one replica, retrying with jittered exponential
    /// backoff. Returns whether it got through.
    async fn learn_one(&self, replica: Arc<Replica>, decided: &Proposal) -> bool {
        let retries = self.config.learn_retries;
        for attempt in 0..=retries {
            match time::timeout(self.rpc_timeout(), replica.learn(decided)).await
            {
                Ok(Ok(())) => return true,
                Ok(Err(e)) => {
                    pf_warn!("d"; "learn vote {} on {} failed: {}",
                                  decided.vote(), replica.id(), e);
                }
                Err(_) => {
                    pf_warn!("d"; "learn vote {} on {} timed out",
                                  decided.vote(), replica.id());
                }
            }

            if attempt < retries {
                let backoff = self
                    .config
                    .learn_backoff_ms
                    .saturating_mul(1 << attempt.min(16));
                let jitter = rand::thread_rng().gen_range(0..=backoff / 2);
                time::sleep(Duration::from_millis(backoff + jitter)).await;
            }
        }

        pf_error!("d"; "gave up learn vote {} on {}", decided.vote(), replica.id());
        false
    }
}

#[async_trait]
impl Coordinator for Dispatcher {
    async fn run_vote(&self, content: String) -> Option<Proposal> {
        let vote = self.vote_no.fetch_add(1, Ordering::SeqCst) + 1;
        let proposal = Proposal::new(vote, content);

        let acceptors: Vec<Arc<dyn AcceptorLink>> = self
            .live_replicas(None)
            .into_iter()
            .map(|r| r as Arc<dyn AcceptorLink>)
            .collect();
        let outcome =
            Proposer::prepare(&proposal, &acceptors, self.rpc_timeout()).await;

        if outcome.accepted {
            pf_debug!("d"; "vote {} accepted {}/{} of {}",
                           vote, outcome.acked, outcome.majority,
                           acceptors.len());
            Some(proposal)
        } else {
            pf_info!("d"; "vote {} rejected: {:?}", vote, outcome);
            None
        }
    }

    async fn learn(&self, decided: Proposal, origin: ReplicaId) {
        let targets = self.live_replicas(Some(origin));
        let delivered = join_all(
            targets
                .into_iter()
                .map(|replica| self.learn_one(replica, &decided)),
        )
        .await;
        pf_trace!("d"; "vote {} learned by {}/{}",
                       decided.vote(),
                       delivered.iter().filter(|ok| **ok).count(),
                       delivered.len());
    }
}
