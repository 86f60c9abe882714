//! Replica node: local domain tables, an acceptor, and the commit pipeline
//! that ties a domain operation to a dispatcher-run vote.

mod section;
mod tables;
mod channel;
mod operation;
mod commit;
mod requests;
mod recovery;
mod durability;
mod external;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use crate::utils::ChartpaxError;
use crate::paxos::{Acceptor, AcceptorLink, Promise, Proposal};

use async_trait::async_trait;

use parking_lot::Mutex;

pub use section::Subdivision;
pub use tables::{
    Account, AccountRecord, AccountTable, Document, DocumentRecord,
    DocumentTable, SectionRecord, SessionRecord, SessionTable,
};
pub use channel::{
    allocator_for_pool, ChannelAllocator, ChannelTable, RangeAllocator,
    SingleAddressAllocator, CHANNEL_BASE, CHANNEL_LAST,
};
pub use operation::Operation;
pub use commit::{RejectReason, Rejection};
pub use recovery::SnapshotBundle;
pub use durability::{ACCOUNTS_DB, DOCS_DIR, DOCUMENTS_DB};
pub use external::{ApiReply, ApiRequest, ExternalApi};

/// Server replica ID type; the replica's client API port.
pub type ReplicaId = u16;

/// Services a replica needs from the central coordinator.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Runs a vote on `content` across all live acceptors. Returns the
    /// decided proposal on success.
    async fn run_vote(&self, content: String) -> Option<Proposal>;

    /// Delivers a decided proposal to every live replica except `origin`.
    async fn learn(&self, decided: Proposal, origin: ReplicaId);
}

/// A replica node.
pub struct Replica {
    /// My replica ID.
    me: ReplicaId,

    /// Parent directory of all replicas' data roots.
    base_dir: PathBuf,

    /// My private data root, `<base_dir>/replica_<me>`.
    data_root: PathBuf,

    /// Acceptor state; fresh on every start.
    acceptor: Mutex<Acceptor>,

    accounts: AccountTable,
    sessions: SessionTable,
    documents: DocumentTable,
    channels: ChannelTable,

    /// The dispatcher that runs votes and learns for me.
    coordinator: Weak<dyn Coordinator>,
}

// Replica public API implementation
impl Replica {
    /// Creates a replica with a fresh acceptor, creating its data root and
    /// reloading persisted table artifacts if present.
    pub async fn new_and_setup(
        me: ReplicaId,
        base_dir: &Path,
        allocator: Box<dyn ChannelAllocator>,
        coordinator: Weak<dyn Coordinator>,
    ) -> Result<Arc<Self>, ChartpaxError> {
        let data_root = Self::data_root_of(base_dir, me);
        tokio::fs::create_dir_all(&data_root).await?;

        let replica = Replica {
            me,
            base_dir: base_dir.to_path_buf(),
            data_root,
            acceptor: Mutex::new(Acceptor::new(me)),
            accounts: AccountTable::new(),
            sessions: SessionTable::new(),
            documents: DocumentTable::new(),
            channels: ChannelTable::new(allocator),
            coordinator,
        };
        if replica.load_artifacts().await? {
            pf_info!(
                me;
                "reloaded {} accounts {} documents",
                replica.accounts.len(),
                replica.documents.len()
            );
        }

        pf_info!(me; "replica up with data root {}", replica.data_root.display());
        Ok(Arc::new(replica))
    }

    /// Data root of replica `id` under `base_dir`.
    pub fn data_root_of(base_dir: &Path, id: ReplicaId) -> PathBuf {
        base_dir.join(format!("replica_{}", id))
    }

    #[inline]
    pub fn id(&self) -> ReplicaId {
        self.me
    }

    #[inline]
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    #[inline]
    pub fn accounts(&self) -> &AccountTable {
        &self.accounts
    }

    #[inline]
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    #[inline]
    pub fn documents(&self) -> &DocumentTable {
        &self.documents
    }

    #[inline]
    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    /// The proposal my acceptor has promised.
    pub fn last_promised(&self) -> Proposal {
        self.acceptor.lock().last_promised().clone()
    }
}

#[async_trait]
impl AcceptorLink for Replica {
    fn acceptor_id(&self) -> ReplicaId {
        self.me
    }

    async fn prepare(
        &self,
        proposal: &Proposal,
    ) -> Result<Promise, ChartpaxError> {
        self.acceptor.lock().on_prepare(Some(proposal))
    }

    async fn accept(&self, proposal: &Proposal) -> Result<bool, ChartpaxError> {
        Ok(self.acceptor.lock().on_accept(proposal))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Single-node coordinator used by the replica-level unit tests.

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use tokio::sync::Notify;

    /// Decides every vote through the replica's own acceptor unless told to
    /// refuse. Votes can be held at entry until released. Learning is a
    /// no-op.
    pub(crate) struct LoopbackCoordinator {
        replica: Mutex<Option<Arc<Replica>>>,
        vote_no: AtomicU64,
        refuse: AtomicBool,
        hold: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl LoopbackCoordinator {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(LoopbackCoordinator {
                replica: Mutex::new(None),
                vote_no: AtomicU64::new(0),
                refuse: AtomicBool::new(false),
                hold: AtomicBool::new(false),
                entered: Notify::new(),
                release: Notify::new(),
            })
        }

        /// Makes the next votes wait at entry for `release_vote()`.
        pub(crate) fn hold_votes(&self, hold: bool) {
            self.hold.store(hold, Ordering::SeqCst);
        }

        /// Resolves once a held vote has entered `run_vote()`.
        pub(crate) async fn vote_entered(&self) {
            self.entered.notified().await;
        }

        /// Lets one held vote proceed.
        pub(crate) fn release_vote(&self) {
            self.release.notify_one();
        }

        pub(crate) fn refuse_votes(&self, refuse: bool) {
            self.refuse.store(refuse, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Coordinator for LoopbackCoordinator {
        async fn run_vote(&self, content: String) -> Option<Proposal> {
            if self.hold.load(Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            if self.refuse.load(Ordering::SeqCst) {
                return None;
            }
            let vote = self.vote_no.fetch_add(1, Ordering::SeqCst) + 1;
            let proposal = Proposal::new(vote, content);
            let replica = self.replica.lock().clone()?;
            let promise = replica.prepare(&proposal).await.ok()?;
            if promise.ack && replica.accept(&proposal).await.ok()? {
                Some(proposal)
            } else {
                None
            }
        }

        async fn learn(&self, _decided: Proposal, _origin: ReplicaId) {}
    }

    /// Brings up a replica wired to a fresh loopback coordinator.
    pub(crate) async fn loopback_replica(
        me: ReplicaId,
        base_dir: &Path,
    ) -> Result<(Arc<Replica>, Arc<LoopbackCoordinator>), ChartpaxError> {
        let coord = LoopbackCoordinator::new();
        let weak: Weak<dyn Coordinator> =
            Arc::downgrade(&(coord.clone() as Arc<dyn Coordinator>));
        let replica = Replica::new_and_setup(
            me,
            base_dir,
            allocator_for_pool(1),
            weak,
        )
        .await?;
        *coord.replica.lock() = Some(replica.clone());
        Ok((replica, coord))
    }
}
