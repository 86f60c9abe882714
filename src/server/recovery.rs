//! Replica -- helper-driven recovery from a live peer's full snapshot.

use super::*;

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::Ipv4Addr;

use crate::server::durability::read_if_exists;

use bytes::Bytes;

use rmp_serde::encode::to_vec as encode_to_vec;

use serde::{Deserialize, Serialize};

/// Full state of a replica, with every path rooted at the target's data root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotBundle {
    /// Replica that produced the bundle.
    pub source: ReplicaId,

    /// Replica the bundle is meant for.
    pub target: ReplicaId,

    /// Data root all paths in the bundle live under.
    pub root: PathBuf,

    pub accounts: Vec<AccountRecord>,
    pub documents: Vec<DocumentRecord>,
    pub sessions: Vec<SessionRecord>,
    pub channels: Vec<(String, Ipv4Addr)>,

    /// File path -> raw bytes, for section content and table artifacts.
    pub blobs: BTreeMap<PathBuf, Bytes>,
}

/// Moves `path` from under `from_root` to under `to_root`.
pub(crate) fn retarget_path(
    path: &Path,
    from_root: &Path,
    to_root: &Path,
) -> Option<PathBuf> {
    path.strip_prefix(from_root).ok().map(|rel| to_root.join(rel))
}

// Replica recovery logic
impl Replica {
    /// Packages my full state for replica `target`: all four tables, every
    /// section's bytes, and table artifacts as `target` should persist them.
    /// Sections whose backing file is missing are skipped with a warning.
    pub async fn produce_snapshot(
        &self,
        target: ReplicaId,
    ) -> Result<SnapshotBundle, ChartpaxError> {
        let root = Self::data_root_of(&self.base_dir, target);
        let accounts = self.accounts.to_records();
        let mut documents = self.documents.to_records();
        let mut blobs = BTreeMap::new();

        for doc in documents.iter_mut() {
            for sec in doc.sections.iter_mut() {
                let retargeted =
                    match retarget_path(&sec.path, &self.data_root, &root) {
                        Some(p) => p,
                        None => {
                            return logged_err!(
                                self.me;
                                "section path {} outside data root",
                                sec.path.display()
                            )
                        }
                    };
                match read_if_exists(&sec.path).await? {
                    Some(bytes) => {
                        blobs.insert(retargeted.clone(), Bytes::from(bytes));
                    }
                    None => {
                        pf_warn!(self.me; "section file {} missing, skipped",
                                          sec.path.display());
                    }
                }
                sec.path = retargeted;
            }
        }

        blobs.insert(
            root.join(ACCOUNTS_DB),
            Bytes::from(encode_to_vec(&accounts)?),
        );
        blobs.insert(
            root.join(DOCUMENTS_DB),
            Bytes::from(encode_to_vec(&documents)?),
        );

        Ok(SnapshotBundle {
            source: self.me,
            target,
            root,
            accounts,
            documents,
            sessions: self.sessions.to_records(),
            channels: self.channels.to_records(),
            blobs,
        })
    }

    /// Produces a snapshot for `target` and pushes it there.
    pub async fn help_recover(
        &self,
        target: &Replica,
    ) -> Result<bool, ChartpaxError> {
        let bundle = self.produce_snapshot(target.id()).await?;
        pf_info!(
            self.me;
            "pushing snapshot to {}: {} documents {} blobs",
            target.id(),
            bundle.documents.len(),
            bundle.blobs.len()
        );
        target.consume_snapshot(bundle).await
    }

    /// Replaces all my tables with the bundle's, wipes my data root, and
    /// writes every blob. Paths are rebased onto my own data root, which is
    /// a no-op for a bundle produced for me. Returns false on failure.
    pub async fn consume_snapshot(
        &self,
        bundle: SnapshotBundle,
    ) -> Result<bool, ChartpaxError> {
        if bundle.target != self.me {
            pf_warn!(self.me; "snapshot meant for {} refused", bundle.target);
            return Ok(false);
        }

        let mut documents = bundle.documents;
        for sec in documents.iter_mut().flat_map(|d| d.sections.iter_mut()) {
            match retarget_path(&sec.path, &bundle.root, &self.data_root) {
                Some(p) => sec.path = p,
                None => {
                    pf_error!(self.me; "snapshot path {} outside its root",
                                       sec.path.display());
                    return Ok(false);
                }
            }
        }
        let mut blobs = Vec::with_capacity(bundle.blobs.len());
        for (path, bytes) in bundle.blobs {
            match retarget_path(&path, &bundle.root, &self.data_root) {
                Some(p) => blobs.push((p, bytes)),
                None => {
                    pf_error!(self.me; "snapshot blob {} outside its root",
                                       path.display());
                    return Ok(false);
                }
            }
        }

        self.accounts.replace_all(bundle.accounts);
        self.documents.replace_all(documents);
        self.sessions.replace_all(bundle.sessions);
        self.channels.replace_all(bundle.channels);

        if let Err(e) = self.rewrite_data_root(blobs).await {
            pf_error!(self.me; "error restoring data root: {}", e);
            return Ok(false);
        }

        pf_info!(self.me; "recovered from snapshot of {}", bundle.source);
        Ok(true)
    }

    async fn rewrite_data_root(
        &self,
        blobs: Vec<(PathBuf, Bytes)>,
    ) -> Result<(), ChartpaxError> {
        match tokio::fs::remove_dir_all(&self.data_root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&self.data_root).await?;

        for (path, bytes) in blobs {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &bytes).await?;
        }
        Ok(())
    }
}
