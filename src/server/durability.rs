//! Replica -- persisted table artifacts and the periodic snapshot ticker.

use super::*;

use std::io::ErrorKind;

use rmp_serde::decode::from_slice as decode_from_slice;
use rmp_serde::encode::to_vec as encode_to_vec;

use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};

/// File name of the persisted account table.
pub const ACCOUNTS_DB: &str = "accounts.db";

/// File name of the persisted document table.
pub const DOCUMENTS_DB: &str = "documents.db";

/// Directory holding section content, one subdirectory per document.
pub const DOCS_DIR: &str = "docs";

/// Reads a file, mapping a missing file to `None`.
pub(crate) async fn read_if_exists(
    path: &Path,
) -> Result<Option<Vec<u8>>, ChartpaxError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// Replica durability logic
impl Replica {
    /// Writes the account and document tables to my data root. Sessions and
    /// channels are not persisted.
    pub async fn save_artifacts(&self) -> Result<(), ChartpaxError> {
        let accounts = encode_to_vec(&self.accounts.to_records())?;
        let documents = encode_to_vec(&self.documents.to_records())?;
        tokio::fs::write(self.data_root.join(ACCOUNTS_DB), accounts).await?;
        tokio::fs::write(self.data_root.join(DOCUMENTS_DB), documents).await?;
        pf_debug!(self.me; "saved table artifacts");
        Ok(())
    }

    /// Reloads persisted tables if present. Occupants are cleared since the
    /// sessions holding them are gone. Returns whether anything was loaded.
    pub(crate) async fn load_artifacts(&self) -> Result<bool, ChartpaxError> {
        let mut loaded = false;

        if let Some(bytes) =
            read_if_exists(&self.data_root.join(ACCOUNTS_DB)).await?
        {
            let records: Vec<AccountRecord> = decode_from_slice(&bytes)?;
            self.accounts.replace_all(records);
            loaded = true;
        }

        if let Some(bytes) =
            read_if_exists(&self.data_root.join(DOCUMENTS_DB)).await?
        {
            let mut records: Vec<DocumentRecord> = decode_from_slice(&bytes)?;
            for sec in records.iter_mut().flat_map(|d| d.sections.iter_mut()) {
                sec.occupant = None;
            }
            self.documents.replace_all(records);
            loaded = true;
        }

        Ok(loaded)
    }

    /// Spawns a ticker saving my artifacts every `interval`. The ticker holds
    /// only a weak reference and exits once the replica is dropped.
    pub fn spawn_snapshot_ticker(
        self: &Arc<Self>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let me = self.me;
        let replica = Arc::downgrade(self);
        tokio::spawn(async move {
            pf_debug!(me; "snapshot ticker spawned");
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await; // first tick fires immediately

            loop {
                ticker.tick().await;
                let replica = match replica.upgrade() {
                    Some(replica) => replica,
                    None => break,
                };
                if let Err(e) = replica.save_artifacts().await {
                    pf_error!(me; "error saving artifacts: {}", e);
                }
            }

            pf_debug!(me; "snapshot ticker exited");
        })
    }
}
