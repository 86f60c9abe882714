//! Chartpax's central dispatcher: replica roster and status, vote issuing,
//! learn broadcast, and replica lifecycle, plus its control API.

mod dispatcher;
mod lifecycle;
mod reactor;

use crate::utils::ChartpaxError;

use serde::{Deserialize, Serialize};

pub use dispatcher::Dispatcher;
pub use reactor::{CtrlReactor, CtrlReply, CtrlRequest};

/// Status of a roster slot, held only by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReplicaStatus {
    /// Up and assignable to clients.
    EmptyLive = 0,

    /// Up and voting, but not handed to new clients.
    Busy = 1,

    /// Down; excluded from votes and learns.
    Dead = 2,
}

impl ReplicaStatus {
    #[inline]
    pub fn is_live(self) -> bool {
        self != ReplicaStatus::Dead
    }
}

/// Configuration parameters struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Parent directory of all replicas' data roots.
    pub base_dir: String,

    /// Bound on every prepare, accept, and learn call, in millisecs.
    pub rpc_timeout_ms: u64,

    /// Extra learn attempts per replica before giving up on it.
    pub learn_retries: u8,

    /// Base backoff between learn attempts in millisecs; doubles per retry.
    pub learn_backoff_ms: u64,

    /// Number of channel addresses in the pool; 1 shares a single address.
    pub channel_pool_size: u32,

    /// Interval of persisting table artifacts in millisecs; 0 disables.
    pub snapshot_interval_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            base_dir: "/tmp/chartpax".into(),
            rpc_timeout_ms: 1000,
            learn_retries: 2,
            learn_backoff_ms: 50,
            channel_pool_size: 1,
            snapshot_interval_ms: 10000,
        }
    }
}

impl DispatcherConfig {
    /// Composes a config from defaults overridden by an optional TOML string.
    pub fn from_toml(config_str: Option<&str>) -> Result<Self, ChartpaxError> {
        parsed_config!(config_str => DispatcherConfig;
                       base_dir, rpc_timeout_ms, learn_retries,
                       learn_backoff_ms, channel_pool_size,
                       snapshot_interval_ms)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Dispatcher setup shared by the manager unit tests.

    use super::*;
    use crate::server::ReplicaId;
    use std::path::Path;
    use std::sync::Arc;

    /// In-process dispatcher with no TCP listeners and no snapshot ticker.
    pub(crate) async fn test_dispatcher(
        base_dir: &Path,
        roster: Vec<ReplicaId>,
    ) -> Result<Arc<Dispatcher>, ChartpaxError> {
        let config = DispatcherConfig {
            base_dir: base_dir.to_string_lossy().into_owned(),
            rpc_timeout_ms: 500,
            learn_retries: 1,
            learn_backoff_ms: 10,
            channel_pool_size: 1,
            snapshot_interval_ms: 0,
        };
        Dispatcher::new_and_setup(config, None, roster).await
    }
}
