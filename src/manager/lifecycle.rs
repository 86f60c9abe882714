//! Dispatcher -- replica lifecycle: assignment, failure marking, restart
//! with helper-based recovery, and status administration.

use std::sync::Arc;

use crate::utils::ChartpaxError;
use crate::server::{Replica, ReplicaId};
use crate::manager::{Dispatcher, ReplicaStatus};

// Dispatcher replica lifecycle logic
impl Dispatcher {
    /// Picks the first `EmptyLive` replica in roster order.
    pub fn assign(&self) -> Result<ReplicaId, ChartpaxError> {
        let slots = self.slots.read();
        let found = self.roster.iter().copied().find(|id| {
            slots.get(id).map(|s| s.status) == Some(ReplicaStatus::EmptyLive)
        });
        drop(slots);

        match found {
            Some(id) => Ok(id),
            None => logged_err!("d"; "no live replica to assign"),
        }
    }

    /// Marks a replica dead, stopping its listener and dropping its
    /// instance. Idempotent.
    pub fn mark_dead(&self, id: ReplicaId) -> Result<(), ChartpaxError> {
        let mut slots = self.slots.write();
        let slot = match slots.get_mut(&id) {
            Some(slot) => slot,
            None => return logged_err!("d"; "unknown replica {}", id),
        };
        let was = slot.status;
        slot.status = ReplicaStatus::Dead;
        let replica = slot.teardown();
        drop(slots);

        if was != ReplicaStatus::Dead {
            pf_info!("d"; "replica {} marked dead", id);
        }
        drop(replica);
        Ok(())
    }

    /// Brings a dead replica back with a fresh acceptor and recovers it from
    /// the first `EmptyLive` peer in roster order. Returns `Ok(true)` once
    /// the replica is live again; `Ok(false)` if no helper exists or the
    /// recovery failed, in which case it stays dead.
    pub async fn restart(&self, id: ReplicaId) -> Result<bool, ChartpaxError> {
        {
            let mut slots = self.slots.write();
            let slot = match slots.get_mut(&id) {
                Some(slot) => slot,
                None => return logged_err!("d"; "unknown replica {}", id),
            };
            if slot.status != ReplicaStatus::Dead {
                return logged_err!("d"; "replica {} is {:?}, not dead",
                                        id, slot.status);
            }
            if slot.restarting {
                return logged_err!("d"; "replica {} already restarting", id);
            }
            slot.restarting = true;
        }

        let result = self.restart_recover(id).await;
        if !matches!(result, Ok(true)) {
            if let Some(slot) = self.slots.write().get_mut(&id) {
                slot.restarting = false;
            }
        }
        result
    }

    async fn restart_recover(&self, id: ReplicaId) -> Result<bool, ChartpaxError> {
        let fresh = self.spawn_replica(id).await?;

        let helper = self.recovery_helper(id);
        let recovered = match helper {
            Some(helper) => {
                pf_info!("d"; "replica {} recovering from {}", id, helper.id());
                match helper.help_recover(&fresh).await {
                    Ok(recovered) => recovered,
                    Err(e) => {
                        pf_error!("d"; "recovery of {} from {} failed: {}",
                                       id, helper.id(), e);
                        false
                    }
                }
            }
            None => {
                pf_warn!("d"; "no live helper to recover replica {}", id);
                false
            }
        };

        if !recovered {
            return Ok(false);
        }
        self.activate(id, fresh).await?;
        pf_info!("d"; "replica {} restarted", id);
        Ok(true)
    }

    /// First `EmptyLive` replica other than `id`, in roster order.
    fn recovery_helper(&self, id: ReplicaId) -> Option<Arc<Replica>> {
        let slots = self.slots.read();
        self.roster
            .iter()
            .filter(|h| **h != id)
            .filter_map(|h| slots.get(h))
            .find(|slot| slot.status == ReplicaStatus::EmptyLive)
            .and_then(|slot| slot.replica.clone())
    }

    pub fn status(&self, id: ReplicaId) -> Result<ReplicaStatus, ChartpaxError> {
        match self.slots.read().get(&id) {
            Some(slot) => Ok(slot.status),
            None => logged_err!("d"; "unknown replica {}", id),
        }
    }

    /// Administratively sets a status. Setting `Dead` kills the replica;
    /// a dead replica only comes back through `restart()`.
    pub fn set_status(
        &self,
        id: ReplicaId,
        status: ReplicaStatus,
    ) -> Result<(), ChartpaxError> {
        if status == ReplicaStatus::Dead {
            return self.mark_dead(id);
        }

        let mut slots = self.slots.write();
        let slot = match slots.get_mut(&id) {
            Some(slot) => slot,
            None => return logged_err!("d"; "unknown replica {}", id),
        };
        if slot.status == ReplicaStatus::Dead {
            return logged_err!("d"; "replica {} is dead, restart it instead",
                                    id);
        }
        slot.status = status;
        Ok(())
    }

    /// All statuses in roster order.
    pub fn statuses(&self) -> Vec<(ReplicaId, ReplicaStatus)> {
        let slots = self.slots.read();
        self.roster
            .iter()
            .map(|id| {
                let status =
                    slots.get(id).map_or(ReplicaStatus::Dead, |s| s.status);
                (*id, status)
            })
            .collect()
    }
}
