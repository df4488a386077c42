use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use tokio::task::JoinHandle;

use crate::scenario::ScenarioRuntime;
use crate::transport::Transport;
use crate::vu::{IterationCounters, IterationCounts, VuLifecycle, VuState, run_vu};
use crate::{Error, Result};

#[derive(Debug)]
struct VuSlot {
    id: u64,
    /// Next iteration number for this id; survives id reuse.
    next_iter: Arc<AtomicU64>,
    lifecycle: Arc<VuLifecycle>,
    handle: JoinHandle<Result<()>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub target: u64,
    /// Active VUs after reconciliation.
    pub live: u64,
    pub spawned: u64,
    pub revived: u64,
    pub retired: u64,
    pub reaped: u64,
}

/// Owns every VU task. Only the single reconciler (the run loop) mutates it.
#[derive(Debug)]
pub struct VuPool<T> {
    runtime: Arc<ScenarioRuntime<T>>,
    max_vus: u64,
    /// Spawn order; the tail is the most recent.
    slots: Vec<VuSlot>,
    /// Released ids, lowest first, with the iteration counter they stopped at.
    free_ids: BTreeMap<u64, Arc<AtomicU64>>,
    next_id: u64,
    counters: Arc<IterationCounters>,
}

impl<T: Transport> VuPool<T> {
    pub fn new(runtime: Arc<ScenarioRuntime<T>>, max_vus: u64) -> Self {
        Self {
            runtime,
            max_vus,
            slots: Vec::new(),
            free_ids: BTreeMap::new(),
            next_id: 1,
            counters: Arc::new(IterationCounters::default()),
        }
    }

    pub fn max_vus(&self) -> u64 {
        self.max_vus
    }

    /// VUs that will start another iteration.
    pub fn live(&self) -> u64 {
        self.slots
            .iter()
            .filter(|s| s.lifecycle.state() == VuState::Active)
            .count() as u64
    }

    /// Tasks not yet reaped, retiring ones included.
    pub fn running(&self) -> u64 {
        self.slots.len() as u64
    }

    pub fn iterations(&self) -> IterationCounts {
        self.counters.load()
    }

    pub fn vu_ids(&self) -> Vec<u64> {
        self.slots.iter().map(|s| s.id).collect()
    }

    /// Moves the pool one step toward `target` active VUs.
    ///
    /// Finished tasks are reaped first so their ids can be reused. Retiring VUs are revived
    /// before new ones are spawned, and the ceiling counts retiring VUs too, so the number of
    /// tasks never exceeds `max_vus`.
    pub async fn reconcile(&mut self, target: u64) -> Result<ReconcileStats> {
        if target > self.max_vus {
            return Err(Error::EngineFault(format!(
                "target {target} exceeds the VU ceiling {}",
                self.max_vus
            )));
        }

        let mut stats = ReconcileStats {
            target,
            reaped: self.reap().await?,
            ..ReconcileStats::default()
        };

        let mut live = self.live();
        if live < target {
            for slot in self.slots.iter().rev() {
                if live == target {
                    break;
                }
                if slot.lifecycle.revive() {
                    live += 1;
                    stats.revived += 1;
                }
            }
            while live < target && self.running() < self.max_vus {
                self.spawn();
                live += 1;
                stats.spawned += 1;
            }
        } else if live > target {
            for slot in self.slots.iter().rev() {
                if live == target {
                    break;
                }
                if slot.lifecycle.retire() {
                    live -= 1;
                    stats.retired += 1;
                }
            }
        }

        if self.running() > self.max_vus {
            return Err(Error::EngineFault(format!(
                "{} VU tasks exceed the ceiling {}",
                self.running(),
                self.max_vus
            )));
        }

        stats.live = self.live();
        if stats.spawned + stats.revived + stats.retired > 0 {
            tracing::debug!(
                target,
                live = stats.live,
                spawned = stats.spawned,
                revived = stats.revived,
                retired = stats.retired,
                reaped = stats.reaped,
                "pool reconciled"
            );
        }
        Ok(stats)
    }

    fn spawn(&mut self) {
        let (id, next_iter) = self.free_ids.pop_first().unwrap_or_else(|| {
            let id = self.next_id;
            self.next_id += 1;
            (id, Arc::default())
        });
        let lifecycle = Arc::new(VuLifecycle::new());
        let handle = tokio::spawn(run_vu(
            id,
            next_iter.clone(),
            lifecycle.clone(),
            self.runtime.clone(),
            self.counters.clone(),
        ));
        self.slots.push(VuSlot {
            id,
            next_iter,
            lifecycle,
            handle,
        });
    }

    /// Removes finished tasks and releases their ids.
    async fn reap(&mut self) -> Result<u64> {
        let mut finished = Vec::new();
        let mut idx = 0;
        while idx < self.slots.len() {
            if self.slots[idx].handle.is_finished() {
                finished.push(self.slots.remove(idx));
            } else {
                idx += 1;
            }
        }

        let reaped = finished.len() as u64;
        match self.join_all(finished).await {
            Some(err) => Err(err),
            None => Ok(reaped),
        }
    }

    /// Joins every slot and releases its id, returning the first failure.
    async fn join_all(&mut self, slots: Vec<VuSlot>) -> Option<Error> {
        let mut first_err = None;
        for slot in slots {
            self.free_ids.insert(slot.id, slot.next_iter);
            let res = match slot.handle.await {
                Ok(res) => res,
                Err(err) => Err(Error::Join(err)),
            };
            if let Err(err) = res
                && first_err.is_none()
            {
                first_err = Some(err);
            }
        }
        first_err
    }

    /// Asks every VU to stop after its current iteration.
    pub fn retire_all(&self) -> u64 {
        self.slots
            .iter()
            .filter(|s| s.lifecycle.retire())
            .count() as u64
    }

    /// Retires everything and waits for each in-flight iteration to finish.
    pub async fn drain(&mut self) -> Result<()> {
        self.retire_all();

        let slots = std::mem::take(&mut self.slots);
        match self.join_all(slots).await {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
