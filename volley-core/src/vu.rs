use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use tokio::sync::Notify;
use volley_metrics::Batch;

use crate::Result;
use crate::scenario::ScenarioRuntime;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum VuState {
    Active = 0,
    /// Finishes its current iteration, then exits.
    Retiring = 1,
    Exited = 2,
}

impl VuState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Active,
            1 => Self::Retiring,
            _ => Self::Exited,
        }
    }
}

/// Lifecycle cell shared by the pool and one VU task.
///
/// The pool flips `Active <-> Retiring`; only the VU moves `Retiring -> Exited`, and only at an
/// iteration boundary. Both sides use compare-and-swap, so a revive racing with an exit has
/// exactly one winner.
#[derive(Debug)]
pub struct VuLifecycle(AtomicU8);

impl VuLifecycle {
    pub fn new() -> Self {
        Self(AtomicU8::new(VuState::Active as u8))
    }

    pub fn state(&self) -> VuState {
        VuState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition(&self, from: VuState, to: VuState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn retire(&self) -> bool {
        self.transition(VuState::Active, VuState::Retiring)
    }

    pub fn revive(&self) -> bool {
        self.transition(VuState::Retiring, VuState::Active)
    }

    /// Called by the VU between iterations. `false` means the VU has exited.
    fn keep_running(&self) -> bool {
        loop {
            match self.state() {
                VuState::Active => return true,
                VuState::Exited => return false,
                VuState::Retiring => {
                    if self.transition(VuState::Retiring, VuState::Exited) {
                        return false;
                    }
                }
            }
        }
    }

    fn mark_exited(&self) {
        self.0.store(VuState::Exited as u8, Ordering::Release);
    }
}

impl Default for VuLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// External stop request for a run.
#[derive(Debug, Default)]
pub struct CancelSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent `cancel` is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Default)]
pub struct IterationCounters {
    started: AtomicU64,
    completed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationCounts {
    pub started: u64,
    pub completed: u64,
}

impl IterationCounts {
    /// Iterations that began but never finished. Zero for a healthy run.
    pub fn interrupted(&self) -> u64 {
        self.started.saturating_sub(self.completed)
    }
}

impl IterationCounters {
    pub fn load(&self) -> IterationCounts {
        let completed = self.completed.load(Ordering::Acquire);
        IterationCounts {
            started: self.started.load(Ordering::Acquire).max(completed),
            completed,
        }
    }
}

struct ExitGuard(Arc<VuLifecycle>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.mark_exited();
    }
}

/// VU task body: iterate until retired. Retirement is only observed between iterations.
pub(crate) async fn run_vu<T: Transport>(
    vu: u64,
    next_iter: Arc<AtomicU64>,
    lifecycle: Arc<VuLifecycle>,
    runtime: Arc<ScenarioRuntime<T>>,
    counters: Arc<IterationCounters>,
) -> Result<()> {
    let _exit = ExitGuard(lifecycle.clone());
    let mut batch = Batch::new(runtime.registry().clone());
    let mut iterations = 0u64;

    while lifecycle.keep_running() {
        let iter = next_iter.fetch_add(1, Ordering::AcqRel);
        counters.started.fetch_add(1, Ordering::AcqRel);
        let outcome = runtime.run_iteration(vu, iter, &mut batch).await;
        let flushed = batch.flush();
        counters.completed.fetch_add(1, Ordering::AcqRel);

        outcome?;
        flushed?;
        iterations += 1;
        tokio::task::yield_now().await;
    }

    tracing::debug!(vu, iterations, "vu exited");
    Ok(())
}
