// src/exec/queue.rs

//! In-process admission queue.
//!
//! Semantics:
//! - A submission for a job that already has a *pending* item with identical
//!   parameters is coalesced into it: the item keeps every cause and every
//!   listener, and starts a single run.
//! - A fresh item waits out its quiet period (the job's, else the queue's),
//!   then for a free executor slot. With zero slots items never start.
//!   The run may hand its slot back while it waits on builds of its own
//!   (see [`ExecutorSlot`]).
//! - Once started, the item leaves the queue for good; cancelling it is then
//!   a no-op and the run must be interrupted instead.
//!
//! Must be used from inside a Tokio runtime: every item gets its own task.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{
    AdmissionQueue, Interrupt, InterruptCause, ItemListener, QueueTask, Rejection, TriggerResult,
};
use crate::exec::backend::{ExecutorSlot, RunExecutor, StartedRun};
use crate::records::{RunRegistry, UpstreamCause};
use crate::types::{QueueItemId, RunId};

/// Veto hook consulted for every submission.
pub trait AdmissionPolicy: Send + Sync {
    fn should_schedule(&self, task: &QueueTask) -> bool;
}

/// Accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl AdmissionPolicy for AcceptAll {
    fn should_schedule(&self, _task: &QueueTask) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    pub executors: usize,
    pub quiet_period: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            executors: 2,
            quiet_period: Duration::ZERO,
        }
    }
}

/// Read-only view of a pending item.
#[derive(Debug, Clone)]
pub struct PendingItemInfo {
    pub id: QueueItemId,
    pub job: String,
    pub causes: Vec<UpstreamCause>,
}

struct PendingItem {
    task: QueueTask,
    causes: Vec<UpstreamCause>,
    listeners: Vec<Arc<dyn ItemListener>>,
    withdrawn: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    next_item: u64,
    pending: BTreeMap<QueueItemId, PendingItem>,
    next_number: HashMap<String, u64>,
    running: HashMap<RunId, Interrupt>,
}

struct Shared {
    state: Mutex<QueueState>,
    executor: Arc<dyn RunExecutor>,
    policy: Arc<dyn AdmissionPolicy>,
    records: RunRegistry,
    slots: Arc<Semaphore>,
    options: QueueOptions,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move a pending item into the running set. `None` if it was withdrawn.
    fn start(
        &self,
        item: QueueItemId,
        permit: OwnedSemaphorePermit,
    ) -> Option<(StartedRun, Vec<Arc<dyn ItemListener>>)> {
        let mut state = self.lock();
        let pending = state.pending.remove(&item)?;

        let job = pending.task.job.full_name.clone();
        let counter = state.next_number.entry(job.clone()).or_insert(0);
        *counter += 1;
        let id = RunId::new(job, *counter);

        let interrupt = Interrupt::new();
        state.running.insert(id.clone(), interrupt.clone());
        drop(state);

        self.records
            .begin_run(&id, pending.task.parameters.clone());

        let run = StartedRun {
            id,
            job: pending.task.job,
            parameters: pending.task.parameters,
            interrupt,
            slot: ExecutorSlot::held(Arc::clone(&self.slots), permit),
        };
        Some((run, pending.listeners))
    }
}

/// Local admission queue feeding a [`RunExecutor`].
pub struct LocalQueue {
    shared: Arc<Shared>,
}

impl LocalQueue {
    pub fn new(
        executor: Arc<dyn RunExecutor>,
        policy: Arc<dyn AdmissionPolicy>,
        records: RunRegistry,
        options: QueueOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                executor,
                policy,
                records,
                slots: Arc::new(Semaphore::new(options.executors)),
                options,
            }),
        }
    }

    pub fn pending_items(&self) -> Vec<PendingItemInfo> {
        self.shared
            .lock()
            .pending
            .iter()
            .map(|(id, item)| PendingItemInfo {
                id: *id,
                job: item.task.job.full_name.clone(),
                causes: item.causes.clone(),
            })
            .collect()
    }

    pub fn running_runs(&self) -> Vec<RunId> {
        let mut runs: Vec<RunId> = self.shared.lock().running.keys().cloned().collect();
        runs.sort();
        runs
    }

    /// No pending items and nothing running.
    pub fn is_idle(&self) -> bool {
        let state = self.shared.lock();
        state.pending.is_empty() && state.running.is_empty()
    }
}

impl AdmissionQueue for LocalQueue {
    fn submit(
        &self,
        task: QueueTask,
        cause: UpstreamCause,
        listener: Arc<dyn ItemListener>,
    ) -> Result<QueueItemId, Rejection> {
        let job = task.job.full_name.clone();
        if !self.shared.policy.should_schedule(&task) {
            return Err(Rejection {
                reason: format!("admission policy refused {job}"),
            });
        }

        let mut state = self.shared.lock();

        if let Some((id, item)) = state
            .pending
            .iter_mut()
            .find(|(_, item)| item.task == task)
        {
            item.causes.push(cause);
            item.listeners.push(listener);
            debug!(
                %job,
                item = %id,
                causes = item.causes.len(),
                "coalesced submission into pending item"
            );
            return Ok(*id);
        }

        state.next_item += 1;
        let id = QueueItemId(state.next_item);
        let quiet_period = task.job.quiet_period.unwrap_or(self.shared.options.quiet_period);
        let withdrawn = CancellationToken::new();
        state.pending.insert(
            id,
            PendingItem {
                task,
                causes: vec![cause],
                listeners: vec![listener],
                withdrawn: withdrawn.clone(),
            },
        );
        drop(state);

        debug!(%job, item = %id, ?quiet_period, "queued new item");
        tokio::spawn(run_item(Arc::clone(&self.shared), id, quiet_period, withdrawn));
        Ok(id)
    }

    fn cancel(&self, item: QueueItemId) -> bool {
        let removed = self.shared.lock().pending.remove(&item);
        let Some(pending) = removed else {
            debug!(%item, "cancel requested for item no longer pending");
            return false;
        };

        pending.withdrawn.cancel();
        info!(%item, job = %pending.task.job.full_name, "queue item cancelled");
        for listener in pending.listeners.iter() {
            listener.on_cancelled(item);
        }
        true
    }

    fn interrupt(&self, run: &RunId, cause: &InterruptCause) -> bool {
        let interrupt = self.shared.lock().running.get(run).cloned();
        match interrupt {
            Some(interrupt) => {
                interrupt.interrupt(cause.clone());
                info!(%run, reason = %cause.reason, "interrupt delivered to running build");
                true
            }
            None => {
                debug!(%run, "interrupt requested for build that is not running");
                false
            }
        }
    }
}

/// Lifecycle of one queue item: quiet period, executor slot, run, report.
async fn run_item(
    shared: Arc<Shared>,
    item: QueueItemId,
    quiet_period: Duration,
    withdrawn: CancellationToken,
) {
    let slots = Arc::clone(&shared.slots);
    let permit = tokio::select! {
        _ = withdrawn.cancelled() => return,
        permit = async move {
            tokio::time::sleep(quiet_period).await;
            slots.acquire_owned().await
        } => permit,
    };
    let Ok(permit) = permit else {
        warn!(%item, "executor slots closed; item dropped");
        return;
    };

    let Some((run, listeners)) = shared.start(item, permit) else {
        debug!(%item, "item withdrawn before it could start");
        return;
    };
    let run_id = run.id.clone();
    let slot = run.slot.clone();

    for listener in listeners.iter() {
        listener.on_started(item, run_id.clone());
    }

    let outcome = shared.executor.execute(run).await;
    slot.release();

    shared.lock().running.remove(&run_id);
    shared
        .records
        .finish_run(&run_id, outcome.status, outcome.variables.clone());
    info!(run = %run_id, status = %outcome.status, "Finished: {}", outcome.status);

    let result = TriggerResult {
        run_number: run_id.number,
        result: outcome.status,
        variables: outcome.variables,
    };
    for listener in listeners.iter() {
        listener.on_completed(run_id.clone(), result.clone());
    }
}
