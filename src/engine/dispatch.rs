// src/engine/dispatch.rs

//! Dispatch coordination between a trigger step and the admission queue.
//!
//! Each submission gets its own [`DispatchHandle`]. The handle's state lives
//! in a `watch` channel, which gives us a single-assignment result cell:
//! subscribers always see the latest published state first, so a target that
//! finishes before anyone waits on it is never missed.
//!
//! The queue reports progress through [`ItemListener`] callbacks on whatever
//! thread it likes. Transitions are monotonic; late or duplicate
//! notifications are dropped.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::access::JobDescriptor;
use crate::engine::cancel::InterruptCause;
use crate::engine::causality::CausalityLinker;
use crate::engine::params::ParameterValue;
use crate::errors::{Result, TriggerError};
use crate::records::{RunRegistry, UpstreamCause};
use crate::types::{QueueItemId, RunId, RunStatus};

/// Outcome of a finished target run, as exposed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResult {
    pub run_number: u64,
    pub result: RunStatus,
    pub variables: BTreeMap<String, String>,
}

/// What the queue is asked to schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTask {
    pub job: JobDescriptor,
    pub parameters: Vec<ParameterValue>,
}

/// Veto returned by the queue's admission policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: String,
}

/// Progress notifications for one queue item, delivered by the queue.
pub trait ItemListener: Send + Sync {
    fn on_started(&self, item: QueueItemId, run: RunId);
    fn on_cancelled(&self, item: QueueItemId);
    fn on_completed(&self, run: RunId, result: TriggerResult);
}

/// The admission queue and the executors behind it.
///
/// Submissions and cancellations must each be atomic; nothing else about the
/// queue's internal locking is assumed. The queue may coalesce a submission
/// into an existing item, in which case it keeps the new cause and listener
/// alongside the old ones.
pub trait AdmissionQueue: Send + Sync {
    fn submit(
        &self,
        task: QueueTask,
        cause: UpstreamCause,
        listener: Arc<dyn ItemListener>,
    ) -> std::result::Result<QueueItemId, Rejection>;

    /// Withdraw a queued item. Returns false if it already started or is
    /// unknown.
    fn cancel(&self, item: QueueItemId) -> bool;

    /// Signal a running target run. Returns false if it is not running.
    fn interrupt(&self, run: &RunId, cause: &InterruptCause) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dispatch-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchState {
    Resolving,
    Queued { item: QueueItemId },
    Started { run: RunId },
    Running { run: RunId },
    Cancelled { item: QueueItemId },
    Completed { run: RunId, result: TriggerResult },
    Rejected { reason: String },
}

impl DispatchState {
    fn rank(&self) -> u8 {
        match self {
            DispatchState::Resolving => 0,
            DispatchState::Queued { .. } => 1,
            DispatchState::Started { .. } => 2,
            DispatchState::Running { .. } => 3,
            DispatchState::Cancelled { .. }
            | DispatchState::Completed { .. }
            | DispatchState::Rejected { .. } => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 4
    }

    /// Queue item identity; only meaningful while queued.
    pub fn queue_item(&self) -> Option<QueueItemId> {
        match self {
            DispatchState::Queued { item } => Some(*item),
            _ => None,
        }
    }

    /// Target run identity, once the item has started.
    pub fn run(&self) -> Option<&RunId> {
        match self {
            DispatchState::Started { run }
            | DispatchState::Running { run }
            | DispatchState::Completed { run, .. } => Some(run),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&TriggerResult> {
        match self {
            DispatchState::Completed { result, .. } => Some(result),
            _ => None,
        }
    }

    fn accepts(&self, next: &DispatchState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            DispatchState::Rejected { .. } => matches!(self, DispatchState::Resolving),
            DispatchState::Cancelled { .. } => {
                matches!(self, DispatchState::Resolving | DispatchState::Queued { .. })
            }
            _ => next.rank() > self.rank(),
        }
    }
}

/// Listener registered with the queue on behalf of one handle.
///
/// It outlives the step when `wait` is false, so causality is still linked
/// once the target starts.
struct DispatchSink {
    id: HandleId,
    job: String,
    cause: UpstreamCause,
    records: RunRegistry,
    state: watch::Sender<DispatchState>,
}

impl DispatchSink {
    fn advance(&self, next: DispatchState) -> bool {
        self.state.send_if_modified(|current| {
            if current.accepts(&next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }
}

impl ItemListener for DispatchSink {
    fn on_started(&self, item: QueueItemId, run: RunId) {
        info!(handle = %self.id, %item, %run, "Starting building: {run}");
        self.advance(DispatchState::Started { run: run.clone() });
        CausalityLinker::link(&self.records, &self.cause, &run);
        self.advance(DispatchState::Running { run });
    }

    fn on_cancelled(&self, item: QueueItemId) {
        if self.advance(DispatchState::Cancelled { item }) {
            info!(handle = %self.id, %item, job = %self.job, "queue item cancelled");
        }
    }

    fn on_completed(&self, run: RunId, result: TriggerResult) {
        CausalityLinker::link(&self.records, &self.cause, &run);
        let status = result.result;
        if self.advance(DispatchState::Completed {
            run: run.clone(),
            result,
        }) {
            info!(handle = %self.id, %run, %status, "target run completed");
        } else {
            debug!(handle = %self.id, %run, "duplicate completion suppressed");
        }
    }
}

/// Exclusive handle on one dispatched request.
pub struct DispatchHandle {
    id: HandleId,
    sink: Arc<DispatchSink>,
}

impl fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("id", &self.id)
            .field("job", &self.sink.job)
            .field("state", &self.state())
            .finish()
    }
}

impl DispatchHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn job(&self) -> &str {
        &self.sink.job
    }

    /// Current state snapshot.
    pub fn state(&self) -> DispatchState {
        self.sink.state.borrow().clone()
    }

    /// Fresh receiver whose first observation is the current state.
    pub fn subscribe(&self) -> watch::Receiver<DispatchState> {
        self.sink.state.subscribe()
    }

    /// Wait until `predicate` holds for the handle's state.
    ///
    /// Checking and subscribing happen in one step, so a state published
    /// before this call is observed immediately.
    pub async fn wait_until<F>(&self, mut predicate: F) -> DispatchState
    where
        F: FnMut(&DispatchState) -> bool,
    {
        let mut rx = self.subscribe();
        match rx.wait_for(|state| predicate(state)).await {
            Ok(state) => state.clone(),
            // The sink owns the sender and we own the sink.
            Err(_) => self.state(),
        }
    }

    /// Wait for a terminal state.
    pub async fn settled(&self) -> DispatchState {
        self.wait_until(DispatchState::is_terminal).await
    }

    /// Wait until the target run has an identity, or the handle is terminal.
    pub async fn started(&self) -> DispatchState {
        self.wait_until(|state| state.run().is_some() || state.is_terminal())
            .await
    }

    pub(crate) fn mark_cancelled(&self, item: QueueItemId) -> bool {
        self.sink.advance(DispatchState::Cancelled { item })
    }

    /// Listener view of this handle, for feeding notifications by hand.
    pub fn listener(&self) -> Arc<dyn ItemListener> {
        self.sink.clone()
    }
}

/// Submits resolved tasks to the admission queue and hands back handles.
pub struct DispatchCoordinator {
    queue: Arc<dyn AdmissionQueue>,
    records: RunRegistry,
    next_handle: AtomicU64,
}

impl DispatchCoordinator {
    pub fn new(queue: Arc<dyn AdmissionQueue>, records: RunRegistry) -> Self {
        Self {
            queue,
            records,
            next_handle: AtomicU64::new(1),
        }
    }

    /// Submit `job` with already resolved parameters. Never blocks on the
    /// target; fails only if the queue's admission policy vetoes the task.
    pub fn submit(
        &self,
        job: &JobDescriptor,
        parameters: Vec<ParameterValue>,
        cause: UpstreamCause,
    ) -> Result<DispatchHandle> {
        let id = HandleId(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let (state, _) = watch::channel(DispatchState::Resolving);
        let sink = Arc::new(DispatchSink {
            id,
            job: job.full_name.clone(),
            cause: cause.clone(),
            records: self.records.clone(),
            state,
        });

        let task = QueueTask {
            job: job.clone(),
            parameters,
        };
        let listener: Arc<dyn ItemListener> = sink.clone();

        match self.queue.submit(task, cause, listener) {
            Ok(item) => {
                // A fast queue may already have moved the handle past this.
                sink.advance(DispatchState::Queued { item });
                info!(handle = %id, %item, "Scheduling project: {}", job.full_name);
            }
            Err(rejection) => {
                warn!(
                    handle = %id,
                    job = %job.full_name,
                    reason = %rejection.reason,
                    "admission policy rejected task"
                );
                sink.advance(DispatchState::Rejected {
                    reason: rejection.reason,
                });
                return Err(TriggerError::RejectedAtAdmission(job.full_name.clone()));
            }
        }

        Ok(DispatchHandle { id, sink })
    }
}
