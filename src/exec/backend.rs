// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The local queue hands every started run to a `RunExecutor` instead of
//! running it itself. Production code uses
//! [`CatalogExecutor`](super::catalog::CatalogExecutor); tests plug in fakes
//! that finish immediately or wait for a signal.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::engine::{Interrupt, JobDescriptor, ParameterValue};
use crate::types::{RunId, RunStatus};

/// A run the queue has just started.
#[derive(Debug, Clone)]
pub struct StartedRun {
    pub id: RunId,
    pub job: JobDescriptor,
    pub parameters: Vec<ParameterValue>,
    /// Fired by the queue when an orchestrator cancels this run.
    pub interrupt: Interrupt,
    /// Executor slot the queue started this run on.
    pub slot: ExecutorSlot,
}

/// Executor slot of a started run.
///
/// Clones share the slot. An executor releases it while the run only waits
/// on other builds, so those builds can get a slot themselves, and
/// reacquires it before doing work of its own.
#[derive(Clone)]
pub struct ExecutorSlot {
    pool: Arc<Semaphore>,
    permit: Arc<Mutex<Option<OwnedSemaphorePermit>>>,
}

impl ExecutorSlot {
    pub(crate) fn held(pool: Arc<Semaphore>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            pool,
            permit: Arc::new(Mutex::new(Some(permit))),
        }
    }

    fn permit(&self) -> MutexGuard<'_, Option<OwnedSemaphorePermit>> {
        self.permit.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_held(&self) -> bool {
        self.permit().is_some()
    }

    /// Give the slot back to the pool. No-op when not held.
    pub fn release(&self) {
        self.permit().take();
    }

    /// Wait for a free slot unless this run already holds one.
    ///
    /// Returns `false` when the pool has been closed.
    pub async fn reacquire(&self) -> bool {
        if self.is_held() {
            return true;
        }
        match Arc::clone(&self.pool).acquire_owned().await {
            Ok(permit) => {
                *self.permit() = Some(permit);
                true
            }
            Err(_) => false,
        }
    }
}

impl fmt::Debug for ExecutorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorSlot")
            .field("held", &self.is_held())
            .finish()
    }
}

/// What an executor reports when a run is over.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub variables: BTreeMap<String, String>,
}

impl RunOutcome {
    pub fn with_status(status: RunStatus) -> Self {
        Self {
            status,
            variables: BTreeMap::new(),
        }
    }
}

/// Trait abstracting how started runs are executed.
pub trait RunExecutor: Send + Sync {
    /// Execute `run` to completion.
    ///
    /// The returned future is spawned by the queue, so it must not borrow
    /// from `self`.
    fn execute(&self, run: StartedRun) -> Pin<Box<dyn Future<Output = RunOutcome> + Send + 'static>>;
}
