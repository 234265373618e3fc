// src/engine/cancel.rs

//! Cancellation propagation from an orchestrator to the target it waits on.
//!
//! Every run owns an [`Interrupt`]. All steps of that run, including steps in
//! concurrent branches, share it. When it fires while a step is waiting, the
//! [`CancellationBridge`] either withdraws the queued item or forwards the
//! interrupt to the running target, then keeps waiting until the target is
//! really done. A target that is itself an orchestrator applies the same rule
//! to its own steps, which is what makes the cascade transitive.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::dispatch::{AdmissionQueue, DispatchHandle, DispatchState};
use crate::types::{QueueItemId, RunId, RunStatus};

/// Why a run was interrupted, and the status it should end with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptCause {
    pub status: RunStatus,
    pub reason: String,
}

impl InterruptCause {
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Aborted,
            reason: reason.into(),
        }
    }
}

impl Default for InterruptCause {
    fn default() -> Self {
        InterruptCause::aborted("interrupted")
    }
}

impl fmt::Display for InterruptCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason, self.status)
    }
}

/// Interruption signal of one run. Clones share the same signal.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    token: CancellationToken,
    cause: Arc<OnceLock<InterruptCause>>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the interrupt. The first cause wins; returns whether this call
    /// supplied it.
    pub fn interrupt(&self, cause: InterruptCause) -> bool {
        let first = self.cause.set(cause).is_ok();
        self.token.cancel();
        first
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cause(&self) -> Option<InterruptCause> {
        self.cause.get().cloned()
    }

    /// Resolves once the interrupt has fired.
    pub async fn interrupted(&self) -> InterruptCause {
        self.token.cancelled().await;
        self.cause().unwrap_or_default()
    }
}

/// Terminal handle state plus the interrupt observed while waiting, if any.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub state: DispatchState,
    pub interrupted: Option<InterruptCause>,
}

/// Bridges an orchestrator's interrupt to one dispatched target.
pub struct CancellationBridge<'a> {
    queue: &'a dyn AdmissionQueue,
    handle: &'a DispatchHandle,
    interrupt: &'a Interrupt,
}

#[derive(Default)]
struct Forwarded {
    cancelled_item: Option<QueueItemId>,
    interrupted_run: Option<RunId>,
}

impl<'a> CancellationBridge<'a> {
    pub fn new(
        queue: &'a dyn AdmissionQueue,
        handle: &'a DispatchHandle,
        interrupt: &'a Interrupt,
    ) -> Self {
        Self {
            queue,
            handle,
            interrupt,
        }
    }

    /// Wait for the handle to become terminal, forwarding any interrupt of
    /// the orchestrator to the target on the way.
    pub async fn settle(&self) -> Settlement {
        let mut rx = self.handle.subscribe();
        let mut interrupted: Option<InterruptCause> = None;
        let mut forwarded = Forwarded::default();

        loop {
            let state = rx.borrow_and_update().clone();
            if state.is_terminal() {
                return Settlement { state, interrupted };
            }

            if let Some(ref cause) = interrupted {
                self.forward(&state, cause, &mut forwarded);
            }

            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Settlement { state: self.handle.state(), interrupted };
                    }
                }
                cause = self.interrupt.interrupted(), if interrupted.is_none() => {
                    info!(
                        handle = %self.handle.id(),
                        job = %self.handle.job(),
                        reason = %cause.reason,
                        "orchestrator interrupted; propagating to target"
                    );
                    interrupted = Some(cause);
                }
            }
        }
    }

    fn forward(&self, state: &DispatchState, cause: &InterruptCause, forwarded: &mut Forwarded) {
        match state {
            DispatchState::Queued { item } => {
                if forwarded.cancelled_item == Some(*item) {
                    return;
                }
                forwarded.cancelled_item = Some(*item);
                if self.queue.cancel(*item) {
                    self.handle.mark_cancelled(*item);
                    info!(handle = %self.handle.id(), %item, "cancelled queued target");
                } else {
                    debug!(
                        handle = %self.handle.id(),
                        %item,
                        "queue item already left the queue; waiting for start"
                    );
                }
            }
            DispatchState::Started { run } | DispatchState::Running { run } => {
                if forwarded.interrupted_run.as_ref() == Some(run) {
                    return;
                }
                forwarded.interrupted_run = Some(run.clone());
                let delivered = self.queue.interrupt(run, cause);
                info!(
                    handle = %self.handle.id(),
                    %run,
                    delivered,
                    "interrupting running target; waiting for it to finish"
                );
            }
            _ => {}
        }
    }
}
