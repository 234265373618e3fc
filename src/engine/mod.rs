// src/engine/mod.rs

//! Trigger engine.
//!
//! Leaves first:
//! - [`params`] resolves and validates parameter values;
//! - [`access`] resolves job references and applies the access gate;
//! - [`causality`] links orchestrator nodes and target runs;
//! - [`dispatch`] submits to the admission queue and tracks each submission;
//! - [`cancel`] carries interrupts from orchestrators down to their targets;
//! - [`step`] sequences all of the above for one trigger invocation.
//!
//! The queue, job directory, access oracle and run records are collaborators
//! passed in through [`TriggerServices`]; the engine never reaches for global
//! state.

use std::sync::Arc;

pub mod access;
pub mod cancel;
pub mod causality;
pub mod dispatch;
pub mod params;
pub mod step;

pub use access::{
    AccessControl, AllowAll, GrantTable, JobDescriptor, JobDirectory, Permission, TargetResolver,
};
pub use cancel::{CancellationBridge, Interrupt, InterruptCause, Settlement};
pub use causality::{CausalityLinker, Origin};
pub use dispatch::{
    AdmissionQueue, DispatchCoordinator, DispatchHandle, DispatchState, HandleId, ItemListener,
    QueueTask, Rejection, TriggerResult,
};
pub use params::{ParamValue, ParameterDefinition, ParameterKind, ParameterValue, resolve_parameters};
pub use step::{StepContext, StepOutcome, StepPhase, TriggerRequest, TriggerStep};

use crate::records::{RunRegistry, UpstreamCause};
use crate::types::RunId;

/// Everything a trigger step talks to.
pub struct TriggerServices {
    resolver: TargetResolver,
    queue: Arc<dyn AdmissionQueue>,
    coordinator: DispatchCoordinator,
    records: RunRegistry,
}

impl TriggerServices {
    pub fn new(
        jobs: Arc<dyn JobDirectory>,
        access: Arc<dyn AccessControl>,
        queue: Arc<dyn AdmissionQueue>,
        records: RunRegistry,
    ) -> Self {
        Self {
            resolver: TargetResolver::new(jobs, access),
            coordinator: DispatchCoordinator::new(Arc::clone(&queue), records.clone()),
            queue,
            records,
        }
    }

    pub fn resolver(&self) -> &TargetResolver {
        &self.resolver
    }

    pub fn coordinator(&self) -> &DispatchCoordinator {
        &self.coordinator
    }

    pub fn queue(&self) -> &dyn AdmissionQueue {
        self.queue.as_ref()
    }

    pub fn records(&self) -> &RunRegistry {
        &self.records
    }

    /// Provenance attached to `run`: the orchestrator nodes that caused it.
    pub fn provenance(&self, run: &RunId) -> Vec<UpstreamCause> {
        self.records
            .get(run)
            .map(|record| record.causes)
            .unwrap_or_default()
    }
}
