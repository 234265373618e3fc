// src/engine/step.rs

//! The trigger step: one invocation of "build this job" inside an
//! orchestrating run.
//!
//! ```text
//! Resolving -> Parameters -> Dispatching -> QueuedOnly (wait: false)
//!                                        -> Awaiting -> Finalizing
//! ```
//!
//! Any error before the target exists ends the step in `DoneFailure`
//! regardless of `propagate`. Once a target result exists, `propagate`
//! decides whether its status is mirrored onto the orchestrator.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::TriggerServices;
use crate::engine::cancel::{CancellationBridge, Interrupt};
use crate::engine::causality::CausalityLinker;
use crate::engine::dispatch::{DispatchState, TriggerResult};
use crate::engine::params::{ParamValue, ParameterValue, resolve_parameters};
use crate::errors::{Result, TriggerError};
use crate::types::{NodeId, Principal, RunId, RunStatus};

fn default_true() -> bool {
    true
}

/// Request description as written by the orchestrating script.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TriggerRequest {
    #[serde(alias = "job")]
    pub target: String,
    #[serde(default)]
    pub parameters: Vec<ParameterValue>,
    #[serde(default = "default_true")]
    pub wait: bool,
    #[serde(default = "default_true")]
    pub propagate: bool,
}

impl TriggerRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            parameters: Vec::new(),
            wait: true,
            propagate: true,
        }
    }

    pub fn parameter(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.parameters.push(ParameterValue::new(name, value));
        self
    }

    pub fn wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    pub fn propagate(mut self, propagate: bool) -> Self {
        self.propagate = propagate;
        self
    }
}

/// What the hosting engine provides for the currently executing step.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// The orchestrating run.
    pub run: RunId,
    /// Node of the orchestrator's graph that issues the trigger; unique
    /// within `run`.
    pub node: NodeId,
    /// Folder the orchestrating job lives in; relative references start here.
    pub scope: String,
    pub principal: Principal,
    pub interrupt: Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepPhase {
    Resolving,
    Parameters,
    Dispatching,
    QueuedOnly,
    Awaiting,
    Finalizing,
    DoneSuccess,
    DoneFailurePropagated,
    DoneSuccessNonPropagated,
    DoneFailure,
}

/// Final outcome of a trigger step.
#[derive(Debug)]
pub struct StepOutcome {
    /// One of the `Done*` phases.
    pub phase: StepPhase,
    /// Status this step contributes to the orchestrating run.
    pub status: RunStatus,
    /// The target's result, whenever one was produced.
    pub result: Option<TriggerResult>,
    pub error: Option<TriggerError>,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// Whether the orchestrating script should stop at this step.
    pub fn halts(&self) -> bool {
        self.error.is_some() || self.status >= RunStatus::Failure
    }
}

pub struct TriggerStep {
    services: Arc<TriggerServices>,
    ctx: StepContext,
    request: TriggerRequest,
    phase: StepPhase,
}

impl TriggerStep {
    pub fn new(services: Arc<TriggerServices>, ctx: StepContext, request: TriggerRequest) -> Self {
        Self {
            services,
            ctx,
            request,
            phase: StepPhase::Resolving,
        }
    }

    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    /// Drive the step to completion.
    pub async fn run(mut self) -> StepOutcome {
        match self.execute().await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.enter(StepPhase::DoneFailure);
                warn!(
                    run = %self.ctx.run,
                    node = %self.ctx.node,
                    target = %self.request.target,
                    error = %err,
                    "trigger step failed"
                );
                let result = match err {
                    TriggerError::Interrupted { ref result, .. } => result.clone(),
                    _ => None,
                };
                StepOutcome {
                    phase: StepPhase::DoneFailure,
                    status: err.status(),
                    result,
                    error: Some(err),
                }
            }
        }
    }

    fn enter(&mut self, phase: StepPhase) {
        debug!(
            run = %self.ctx.run,
            node = %self.ctx.node,
            from = ?self.phase,
            to = ?phase,
            "trigger step phase"
        );
        self.phase = phase;
    }

    async fn execute(&mut self) -> Result<StepOutcome> {
        let services = Arc::clone(&self.services);

        let job = services.resolver().resolve(
            &self.request.target,
            &self.ctx.scope,
            &self.ctx.principal,
        )?;

        self.enter(StepPhase::Parameters);
        let parameters = resolve_parameters(&job.full_name, &job.parameters, &self.request.parameters)?;

        self.enter(StepPhase::Dispatching);
        let cause = CausalityLinker::intent(&self.ctx.run, &self.ctx.node);
        let handle = services.coordinator().submit(&job, parameters, cause)?;

        if !self.request.wait {
            self.enter(StepPhase::QueuedOnly);
            self.enter(StepPhase::DoneSuccess);
            return Ok(StepOutcome {
                phase: StepPhase::DoneSuccess,
                status: RunStatus::Success,
                result: None,
                error: None,
            });
        }

        self.enter(StepPhase::Awaiting);
        let settlement = CancellationBridge::new(services.queue(), &handle, &self.ctx.interrupt)
            .settle()
            .await;

        self.enter(StepPhase::Finalizing);
        let result = match settlement.state {
            DispatchState::Completed { result, .. } => Some(result),
            DispatchState::Cancelled { .. } => None,
            DispatchState::Rejected { .. } => {
                return Err(TriggerError::RejectedAtAdmission(job.full_name));
            }
            other => {
                return Err(TriggerError::Other(anyhow::anyhow!(
                    "dispatch of {} ended in unexpected state {:?}",
                    job.full_name,
                    other
                )));
            }
        };

        if let Some(cause) = settlement.interrupted {
            return Err(TriggerError::Interrupted { cause, result });
        }

        let Some(result) = result else {
            return Err(TriggerError::QueueItemCancelled(job.full_name));
        };

        Ok(self.finalize(result))
    }

    fn finalize(&mut self, result: TriggerResult) -> StepOutcome {
        let target_status = result.result;
        let (phase, status) = if !target_status.is_worse_than(RunStatus::Success) {
            (StepPhase::DoneSuccess, RunStatus::Success)
        } else if self.request.propagate {
            (StepPhase::DoneFailurePropagated, target_status)
        } else {
            (StepPhase::DoneSuccessNonPropagated, RunStatus::Success)
        };

        self.enter(phase);
        info!(
            run = %self.ctx.run,
            target = %self.request.target,
            number = result.run_number,
            %target_status,
            propagate = self.request.propagate,
            %status,
            "trigger step finished"
        );

        StepOutcome {
            phase,
            status,
            result: Some(result),
            error: None,
        }
    }
}
