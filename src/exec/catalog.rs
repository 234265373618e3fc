// src/exec/catalog.rs

//! Executes catalog jobs.
//!
//! A job's build does, in order:
//! 1. its `trigger` entries (sequentially or as parallel branches), which is
//!    what turns a job into an orchestrator;
//! 2. its `cmd`, or, without one, a simulated build of `duration` ending in
//!    the configured `result`.
//!
//! The second part is skipped once the first has failed or the build was
//! interrupted.
//!
//! While its triggers run, a build gives its executor slot back to the
//! queue, so the builds it waits on never starve for one.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock, Weak};

use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::config::{Catalog, CatalogJob};
use crate::engine::{Interrupt, TriggerServices};
use crate::exec::backend::{RunExecutor, RunOutcome, StartedRun};
use crate::exec::local::Orchestrator;
use crate::exec::task_runner::run_command;
use crate::types::RunStatus;

pub struct CatalogExecutor {
    catalog: Arc<Catalog>,
    services: OnceLock<Weak<TriggerServices>>,
}

impl CatalogExecutor {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            services: OnceLock::new(),
        }
    }

    /// Hand the executor the services its orchestrating jobs trigger through.
    /// Only the first call has an effect.
    pub fn bind(&self, services: &Arc<TriggerServices>) {
        let _ = self.services.set(Arc::downgrade(services));
    }
}

impl RunExecutor for CatalogExecutor {
    fn execute(&self, run: StartedRun) -> Pin<Box<dyn Future<Output = RunOutcome> + Send + 'static>> {
        let catalog = Arc::clone(&self.catalog);
        let services = self.services.get().and_then(Weak::upgrade);
        Box::pin(async move { execute_job(catalog, services, run).await })
    }
}

async fn execute_job(
    catalog: Arc<Catalog>,
    services: Option<Arc<TriggerServices>>,
    run: StartedRun,
) -> RunOutcome {
    let Some(job) = catalog.job(&run.job.full_name).cloned() else {
        warn!(run = %run.id, "job vanished from the catalog");
        return RunOutcome::with_status(RunStatus::NotBuilt);
    };

    let mut variables: BTreeMap<String, String> = run
        .parameters
        .iter()
        .map(|p| (p.name.clone(), p.value.as_text()))
        .collect();
    variables.extend(job.variables.clone());

    let mut status = RunStatus::Success;

    if !job.triggers.is_empty() {
        let Some(services) = services else {
            error!(run = %run.id, "executor is not bound to trigger services; cannot run triggers");
            return RunOutcome::with_status(RunStatus::NotBuilt);
        };
        run.slot.release();
        debug!(run = %run.id, "executor slot released while triggering");
        let orchestrator = Orchestrator::for_run(
            services,
            run.id.clone(),
            job.descriptor.folder(),
            catalog.principal_for(&job.descriptor.full_name),
            run.interrupt.clone(),
        );
        status = status.combine(run_triggers(&orchestrator, &job).await);
    }

    let own_phase = status < RunStatus::Failure && !run.interrupt.is_interrupted();
    if own_phase && resume_slot(&run).await {
        let own = match job.cmd {
            Some(ref cmd) => run_command(&run, cmd).await,
            None => simulate(&job, &run.interrupt).await,
        };
        status = status.combine(own.status);
        variables.extend(own.variables);
    }

    if let Some(cause) = run.interrupt.cause() {
        status = status.combine(cause.status);
    }

    RunOutcome { status, variables }
}

/// Get the run's executor slot back before its own build phase.
async fn resume_slot(run: &StartedRun) -> bool {
    if run.slot.is_held() {
        return true;
    }
    tokio::select! {
        resumed = run.slot.reacquire() => {
            if !resumed {
                warn!(run = %run.id, "executor slots closed; skipping build phase");
            }
            resumed
        }
        _ = run.interrupt.interrupted() => false,
    }
}

/// Worst status over all trigger steps of `job`.
async fn run_triggers(orchestrator: &Orchestrator, job: &CatalogJob) -> RunStatus {
    let mut status = RunStatus::Success;

    if job.parallel {
        let mut branches = JoinSet::new();
        for request in job.triggers.iter().cloned() {
            branches.spawn(orchestrator.step(request).run());
        }
        while let Some(joined) = branches.join_next().await {
            match joined {
                Ok(outcome) => status = status.combine(outcome.status),
                Err(e) => {
                    error!(run = %orchestrator.run_id(), error = %e, "trigger branch panicked");
                    status = status.combine(RunStatus::Failure);
                }
            }
        }
        return status;
    }

    for request in job.triggers.iter().cloned() {
        let outcome = orchestrator.step(request).run().await;
        status = status.combine(outcome.status);
        if outcome.halts() {
            debug!(run = %orchestrator.run_id(), status = %outcome.status, "trigger step halted the build");
            break;
        }
    }
    status
}

async fn simulate(job: &CatalogJob, interrupt: &Interrupt) -> RunOutcome {
    let Some(duration) = job.duration else {
        return RunOutcome::with_status(job.result);
    };
    tokio::select! {
        _ = tokio::time::sleep(duration) => RunOutcome::with_status(job.result),
        cause = interrupt.interrupted() => RunOutcome::with_status(cause.status),
    }
}
