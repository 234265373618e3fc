// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod records;
pub mod types;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{Catalog, load_and_validate};
use crate::engine::{InterruptCause, StepOutcome, StepPhase, TriggerRequest, TriggerResult};
use crate::exec::LocalEnvironment;
use crate::records::UpstreamCause;
use crate::types::{Principal, RunStatus};

/// Name of the orchestrating run that stands for the command line.
pub const CLI_ORCHESTRATOR: &str = "cli";

/// What `jobtrigger` prints on stdout.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerReport {
    pub job: String,
    pub principal: String,
    pub phase: StepPhase,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TriggerResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Provenance recorded on the target run.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<UpstreamCause>,
}

impl TriggerReport {
    fn new(job: &str, principal: &Principal, outcome: &StepOutcome, causes: Vec<UpstreamCause>) -> Self {
        Self {
            job: job.to_string(),
            principal: principal.to_string(),
            phase: outcome.phase,
            status: outcome.status,
            result: outcome.result.clone(),
            error: outcome.error.as_ref().map(ToString::to_string),
            causes,
        }
    }
}

/// Process exit code for the status of the command line run.
pub fn exit_code(status: RunStatus) -> i32 {
    match status {
        RunStatus::Success => 0,
        RunStatus::Unstable => 2,
        RunStatus::Aborted => 130,
        RunStatus::Failure | RunStatus::NotBuilt => 1,
    }
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - catalog loading
/// - local queue and executors
/// - the command line orchestrator and its trigger step
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<RunStatus> {
    let catalog_path = PathBuf::from(&args.catalog);
    let catalog = load_and_validate(&catalog_path)?;

    if args.dry_run {
        print_dry_run(&catalog);
        return Ok(RunStatus::Success);
    }

    let job = args
        .job
        .clone()
        .ok_or_else(|| anyhow!("--job is required unless --dry-run is given"))?;

    let env = LocalEnvironment::from_catalog(catalog);
    let mut orchestrator = env.orchestrator(CLI_ORCHESTRATOR);
    if let Some(principal) = args.principal.clone() {
        orchestrator = orchestrator.with_principal(principal);
    }
    let principal = args
        .principal
        .clone()
        .unwrap_or_else(|| env.catalog().principal_for(CLI_ORCHESTRATOR));

    // Ctrl-C → interrupt the command line run, which cascades downstream.
    {
        let interrupt = orchestrator.interrupt().clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            interrupt.interrupt(InterruptCause::aborted("interrupted from the command line"));
        });
    }

    let request = TriggerRequest {
        target: job.clone(),
        parameters: args.params.clone(),
        wait: !args.no_wait,
        propagate: !args.no_propagate,
    };
    info!(run = %orchestrator.run_id(), %job, %principal, "triggering from the command line");

    let outcome = orchestrator.trigger(request).await;

    if args.no_wait {
        // The build is only queued; let it finish before the runtime goes away.
        while !env.queue().is_idle() && !orchestrator.interrupt().is_interrupted() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    let causes = env
        .records()
        .get(orchestrator.run_id())
        .and_then(|record| record.downstream.first().map(|link| link.run.clone()))
        .map(|target| env.services().provenance(&target))
        .unwrap_or_default();

    env.records()
        .finish_run(orchestrator.run_id(), outcome.status, BTreeMap::new());

    let report = TriggerReport::new(&job, &principal, &outcome, causes);
    let json = serde_json::to_string_pretty(&report).context("serializing trigger report")?;
    println!("{json}");

    debug!(status = %outcome.status, "command line run finished");
    Ok(outcome.status)
}

/// Simple dry-run output: print jobs, parameters and nested triggers.
fn print_dry_run(catalog: &Catalog) {
    println!("jobtrigger dry-run");
    println!("  config.executors = {}", catalog.executors());
    println!("  config.quiet_period = {:?}", catalog.quiet_period());
    println!();

    println!("jobs ({}):", catalog.len());
    for job in catalog.jobs() {
        println!("  - {}", job.descriptor.full_name);
        if let Some(ref cmd) = job.cmd {
            println!("      cmd: {cmd}");
        } else {
            println!("      result: {}", job.result);
        }
        for param in job.descriptor.parameters.iter() {
            println!("      parameter: {} = {}", param.name, param.default_value());
        }
        for trigger in job.triggers.iter() {
            println!(
                "      trigger: {} (wait: {}, propagate: {})",
                trigger.target, trigger.wait, trigger.propagate
            );
        }
        if job.parallel {
            println!("      parallel: true");
        }
        if let Some(ref principal) = job.run_as {
            println!("      run_as: {principal}");
        }
    }

    debug!("dry-run complete (no execution)");
}
