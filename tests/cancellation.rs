mod common;
use crate::common::builders::{CatalogBuilder, JobConfigBuilder};
use crate::common::fake_executor::ControllableExecutor;
use crate::common::{env_with, eventually, init_tracing, with_timeout};

use std::error::Error;
use std::sync::Arc;

use jobtrigger::config::Catalog;
use jobtrigger::engine::{AdmissionQueue, InterruptCause, StepPhase, TriggerRequest};
use jobtrigger::errors::TriggerError;
use jobtrigger::exec::LocalEnvironment;
use jobtrigger::types::{RunId, RunStatus};

type TestResult = Result<(), Box<dyn Error>>;

fn single_job(executors: usize) -> Catalog {
    CatalogBuilder::new()
        .executors(executors)
        .with_job("ds", JobConfigBuilder::new().build())
        .build()
}

#[tokio::test]
async fn interrupt_withdraws_a_queued_target() -> TestResult {
    init_tracing();

    // No executors: the item can never start.
    let executor = Arc::new(ControllableExecutor::new());
    let env = env_with(single_job(0), executor.clone());
    let orchestrator = Arc::new(env.orchestrator("us"));

    let step = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.trigger(TriggerRequest::new("ds")).await })
    };

    eventually(|| env.queue().pending_items().len() == 1).await;
    orchestrator
        .interrupt()
        .interrupt(InterruptCause::aborted("user abort"));

    let outcome = with_timeout(step).await?;
    assert_eq!(outcome.phase, StepPhase::DoneFailure);
    assert_eq!(outcome.status, RunStatus::Aborted);
    assert!(outcome.result.is_none());
    assert!(matches!(outcome.error, Some(TriggerError::Interrupted { .. })));

    // Nothing left behind in the queue, and no run was ever started.
    assert!(env.queue().is_idle());
    assert!(executor.started().is_empty());
    Ok(())
}

#[tokio::test]
async fn interrupt_reaches_a_running_target() -> TestResult {
    init_tracing();

    let executor = Arc::new(ControllableExecutor::new());
    let env = env_with(single_job(1), executor.clone());
    let orchestrator = Arc::new(env.orchestrator("us"));

    let step = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.trigger(TriggerRequest::new("ds")).await })
    };

    with_timeout(executor.wait_started(1)).await;
    orchestrator
        .interrupt()
        .interrupt(InterruptCause::aborted("user abort"));

    let outcome = with_timeout(step).await?;
    assert_eq!(outcome.status, RunStatus::Aborted);
    // The step only returned once the target had really finished.
    assert_eq!(outcome.result.map(|r| r.result), Some(RunStatus::Aborted));

    let target = RunId::new("ds", 1);
    assert_eq!(executor.interrupted(), vec![target.clone()]);
    let record = env.records().get(&target).expect("target record");
    assert_eq!(record.status, Some(RunStatus::Aborted));
    assert!(env.queue().is_idle());
    Ok(())
}

#[tokio::test]
async fn interrupted_orchestrator_is_aborted_even_without_propagation() -> TestResult {
    init_tracing();

    let executor = Arc::new(ControllableExecutor::new());
    let env = env_with(single_job(1), executor.clone());
    let orchestrator = Arc::new(env.orchestrator("us"));

    let step = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            orchestrator
                .trigger(TriggerRequest::new("ds").propagate(false))
                .await
        })
    };

    with_timeout(executor.wait_started(1)).await;
    orchestrator.interrupt().interrupt(InterruptCause::default());

    let outcome = with_timeout(step).await?;
    assert_eq!(outcome.status, RunStatus::Aborted);
    Ok(())
}

#[tokio::test]
async fn interrupt_before_triggering_aborts_the_step() -> TestResult {
    init_tracing();

    let executor = Arc::new(ControllableExecutor::new());
    executor.release("ds", RunStatus::Unstable);
    let env = env_with(single_job(1), executor.clone());
    let orchestrator = env.orchestrator("us");

    // Whether the target gets withdrawn or started and interrupted, the
    // step settles it and reports the interrupt.
    orchestrator.interrupt().interrupt(InterruptCause::aborted("early"));
    let outcome = with_timeout(orchestrator.trigger(TriggerRequest::new("ds"))).await;

    assert_eq!(outcome.status, RunStatus::Aborted);
    match outcome.error {
        Some(TriggerError::Interrupted { ref cause, .. }) => assert_eq!(cause.reason, "early"),
        other => panic!("expected interruption, got {other:?}"),
    }
    assert!(env.queue().is_idle());
    Ok(())
}

#[tokio::test]
async fn external_cancel_of_a_queued_target_fails_the_step() -> TestResult {
    init_tracing();

    let env = env_with(single_job(0), Arc::new(ControllableExecutor::new()));
    let orchestrator = Arc::new(env.orchestrator("us"));

    let step = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.trigger(TriggerRequest::new("ds")).await })
    };

    eventually(|| env.queue().pending_items().len() == 1).await;
    let item = env.queue().pending_items()[0].id;
    assert!(env.queue().cancel(item));

    let outcome = with_timeout(step).await?;
    assert_eq!(outcome.phase, StepPhase::DoneFailure);
    assert_eq!(outcome.status, RunStatus::Failure);
    assert!(matches!(outcome.error, Some(TriggerError::QueueItemCancelled(_))));
    Ok(())
}

fn nested_catalog(parallel: bool) -> Catalog {
    let mut us = JobConfigBuilder::new()
        .trigger(TriggerRequest::new("mid"))
        .trigger(TriggerRequest::new("side"));
    if parallel {
        us = us.parallel();
    }
    CatalogBuilder::new()
        .executors(8)
        .with_job("us", us.build())
        .with_job(
            "mid",
            JobConfigBuilder::new()
                .trigger(TriggerRequest::new("leaf"))
                .build(),
        )
        .with_job("leaf", JobConfigBuilder::new().duration("30s").build())
        .with_job("side", JobConfigBuilder::new().duration("30s").build())
        .build()
}

fn is_running(env: &LocalEnvironment, job: &str) -> bool {
    env.queue()
        .running_runs()
        .iter()
        .any(|run| run.job == job)
}

#[tokio::test]
async fn interrupt_cascades_through_nested_orchestrators() -> TestResult {
    init_tracing();

    let env = LocalEnvironment::from_catalog(nested_catalog(false));
    let orchestrator = Arc::new(env.orchestrator("cli"));

    let step = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.trigger(TriggerRequest::new("us")).await })
    };

    eventually(|| is_running(&env, "leaf")).await;
    orchestrator
        .interrupt()
        .interrupt(InterruptCause::aborted("stop everything"));

    let outcome = with_timeout(step).await?;
    assert_eq!(outcome.status, RunStatus::Aborted);

    for run in [RunId::new("us", 1), RunId::new("mid", 1), RunId::new("leaf", 1)] {
        let record = env.records().get(&run).expect("run record");
        assert_eq!(record.status, Some(RunStatus::Aborted), "{run}");
    }
    // The sequential orchestrator stopped before its second trigger.
    assert!(env.records().get(&RunId::new("side", 1)).is_none());
    assert!(env.queue().is_idle());
    Ok(())
}

#[tokio::test]
async fn interrupt_reaches_every_parallel_branch() -> TestResult {
    init_tracing();

    let env = LocalEnvironment::from_catalog(nested_catalog(true));
    let orchestrator = Arc::new(env.orchestrator("cli"));

    let step = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.trigger(TriggerRequest::new("us")).await })
    };

    eventually(|| is_running(&env, "leaf") && is_running(&env, "side")).await;
    orchestrator.interrupt().interrupt(InterruptCause::default());

    let outcome = with_timeout(step).await?;
    assert_eq!(outcome.status, RunStatus::Aborted);

    for run in [
        RunId::new("us", 1),
        RunId::new("mid", 1),
        RunId::new("leaf", 1),
        RunId::new("side", 1),
    ] {
        let record = env.records().get(&run).expect("run record");
        assert_eq!(record.status, Some(RunStatus::Aborted), "{run}");
    }
    assert!(env.queue().is_idle());
    Ok(())
}
