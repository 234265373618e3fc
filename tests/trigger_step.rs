mod common;
use crate::common::builders::{CatalogBuilder, JobConfigBuilder};
use crate::common::fake_executor::FakeExecutor;
use crate::common::{env_with, eventually, init_tracing, with_timeout};

use std::error::Error;
use std::sync::Arc;

use jobtrigger::config::{Catalog, PermissionName};
use jobtrigger::engine::{ParamValue, QueueTask, StepPhase, TriggerRequest};
use jobtrigger::errors::TriggerError;
use jobtrigger::exec::{AdmissionPolicy, LocalEnvironment};
use jobtrigger::types::{Principal, RunId, RunStatus};

type TestResult = Result<(), Box<dyn Error>>;

fn catalog() -> Catalog {
    CatalogBuilder::new()
        .with_job(
            "ds",
            JobConfigBuilder::new()
                .string_param("branch", "master")
                .bool_param("release", false)
                .build(),
        )
        .with_job("plain", JobConfigBuilder::new().build())
        .build()
}

#[tokio::test]
async fn successful_target_completes_the_step() -> TestResult {
    init_tracing();

    let executor = Arc::new(FakeExecutor::new().with_variable("ds", "VERSION", "1.2"));
    let env = env_with(catalog(), executor.clone());
    let orchestrator = env.orchestrator("us");

    let outcome = with_timeout(orchestrator.trigger(TriggerRequest::new("ds"))).await;

    assert_eq!(outcome.phase, StepPhase::DoneSuccess);
    assert_eq!(outcome.status, RunStatus::Success);
    assert!(outcome.error.is_none());
    let result = outcome.result.expect("result");
    assert_eq!(result.run_number, 1);
    assert_eq!(result.variables.get("VERSION").map(String::as_str), Some("1.2"));
    assert_eq!(executor.executed(), vec![RunId::new("ds", 1)]);
    Ok(())
}

#[tokio::test]
async fn failure_propagates_by_default() -> TestResult {
    init_tracing();

    let executor = Arc::new(FakeExecutor::new().with_result("ds", RunStatus::Failure));
    let env = env_with(catalog(), executor);
    let orchestrator = env.orchestrator("us");

    let outcome = with_timeout(orchestrator.trigger(TriggerRequest::new("ds"))).await;

    assert_eq!(outcome.phase, StepPhase::DoneFailurePropagated);
    assert_eq!(outcome.status, RunStatus::Failure);
    assert!(outcome.halts());
    assert_eq!(outcome.result.map(|r| r.result), Some(RunStatus::Failure));
    Ok(())
}

#[tokio::test]
async fn unstable_propagates_as_unstable() -> TestResult {
    init_tracing();

    let executor = Arc::new(FakeExecutor::new().with_result("ds", RunStatus::Unstable));
    let env = env_with(catalog(), executor);
    let orchestrator = env.orchestrator("us");

    let outcome = with_timeout(orchestrator.trigger(TriggerRequest::new("ds"))).await;

    assert_eq!(outcome.phase, StepPhase::DoneFailurePropagated);
    assert_eq!(outcome.status, RunStatus::Unstable);
    assert!(!outcome.halts());
    Ok(())
}

#[tokio::test]
async fn propagate_false_keeps_the_orchestrator_green() -> TestResult {
    init_tracing();

    let executor = Arc::new(FakeExecutor::new().with_result("ds", RunStatus::Failure));
    let env = env_with(catalog(), executor);
    let orchestrator = env.orchestrator("us");

    let outcome =
        with_timeout(orchestrator.trigger(TriggerRequest::new("ds").propagate(false))).await;

    assert_eq!(outcome.phase, StepPhase::DoneSuccessNonPropagated);
    assert_eq!(outcome.status, RunStatus::Success);
    // The real target result is still reported.
    assert_eq!(outcome.result.map(|r| r.result), Some(RunStatus::Failure));
    Ok(())
}

#[tokio::test]
async fn wait_false_returns_before_the_target_runs() -> TestResult {
    init_tracing();

    let executor = Arc::new(FakeExecutor::new());
    let env = env_with(catalog(), executor.clone());
    let orchestrator = env.orchestrator("us");

    let outcome = with_timeout(orchestrator.trigger(TriggerRequest::new("ds").wait(false))).await;

    assert_eq!(outcome.phase, StepPhase::DoneSuccess);
    assert!(outcome.result.is_none());

    // The target still runs and is still linked to the node that caused it.
    eventually(|| env.queue().is_idle() && executor.executed().len() == 1).await;
    let target = RunId::new("ds", 1);
    let causes = env.services().provenance(&target);
    assert_eq!(causes.len(), 1);
    assert_eq!(&causes[0].origin_run, orchestrator.run_id());
    Ok(())
}

#[tokio::test]
async fn parameters_reach_the_target_run() -> TestResult {
    init_tracing();

    let env = env_with(catalog(), Arc::new(FakeExecutor::new()));
    let orchestrator = env.orchestrator("us");

    let request = TriggerRequest::new("ds").parameter("release", true);
    let outcome = with_timeout(orchestrator.trigger(request)).await;
    assert!(outcome.is_success());

    let record = env.records().get(&RunId::new("ds", 1)).expect("target record");
    let params: Vec<(String, ParamValue)> = record
        .parameters
        .into_iter()
        .map(|p| (p.name, p.value))
        .collect();
    assert_eq!(
        params,
        vec![
            ("branch".to_string(), ParamValue::String("master".into())),
            ("release".to_string(), ParamValue::Bool(true)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn invalid_parameters_fail_before_dispatch() -> TestResult {
    init_tracing();

    let executor = Arc::new(FakeExecutor::new());
    let env = env_with(catalog(), executor.clone());
    let orchestrator = env.orchestrator("us");

    // `propagate: false` does not soften failures that happen before the
    // target exists.
    let request = TriggerRequest::new("plain").parameter("x", "1").propagate(false);
    let outcome = with_timeout(orchestrator.trigger(request)).await;

    assert_eq!(outcome.phase, StepPhase::DoneFailure);
    assert_eq!(outcome.status, RunStatus::Failure);
    assert!(matches!(outcome.error, Some(TriggerError::UnknownParameter { .. })));
    assert!(executor.executed().is_empty());
    assert!(env.queue().is_idle());
    Ok(())
}

#[tokio::test]
async fn access_gate_failures_end_the_step() -> TestResult {
    init_tracing();

    let catalog = CatalogBuilder::new()
        .with_job("ds", JobConfigBuilder::new().build())
        .grant("dev", &["ds"], &[PermissionName::Discover])
        .build();
    let env = env_with(catalog, Arc::new(FakeExecutor::new()));
    let orchestrator = env
        .orchestrator("us")
        .with_principal(Principal::User("dev".to_string()));

    let outcome = with_timeout(orchestrator.trigger(TriggerRequest::new("ds"))).await;

    assert_eq!(outcome.phase, StepPhase::DoneFailure);
    let err = outcome.error.expect("error");
    assert_eq!(err.to_string(), "Please login to access job ds");
    Ok(())
}

struct RefuseJob(&'static str);

impl AdmissionPolicy for RefuseJob {
    fn should_schedule(&self, task: &QueueTask) -> bool {
        task.job.full_name != self.0
    }
}

#[tokio::test]
async fn admission_veto_fails_the_step() -> TestResult {
    init_tracing();

    let env = LocalEnvironment::with_policy(catalog(), Arc::new(RefuseJob("plain")));
    let orchestrator = env.orchestrator("us");

    let outcome = with_timeout(orchestrator.trigger(TriggerRequest::new("plain"))).await;

    assert_eq!(outcome.phase, StepPhase::DoneFailure);
    assert!(matches!(outcome.error, Some(TriggerError::RejectedAtAdmission(_))));
    assert_eq!(
        outcome.error.map(|e| e.to_string()).as_deref(),
        Some("Failed to trigger build of plain")
    );
    Ok(())
}

#[tokio::test]
async fn orchestrator_waits_without_holding_the_only_slot() -> TestResult {
    init_tracing();

    let catalog = CatalogBuilder::new()
        .executors(1)
        .with_job(
            "us",
            JobConfigBuilder::new()
                .trigger(TriggerRequest::new("ds"))
                .duration("10ms")
                .build(),
        )
        .with_job("ds", JobConfigBuilder::new().result(RunStatus::Unstable).build())
        .build();
    let env = LocalEnvironment::from_catalog(catalog);
    let orchestrator = env.orchestrator("cli");

    let outcome = with_timeout(orchestrator.trigger(TriggerRequest::new("us"))).await;

    assert_eq!(outcome.status, RunStatus::Unstable);
    let ds = env.records().get(&RunId::new("ds", 1)).expect("ds record");
    assert_eq!(ds.status, Some(RunStatus::Unstable));
    // `us` got its slot back for its own build phase.
    let us = env.records().get(&RunId::new("us", 1)).expect("us record");
    assert_eq!(us.status, Some(RunStatus::Unstable));
    assert!(env.queue().is_idle());
    Ok(())
}

#[tokio::test]
async fn parallel_orchestrators_share_a_single_slot() -> TestResult {
    init_tracing();

    let catalog = CatalogBuilder::new()
        .executors(1)
        .with_job(
            "us",
            JobConfigBuilder::new()
                .trigger(TriggerRequest::new("mid1"))
                .trigger(TriggerRequest::new("mid2"))
                .parallel()
                .build(),
        )
        .with_job(
            "mid1",
            JobConfigBuilder::new().trigger(TriggerRequest::new("leaf1")).build(),
        )
        .with_job(
            "mid2",
            JobConfigBuilder::new().trigger(TriggerRequest::new("leaf2")).build(),
        )
        .with_job("leaf1", JobConfigBuilder::new().duration("10ms").build())
        .with_job("leaf2", JobConfigBuilder::new().duration("10ms").build())
        .build();
    let env = LocalEnvironment::from_catalog(catalog);
    let orchestrator = env.orchestrator("cli");

    let outcome = with_timeout(orchestrator.trigger(TriggerRequest::new("us"))).await;

    assert_eq!(outcome.status, RunStatus::Success);
    for job in ["us", "mid1", "mid2", "leaf1", "leaf2"] {
        let record = env.records().get(&RunId::new(job, 1)).expect("run record");
        assert_eq!(record.status, Some(RunStatus::Success), "{job}");
    }
    Ok(())
}
