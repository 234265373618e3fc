mod common;
use crate::common::builders::{CatalogBuilder, JobConfigBuilder};
use crate::common::{eventually, init_tracing, with_timeout};

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

use jobtrigger::engine::{
    AdmissionQueue, AllowAll, CausalityLinker, DispatchCoordinator, DispatchState, Interrupt,
    InterruptCause, ItemListener, JobDescriptor, JobDirectory, QueueTask, Rejection,
    StepContext, StepPhase, TriggerRequest, TriggerResult, TriggerServices, TriggerStep,
};
use jobtrigger::errors::TriggerError;
use jobtrigger::records::{RunRegistry, UpstreamCause};
use jobtrigger::types::{NodeId, Principal, QueueItemId, RunId, RunStatus};

type TestResult = Result<(), Box<dyn Error>>;

/// Queue that remembers listeners so the test can play the queue's part.
#[derive(Default)]
struct ScriptedQueue {
    listeners: Mutex<Vec<Arc<dyn ItemListener>>>,
    /// Finish every submission before `submit` even returns.
    complete_inline: Option<RunStatus>,
    reject: bool,
    /// Interrupts asked for; the queue never manages to deliver one.
    interrupts: Mutex<Vec<RunId>>,
}

impl ScriptedQueue {
    fn listener(&self, index: usize) -> Arc<dyn ItemListener> {
        Arc::clone(&self.listeners.lock().unwrap()[index])
    }

    fn submitted(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    fn interrupts(&self) -> Vec<RunId> {
        self.interrupts.lock().unwrap().clone()
    }
}

impl AdmissionQueue for ScriptedQueue {
    fn submit(
        &self,
        task: QueueTask,
        _cause: UpstreamCause,
        listener: Arc<dyn ItemListener>,
    ) -> Result<QueueItemId, Rejection> {
        if self.reject {
            return Err(Rejection {
                reason: format!("{} is disabled", task.job.full_name),
            });
        }
        let item = {
            let mut listeners = self.listeners.lock().unwrap();
            listeners.push(Arc::clone(&listener));
            QueueItemId(listeners.len() as u64)
        };
        if let Some(status) = self.complete_inline {
            let run = RunId::new(task.job.full_name.clone(), 1);
            listener.on_started(item, run.clone());
            listener.on_completed(run, result(1, status));
        }
        Ok(item)
    }

    fn cancel(&self, _item: QueueItemId) -> bool {
        false
    }

    fn interrupt(&self, run: &RunId, _cause: &InterruptCause) -> bool {
        self.interrupts.lock().unwrap().push(run.clone());
        false
    }
}

fn result(number: u64, status: RunStatus) -> TriggerResult {
    TriggerResult {
        run_number: number,
        result: status,
        variables: BTreeMap::new(),
    }
}

fn origin(records: &RunRegistry) -> UpstreamCause {
    let run = RunId::new("us", 1);
    let node = NodeId::new("1");
    records.begin_run(&run, Vec::new());
    records.record_node(&run, &node);
    CausalityLinker::intent(&run, &node)
}

#[tokio::test]
async fn completion_before_waiting_is_observed() -> TestResult {
    init_tracing();

    let queue = Arc::new(ScriptedQueue {
        complete_inline: Some(RunStatus::Unstable),
        ..Default::default()
    });
    let records = RunRegistry::new();
    let coordinator = DispatchCoordinator::new(queue.clone(), records.clone());

    let handle = coordinator.submit(&JobDescriptor::new("ds"), Vec::new(), origin(&records))?;

    // Queued arrived after Completed and must not have regressed the state.
    let state = with_timeout(handle.settled()).await;
    assert_eq!(state.result().map(|r| r.result), Some(RunStatus::Unstable));
    Ok(())
}

#[tokio::test]
async fn handle_walks_through_started_and_running() -> TestResult {
    init_tracing();

    let queue = Arc::new(ScriptedQueue::default());
    let records = RunRegistry::new();
    let coordinator = DispatchCoordinator::new(queue.clone(), records.clone());
    let cause = origin(&records);

    let handle = coordinator.submit(&JobDescriptor::new("ds"), Vec::new(), cause.clone())?;
    assert_eq!(handle.state(), DispatchState::Queued { item: QueueItemId(1) });

    let run = RunId::new("ds", 7);
    records.begin_run(&run, Vec::new());
    queue.listener(0).on_started(QueueItemId(1), run.clone());

    let state = with_timeout(handle.started()).await;
    assert_eq!(state, DispatchState::Running { run: run.clone() });

    // Causality is linked as soon as the run exists, on both sides.
    assert_eq!(records.get(&run).unwrap().causes, vec![cause.clone()]);
    let upstream = records.get(&cause.origin_run).unwrap();
    assert_eq!(upstream.downstream.len(), 1);
    assert_eq!(upstream.downstream[0].run, run);

    queue.listener(0).on_completed(run.clone(), result(7, RunStatus::Success));
    let state = with_timeout(handle.settled()).await;
    assert_eq!(state.result().map(|r| r.run_number), Some(7));
    Ok(())
}

#[tokio::test]
async fn duplicate_completion_is_suppressed() -> TestResult {
    init_tracing();

    let queue = Arc::new(ScriptedQueue::default());
    let records = RunRegistry::new();
    let coordinator = DispatchCoordinator::new(queue.clone(), records.clone());
    let cause = origin(&records);

    let handle = coordinator.submit(&JobDescriptor::new("ds"), Vec::new(), cause.clone())?;
    let run = RunId::new("ds", 1);
    records.begin_run(&run, Vec::new());

    let listener = queue.listener(0);
    listener.on_started(QueueItemId(1), run.clone());
    listener.on_completed(run.clone(), result(1, RunStatus::Failure));
    listener.on_completed(run.clone(), result(1, RunStatus::Success));

    let state = with_timeout(handle.settled()).await;
    assert_eq!(state.result().map(|r| r.result), Some(RunStatus::Failure));

    // Linking twice still records each side once.
    assert_eq!(records.get(&run).unwrap().causes.len(), 1);
    assert_eq!(records.get(&cause.origin_run).unwrap().downstream.len(), 1);
    Ok(())
}

#[tokio::test]
async fn late_cancel_does_not_override_start() -> TestResult {
    init_tracing();

    let queue = Arc::new(ScriptedQueue::default());
    let records = RunRegistry::new();
    let coordinator = DispatchCoordinator::new(queue.clone(), records.clone());

    let handle = coordinator.submit(&JobDescriptor::new("ds"), Vec::new(), origin(&records))?;
    let run = RunId::new("ds", 1);
    queue.listener(0).on_started(QueueItemId(1), run.clone());
    queue.listener(0).on_cancelled(QueueItemId(1));

    assert_eq!(handle.state(), DispatchState::Running { run });
    Ok(())
}

#[tokio::test]
async fn rejection_is_reported() {
    init_tracing();

    let queue = Arc::new(ScriptedQueue {
        reject: true,
        ..Default::default()
    });
    let records = RunRegistry::new();
    let coordinator = DispatchCoordinator::new(queue, records.clone());

    let err = coordinator
        .submit(&JobDescriptor::new("ds"), Vec::new(), origin(&records))
        .unwrap_err();
    assert!(matches!(err, TriggerError::RejectedAtAdmission(_)));
    assert_eq!(err.to_string(), "Failed to trigger build of ds");
}

#[tokio::test]
async fn completion_after_an_undelivered_interrupt_keeps_the_real_result() -> TestResult {
    init_tracing();

    let queue = Arc::new(ScriptedQueue::default());
    let records = RunRegistry::new();
    let catalog = CatalogBuilder::new()
        .with_job("ds", JobConfigBuilder::new().build())
        .build();
    let services = Arc::new(TriggerServices::new(
        Arc::new(catalog) as Arc<dyn JobDirectory>,
        Arc::new(AllowAll),
        queue.clone(),
        records.clone(),
    ));

    let cause = origin(&records);
    let interrupt = Interrupt::new();
    let ctx = StepContext {
        run: cause.origin_run.clone(),
        node: cause.origin_node.clone(),
        scope: String::new(),
        principal: Principal::System,
        interrupt: interrupt.clone(),
    };
    let step = tokio::spawn(TriggerStep::new(services, ctx, TriggerRequest::new("ds")).run());

    eventually(|| queue.submitted() == 1).await;
    let run = RunId::new("ds", 1);
    records.begin_run(&run, Vec::new());
    queue.listener(0).on_started(QueueItemId(1), run.clone());

    interrupt.interrupt(InterruptCause::aborted("stop"));
    eventually(|| queue.interrupts() == vec![run.clone()]).await;

    // The target finished anyway.
    queue.listener(0).on_completed(run.clone(), result(1, RunStatus::Success));

    let outcome = with_timeout(step).await?;
    assert_eq!(outcome.phase, StepPhase::DoneFailure);
    assert_eq!(outcome.status, RunStatus::Aborted);
    assert_eq!(outcome.result.map(|r| r.result), Some(RunStatus::Success));
    assert!(matches!(outcome.error, Some(TriggerError::Interrupted { .. })));
    Ok(())
}
