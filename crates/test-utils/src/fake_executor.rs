use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use jobtrigger::exec::{RunExecutor, RunOutcome, StartedRun};
use jobtrigger::types::{RunId, RunStatus};

/// A fake executor that:
/// - records which runs were started
/// - immediately finishes each run with the status configured for its job
///   (SUCCESS when nothing is configured).
#[derive(Default)]
pub struct FakeExecutor {
    outcomes: HashMap<String, RunOutcome>,
    executed: Arc<Mutex<Vec<RunId>>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, job: &str, status: RunStatus) -> Self {
        self.outcomes.entry(job.to_string()).or_default().status = status;
        self
    }

    pub fn with_variable(mut self, job: &str, name: &str, value: &str) -> Self {
        self.outcomes
            .entry(job.to_string())
            .or_default()
            .variables
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn executed(&self) -> Vec<RunId> {
        self.executed.lock().unwrap().clone()
    }
}

impl RunExecutor for FakeExecutor {
    fn execute(&self, run: StartedRun) -> Pin<Box<dyn Future<Output = RunOutcome> + Send + 'static>> {
        self.executed.lock().unwrap().push(run.id.clone());
        let outcome = self
            .outcomes
            .get(&run.job.full_name)
            .cloned()
            .unwrap_or_default();
        Box::pin(async move { outcome })
    }
}

/// A fake executor whose runs block until the test releases their job, or
/// until the run is interrupted.
pub struct ControllableExecutor {
    /// Release gate per job name; `Some(status)` lets runs finish.
    gates: Mutex<HashMap<String, watch::Sender<Option<RunStatus>>>>,
    /// Runs that have been started, in order.
    started: watch::Sender<Vec<RunId>>,
    /// Runs that ended because they were interrupted.
    interrupted: Arc<Mutex<Vec<RunId>>>,
}

impl Default for ControllableExecutor {
    fn default() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
            started: watch::Sender::new(Vec::new()),
            interrupted: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ControllableExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn gate(&self, job: &str) -> watch::Receiver<Option<RunStatus>> {
        let mut gates = self.gates.lock().unwrap();
        gates
            .entry(job.to_string())
            .or_insert_with(|| watch::Sender::new(None))
            .subscribe()
    }

    /// Let every current and future run of `job` finish with `status`.
    pub fn release(&self, job: &str, status: RunStatus) {
        let mut gates = self.gates.lock().unwrap();
        let gate = gates
            .entry(job.to_string())
            .or_insert_with(|| watch::Sender::new(None));
        gate.send_replace(Some(status));
    }

    pub fn started(&self) -> Vec<RunId> {
        self.started.borrow().clone()
    }

    pub fn interrupted(&self) -> Vec<RunId> {
        self.interrupted.lock().unwrap().clone()
    }

    /// Wait until at least `count` runs have started.
    pub async fn wait_started(&self, count: usize) -> Vec<RunId> {
        let mut rx = self.started.subscribe();
        let runs = rx.wait_for(|runs| runs.len() >= count).await.unwrap();
        runs.clone()
    }
}

impl RunExecutor for ControllableExecutor {
    fn execute(&self, run: StartedRun) -> Pin<Box<dyn Future<Output = RunOutcome> + Send + 'static>> {
        let mut gate = self.gate(&run.job.full_name);
        let interrupted = Arc::clone(&self.interrupted);
        self.started.send_modify(|runs| runs.push(run.id.clone()));

        Box::pin(async move {
            let released = async {
                loop {
                    if let Some(status) = *gate.borrow_and_update() {
                        break status;
                    }
                    if gate.changed().await.is_err() {
                        break RunStatus::Failure;
                    }
                }
            };
            tokio::select! {
                status = released => RunOutcome {
                    status,
                    variables: BTreeMap::new(),
                },
                cause = run.interrupt.interrupted() => {
                    interrupted.lock().unwrap().push(run.id.clone());
                    RunOutcome::with_status(cause.status)
                }
            }
        })
    }
}
