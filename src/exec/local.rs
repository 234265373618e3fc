// src/exec/local.rs

//! Wiring of an in-process trigger environment around a catalog.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::Catalog;
use crate::engine::access::parent_folder;
use crate::engine::{
    Interrupt, JobDirectory, StepContext, StepOutcome, TriggerRequest, TriggerServices, TriggerStep,
};
use crate::exec::backend::RunExecutor;
use crate::exec::catalog::CatalogExecutor;
use crate::exec::queue::{AcceptAll, AdmissionPolicy, LocalQueue, QueueOptions};
use crate::records::RunRegistry;
use crate::types::{NodeId, Principal, RunId};

/// Services, queue and records of one process.
pub struct LocalEnvironment {
    services: Arc<TriggerServices>,
    queue: Arc<LocalQueue>,
    catalog: Arc<Catalog>,
    next_orchestrator: AtomicU64,
}

impl LocalEnvironment {
    /// Environment whose queue builds catalog jobs with [`CatalogExecutor`].
    pub fn from_catalog(catalog: Catalog) -> Self {
        Self::with_policy(catalog, Arc::new(AcceptAll))
    }

    pub fn with_policy(catalog: Catalog, policy: Arc<dyn AdmissionPolicy>) -> Self {
        let catalog = Arc::new(catalog);
        let executor = Arc::new(CatalogExecutor::new(Arc::clone(&catalog)));
        let env = Self::assemble(catalog, executor.clone(), policy);
        executor.bind(&env.services);
        env
    }

    /// Environment whose queue hands runs to `executor` instead.
    pub fn with_executor(catalog: Catalog, executor: Arc<dyn RunExecutor>) -> Self {
        Self::assemble(Arc::new(catalog), executor, Arc::new(AcceptAll))
    }

    fn assemble(
        catalog: Arc<Catalog>,
        executor: Arc<dyn RunExecutor>,
        policy: Arc<dyn AdmissionPolicy>,
    ) -> Self {
        let records = RunRegistry::new();
        let options = QueueOptions {
            executors: catalog.executors(),
            quiet_period: catalog.quiet_period(),
        };
        let queue = Arc::new(LocalQueue::new(executor, policy, records.clone(), options));
        let services = Arc::new(TriggerServices::new(
            Arc::clone(&catalog) as Arc<dyn JobDirectory>,
            catalog.access_control(),
            queue.clone(),
            records,
        ));
        Self {
            services,
            queue,
            catalog,
            next_orchestrator: AtomicU64::new(0),
        }
    }

    pub fn services(&self) -> &Arc<TriggerServices> {
        &self.services
    }

    pub fn queue(&self) -> &LocalQueue {
        &self.queue
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn records(&self) -> &RunRegistry {
        self.services.records()
    }

    /// Start an ad-hoc orchestrating run named `name` that lives outside the
    /// queue, e.g. the command line invocation.
    pub fn orchestrator(&self, name: &str) -> Orchestrator {
        let number = self.next_orchestrator.fetch_add(1, Ordering::Relaxed) + 1;
        let run = RunId::new(name, number);
        self.records().begin_run(&run, Vec::new());
        Orchestrator::for_run(
            Arc::clone(&self.services),
            run,
            parent_folder(name),
            self.catalog.principal_for(name),
            Interrupt::new(),
        )
    }
}

/// An orchestrating run issuing trigger steps.
///
/// Every step gets the next node id of the run, so steps of concurrent
/// branches never share a node.
pub struct Orchestrator {
    services: Arc<TriggerServices>,
    run: RunId,
    scope: String,
    principal: Principal,
    interrupt: Interrupt,
    next_node: AtomicU64,
}

impl Orchestrator {
    pub fn for_run(
        services: Arc<TriggerServices>,
        run: RunId,
        scope: &str,
        principal: Principal,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            services,
            run,
            scope: scope.to_string(),
            principal,
            interrupt,
            next_node: AtomicU64::new(0),
        }
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = principal;
        self
    }

    pub fn run_id(&self) -> &RunId {
        &self.run
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Prepare a step on a fresh node of this run.
    pub fn step(&self, request: TriggerRequest) -> TriggerStep {
        let n = self.next_node.fetch_add(1, Ordering::Relaxed) + 1;
        let node = NodeId::new(n.to_string());
        self.services.records().record_node(&self.run, &node);

        let ctx = StepContext {
            run: self.run.clone(),
            node,
            scope: self.scope.clone(),
            principal: self.principal.clone(),
            interrupt: self.interrupt.clone(),
        };
        TriggerStep::new(Arc::clone(&self.services), ctx, request)
    }

    pub async fn trigger(&self, request: TriggerRequest) -> StepOutcome {
        self.step(request).run().await
    }
}
