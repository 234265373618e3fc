// src/exec/mod.rs

//! Local execution: the admission queue and what runs behind it.

pub mod backend;
pub mod catalog;
pub mod local;
pub mod queue;
pub mod task_runner;

pub use backend::{ExecutorSlot, RunExecutor, RunOutcome, StartedRun};
pub use catalog::CatalogExecutor;
pub use local::{LocalEnvironment, Orchestrator};
pub use queue::{AcceptAll, AdmissionPolicy, LocalQueue, PendingItemInfo, QueueOptions};
pub use task_runner::run_command;
