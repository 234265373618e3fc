#![allow(dead_code)]

use std::sync::Arc;

use jobtrigger::config::Catalog;
use jobtrigger::exec::{LocalEnvironment, RunExecutor};

pub use jobtrigger_test_utils::builders;
pub use jobtrigger_test_utils::fake_executor;
pub use jobtrigger_test_utils::{eventually, init_tracing, with_timeout};

/// Environment whose queue runs everything through `executor`.
pub fn env_with<E>(catalog: Catalog, executor: Arc<E>) -> LocalEnvironment
where
    E: RunExecutor + 'static,
{
    LocalEnvironment::with_executor(catalog, executor)
}
