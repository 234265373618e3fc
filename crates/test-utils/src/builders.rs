#![allow(dead_code)]

use std::collections::BTreeMap;

use jobtrigger::config::{
    AccessSection, Catalog, GrantConfig, JobConfig, ParameterConfig, ParameterType,
    PermissionName, QueueSection, RawCatalogFile,
};
use jobtrigger::engine::{ParamValue, TriggerRequest};
use jobtrigger::types::RunStatus;

/// Builder for `Catalog` to simplify test setup.
pub struct CatalogBuilder {
    catalog: RawCatalogFile,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self {
            catalog: RawCatalogFile {
                config: QueueSection::default(),
                access: None,
                job: BTreeMap::new(),
            },
        }
    }

    pub fn with_job(mut self, name: &str, job: JobConfig) -> Self {
        self.catalog.job.insert(name.to_string(), job);
        self
    }

    pub fn executors(mut self, executors: usize) -> Self {
        self.catalog.config.executors = executors;
        self
    }

    pub fn quiet_period(mut self, quiet_period: &str) -> Self {
        self.catalog.config.quiet_period = quiet_period.to_string();
        self
    }

    pub fn run_as(mut self, principal: &str) -> Self {
        self.catalog.config.run_as = Some(principal.to_string());
        self
    }

    /// Grant `permissions` on `jobs` to `principal`. The first grant turns
    /// access control on.
    pub fn grant(mut self, principal: &str, jobs: &[&str], permissions: &[PermissionName]) -> Self {
        let access = self.catalog.access.get_or_insert_with(AccessSection::default);
        access.grant.push(GrantConfig {
            principal: principal.to_string(),
            jobs: jobs.iter().map(|j| j.to_string()).collect(),
            permissions: permissions.to_vec(),
        });
        self
    }

    pub fn raw(self) -> RawCatalogFile {
        self.catalog
    }

    pub fn build(self) -> Catalog {
        Catalog::try_from(self.catalog).expect("Failed to build valid catalog from builder")
    }
}

impl Default for CatalogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobConfig`.
pub struct JobConfigBuilder {
    job: JobConfig,
}

impl JobConfigBuilder {
    pub fn new() -> Self {
        Self {
            job: JobConfig::default(),
        }
    }

    pub fn cmd(mut self, cmd: &str) -> Self {
        self.job.cmd = Some(cmd.to_string());
        self
    }

    pub fn result(mut self, result: RunStatus) -> Self {
        self.job.result = Some(result);
        self
    }

    pub fn duration(mut self, duration: &str) -> Self {
        self.job.duration = Some(duration.to_string());
        self
    }

    pub fn quiet_period(mut self, quiet_period: &str) -> Self {
        self.job.quiet_period = Some(quiet_period.to_string());
        self
    }

    pub fn variable(mut self, name: &str, value: &str) -> Self {
        self.job.variables.insert(name.to_string(), value.to_string());
        self
    }

    pub fn string_param(mut self, name: &str, default: &str) -> Self {
        self.job.parameter.push(ParameterConfig {
            name: name.to_string(),
            kind: ParameterType::String,
            default: Some(ParamValue::String(default.to_string())),
            choices: Vec::new(),
            description: None,
        });
        self
    }

    pub fn bool_param(mut self, name: &str, default: bool) -> Self {
        self.job.parameter.push(ParameterConfig {
            name: name.to_string(),
            kind: ParameterType::Boolean,
            default: Some(ParamValue::Bool(default)),
            choices: Vec::new(),
            description: None,
        });
        self
    }

    pub fn choice_param(mut self, name: &str, choices: &[&str]) -> Self {
        self.job.parameter.push(ParameterConfig {
            name: name.to_string(),
            kind: ParameterType::Choice,
            default: None,
            choices: choices.iter().map(|c| c.to_string()).collect(),
            description: None,
        });
        self
    }

    pub fn trigger(mut self, request: TriggerRequest) -> Self {
        self.job.trigger.push(request);
        self
    }

    pub fn parallel(mut self) -> Self {
        self.job.parallel = true;
        self
    }

    pub fn run_as(mut self, principal: &str) -> Self {
        self.job.run_as = Some(principal.to_string());
        self
    }

    pub fn build(self) -> JobConfig {
        self.job
    }
}

impl Default for JobConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
