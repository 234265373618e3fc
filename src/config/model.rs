// src/config/model.rs

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::{
    AccessControl, AllowAll, GrantTable, JobDescriptor, JobDirectory, ParamValue, Permission,
    TriggerRequest,
};
use crate::types::{Principal, RunStatus};

/// Catalog file as read from TOML, before validation.
///
/// ```toml
/// [config]
/// executors = 2
/// quiet_period = "0s"
///
/// [job.ds]
/// result = "UNSTABLE"
///
/// [[job.ds.parameter]]
/// name = "branch"
/// default = "master"
///
/// [job.us]
/// trigger = [{ job = "ds", parameters = [{ name = "branch", value = "release" }] }]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawCatalogFile {
    #[serde(default)]
    pub config: QueueSection,

    /// Optional access grants; without this section everyone may do
    /// everything.
    #[serde(default)]
    pub access: Option<AccessSection>,

    /// Jobs keyed by full name (`"dir1/downstream"`).
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

/// `[config]` section: behaviour of the local admission queue.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    /// Number of target runs that may execute at once. Zero keeps every
    /// item waiting in the queue.
    #[serde(default = "default_executors")]
    pub executors: usize,

    /// Default quiet period (`"250ms"`, `"3s"`) during which identical
    /// submissions coalesce.
    #[serde(default = "default_quiet_period")]
    pub quiet_period: String,

    /// Principal nested triggers run as when a job sets no `run_as`.
    #[serde(default)]
    pub run_as: Option<String>,
}

fn default_executors() -> usize {
    2
}

fn default_quiet_period() -> String {
    "0s".to_string()
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            executors: default_executors(),
            quiet_period: default_quiet_period(),
            run_as: None,
        }
    }
}

/// `[access]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessSection {
    #[serde(default)]
    pub grant: Vec<GrantConfig>,
}

/// `[[access.grant]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct GrantConfig {
    pub principal: String,
    /// Job full names, or `"*"`.
    #[serde(default = "all_jobs")]
    pub jobs: Vec<String>,
    pub permissions: Vec<PermissionName>,
}

fn all_jobs() -> Vec<String> {
    vec!["*".to_string()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionName {
    Discover,
    Read,
    Build,
}

impl From<PermissionName> for Permission {
    fn from(name: PermissionName) -> Self {
        match name {
            PermissionName::Discover => Permission::Discover,
            PermissionName::Read => Permission::Read,
            PermissionName::Build => Permission::Build,
        }
    }
}

/// `[job.<full name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobConfig {
    /// Shell command run for each build; exit status decides the result.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Fixed result when there is no `cmd` (default SUCCESS).
    #[serde(default)]
    pub result: Option<RunStatus>,

    /// How long a build without `cmd` takes (`"2s"`).
    #[serde(default)]
    pub duration: Option<String>,

    /// Overrides `[config].quiet_period` for this job.
    #[serde(default)]
    pub quiet_period: Option<String>,

    /// Variables every build of this job exports.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    #[serde(default)]
    pub parameter: Vec<ParameterConfig>,

    /// Jobs this job triggers when it runs.
    #[serde(default)]
    pub trigger: Vec<TriggerRequest>,

    /// Run `trigger` entries as concurrent branches instead of in order.
    #[serde(default)]
    pub parallel: bool,

    /// Principal this job's triggers run as.
    #[serde(default)]
    pub run_as: Option<String>,
}

/// `[[job.<name>.parameter]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ParameterConfig {
    pub name: String,

    #[serde(rename = "type", default)]
    pub kind: ParameterType,

    #[serde(default)]
    pub default: Option<ParamValue>,

    /// Allowed values for `type = "choice"`; the first is the default.
    #[serde(default)]
    pub choices: Vec<String>,

    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    String,
    Boolean,
    Choice,
}

/// A validated job.
#[derive(Debug, Clone)]
pub struct CatalogJob {
    pub descriptor: JobDescriptor,
    pub cmd: Option<String>,
    pub result: RunStatus,
    pub duration: Option<Duration>,
    pub variables: BTreeMap<String, String>,
    pub triggers: Vec<TriggerRequest>,
    pub parallel: bool,
    pub run_as: Option<Principal>,
}

/// Validated catalog. Built from [`RawCatalogFile`] via `TryFrom`.
#[derive(Debug, Clone)]
pub struct Catalog {
    executors: usize,
    quiet_period: Duration,
    run_as: Principal,
    grants: Option<GrantTable>,
    jobs: BTreeMap<String, CatalogJob>,
}

impl Catalog {
    pub(crate) fn new_unchecked(
        executors: usize,
        quiet_period: Duration,
        run_as: Principal,
        grants: Option<GrantTable>,
        jobs: BTreeMap<String, CatalogJob>,
    ) -> Self {
        Self {
            executors,
            quiet_period,
            run_as,
            grants,
            jobs,
        }
    }

    pub fn executors(&self) -> usize {
        self.executors
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Principal for triggers of `job` (its `run_as`, else the catalog's).
    pub fn principal_for(&self, job: &str) -> Principal {
        self.jobs
            .get(job)
            .and_then(|j| j.run_as.clone())
            .unwrap_or_else(|| self.run_as.clone())
    }

    pub fn job(&self, full_name: &str) -> Option<&CatalogJob> {
        self.jobs.get(full_name)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &CatalogJob> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Access oracle described by the `[access]` section.
    pub fn access_control(&self) -> Arc<dyn AccessControl> {
        match self.grants {
            Some(ref grants) => Arc::new(grants.clone()),
            None => Arc::new(AllowAll),
        }
    }
}

impl JobDirectory for Catalog {
    fn lookup(&self, full_name: &str) -> Option<JobDescriptor> {
        self.jobs.get(full_name).map(|job| job.descriptor.clone())
    }
}
