// src/engine/access.rs

//! Target resolution and the three-tier access gate.
//!
//! A job reference is resolved relative to the orchestrator's folder first
//! and globally second. The gate then decides what the caller may learn:
//!
//! - no `Read` and no `Discover`: the job is reported as not found, whether
//!   or not it exists;
//! - `Discover` only: the caller is asked to log in;
//! - `Read` without `Build`: the caller is told which principal lacks the
//!   permission.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::engine::params::ParameterDefinition;
use crate::errors::{Result, TriggerError};
use crate::types::Principal;

/// What the engine needs to know about a schedulable job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    /// Slash-separated full name, e.g. `"dir1/downstream"`.
    pub full_name: String,
    pub parameters: Vec<ParameterDefinition>,
    /// Overrides the queue's default quiet period when set.
    pub quiet_period: Option<Duration>,
}

impl JobDescriptor {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            parameters: Vec::new(),
            quiet_period: None,
        }
    }

    /// Folder containing this job (empty for top-level jobs).
    pub fn folder(&self) -> &str {
        parent_folder(&self.full_name)
    }
}

/// Item lookup by full name.
pub trait JobDirectory: Send + Sync {
    fn lookup(&self, full_name: &str) -> Option<JobDescriptor>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Know that the job exists, nothing more.
    Discover,
    Read,
    Build,
}

/// Permission oracle consumed by the gate.
pub trait AccessControl: Send + Sync {
    fn has_permission(&self, principal: &Principal, job: &str, permission: Permission) -> bool;
}

/// Grants everything to everyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn has_permission(&self, _principal: &Principal, _job: &str, _permission: Permission) -> bool {
        true
    }
}

/// Explicit per-principal grants.
///
/// Jobs are matched by full name; `"*"` matches every job. `Build` does not
/// imply `Read`, and `Read` does not imply `Discover` for the purpose of the
/// gate (the gate checks `Read` before `Discover`).
#[derive(Debug, Clone, Default)]
pub struct GrantTable {
    grants: HashMap<String, Vec<(String, HashSet<Permission>)>>,
}

impl GrantTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant<I>(&mut self, principal: &str, job: &str, permissions: I)
    where
        I: IntoIterator<Item = Permission>,
    {
        self.grants
            .entry(principal.to_string())
            .or_default()
            .push((job.to_string(), permissions.into_iter().collect()));
    }
}

impl AccessControl for GrantTable {
    fn has_permission(&self, principal: &Principal, job: &str, permission: Permission) -> bool {
        if *principal == Principal::System {
            return true;
        }
        self.grants
            .get(principal.name())
            .map(|entries| {
                entries
                    .iter()
                    .any(|(pattern, perms)| (pattern == "*" || pattern == job) && perms.contains(&permission))
            })
            .unwrap_or(false)
    }
}

/// Resolves references to concrete jobs and applies the access gate.
#[derive(Clone)]
pub struct TargetResolver {
    jobs: Arc<dyn JobDirectory>,
    access: Arc<dyn AccessControl>,
}

impl TargetResolver {
    pub fn new(jobs: Arc<dyn JobDirectory>, access: Arc<dyn AccessControl>) -> Self {
        Self { jobs, access }
    }

    /// Resolve `reference` as seen from `scope` (the orchestrator's folder)
    /// on behalf of `principal`.
    pub fn resolve(&self, reference: &str, scope: &str, principal: &Principal) -> Result<JobDescriptor> {
        let found = candidate_names(reference, scope)
            .into_iter()
            .find_map(|name| self.jobs.lookup(&name));

        let Some(job) = found else {
            debug!(reference, scope, "no job matches reference");
            return Err(TriggerError::NotFound(reference.to_string()));
        };

        let can = |perm| self.access.has_permission(principal, &job.full_name, perm);

        if !can(Permission::Read) {
            if can(Permission::Discover) {
                return Err(TriggerError::LoginRequired(reference.to_string()));
            }
            return Err(TriggerError::NotFound(reference.to_string()));
        }

        if !can(Permission::Build) {
            return Err(TriggerError::Forbidden {
                principal: principal.clone(),
                job: job.full_name.clone(),
            });
        }

        debug!(reference, job = %job.full_name, %principal, "resolved trigger target");
        Ok(job)
    }
}

/// Full names to try for `reference`, in order.
pub fn candidate_names(reference: &str, scope: &str) -> Vec<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Vec::new();
    }

    if let Some(absolute) = reference.strip_prefix('/') {
        return normalize_path(absolute).into_iter().collect();
    }

    let mut names = Vec::new();
    if !scope.is_empty() {
        if let Some(relative) = normalize_path(&format!("{scope}/{reference}")) {
            names.push(relative);
        }
    }
    if let Some(global) = normalize_path(reference) {
        if !names.contains(&global) {
            names.push(global);
        }
    }
    names
}

/// Collapse `.` and `..` segments; `None` if the path escapes the root.
fn normalize_path(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

pub fn parent_folder(full_name: &str) -> &str {
    match full_name.rfind('/') {
        Some(idx) => &full_name[..idx],
        None => "",
    }
}
