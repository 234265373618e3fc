// src/records.rs

//! In-memory permanent run records.
//!
//! Both halves of a causality link live here: the target run keeps the
//! upstream causes that triggered it, and the orchestrator run keeps the list
//! of runs each of its nodes triggered. Records only store identifiers, never
//! live references to other records.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::ParameterValue;
use crate::types::{NodeId, RunId, RunStatus};

/// Provenance attached to a target run: which orchestrator node caused it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct UpstreamCause {
    #[serde(rename = "originRunId")]
    pub origin_run: RunId,
    #[serde(rename = "originNodeId")]
    pub origin_node: NodeId,
}

/// One entry of an orchestrator's list of triggered runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownstreamLink {
    pub node: NodeId,
    pub run: RunId,
}

/// Snapshot of a single run record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunRecord {
    /// `None` while the run is still executing.
    pub status: Option<RunStatus>,
    pub parameters: Vec<ParameterValue>,
    pub variables: BTreeMap<String, String>,
    pub causes: Vec<UpstreamCause>,
    pub downstream: Vec<DownstreamLink>,
    pub nodes: BTreeSet<NodeId>,
}

/// Shared store of run records. Cloning is cheap.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    inner: Arc<Mutex<HashMap<RunId, RunRecord>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RunId, RunRecord>> {
        // Records are append-only, so a poisoned map is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create the record for a freshly started run.
    pub fn begin_run(&self, run: &RunId, parameters: Vec<ParameterValue>) {
        let mut records = self.lock();
        let record = records.entry(run.clone()).or_default();
        record.parameters = parameters;
        debug!(%run, "run record created");
    }

    /// Register a node of `run`'s execution graph.
    pub fn record_node(&self, run: &RunId, node: &NodeId) {
        let mut records = self.lock();
        records
            .entry(run.clone())
            .or_default()
            .nodes
            .insert(node.clone());
    }

    /// Attach an upstream cause to `run`. Returns false if it was already
    /// present or the run is unknown.
    pub fn attach_cause(&self, run: &RunId, cause: &UpstreamCause) -> bool {
        let mut records = self.lock();
        let Some(record) = records.get_mut(run) else {
            warn!(%run, "cannot attach cause to unknown run");
            return false;
        };
        if record.causes.contains(cause) {
            return false;
        }
        record.causes.push(cause.clone());
        true
    }

    /// Append `target` to the list of runs triggered by `node` of `origin`.
    ///
    /// Returns false if the origin record no longer exists or the link was
    /// already recorded.
    pub fn append_downstream(&self, origin: &RunId, node: &NodeId, target: &RunId) -> bool {
        let mut records = self.lock();
        let Some(record) = records.get_mut(origin) else {
            debug!(%origin, %target, "origin run pruned; downstream link dropped");
            return false;
        };
        let link = DownstreamLink {
            node: node.clone(),
            run: target.clone(),
        };
        if record.downstream.contains(&link) {
            return false;
        }
        record.downstream.push(link);
        true
    }

    pub fn finish_run(&self, run: &RunId, status: RunStatus, variables: BTreeMap<String, String>) {
        let mut records = self.lock();
        let record = records.entry(run.clone()).or_default();
        record.status = Some(status);
        record.variables = variables;
        debug!(%run, %status, "run record finished");
    }

    pub fn get(&self, run: &RunId) -> Option<RunRecord> {
        self.lock().get(run).cloned()
    }

    /// Drop a run record entirely.
    pub fn prune(&self, run: &RunId) -> bool {
        self.lock().remove(run).is_some()
    }

    /// Whether `node` exists in `run`'s recorded graph.
    pub fn has_node(&self, run: &RunId, node: &NodeId) -> bool {
        self.lock()
            .get(run)
            .map(|record| record.nodes.contains(node))
            .unwrap_or(false)
    }
}
