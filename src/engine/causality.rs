// src/engine/causality.rs

//! Bidirectional provenance between an orchestrator node and the target runs
//! it triggers.

use tracing::debug;

use crate::records::{RunRegistry, UpstreamCause};
use crate::types::{NodeId, RunId};

/// Result of dereferencing an [`UpstreamCause`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// The orchestrator run and the node both still exist.
    Known { run: RunId, node: NodeId },
    /// The orchestrator run was pruned, or never recorded that node.
    Unknown,
}

pub struct CausalityLinker;

impl CausalityLinker {
    /// Build the upstream-side intent before anything is dispatched.
    pub fn intent(origin_run: &RunId, origin_node: &NodeId) -> UpstreamCause {
        UpstreamCause {
            origin_run: origin_run.clone(),
            origin_node: origin_node.clone(),
        }
    }

    /// Link a started target run to the node that caused it.
    ///
    /// Idempotent: linking the same cause to the same run twice records it
    /// once on each side.
    pub fn link(records: &RunRegistry, cause: &UpstreamCause, target: &RunId) {
        let attached = records.attach_cause(target, cause);
        let appended = records.append_downstream(&cause.origin_run, &cause.origin_node, target);
        debug!(
            %target,
            origin = %cause.origin_run,
            node = %cause.origin_node,
            attached,
            appended,
            "linked target run to upstream node"
        );
    }

    pub fn origin(records: &RunRegistry, cause: &UpstreamCause) -> Origin {
        if records.has_node(&cause.origin_run, &cause.origin_node) {
            Origin::Known {
                run: cause.origin_run.clone(),
                node: cause.origin_node.clone(),
            }
        } else {
            Origin::Unknown
        }
    }
}
