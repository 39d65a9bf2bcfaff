//! Search introspection.
//!
//! The solver owns no global statistics. Callers that want to watch the
//! constraint tree (a visualizer, a benchmark harness) pass a [`SearchTrace`]
//! explicitly; [`SearchStats`] is the counting implementation embedded in
//! every returned solution.

use crate::cbs::Violation;
use serde::{Deserialize, Serialize};

/// Summary of one high-level node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: u64,
    pub parent: Option<u64>,
    pub depth: usize,
    pub cost: f64,
    pub constraints: usize,
}

/// Diagnostic for the most promising node seen when a search gives up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDiagnostic {
    pub node: NodeInfo,
    pub conflicts: usize,
    pub first_violation: Option<String>,
}

pub trait SearchTrace: Send {
    fn node_generated(&mut self, _node: &NodeInfo) {}

    fn node_expanded(&mut self, _node: &NodeInfo) {}

    fn node_pruned(&mut self, _node: &NodeInfo) {}

    fn violation_found(&mut self, _node: &NodeInfo, _violation: &Violation) {}

    fn solution_found(&mut self, _node: &NodeInfo) {}
}

/// Ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTrace;

impl SearchTrace for NoopTrace {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    pub nodes_generated: usize,
    pub nodes_expanded: usize,
    pub nodes_pruned: usize,
    pub conflicts_found: usize,
    pub energy_violations: usize,
    pub low_level_calls: usize,
    pub elapsed_ms: u64,
}

impl SearchTrace for SearchStats {
    fn node_generated(&mut self, _node: &NodeInfo) {
        self.nodes_generated += 1;
    }

    fn node_expanded(&mut self, _node: &NodeInfo) {
        self.nodes_expanded += 1;
    }

    fn node_pruned(&mut self, _node: &NodeInfo) {
        self.nodes_pruned += 1;
    }

    fn violation_found(&mut self, _node: &NodeInfo, violation: &Violation) {
        match violation {
            Violation::Conflict(_) => self.conflicts_found += 1,
            Violation::Energy(_) => self.energy_violations += 1,
        }
    }
}

/// Records the constraint tree as a flat event log.
#[derive(Debug, Clone, Default)]
pub struct TreeRecorder {
    pub events: Vec<TreeEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TreeEvent {
    Generated { node: NodeInfo },
    Expanded { node: NodeInfo },
    Pruned { node: NodeInfo },
    Violation { node: u64, description: String },
    Solution { node: u64 },
}

impl SearchTrace for TreeRecorder {
    fn node_generated(&mut self, node: &NodeInfo) {
        self.events.push(TreeEvent::Generated { node: *node });
    }

    fn node_expanded(&mut self, node: &NodeInfo) {
        self.events.push(TreeEvent::Expanded { node: *node });
    }

    fn node_pruned(&mut self, node: &NodeInfo) {
        self.events.push(TreeEvent::Pruned { node: *node });
    }

    fn violation_found(&mut self, node: &NodeInfo, violation: &Violation) {
        self.events.push(TreeEvent::Violation {
            node: node.id,
            description: violation.to_string(),
        });
    }

    fn solution_found(&mut self, node: &NodeInfo) {
        self.events.push(TreeEvent::Solution { node: node.id });
    }
}
