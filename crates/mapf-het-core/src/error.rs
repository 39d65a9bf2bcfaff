use crate::robot::{RobotId, RobotKind};
use crate::task::{TaskId, TaskType};
use crate::trace::NodeDiagnostic;
use crate::workspace::VertexId;
use thiserror::Error;

/// Referential-integrity failures found before search starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InstanceError {
    #[error("deadline must be positive, got {0}")]
    InvalidDeadline(f64),

    #[error("edge {from} -> {to} references an unknown vertex")]
    UnknownEdgeVertex { from: VertexId, to: VertexId },

    #[error("edge {0} -> {0} is a self-loop")]
    SelfLoop(VertexId),

    #[error("edge {from} -> {to} has a non-positive traversal time")]
    InvalidEdge { from: VertexId, to: VertexId },

    #[error("duplicate robot id {0}")]
    DuplicateRobot(RobotId),

    #[error("robot {robot} references unknown vertex {vertex}")]
    UnknownRobotVertex { robot: RobotId, vertex: VertexId },

    #[error("robot {robot} ({kind:?}) may not occupy its start vertex {vertex}")]
    ForbiddenStart {
        robot: RobotId,
        kind: RobotKind,
        vertex: VertexId,
    },

    #[error("aerial robot {0} has no battery")]
    MissingBattery(RobotId),

    #[error("ground robot {0} must not carry a battery")]
    UnexpectedBattery(RobotId),

    #[error("robot {robot} battery charge {charge_wh} Wh outside [0, {capacity_wh}] Wh")]
    InvalidBattery {
        robot: RobotId,
        charge_wh: f64,
        capacity_wh: f64,
    },

    #[error("duplicate task id {0}")]
    DuplicateTask(TaskId),

    #[error("task {task} references unknown vertex {vertex}")]
    UnknownTaskVertex { task: TaskId, vertex: VertexId },

    #[error("task {task} has invalid duration {duration_sec}")]
    InvalidDuration { task: TaskId, duration_sec: f64 },

    #[error("task {task} depends on unknown task {missing}")]
    UnknownPrecedence { task: TaskId, missing: TaskId },

    #[error("precedence cycle through task {0}")]
    PrecedenceCycle(TaskId),

    #[error("no robot can perform task {task} ({task_type:?})")]
    NoCompatibleRobot { task: TaskId, task_type: TaskType },
}

/// Outcome of a planning call that did not produce a solution.
#[derive(Debug, Clone, Error)]
pub enum SolveError {
    #[error("malformed instance: {0}")]
    Malformed(#[from] InstanceError),

    #[error("invalid assignment: {0}")]
    Assignment(String),

    #[error("no solution (lower bound {lower_bound:.3}s)")]
    NoSolution { lower_bound: f64 },

    #[error("search budget exhausted after {expanded} nodes (lower bound {lower_bound:.3}s)")]
    Timeout {
        expanded: usize,
        lower_bound: f64,
        best: Option<NodeDiagnostic>,
    },
}

impl SolveError {
    /// True when a solution may still exist with a larger budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SolveError::Timeout { .. })
    }
}

pub type SolveResult<T> = Result<T, SolveError>;
