pub mod airspace;
pub mod assignment;
pub mod cbs;
pub mod config;
pub mod conflict;
pub mod constraint;
pub mod energy;
pub mod error;
pub mod heuristic;
pub mod hybrid;
pub mod instance;
pub mod mcts;
pub mod plan;
pub mod prioritized;
pub mod robot;
pub mod search;
pub mod solution;
pub mod solver;
pub mod stochastic;
pub mod task;
pub mod trace;
pub mod workspace;

pub use airspace::{Airspace, Corridor, CorridorId, Layer};
pub use assignment::{greedy_assignment, validate_assignment};
pub use cbs::{
    CancelFlag, CbsSolver, ConflictClass, ConflictResolver, DeadlineResolver, EnergyResolver,
    HighLevelNode, MixedResolver, RailNetwork, StandardResolver, StochasticResolver, Violation,
};
pub use config::{Objective, SolverConfig, SolverKind};
pub use conflict::{Conflict, ConflictDetector, ConflictKind};
pub use constraint::{Constraint, ConstraintTarget, MustReachBy, TimeWindow, TIME_TOLERANCE};
pub use energy::{EnergyProfile, EnergyViolation};
pub use error::{InstanceError, SolveError, SolveResult};
pub use heuristic::PotentialField;
pub use hybrid::{refine_paths, HybridSolver};
pub use instance::Instance;
pub use mcts::MctsSolver;
pub use plan::Stop;
pub use prioritized::PrioritizedSolver;
pub use robot::{Battery, Robot, RobotId, RobotKind};
pub use search::{EnergyMode, PlannedRoute};
pub use solution::{Assignment, Path, Schedule, Solution, TimedVertex};
pub use solver::{solve, solve_traced, solve_with, SolveOptions};
pub use task::{Task, TaskDuration, TaskId, TaskType};
pub use trace::{
    NodeDiagnostic, NodeInfo, NoopTrace, SearchStats, SearchTrace, TreeEvent, TreeRecorder,
};
pub use workspace::{Edge, Occupancy, Pos, Vertex, VertexId, Workspace};
