//! Plain CBS: branch on the earliest conflict with a point constraint per robot.

use crate::constraint::TimeWindow;
use super::{split, ConflictResolver, HighLevelNode, PlanContext, Resolution, Violation};

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardResolver;

impl ConflictResolver for StandardResolver {
    fn name(&self) -> &'static str {
        "CBS"
    }

    fn select(&self, ctx: &PlanContext<'_>, node: &HighLevelNode) -> Option<Violation> {
        ctx.first_conflict(node).map(Violation::Conflict)
    }

    fn resolve(
        &self,
        _ctx: &PlanContext<'_>,
        _node: &HighLevelNode,
        violation: &Violation,
    ) -> Resolution {
        match violation {
            Violation::Conflict(conflict) => split(conflict, TimeWindow::point(conflict.time)),
            // Energy is enforced by the low level for this variant
            Violation::Energy(_) => Resolution::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbs::CbsSolver;
    use crate::config::SolverConfig;
    use crate::instance::Instance;
    use crate::robot::{Robot, RobotId, RobotKind};
    use crate::solution::Assignment;
    use crate::task::{Task, TaskDuration, TaskId, TaskType};
    use crate::workspace::{Edge, Pos, Vertex, Workspace};

    /// Plus-shaped junction: robots cross the shared center from opposite arms.
    fn junction() -> Instance {
        let mut ws = Workspace::new();
        ws.add_vertex(Vertex::new(0, Pos::new(0.0, 0.0, 0.0)));
        ws.add_vertex(Vertex::new(1, Pos::new(-1.0, 0.0, 0.0)));
        ws.add_vertex(Vertex::new(2, Pos::new(1.0, 0.0, 0.0)));
        ws.add_vertex(Vertex::new(3, Pos::new(0.0, -1.0, 0.0)));
        ws.add_vertex(Vertex::new(4, Pos::new(0.0, 1.0, 0.0)));
        for arm in 1..=4 {
            ws.add_edge(Edge::timed(0, arm, 1.0));
        }
        let robots = vec![
            Robot::new(1, RobotKind::Planar, 1),
            Robot::new(2, RobotKind::Planar, 3),
        ];
        let tasks = vec![
            Task::new(1, TaskType::Clean, 2).with_duration(TaskDuration::fixed(0.0)),
            Task::new(2, TaskType::Clean, 4).with_duration(TaskDuration::fixed(0.0)),
        ];
        Instance::new(ws, robots, tasks, 60.0)
    }

    #[test]
    fn crossing_robots_take_turns_at_the_center() {
        let inst = junction();
        let assignment = Assignment::from([(TaskId(1), RobotId(1)), (TaskId(2), RobotId(2))]);
        let solution = CbsSolver::new(StandardResolver, SolverConfig::default())
            .solve_with_assignment(&inst, assignment)
            .unwrap();
        // Both reach the center at t=1 unconstrained; one waits a step
        assert_eq!(solution.makespan, 3.0);
        assert_eq!(solution.solver, "CBS");
        assert!(solution.stats.conflicts_found >= 1);
    }
}
