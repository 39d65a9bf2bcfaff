//! Task allocation.

use crate::error::{SolveError, SolveResult};
use crate::heuristic::HeuristicTables;
use crate::instance::Instance;
use crate::robot::RobotId;
use crate::solution::Assignment;
use crate::task::TaskId;
use crate::workspace::VertexId;
use std::collections::BTreeMap;

/// Penalty per task already given to a robot, in seconds of travel.
const WORKLOAD_WEIGHT: f64 = 10.0;

/// Greedy allocation in precedence order. Each task goes to the compatible
/// robot maximizing `-10 * workload - travel_time`, measured from the
/// location of the robot's previous task. Ties go to the lower robot id.
pub fn greedy_assignment(
    instance: &Instance,
    tables: &HeuristicTables,
    order: &[TaskId],
) -> SolveResult<Assignment> {
    let mut robots: Vec<_> = instance.robots.iter().collect();
    robots.sort_by_key(|r| r.id);

    let mut last: BTreeMap<RobotId, VertexId> = robots.iter().map(|r| (r.id, r.start)).collect();
    let mut workload: BTreeMap<RobotId, usize> = BTreeMap::new();
    let mut assignment = Assignment::new();

    for task_id in order {
        let Some(task) = instance.task(*task_id) else {
            return Err(SolveError::Assignment(format!("unknown task {}", task_id)));
        };
        let mut best: Option<(f64, RobotId)> = None;
        for robot in &robots {
            if !robot.can_perform(task.task_type)
                || !instance.workspace.can_occupy(task.location, robot.kind)
            {
                continue;
            }
            let from = last.get(&robot.id).copied().unwrap_or(robot.start);
            let Some(travel) = tables.travel_time(robot.id, from, task.location) else {
                continue;
            };
            let load = workload.get(&robot.id).copied().unwrap_or(0) as f64;
            let score = -WORKLOAD_WEIGHT * load - travel;
            if best.map_or(true, |(s, _)| score > s + 1e-9) {
                best = Some((score, robot.id));
            }
        }

        let Some((_, chosen)) = best else {
            return Err(SolveError::Assignment(format!(
                "no robot can reach task {} at {}",
                task.id, task.location
            )));
        };
        assignment.insert(task.id, chosen);
        last.insert(chosen, task.location);
        *workload.entry(chosen).or_default() += 1;
    }

    tracing::debug!("Greedy assignment placed {} tasks", assignment.len());
    Ok(assignment)
}

/// Checks an externally supplied assignment covers every task with a
/// robot that may perform it.
pub fn validate_assignment(instance: &Instance, assignment: &Assignment) -> SolveResult<()> {
    for (task_id, robot_id) in assignment {
        let task = instance
            .task(*task_id)
            .ok_or_else(|| SolveError::Assignment(format!("unknown task {}", task_id)))?;
        let robot = instance
            .robot(*robot_id)
            .ok_or_else(|| SolveError::Assignment(format!("unknown robot {}", robot_id)))?;
        if !robot.can_perform(task.task_type)
            || !instance.workspace.can_occupy(task.location, robot.kind)
        {
            return Err(SolveError::Assignment(format!(
                "robot {} cannot perform task {}",
                robot_id, task_id
            )));
        }
    }
    if let Some(missing) = instance.tasks.iter().find(|t| !assignment.contains_key(&t.id)) {
        return Err(SolveError::Assignment(format!("task {} is unassigned", missing.id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::{Robot, RobotKind};
    use crate::task::{Task, TaskType};
    use crate::workspace::{Edge, Pos, Vertex, Workspace};

    fn instance() -> Instance {
        let mut ws = Workspace::new();
        for i in 0..5 {
            ws.add_vertex(Vertex::new(i, Pos::new(i as f64, 0.0, 0.0)));
        }
        for i in 0..4 {
            ws.add_edge(Edge::timed(i, i + 1, 1.0));
        }
        let robots = vec![
            Robot::new(2, RobotKind::Planar, 4),
            Robot::new(1, RobotKind::Planar, 0),
            Robot::new(3, RobotKind::Rail, 2),
        ];
        let tasks = vec![
            Task::new(1, TaskType::Clean, 1),
            Task::new(2, TaskType::Clean, 3),
            Task::new(3, TaskType::SwapBattery, 2),
            Task::new(4, TaskType::Clean, 0),
        ];
        Instance::new(ws, robots, tasks, 500.0)
    }

    #[test]
    fn greedy_prefers_close_and_idle_robots() {
        let inst = instance();
        let tables = HeuristicTables::build(&inst);
        let order = inst.precedence_order().unwrap();
        let assignment = greedy_assignment(&inst, &tables, &order).unwrap();
        assert_eq!(assignment[&TaskId(1)], RobotId(1));
        assert_eq!(assignment[&TaskId(2)], RobotId(2));
        // Only the rail robot swaps batteries
        assert_eq!(assignment[&TaskId(3)], RobotId(3));
        // Robot 1 is at vertex 1 (1 s away), robot 2 at vertex 3 (3 s away)
        assert_eq!(assignment[&TaskId(4)], RobotId(1));
        assert!(validate_assignment(&inst, &assignment).is_ok());
    }

    #[test]
    fn incompatible_or_partial_assignment_is_rejected() {
        let inst = instance();
        let mut assignment = Assignment::from([
            (TaskId(1), RobotId(1)),
            (TaskId(2), RobotId(2)),
            (TaskId(3), RobotId(1)),
            (TaskId(4), RobotId(1)),
        ]);
        assert!(matches!(
            validate_assignment(&inst, &assignment),
            Err(SolveError::Assignment(_))
        ));
        assignment.insert(TaskId(3), RobotId(3));
        assert!(validate_assignment(&inst, &assignment).is_ok());
        assignment.remove(&TaskId(4));
        assert!(validate_assignment(&inst, &assignment).is_err());
    }
}
