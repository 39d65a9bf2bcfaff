//! Deadline-aware CBS.
//!
//! Conflicts between robots with little slack are resolved first, and the
//! robot with more slack is the first to yield. Nodes whose makespan already
//! exceeds the global deadline are dropped; node cost never decreases along
//! a branch, so no descendant could recover.

use crate::config::SolverConfig;
use crate::conflict::Conflict;
use crate::constraint::{TimeWindow, TIME_TOLERANCE};
use crate::instance::Instance;
use crate::plan::{self, Plans};
use crate::robot::RobotId;
use crate::task::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use super::{split, ConflictResolver, HighLevelNode, PlanContext, Resolution, Violation};

/// Slack of one scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskSlack {
    pub task: TaskId,
    pub robot: RobotId,
    pub completion: f64,
    pub deadline: f64,
    /// Deadline minus completion, minus any external urgency
    pub slack: f64,
    pub critical: bool,
}

/// Slack of every task served in `plans`, most urgent first.
pub fn slack_report(
    instance: &Instance,
    plans: &Plans,
    urgency: &BTreeMap<TaskId, f64>,
    threshold_sec: f64,
) -> Vec<TaskSlack> {
    let mut report: Vec<TaskSlack> = plans
        .iter()
        .flat_map(|(robot, route)| route.visits.iter().map(move |v| (*robot, v)))
        .filter_map(|(robot, visit)| {
            let task = instance.task(visit.task?)?;
            let deadline = instance.task_deadline(task);
            let slack = deadline - visit.end - urgency.get(&task.id).copied().unwrap_or(0.0);
            Some(TaskSlack {
                task: task.id,
                robot,
                completion: visit.end,
                deadline,
                slack,
                critical: slack < threshold_sec,
            })
        })
        .collect();
    report.sort_by(|a, b| a.slack.total_cmp(&b.slack).then(a.task.cmp(&b.task)));
    report
}

/// Least slack over each robot's tasks. Robots without tasks are absent.
pub fn robot_slack(report: &[TaskSlack]) -> BTreeMap<RobotId, f64> {
    let mut slack: BTreeMap<RobotId, f64> = BTreeMap::new();
    for entry in report {
        slack
            .entry(entry.robot)
            .and_modify(|s| *s = s.min(entry.slack))
            .or_insert(entry.slack);
    }
    slack
}

/// Conflict whose tighter robot has the least slack. Conflicts are expected
/// in detection order, so ties keep the earliest.
pub fn most_urgent<'c>(
    conflicts: &'c [Conflict],
    slack: &BTreeMap<RobotId, f64>,
) -> Option<&'c Conflict> {
    let tightness = |c: &Conflict| {
        let of = |r: RobotId| slack.get(&r).copied().unwrap_or(f64::INFINITY);
        of(c.first).min(of(c.second))
    };
    let mut best: Option<(&Conflict, f64)> = None;
    for conflict in conflicts {
        let t = tightness(conflict);
        if best.map_or(true, |(_, b)| t < b - TIME_TOLERANCE) {
            best = Some((conflict, t));
        }
    }
    best.map(|(c, _)| c)
}

#[derive(Debug, Clone, Default)]
pub struct DeadlineResolver {
    slack_threshold_sec: f64,
    urgency: BTreeMap<TaskId, f64>,
}

impl DeadlineResolver {
    pub fn new(config: &SolverConfig) -> Self {
        Self {
            slack_threshold_sec: config.slack_threshold_sec,
            urgency: BTreeMap::new(),
        }
    }

    /// External urgency per task, in seconds subtracted from its slack.
    pub fn with_urgency(mut self, urgency: BTreeMap<TaskId, f64>) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn report(&self, instance: &Instance, plans: &Plans) -> Vec<TaskSlack> {
        slack_report(instance, plans, &self.urgency, self.slack_threshold_sec)
    }
}

impl ConflictResolver for DeadlineResolver {
    fn name(&self) -> &'static str {
        "DEADLINE-CBS"
    }

    fn select(&self, ctx: &PlanContext<'_>, node: &HighLevelNode) -> Option<Violation> {
        let conflicts = ctx.detector.all_conflicts(node.paths());
        let slack = robot_slack(&self.report(ctx.instance, &node.plans));
        most_urgent(&conflicts, &slack).map(|c| Violation::Conflict(*c))
    }

    fn resolve(
        &self,
        ctx: &PlanContext<'_>,
        node: &HighLevelNode,
        violation: &Violation,
    ) -> Resolution {
        let Violation::Conflict(conflict) = violation else {
            return Resolution::default();
        };
        let mut resolution = split(conflict, TimeWindow::point(conflict.time));
        let slack = robot_slack(&self.report(ctx.instance, &node.plans));
        let of = |r: RobotId| slack.get(&r).copied().unwrap_or(f64::INFINITY);
        // The robot with more slack yields first
        resolution
            .branches
            .sort_by(|a, b| of(b.robot).total_cmp(&of(a.robot)));
        resolution
    }

    fn prune(&self, ctx: &PlanContext<'_>, node: &HighLevelNode) -> bool {
        let late = plan::makespan(&node.plans) > ctx.instance.deadline_sec + TIME_TOLERANCE;
        if late {
            tracing::trace!("node {} misses the global deadline", node.id);
        }
        late
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbs::CbsSolver;
    use crate::conflict::ConflictKind;
    use crate::error::SolveError;
    use crate::robot::{Robot, RobotKind};
    use crate::search::PlannedRoute;
    use crate::solution::{Assignment, TimedVertex};
    use crate::task::{Task, TaskDuration, TaskType};
    use crate::workspace::{Edge, Pos, Vertex, VertexId, Workspace};

    fn conflict(first: u32, second: u32, time: f64) -> Conflict {
        Conflict {
            first: RobotId(first),
            second: RobotId(second),
            kind: ConflictKind::Vertex { vertex: VertexId(0) },
            time,
            first_interval: TimeWindow::point(time),
            second_interval: TimeWindow::point(time),
        }
    }

    #[test]
    fn tightest_conflict_wins() {
        let conflicts = vec![conflict(1, 2, 1.0), conflict(3, 4, 2.0), conflict(2, 3, 3.0)];
        let slack = BTreeMap::from([
            (RobotId(1), 50.0),
            (RobotId(2), 40.0),
            (RobotId(3), 5.0),
            (RobotId(4), 80.0),
        ]);
        assert_eq!(most_urgent(&conflicts, &slack).map(|c| c.time), Some(2.0));
        assert!(most_urgent(&[], &slack).is_none());
        // Equal tightness keeps detection order
        let flat = BTreeMap::new();
        assert_eq!(most_urgent(&conflicts, &flat).map(|c| c.time), Some(1.0));
    }

    fn visit_plan(task: u32, end: f64) -> PlannedRoute {
        PlannedRoute {
            path: vec![TimedVertex::new(0, 0.0), TimedVertex::new(0, end)],
            visits: vec![crate::search::Visit {
                goal: 0,
                vertex: VertexId(0),
                task: Some(TaskId(task)),
                start: end - 1.0,
                end,
            }],
            end_time: end,
        }
    }

    #[test]
    fn report_applies_deadlines_and_urgency() {
        let mut ws = Workspace::new();
        ws.add_vertex(Vertex::new(0, Pos::default()).shared());
        let robots = vec![
            Robot::new(1, RobotKind::Planar, 0),
            Robot::new(2, RobotKind::Planar, 0),
        ];
        let tasks = vec![
            Task::new(1, TaskType::Clean, 0).with_deadline(30.0),
            Task::new(2, TaskType::Clean, 0),
        ];
        let inst = Instance::new(ws, robots, tasks, 100.0);
        let plans = Plans::from([
            (RobotId(1), visit_plan(1, 25.0)),
            (RobotId(2), visit_plan(2, 60.0)),
        ]);

        let report = slack_report(&inst, &plans, &BTreeMap::new(), 10.0);
        assert_eq!(report[0].task, TaskId(1));
        assert_eq!(report[0].slack, 5.0);
        assert!(report[0].critical);
        assert_eq!(report[1].slack, 40.0);
        assert!(!report[1].critical);

        let urgent = slack_report(&inst, &plans, &BTreeMap::from([(TaskId(2), 36.0)]), 10.0);
        assert_eq!(urgent[0].task, TaskId(2));
        assert_eq!(robot_slack(&urgent)[&RobotId(2)], 4.0);
    }

    /// Corridor 0-1-2 with a passing bay at 3; the robots swap ends.
    fn swap(deadline: f64) -> Instance {
        let mut ws = Workspace::new();
        ws.add_vertex(Vertex::new(0, Pos::new(0.0, 0.0, 0.0)));
        ws.add_vertex(Vertex::new(1, Pos::new(1.0, 0.0, 0.0)));
        ws.add_vertex(Vertex::new(2, Pos::new(2.0, 0.0, 0.0)));
        ws.add_vertex(Vertex::new(3, Pos::new(1.0, -1.0, 0.0)));
        ws.add_edge(Edge::timed(0, 1, 1.0));
        ws.add_edge(Edge::timed(1, 2, 1.0));
        ws.add_edge(Edge::timed(1, 3, 1.0));
        let robots = vec![
            Robot::new(1, RobotKind::Planar, 0),
            Robot::new(2, RobotKind::Planar, 2),
        ];
        let tasks = vec![
            Task::new(1, TaskType::Clean, 2).with_duration(TaskDuration::fixed(0.0)),
            Task::new(2, TaskType::Clean, 0).with_duration(TaskDuration::fixed(0.0)),
        ];
        Instance::new(ws, robots, tasks, deadline)
    }

    #[test]
    fn meets_a_loose_deadline_and_prunes_a_tight_one() {
        let assignment = Assignment::from([(TaskId(1), RobotId(1)), (TaskId(2), RobotId(2))]);
        let config = SolverConfig::default();

        let inst = swap(10.0);
        let solution = CbsSolver::new(DeadlineResolver::new(&config), config.clone())
            .solve_with_assignment(&inst, assignment.clone())
            .unwrap();
        assert_eq!(solution.solver, "DEADLINE-CBS");
        assert_eq!(solution.makespan, 4.0);
        assert!(solution.meets_deadline(&inst));

        let tight = swap(3.0);
        let err = CbsSolver::new(DeadlineResolver::new(&config), config)
            .solve_with_assignment(&tight, assignment)
            .unwrap_err();
        assert!(matches!(err, SolveError::NoSolution { .. }));
    }
}
