//! Per-robot route planning on top of the space-time search.
//!
//! A robot's itinerary is its ordered list of stops (assigned tasks plus any
//! charging stops). Cross-robot precedence turns into release times: a task
//! may not start before every predecessor served by another robot is done.
//! Replanning one robot can move those completions, so dependants are
//! replanned until release times settle.

use crate::config::{Objective, SolverConfig};
use crate::constraint::{Constraint, ConstraintSet, TIME_TOLERANCE};
use crate::heuristic::{HeuristicTables, PotentialField};
use crate::instance::Instance;
use crate::robot::RobotId;
use crate::search::{EnergyMode, Goal, PlannedRoute, SearchRequest, SpaceTimeSearch};
use crate::solution::{Assignment, Schedule};
use crate::task::TaskId;
use crate::workspace::VertexId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stop", rename_all = "snake_case")]
pub enum Stop {
    Task { task: TaskId },
    /// Recharge at `pad`, arriving no later than `by`
    Charge { pad: VertexId, by: f64 },
}

impl fmt::Display for Stop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stop::Task { task } => write!(f, "{}", task),
            Stop::Charge { pad, by } => write!(f, "charge@{} by {:.1}s", pad, by),
        }
    }
}

pub type Itinerary = Vec<Stop>;

pub type Plans = BTreeMap<RobotId, PlannedRoute>;

/// Latest rest time over all robots.
pub fn makespan(plans: &Plans) -> f64 {
    plans.values().map(|p| p.end_time).fold(0.0, f64::max)
}

pub fn sum_of_costs(plans: &Plans) -> f64 {
    plans.values().map(|p| p.end_time).sum()
}

pub fn objective_cost(objective: Objective, plans: &Plans) -> f64 {
    match objective {
        Objective::Makespan => makespan(plans),
        Objective::SumOfCosts => sum_of_costs(plans),
    }
}

/// Service start of every task served in `plans`.
pub fn schedule(plans: &Plans) -> Schedule {
    plans
        .values()
        .flat_map(|p| p.visits.iter())
        .filter_map(|v| v.task.map(|t| (t, v.start)))
        .collect()
}

pub fn assignment_of(itineraries: &BTreeMap<RobotId, Itinerary>) -> Assignment {
    let mut assignment = Assignment::new();
    for (robot, itinerary) in itineraries {
        for stop in itinerary {
            if let Stop::Task { task } = stop {
                assignment.insert(*task, *robot);
            }
        }
    }
    assignment
}

/// Replans robots and keeps cross-robot precedence consistent. Shared
/// read-only across high-level workers.
pub struct Planner<'a> {
    instance: &'a Instance,
    config: &'a SolverConfig,
    search: SpaceTimeSearch<'a>,
    order: Vec<TaskId>,
    successors: HashMap<TaskId, Vec<TaskId>>,
    fields: BTreeMap<RobotId, PotentialField>,
    low_level_calls: AtomicUsize,
}

impl<'a> Planner<'a> {
    /// `order` must be a precedence-consistent task order.
    pub fn new(
        instance: &'a Instance,
        config: &'a SolverConfig,
        tables: &'a HeuristicTables,
        order: Vec<TaskId>,
    ) -> Self {
        let mut successors: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        for task in &instance.tasks {
            for pred in &task.precedence {
                successors.entry(*pred).or_default().push(task.id);
            }
        }
        let fields = if config.effective_field_weight() > 0.0 {
            instance
                .robots
                .iter()
                .map(|r| (r.id, PotentialField::for_robot(instance, r.id)))
                .collect()
        } else {
            BTreeMap::new()
        };
        Self {
            instance,
            config,
            search: SpaceTimeSearch::new(instance, tables, config),
            order,
            successors,
            fields,
            low_level_calls: AtomicUsize::new(0),
        }
    }

    pub fn instance(&self) -> &'a Instance {
        self.instance
    }

    pub fn low_level_calls(&self) -> usize {
        self.low_level_calls.load(Ordering::Relaxed)
    }

    /// Each robot's assigned tasks in precedence order.
    pub fn root_itineraries(&self, assignment: &Assignment) -> BTreeMap<RobotId, Itinerary> {
        let mut itineraries: BTreeMap<RobotId, Itinerary> =
            self.instance.robots.iter().map(|r| (r.id, Vec::new())).collect();
        for task in &self.order {
            if let Some(robot) = assignment.get(task) {
                if let Some(itinerary) = itineraries.get_mut(robot) {
                    itinerary.push(Stop::Task { task: *task });
                }
            }
        }
        itineraries
    }

    /// Goals for one robot, with release times taken from the current
    /// completions of predecessors served by other robots.
    pub fn goals_for(&self, robot: RobotId, itinerary: &[Stop], plans: &Plans) -> Vec<Goal> {
        let mut completions: HashMap<TaskId, (RobotId, f64)> = HashMap::new();
        for (owner, plan) in plans {
            for visit in &plan.visits {
                if let Some(task) = visit.task {
                    completions.insert(task, (*owner, visit.end));
                }
            }
        }

        itinerary
            .iter()
            .filter_map(|stop| match *stop {
                Stop::Task { task } => {
                    let details = self.instance.task(task)?;
                    let release = details
                        .precedence
                        .iter()
                        .filter_map(|pred| completions.get(pred))
                        .filter(|(owner, _)| *owner != robot)
                        .map(|(_, end)| *end)
                        .fold(0.0, f64::max);
                    let goal = Goal::task(task, details.location, details.service_sec());
                    Some(goal.released_at(release))
                }
                Stop::Charge { pad, by } => Some(Goal::charge(pad, by, 0.0)),
            })
            .collect()
    }

    /// Single low-level call for `robot` under `constraints`.
    pub fn plan_robot(
        &self,
        robot: RobotId,
        itinerary: &[Stop],
        constraints: &[Constraint],
        plans: &Plans,
        mode: EnergyMode,
    ) -> Option<PlannedRoute> {
        let robot_ref = self.instance.robot(robot)?;
        let goals = self.goals_for(robot, itinerary, plans);
        let set = ConstraintSet::for_robot(constraints, robot);
        let field = self
            .fields
            .get(&robot)
            .map(|f| (f, self.config.effective_field_weight()));
        self.low_level_calls.fetch_add(1, Ordering::Relaxed);
        self.search.plan(&SearchRequest {
            robot: robot_ref,
            start_time: 0.0,
            goals: &goals,
            constraints: &set,
            energy: mode,
            field,
        })
    }

    /// Plan every robot from scratch, then settle release times.
    pub fn plan_all(
        &self,
        constraints: &[Constraint],
        itineraries: &BTreeMap<RobotId, Itinerary>,
        mode: EnergyMode,
    ) -> Option<Plans> {
        let mut plans = Plans::new();
        for (robot, itinerary) in itineraries {
            let route = self.plan_robot(*robot, itinerary, constraints, &plans, mode)?;
            plans.insert(*robot, route);
        }
        self.settle(constraints, itineraries, &mut plans, BTreeSet::new(), mode)
            .then_some(plans)
    }

    /// Replan `robot` and every robot whose release times move as a result.
    /// Returns `false` when some replan is infeasible.
    pub fn replan(
        &self,
        constraints: &[Constraint],
        itineraries: &BTreeMap<RobotId, Itinerary>,
        plans: &mut Plans,
        robot: RobotId,
        mode: EnergyMode,
    ) -> bool {
        self.settle(constraints, itineraries, plans, BTreeSet::from([robot]), mode)
    }

    fn settle(
        &self,
        constraints: &[Constraint],
        itineraries: &BTreeMap<RobotId, Itinerary>,
        plans: &mut Plans,
        mut dirty: BTreeSet<RobotId>,
        mode: EnergyMode,
    ) -> bool {
        let owner: HashMap<TaskId, RobotId> = assignment_of(itineraries).into_iter().collect();
        let max_rounds = (itineraries.len() + 1) * (self.instance.tasks.len() + 1) * 2;
        let mut rounds = 0usize;

        loop {
            while let Some(robot) = dirty.pop_first() {
                rounds += 1;
                if rounds > max_rounds {
                    tracing::warn!("Release times did not settle after {} replans", max_rounds);
                    return false;
                }
                let Some(itinerary) = itineraries.get(&robot) else {
                    continue;
                };
                let Some(route) = self.plan_robot(robot, itinerary, constraints, plans, mode) else {
                    return false;
                };

                let previous = plans.get(&robot);
                for stop in itinerary {
                    let Stop::Task { task } = stop else {
                        continue;
                    };
                    let before = previous.and_then(|p| p.task_end(*task));
                    let after = route.task_end(*task);
                    let moved = match (before, after) {
                        (Some(b), Some(a)) => (a - b).abs() > TIME_TOLERANCE,
                        _ => before.is_some() != after.is_some(),
                    };
                    if !moved {
                        continue;
                    }
                    for succ in self.successors.get(task).into_iter().flatten() {
                        if let Some(other) = owner.get(succ) {
                            if *other != robot {
                                dirty.insert(*other);
                            }
                        }
                    }
                }
                plans.insert(robot, route);
            }

            // A successor planned before its predecessor existed saw no release time
            match self.precedence_violation(plans) {
                Some(robot) => {
                    dirty.insert(robot);
                }
                None => return true,
            }
        }
    }

    /// First robot whose plan starts a task before a predecessor completes.
    pub fn precedence_violation(&self, plans: &Plans) -> Option<RobotId> {
        let mut ends: HashMap<TaskId, f64> = HashMap::new();
        for plan in plans.values() {
            for visit in &plan.visits {
                if let Some(task) = visit.task {
                    ends.insert(task, visit.end);
                }
            }
        }
        for (robot, plan) in plans {
            for visit in &plan.visits {
                let Some(task) = visit.task.and_then(|t| self.instance.task(t)) else {
                    continue;
                };
                let late = task.precedence.iter().any(|pred| {
                    ends.get(pred)
                        .is_some_and(|end| visit.start + TIME_TOLERANCE < *end)
                });
                if late {
                    return Some(*robot);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::{Robot, RobotKind};
    use crate::task::{Task, TaskDuration, TaskType};
    use crate::workspace::{Edge, Pos, Vertex, Workspace};

    // Two parallel lanes: 0-1-2 for robot 1 and 3-4-5 for robot 2
    fn lanes() -> Instance {
        let mut ws = Workspace::new();
        for i in 0..6 {
            ws.add_vertex(Vertex::new(i, Pos::new((i % 3) as f64, (i / 3) as f64 * 10.0, 0.0)));
        }
        ws.add_edge(Edge::timed(0, 1, 1.0));
        ws.add_edge(Edge::timed(1, 2, 1.0));
        ws.add_edge(Edge::timed(3, 4, 1.0));
        ws.add_edge(Edge::timed(4, 5, 1.0));
        let robots = vec![
            Robot::new(1, RobotKind::Planar, 0),
            Robot::new(2, RobotKind::Planar, 3),
        ];
        let tasks = vec![
            Task::new(1, TaskType::Clean, 2).with_duration(TaskDuration::fixed(10.0)),
            Task::new(2, TaskType::Clean, 5)
                .with_duration(TaskDuration::fixed(4.0))
                .after(1),
        ];
        Instance::new(ws, robots, tasks, 100.0)
    }

    fn assignment() -> Assignment {
        Assignment::from([(TaskId(1), RobotId(1)), (TaskId(2), RobotId(2))])
    }

    #[test]
    fn cross_robot_precedence_becomes_release_time() {
        let inst = lanes();
        let config = SolverConfig::default();
        let tables = HeuristicTables::build(&inst);
        let order = inst.precedence_order().unwrap();
        let planner = Planner::new(&inst, &config, &tables, order);
        let itineraries = planner.root_itineraries(&assignment());

        let plans = planner.plan_all(&[], &itineraries, EnergyMode::Prune).unwrap();
        // Task 1 ends at 2 + 10; task 2 waits for it
        assert_eq!(plans[&RobotId(1)].task_end(TaskId(1)), Some(12.0));
        assert_eq!(plans[&RobotId(2)].task_start(TaskId(2)), Some(12.0));
        assert_eq!(makespan(&plans), 16.0);
        assert_eq!(sum_of_costs(&plans), 28.0);
        assert!(planner.precedence_violation(&plans).is_none());

        let sched = schedule(&plans);
        assert_eq!(sched[&TaskId(1)], 2.0);
        assert_eq!(assignment_of(&itineraries), assignment());
    }

    #[test]
    fn replanning_a_predecessor_moves_its_successor() {
        let inst = lanes();
        let config = SolverConfig::default();
        let tables = HeuristicTables::build(&inst);
        let planner = Planner::new(&inst, &config, &tables, inst.precedence_order().unwrap());
        let itineraries = planner.root_itineraries(&assignment());
        let mut plans = planner.plan_all(&[], &itineraries, EnergyMode::Prune).unwrap();

        // Keep robot 1 off its task vertex until t=5
        let constraints = vec![Constraint::vertex(
            RobotId(1),
            VertexId(2),
            crate::constraint::TimeWindow::new(0.0, 5.0),
        )];
        let mode = EnergyMode::Prune;
        assert!(planner.replan(&constraints, &itineraries, &mut plans, RobotId(1), mode));
        let end = plans[&RobotId(1)].task_end(TaskId(1)).unwrap();
        assert_eq!(end, 16.0);
        assert_eq!(plans[&RobotId(2)].task_start(TaskId(2)), Some(end));
        assert!(planner.low_level_calls() >= 4);
    }

    #[test]
    fn infeasible_replan_is_reported() {
        let inst = lanes();
        let config = SolverConfig {
            horizon_sec: 30.0,
            ..SolverConfig::default()
        };
        let tables = HeuristicTables::build(&inst);
        let planner = Planner::new(&inst, &config, &tables, inst.precedence_order().unwrap());
        let itineraries = planner.root_itineraries(&assignment());
        let mut plans = planner.plan_all(&[], &itineraries, EnergyMode::Prune).unwrap();
        let constraints = vec![Constraint::vertex(
            RobotId(1),
            VertexId(2),
            crate::constraint::TimeWindow::new(0.0, 1000.0),
        )];
        let mode = EnergyMode::Prune;
        assert!(!planner.replan(&constraints, &itineraries, &mut plans, RobotId(1), mode));
    }
}
