//! Prioritized planning.
//!
//! Robots are planned one at a time; everything an earlier robot occupies
//! becomes a constraint for the later ones. Fast, but incomplete: a robot
//! boxed in by higher-priority paths makes the whole call fail.

use crate::assignment::{greedy_assignment, validate_assignment};
use crate::config::SolverConfig;
use crate::conflict::{corridor_occupancy, occupancy, ConflictDetector};
use crate::constraint::{Constraint, TimeWindow};
use crate::error::{SolveError, SolveResult};
use crate::heuristic::HeuristicTables;
use crate::instance::Instance;
use crate::plan::{self, Itinerary, Planner, Plans};
use crate::robot::{RobotId, RobotKind};
use crate::search::EnergyMode;
use crate::solution::{Assignment, Solution, TimedVertex};
use crate::trace::SearchStats;
use std::collections::BTreeMap;
use std::time::Instant;

const RAIL_PRIORITY: usize = 100;
const TASK_PRIORITY: usize = 10;

/// Rails first (they cannot step aside), then robots with more work.
pub fn priority_order(
    instance: &Instance,
    itineraries: &BTreeMap<RobotId, Itinerary>,
) -> Vec<RobotId> {
    let mut scored: Vec<(usize, RobotId)> = instance
        .robots
        .iter()
        .map(|r| {
            let rail = if r.kind == RobotKind::Rail { RAIL_PRIORITY } else { 0 };
            let tasks = itineraries.get(&r.id).map_or(0, Vec::len);
            (rail + TASK_PRIORITY * tasks, r.id)
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    scored.into_iter().map(|(_, id)| id).collect()
}

/// Constraints keeping `robot` clear of another robot's path.
pub fn avoidance_constraints(
    instance: &Instance,
    robot: RobotId,
    other: RobotId,
    path: &[TimedVertex],
    corridor_exclusive: bool,
) -> Vec<Constraint> {
    let mut constraints = Vec::new();
    let (stays, traversals) = occupancy(path);
    for stay in stays {
        if instance.workspace.is_shared(stay.vertex) {
            continue;
        }
        constraints.push(Constraint::vertex(
            robot,
            stay.vertex,
            TimeWindow::new(stay.arrive, stay.depart),
        ));
    }
    for traversal in traversals {
        constraints.push(Constraint::edge(
            robot,
            traversal.to,
            traversal.from,
            TimeWindow::new(traversal.start, traversal.end),
        ));
    }
    let both_aerial = instance.robot_kind(robot) == Some(RobotKind::Aerial)
        && instance.robot_kind(other) == Some(RobotKind::Aerial);
    if corridor_exclusive && both_aerial {
        for (corridor, window) in corridor_occupancy(&instance.airspace, path) {
            constraints.push(Constraint::corridor(robot, corridor, window));
        }
    }
    constraints
}

/// Plans robots one at a time in priority order, each around the paths
/// already fixed. Fast but incomplete.
pub struct PrioritizedSolver {
    config: SolverConfig,
}

impl PrioritizedSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    /// Plans with a greedy assignment.
    pub fn solve(&self, instance: &Instance) -> SolveResult<Solution> {
        self.solve_with(instance, None)
    }

    pub fn solve_with(
        &self,
        instance: &Instance,
        assignment: Option<Assignment>,
    ) -> SolveResult<Solution> {
        let started = Instant::now();
        instance.validate()?;
        let order = instance.precedence_order()?;
        let tables = HeuristicTables::build(instance);
        let assignment = match assignment {
            Some(given) => {
                validate_assignment(instance, &given)?;
                given
            }
            None => greedy_assignment(instance, &tables, &order)?,
        };
        let planner = Planner::new(instance, &self.config, &tables, order);
        let itineraries = planner.root_itineraries(&assignment);
        let priority = priority_order(instance, &itineraries);
        tracing::info!("PRIORITIZED starting: {} robots", priority.len());

        let mut plans = Plans::new();
        for robot in &priority {
            let itinerary = itineraries.get(robot).map(Vec::as_slice).unwrap_or(&[]);
            let constraints = self.constraints_for(instance, *robot, &plans);
            let route =
                planner.plan_robot(*robot, itinerary, &constraints, &plans, EnergyMode::Prune);
            let Some(route) = route else {
                tracing::warn!("PRIORITIZED: no path for {} around higher-priority robots", robot);
                return Err(SolveError::NoSolution { lower_bound: 0.0 });
            };
            plans.insert(*robot, route);
        }

        // Predecessors planned after their successors: replan against everyone
        let mut rounds = 0;
        while let Some(robot) = planner.precedence_violation(&plans) {
            rounds += 1;
            if rounds > priority.len() * (instance.tasks.len() + 1) {
                tracing::warn!("PRIORITIZED: precedence did not settle");
                return Err(SolveError::NoSolution { lower_bound: 0.0 });
            }
            let itinerary = itineraries.get(&robot).map(Vec::as_slice).unwrap_or(&[]);
            let others: Plans = plans
                .iter()
                .filter(|(id, _)| **id != robot)
                .map(|(id, p)| (*id, p.clone()))
                .collect();
            let constraints = self.constraints_for(instance, robot, &others);
            let route =
                planner.plan_robot(robot, itinerary, &constraints, &plans, EnergyMode::Prune);
            let Some(route) = route else {
                return Err(SolveError::NoSolution { lower_bound: 0.0 });
            };
            plans.insert(robot, route);
        }

        let detector = ConflictDetector::for_instance(instance, self.config.corridor_exclusive);
        let paths = plans.iter().map(|(id, p)| (*id, p.path.as_slice()));
        if let Some(conflict) = detector.first_conflict(paths) {
            tracing::warn!("PRIORITIZED: replanning left a conflict: {}", conflict);
            return Err(SolveError::NoSolution { lower_bound: 0.0 });
        }

        let stats = SearchStats {
            nodes_generated: priority.len(),
            nodes_expanded: priority.len(),
            low_level_calls: planner.low_level_calls(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            ..SearchStats::default()
        };
        let mut solution = Solution {
            solver: "PRIORITIZED".to_string(),
            paths: plans.iter().map(|(id, p)| (*id, p.path.clone())).collect(),
            assignment: plan::assignment_of(&itineraries),
            schedule: plan::schedule(&plans),
            makespan: 0.0,
            sum_of_costs: plan::sum_of_costs(&plans),
            feasible: true,
            exact: false,
            stats,
        };
        solution.makespan = solution.compute_makespan(instance);
        tracing::info!("PRIORITIZED finished: makespan {:.3}s", solution.makespan);
        Ok(solution)
    }

    fn constraints_for(
        &self,
        instance: &Instance,
        robot: RobotId,
        plans: &Plans,
    ) -> Vec<Constraint> {
        let exclusive = self.config.corridor_exclusive;
        plans
            .iter()
            .filter(|(id, _)| **id != robot)
            .flat_map(|(id, route)| {
                avoidance_constraints(instance, robot, *id, &route.path, exclusive)
            })
            .collect()
    }
}
