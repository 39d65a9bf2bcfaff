//! Stochastic ECBS.
//!
//! Travel is deterministic, service durations are lognormal. A node is kept
//! only while its makespan meets the global deadline with probability at
//! least `1 - epsilon`. Among nodes within `w` of the cheapest, the one with
//! the best estimate of makespan, conflict count and spread is expanded.

use crate::config::SolverConfig;
use crate::constraint::{TimeWindow, TIME_TOLERANCE};
use crate::instance::Instance;
use crate::plan::{self, Plans};
use crate::search::PlannedRoute;
use crate::stochastic::{fenton_wilkinson, max_approximation, LogNormal};
use rand::rngs::StdRng;
use rand::SeedableRng;
use super::{split, ConflictResolver, HighLevelNode, PlanContext, Resolution, Violation};

/// Weight of the summed completion spread in the focal estimate.
const SPREAD_WEIGHT: f64 = 0.1;

/// Deterministic travel plus one lognormal per served task.
fn completion_terms(instance: &Instance, route: &PlannedRoute) -> Vec<LogNormal> {
    let mut terms = Vec::new();
    let mut service_mean = 0.0;
    for visit in &route.visits {
        let Some(task) = visit.task.and_then(|t| instance.task(t)) else {
            continue;
        };
        service_mean += task.service_sec();
        terms.push(LogNormal::from_duration(&task.duration));
    }
    if terms.is_empty() {
        return terms;
    }
    let travel = (route.end_time - service_mean).max(0.0);
    terms.push(LogNormal::from_mean_std(travel, 0.0));
    terms
}

/// Completion time of one robot. `None` for robots serving no task.
pub fn completion_distribution(instance: &Instance, route: &PlannedRoute) -> Option<LogNormal> {
    fenton_wilkinson(&completion_terms(instance, route))
}

pub fn makespan_distribution(instance: &Instance, plans: &Plans) -> Option<LogNormal> {
    let per_robot: Vec<LogNormal> = plans
        .values()
        .filter_map(|route| completion_distribution(instance, route))
        .collect();
    max_approximation(&per_robot)
}

/// Approximate `P(makespan <= deadline)`.
pub fn on_time_probability(instance: &Instance, plans: &Plans) -> f64 {
    let deadline = instance.deadline_sec + TIME_TOLERANCE;
    makespan_distribution(instance, plans).map_or(1.0, |d| d.cdf(deadline))
}

/// Sampled `P(makespan <= deadline)`.
pub fn monte_carlo_on_time(
    instance: &Instance,
    plans: &Plans,
    samples: usize,
    rng: &mut StdRng,
) -> f64 {
    if samples == 0 {
        return on_time_probability(instance, plans);
    }
    let robots: Vec<Vec<LogNormal>> = plans
        .values()
        .map(|route| completion_terms(instance, route))
        .filter(|terms| !terms.is_empty())
        .collect();
    let mut on_time = 0usize;
    for _ in 0..samples {
        let makespan = robots
            .iter()
            .map(|terms| terms.iter().map(|t| t.sample(rng)).sum::<f64>())
            .fold(0.0, f64::max);
        if makespan <= instance.deadline_sec + TIME_TOLERANCE {
            on_time += 1;
        }
    }
    on_time as f64 / samples as f64
}

#[derive(Debug, Clone, Copy)]
pub struct StochasticResolver {
    focal_weight: f64,
    epsilon: f64,
    samples: usize,
    seed: u64,
}

impl StochasticResolver {
    pub fn new(config: &SolverConfig) -> Self {
        Self {
            focal_weight: config.focal_weight.max(1.0),
            epsilon: config.deadline_epsilon.clamp(0.0, 1.0),
            samples: config.monte_carlo_samples,
            seed: config.seed,
        }
    }

    fn required(&self) -> f64 {
        1.0 - self.epsilon
    }
}

impl ConflictResolver for StochasticResolver {
    fn name(&self) -> &'static str {
        "STOCHASTIC-ECBS"
    }

    fn exact(&self) -> bool {
        false
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
            Violation::Energy(_) => Resolution::default(),
        }
    }

    fn prune(&self, ctx: &PlanContext<'_>, node: &HighLevelNode) -> bool {
        let p = on_time_probability(ctx.instance, &node.plans);
        if p + 1e-9 < self.required() {
            tracing::trace!("node {} on time with p={:.3}", node.id, p);
            return true;
        }
        false
    }

    fn accept_solution(&self, ctx: &PlanContext<'_>, node: &HighLevelNode) -> bool {
        let mut rng = StdRng::seed_from_u64(self.seed ^ node.id);
        let p = monte_carlo_on_time(ctx.instance, &node.plans, self.samples, &mut rng);
        // Allow three standard errors of sampling noise
        let n = self.samples.max(1) as f64;
        let noise = 3.0 * (self.epsilon * (1.0 - self.epsilon) / n).sqrt();
        let accepted = p + noise + 1e-9 >= self.required();
        if !accepted {
            tracing::debug!("node {} fails the sampled deadline check (p={:.3})", node.id, p);
        }
        accepted
    }

    fn focal_weight(&self) -> Option<f64> {
        Some(self.focal_weight)
    }

    fn focal_score(&self, ctx: &PlanContext<'_>, node: &HighLevelNode) -> Option<f64> {
        if on_time_probability(ctx.instance, &node.plans) + 1e-9 < self.required() {
            return None;
        }
        let spread: f64 = node
            .plans
            .values()
            .filter_map(|route| completion_distribution(ctx.instance, route))
            .map(|d| d.std_dev())
            .sum();
        Some(plan::makespan(&node.plans) + ctx.conflict_count(node) as f64 + SPREAD_WEIGHT * spread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbs::CbsSolver;
    use crate::error::SolveError;
    use crate::robot::{Robot, RobotId, RobotKind};
    use crate::search::Visit;
    use crate::solution::{Assignment, TimedVertex};
    use crate::task::{Task, TaskDuration, TaskId, TaskType};
    use crate::workspace::{Edge, Pos, Vertex, VertexId, Workspace};

    fn route(task: u32, travel: f64, service: f64) -> PlannedRoute {
        PlannedRoute {
            path: vec![TimedVertex::new(0, 0.0), TimedVertex::new(1, travel)],
            visits: vec![Visit {
                goal: 0,
                vertex: VertexId(1),
                task: Some(TaskId(task)),
                start: travel,
                end: travel + service,
            }],
            end_time: travel + service,
        }
    }

    fn single(duration: TaskDuration, deadline: f64) -> Instance {
        let mut ws = Workspace::new();
        ws.add_vertex(Vertex::new(0, Pos::default()));
        ws.add_vertex(Vertex::new(1, Pos::new(1.0, 0.0, 0.0)));
        ws.add_edge(Edge::timed(0, 1, 10.0));
        let robots = vec![Robot::new(1, RobotKind::Planar, 0)];
        let tasks = vec![Task::new(1, TaskType::Clean, 1).with_duration(duration)];
        Instance::new(ws, robots, tasks, deadline)
    }

    #[test]
    fn fixed_durations_give_a_step_probability() {
        let plans = Plans::from([(RobotId(1), route(1, 10.0, 30.0))]);
        let early = single(TaskDuration::fixed(30.0), 40.0);
        assert_eq!(on_time_probability(&early, &plans), 1.0);
        let late = single(TaskDuration::fixed(30.0), 39.0);
        assert_eq!(on_time_probability(&late, &plans), 0.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(monte_carlo_on_time(&early, &plans, 50, &mut rng), 1.0);
    }

    #[test]
    fn spread_lowers_the_probability() {
        let plans = Plans::from([(RobotId(1), route(1, 10.0, 30.0))]);
        let noisy = single(
            TaskDuration {
                mean_sec: 30.0,
                std_sec: 10.0,
            },
            45.0,
        );
        let p = on_time_probability(&noisy, &plans);
        assert!(p > 0.5 && p < 1.0);
        let dist = makespan_distribution(&noisy, &plans).unwrap();
        assert!((dist.mean() - 40.0).abs() < 1e-6);
        let mut rng = StdRng::seed_from_u64(9);
        let sampled = monte_carlo_on_time(&noisy, &plans, 4000, &mut rng);
        assert!((sampled - p).abs() < 0.1);
    }

    #[test]
    fn hopeless_root_is_a_conservative_failure() {
        let inst = single(
            TaskDuration {
                mean_sec: 60.0,
                std_sec: 10.0,
            },
            50.0,
        );
        let config = SolverConfig::default();
        let err = CbsSolver::new(StochasticResolver::new(&config), config)
            .solve_with_assignment(&inst, Assignment::from([(TaskId(1), RobotId(1))]))
            .unwrap_err();
        assert!(matches!(err, SolveError::NoSolution { .. }));
    }

    #[test]
    fn comfortable_deadline_is_solved() {
        let inst = single(
            TaskDuration {
                mean_sec: 20.0,
                std_sec: 2.0,
            },
            100.0,
        );
        let config = SolverConfig::default();
        let solution = CbsSolver::new(StochasticResolver::new(&config), config)
            .solve_with_assignment(&inst, Assignment::from([(TaskId(1), RobotId(1))]))
            .unwrap();
        assert_eq!(solution.solver, "STOCHASTIC-ECBS");
        assert!(!solution.exact);
        assert_eq!(solution.makespan, 30.0);
    }
}
