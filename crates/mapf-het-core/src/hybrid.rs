//! HYBRID-CBS: plain CBS over a field-guided low level, followed by a pass
//! that shifts pass-through waypoints onto cheaper field vertices.

use crate::cbs::{CancelFlag, CbsSolver, StandardResolver};
use crate::config::{SolverConfig, SolverKind};
use crate::conflict::ConflictDetector;
use crate::constraint::TIME_TOLERANCE;
use crate::energy;
use crate::error::SolveResult;
use crate::heuristic::PotentialField;
use crate::instance::Instance;
use crate::robot::{Robot, RobotId};
use crate::search::Motion;
use crate::solution::{Assignment, Solution, TimedVertex};
use crate::trace::SearchTrace;
use crate::workspace::VertexId;
use std::collections::{BTreeMap, BTreeSet};

/// CBS with the potential field always in the low-level heuristic.
pub struct HybridSolver {
    config: SolverConfig,
    cancel: Option<CancelFlag>,
}

impl HybridSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config: SolverConfig {
                solver: SolverKind::Hybrid,
                ..config
            },
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Solves with CBS, then refines the paths against each robot's field.
    pub fn solve_traced(
        &self,
        instance: &Instance,
        assignment: Option<Assignment>,
        trace: &mut dyn SearchTrace,
    ) -> SolveResult<Solution> {
        let mut solver = CbsSolver::new(StandardResolver, self.config.clone());
        if let Some(cancel) = &self.cancel {
            solver = solver.with_cancel(cancel.clone());
        }
        let mut solution = solver.solve_traced(instance, assignment, trace)?;
        solution.solver = SolverKind::Hybrid.name().to_string();

        let fields: BTreeMap<RobotId, PotentialField> = instance
            .robots
            .iter()
            .map(|r| (r.id, PotentialField::for_robot(instance, r.id)))
            .collect();
        let exclusive = self.config.corridor_exclusive;
        let moved = refine_paths(instance, &mut solution, &fields, exclusive);
        tracing::debug!("HYBRID-CBS moved {} waypoints onto lower field cost", moved);
        Ok(solution)
    }
}

/// Replaces pass-through waypoints with a cheaper vertex on the field when
/// one connects the same neighbours in exactly the same times. Task
/// locations and pads stay put, and a swap that creates a conflict or an
/// energy violation is undone. Returns the number of waypoints moved.
pub fn refine_paths(
    instance: &Instance,
    solution: &mut Solution,
    fields: &BTreeMap<RobotId, PotentialField>,
    corridor_exclusive: bool,
) -> usize {
    let detector = ConflictDetector::for_instance(instance, corridor_exclusive);
    let robots: Vec<RobotId> = solution.paths.keys().copied().collect();
    let mut moved = 0;

    for id in robots {
        let (Some(robot), Some(field)) = (instance.robot(id), fields.get(&id)) else {
            continue;
        };
        let mut pinned: BTreeSet<VertexId> = solution
            .assignment
            .iter()
            .filter(|(_, owner)| **owner == id)
            .filter_map(|(task, _)| instance.task(*task).map(|t| t.location))
            .collect();
        pinned.extend(instance.airspace.pads().iter().copied());

        let len = solution.paths.get(&id).map_or(0, Vec::len);
        for i in 1..len.saturating_sub(1) {
            let Some(path) = solution.paths.get(&id) else {
                break;
            };
            let better = cheaper_waypoint(instance, robot, field, path, i, &pinned);
            let Some(better) = better else {
                continue;
            };
            let previous = path[i].vertex;
            set_vertex(solution, id, i, better);

            let conflict = detector
                .first_conflict(solution.paths.iter().map(|(r, p)| (*r, p.as_slice())))
                .is_some();
            let depleted = robot.tracks_energy()
                && solution
                    .paths
                    .get(&id)
                    .is_some_and(|p| energy::simulate(instance, robot, p).is_err());
            if conflict || depleted {
                set_vertex(solution, id, i, previous);
            } else {
                moved += 1;
            }
        }
    }
    moved
}

fn set_vertex(solution: &mut Solution, robot: RobotId, index: usize, vertex: VertexId) {
    if let Some(waypoint) = solution.paths.get_mut(&robot).and_then(|p| p.get_mut(index)) {
        waypoint.vertex = vertex;
    }
}

/// Lowest-cost substitute for `path[i]`, if any beats the current vertex.
fn cheaper_waypoint(
    instance: &Instance,
    robot: &Robot,
    field: &PotentialField,
    path: &[TimedVertex],
    i: usize,
    pinned: &BTreeSet<VertexId>,
) -> Option<VertexId> {
    let (prev, cur, next) = (path[i - 1], path[i], path[i + 1]);
    if prev.vertex == cur.vertex || cur.vertex == next.vertex || pinned.contains(&cur.vertex) {
        return None;
    }
    let workspace = &instance.workspace;
    let layer = workspace.layer_of(cur.vertex);
    let motion = Motion::for_robot(instance, robot);
    let same = |a: f64, b: f64| (a - b).abs() <= TIME_TOLERANCE;

    motion
        .moves(prev.vertex)
        .into_iter()
        .filter(|m| m.vertical.is_none() && m.to != cur.vertex && m.to != prev.vertex)
        .filter(|m| workspace.layer_of(m.to) == layer && same(m.duration, cur.time - prev.time))
        .filter(|m| {
            motion.moves(m.to).iter().any(|out| {
                out.to == next.vertex
                    && out.vertical.is_none()
                    && same(out.duration, next.time - cur.time)
            })
        })
        .map(|m| (field.value(m.to), m.to))
        .filter(|(cost, _)| *cost + 1e-9 < field.value(cur.vertex))
        .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
        .map(|(_, v)| v)
}
