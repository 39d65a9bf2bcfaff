//! Lower bounds on travel time used by the low-level search.

use crate::instance::Instance;
use crate::robot::{Robot, RobotId};
use crate::search::{FloatOrd, Motion};
use crate::workspace::VertexId;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

/// Shortest unconstrained travel time from every vertex to each goal
/// vertex a robot may be sent to, computed once per solve and shared
/// read-only by every replan.
#[derive(Debug, Clone, Default)]
pub struct HeuristicTables {
    // robot -> goal -> origin -> seconds
    tables: BTreeMap<RobotId, HashMap<VertexId, HashMap<VertexId, f64>>>,
}

impl HeuristicTables {
    /// Tabulates, per robot, the locations of tasks it can perform plus
    /// every charging pad for drones.
    pub fn build(instance: &Instance) -> Self {
        let mut tables = BTreeMap::new();
        for robot in &instance.robots {
            let mut targets: BTreeSet<VertexId> = instance
                .tasks
                .iter()
                .filter(|t| robot.can_perform(t.task_type))
                .map(|t| t.location)
                .collect();
            if robot.tracks_energy() {
                targets.extend(instance.airspace.pads().iter().copied());
            }
            let per_target = targets
                .into_iter()
                .map(|target| (target, travel_times_to(instance, robot, target)))
                .collect();
            tables.insert(robot.id, per_target);
        }
        tracing::debug!("Built heuristic tables for {} robots", tables.len());
        Self { tables }
    }

    /// Travel time lower bound from `from` to `to`. `None` when `to` is
    /// known to be unreachable; untabulated targets fall back to zero.
    pub fn travel_time(&self, robot: RobotId, from: VertexId, to: VertexId) -> Option<f64> {
        if from == to {
            return Some(0.0);
        }
        match self.tables.get(&robot).and_then(|t| t.get(&to)) {
            Some(origins) => origins.get(&from).copied(),
            None => Some(0.0),
        }
    }
}

/// Dijkstra outward from `target`. Moves are symmetric, so the result is
/// the travel time from each vertex to `target`.
fn travel_times_to(instance: &Instance, robot: &Robot, target: VertexId) -> HashMap<VertexId, f64> {
    let motion = Motion::for_robot(instance, robot);
    let mut dist: HashMap<VertexId, f64> = HashMap::new();
    let mut heap = BinaryHeap::new();
    dist.insert(target, 0.0);
    heap.push(Reverse((FloatOrd(0.0), target)));

    while let Some(Reverse((FloatOrd(d), v))) = heap.pop() {
        if d > dist.get(&v).copied().unwrap_or(f64::INFINITY) + 1e-12 {
            continue;
        }
        for step in motion.moves(v) {
            let next = d + step.duration;
            if next < dist.get(&step.to).copied().unwrap_or(f64::INFINITY) - 1e-12 {
                dist.insert(step.to, next);
                heap.push(Reverse((FloatOrd(next), step.to)));
            }
        }
    }
    dist
}

/// Relative pull of each term on the navigation score
const REPULSION_WEIGHT: f64 = 3.0;
const ATTRACTION_WEIGHT: f64 = 2.0;
const ALTITUDE_WEIGHT: f64 = 1.5;
const CHARGING_WEIGHT: f64 = 5.0;
/// Closer than this, a source counts as sitting on the vertex
const MIN_SOURCE_DISTANCE_M: f64 = 0.1;

/// Navigation field for one robot: a per-vertex cost in `[0, 1]`, zero where
/// the robot most wants to be.
///
/// The score behind it rewards vertices near the tasks the robot can
/// perform and penalizes vertices inside another robot's footprint. Drones
/// also favour higher layers and, on a low battery, the charging pads.
/// Added to the A* priority it steers a robot at the cost of admissibility.
#[derive(Debug, Clone, Default)]
pub struct PotentialField {
    values: HashMap<VertexId, f64>,
}

impl PotentialField {
    pub fn for_robot(instance: &Instance, robot: RobotId) -> Self {
        let Some(robot) = instance.robot(robot) else {
            return Self::default();
        };
        let workspace = &instance.workspace;

        let mut repulsion = HashMap::new();
        let mut attraction = HashMap::new();
        let mut altitude = HashMap::new();
        let mut charging = HashMap::new();
        for vertex in workspace.vertices() {
            let pushed: f64 = instance
                .robots
                .iter()
                .filter(|other| other.id != robot.id)
                .filter_map(|other| {
                    let src = workspace.vertex(other.start)?;
                    let radius = other.kind.footprint_radius_m();
                    Some((1.0 - vertex.pos.distance(&src.pos) / radius).max(0.0))
                })
                .sum();
            repulsion.insert(vertex.id, pushed);

            let pulled: f64 = instance
                .tasks
                .iter()
                .filter(|t| robot.can_perform(t.task_type))
                .filter_map(|t| {
                    let d = workspace.distance(vertex.id, t.location)?.max(MIN_SOURCE_DISTANCE_M);
                    Some(t.task_type.attraction() / (d * d))
                })
                .sum();
            attraction.insert(vertex.id, pulled);

            if robot.kind.is_aerial() {
                altitude.insert(vertex.id, vertex.layer.preference());
                let pads: f64 = instance
                    .airspace
                    .pads()
                    .iter()
                    .filter_map(|pad| workspace.distance(vertex.id, *pad))
                    .map(|d| 10.0 / d.max(MIN_SOURCE_DISTANCE_M))
                    .sum();
                charging.insert(vertex.id, pads);
            }
        }
        normalize(&mut repulsion);
        normalize(&mut attraction);
        normalize(&mut altitude);
        normalize(&mut charging);

        let low_battery = robot.battery.is_some_and(|b| b.is_low());
        let term = |map: &HashMap<VertexId, f64>, v: VertexId| map.get(&v).copied().unwrap_or(0.0);
        let mut values: HashMap<VertexId, f64> = workspace
            .vertices()
            .map(|v| {
                let mut score = ATTRACTION_WEIGHT * term(&attraction, v.id)
                    - REPULSION_WEIGHT * term(&repulsion, v.id)
                    + ALTITUDE_WEIGHT * term(&altitude, v.id);
                if low_battery {
                    score += CHARGING_WEIGHT * term(&charging, v.id);
                }
                // Flip so the best vertex costs nothing
                (v.id, -score)
            })
            .collect();
        normalize(&mut values);
        Self { values }
    }

    /// Field cost of standing on `vertex`; zero off the map.
    pub fn value(&self, vertex: VertexId) -> f64 {
        self.values.get(&vertex).copied().unwrap_or(0.0)
    }
}

/// Min-max scaling to `[0, 1]`. A flat field becomes all zeros.
fn normalize(values: &mut HashMap<VertexId, f64>) {
    let (lo, hi) = values
        .values()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let range = hi - lo;
    for value in values.values_mut() {
        *value = if range < 1e-3 { 0.0 } else { (*value - lo) / range };
    }
}
