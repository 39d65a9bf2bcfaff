//! Single-robot space-time A*.
//!
//! States are `(vertex, next goal, time)` plus remaining charge for drones.
//! Cost is elapsed time, so a state's `g` is fixed by its time and the
//! closed set only has to compare remaining energy. Every action (move,
//! wait, serve, climb, descend) is checked against the robot's constraints
//! over its full interval.

mod aerial;
mod ground;

pub use aerial::AerialMotion;
pub use ground::GroundMotion;

use crate::airspace::CorridorId;
use crate::config::SolverConfig;
use crate::constraint::{ConstraintSet, TIME_TOLERANCE};
use crate::energy::{is_charging_pad, segment_energy_wh};
use crate::heuristic::{HeuristicTables, PotentialField};
use crate::instance::Instance;
use crate::robot::Robot;
use crate::solution::{Path, TimedVertex};
use crate::task::TaskId;
use crate::workspace::VertexId;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

const ENERGY_EPSILON_WH: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
pub(crate) struct FloatOrd(pub f64);

impl PartialEq for FloatOrd {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatOrd {}

impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// How the low level treats drone energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyMode {
    /// Drop transitions that would deplete the battery
    #[default]
    Prune,
    /// Plan on time alone; depletion is repaired by the caller
    Ignore,
}

/// One stop on a robot's route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub vertex: VertexId,
    /// Dwell time once standing on `vertex`
    pub service_sec: f64,
    /// Service may not start earlier
    pub release: f64,
    /// Service may not start later
    pub latest_start: Option<f64>,
    /// `None` for charging stops
    pub task: Option<TaskId>,
}

impl Goal {
    pub fn task(task: TaskId, vertex: VertexId, service_sec: f64) -> Self {
        Self {
            vertex,
            service_sec,
            release: 0.0,
            latest_start: None,
            task: Some(task),
        }
    }

    /// Reach `pad` no later than `by` and dwell there for `dwell_sec`.
    pub fn charge(pad: VertexId, by: f64, dwell_sec: f64) -> Self {
        Self {
            vertex: pad,
            service_sec: dwell_sec,
            release: 0.0,
            latest_start: Some(by),
            task: None,
        }
    }

    pub fn released_at(mut self, release: f64) -> Self {
        self.release = release;
        self
    }
}

/// A goal served along a planned path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    pub goal: usize,
    pub vertex: VertexId,
    pub task: Option<TaskId>,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlannedRoute {
    pub path: Path,
    pub visits: Vec<Visit>,
    /// Instant the robot comes to rest for good
    pub end_time: f64,
}

impl PlannedRoute {
    /// Route that never leaves `start`.
    pub fn stationary(start: VertexId, time: f64) -> Self {
        Self {
            path: vec![TimedVertex { vertex: start, time }],
            visits: Vec::new(),
            end_time: time,
        }
    }

    pub fn task_start(&self, task: TaskId) -> Option<f64> {
        self.visits
            .iter()
            .find(|v| v.task == Some(task))
            .map(|v| v.start)
    }

    pub fn task_end(&self, task: TaskId) -> Option<f64> {
        self.visits
            .iter()
            .find(|v| v.task == Some(task))
            .map(|v| v.end)
    }

    /// Completion of the last task served, zero when none.
    pub fn completion(&self) -> f64 {
        self.visits
            .iter()
            .filter(|v| v.task.is_some())
            .map(|v| v.end)
            .fold(0.0, f64::max)
    }
}

/// Candidate transition out of a vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Move {
    pub to: VertexId,
    pub duration: f64,
    /// Corridor traversed by a climb or descent
    pub vertical: Option<CorridorId>,
}

/// Movement rules for one robot kind.
#[derive(Debug, Clone, Copy)]
pub enum Motion<'a> {
    Ground(GroundMotion<'a>),
    Aerial(AerialMotion<'a>),
}

impl<'a> Motion<'a> {
    pub fn for_robot(instance: &'a Instance, robot: &'a Robot) -> Self {
        if robot.kind.is_aerial() {
            Motion::Aerial(AerialMotion::new(&instance.workspace, &instance.airspace, robot))
        } else {
            Motion::Ground(GroundMotion::new(&instance.workspace, robot))
        }
    }

    pub fn moves(&self, from: VertexId) -> Vec<Move> {
        match self {
            Motion::Ground(m) => m.moves(from),
            Motion::Aerial(m) => m.moves(from),
        }
    }

    pub fn corridor_at(&self, vertex: VertexId) -> Option<CorridorId> {
        match self {
            Motion::Ground(_) => None,
            Motion::Aerial(m) => m.corridor_at(vertex),
        }
    }
}

/// One low-level query.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    pub robot: &'a Robot,
    pub start_time: f64,
    /// Visited in order
    pub goals: &'a [Goal],
    pub constraints: &'a ConstraintSet,
    pub energy: EnergyMode,
    pub field: Option<(&'a PotentialField, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct StateKey {
    vertex: VertexId,
    goal: usize,
    tick: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    Start,
    Wait,
    Move,
    Serve(usize),
}

#[derive(Debug, Clone, Copy)]
struct SearchNode {
    vertex: VertexId,
    goal: usize,
    time: f64,
    energy: f64,
    parent: Option<usize>,
    step: Step,
}

impl SearchNode {
    fn key(&self) -> StateKey {
        StateKey {
            vertex: self.vertex,
            goal: self.goal,
            tick: (self.time * 1000.0).round() as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenNode {
    f_score: FloatOrd,
    g_score: FloatOrd,
    idx: usize,
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Later states first among equal f: they are closer to a goal
        self.f_score
            .cmp(&other.f_score)
            .then_with(|| other.g_score.cmp(&self.g_score))
            .then_with(|| self.idx.cmp(&other.idx))
    }
}

struct Frontier {
    nodes: Vec<SearchNode>,
    open: BinaryHeap<Reverse<OpenNode>>,
    best: HashMap<StateKey, f64>,
}

impl Frontier {
    fn is_dominated(&self, node: &SearchNode) -> bool {
        self.best
            .get(&node.key())
            .is_some_and(|e| *e >= node.energy - ENERGY_EPSILON_WH)
    }

    fn push(&mut self, node: SearchNode, g: f64, f: f64) {
        self.best.insert(node.key(), node.energy);
        let idx = self.nodes.len();
        self.nodes.push(node);
        self.open.push(Reverse(OpenNode {
            f_score: FloatOrd(f),
            g_score: FloatOrd(g),
            idx,
        }));
    }
}

/// Space-time A* shared by every robot kind. Immutable and `Sync`, so
/// parallel high-level workers call it concurrently.
#[derive(Debug, Clone, Copy)]
pub struct SpaceTimeSearch<'a> {
    instance: &'a Instance,
    tables: &'a HeuristicTables,
    horizon_sec: f64,
    wait_step_sec: f64,
    max_expansions: usize,
}

impl<'a> SpaceTimeSearch<'a> {
    pub fn new(instance: &'a Instance, tables: &'a HeuristicTables, config: &SolverConfig) -> Self {
        Self {
            instance,
            tables,
            horizon_sec: config.horizon_sec,
            wait_step_sec: config.wait_step_sec.max(TIME_TOLERANCE * 10.0),
            max_expansions: config.low_level_expansions,
        }
    }

    /// Earliest route through every goal in order that ends at rest on a
    /// vertex no later constraint touches. `None` when no such route exists
    /// within the horizon and expansion budget.
    pub fn plan(&self, request: &SearchRequest<'_>) -> Option<PlannedRoute> {
        let robot = request.robot;
        let workspace = &self.instance.workspace;
        let motion = Motion::for_robot(self.instance, robot);
        let constraints = request.constraints;
        let goals = request.goals;
        let t0 = request.start_time;
        let deadline = t0 + self.horizon_sec;
        let tracks_energy = robot.tracks_energy() && request.energy == EnergyMode::Prune;
        let capacity = robot.capacity_wh();

        let start = robot.start;
        if constraints.blocks_stay(start, t0, t0)
            || self.corridor_blocked(&motion, constraints, start, t0, t0)
        {
            return None;
        }
        let start_energy = if !tracks_energy {
            0.0
        } else if is_charging_pad(workspace, start) {
            capacity
        } else {
            robot.initial_charge_wh()
        };

        let h0 = self.heuristic(robot, goals, start, 0, t0)?;
        let mut frontier = Frontier {
            nodes: Vec::new(),
            open: BinaryHeap::new(),
            best: HashMap::new(),
        };
        frontier.push(
            SearchNode {
                vertex: start,
                goal: 0,
                time: t0,
                energy: start_energy,
                parent: None,
                step: Step::Start,
            },
            0.0,
            h0 + self.field_term(request, start),
        );

        let mut expansions = 0usize;
        while let Some(Reverse(open_node)) = frontier.open.pop() {
            let node = frontier.nodes[open_node.idx];
            if frontier
                .best
                .get(&node.key())
                .is_some_and(|e| *e > node.energy + ENERGY_EPSILON_WH)
            {
                continue;
            }

            expansions += 1;
            if expansions > self.max_expansions {
                tracing::debug!(
                    "Low-level search for {} hit the expansion cap ({})",
                    robot.id,
                    self.max_expansions
                );
                return None;
            }

            if node.goal == goals.len()
                && self.can_rest(&motion, constraints, node.vertex, node.time)
            {
                return Some(self.reconstruct(&frontier.nodes, open_node.idx, goals));
            }

            let mut children = Vec::new();

            // Serve the current goal
            if let Some(goal) = goals.get(node.goal) {
                let on_time = goal.latest_start.map_or(true, |l| node.time <= l + TIME_TOLERANCE);
                let released = node.time >= goal.release - TIME_TOLERANCE;
                if node.vertex == goal.vertex && released && on_time {
                    let end = node.time + goal.service_sec;
                    if !constraints.blocks_stay(node.vertex, node.time, end)
                        && !self.corridor_blocked(&motion, constraints, node.vertex, node.time, end)
                    {
                        children.push((node.vertex, node.goal + 1, end, Step::Serve(node.goal)));
                    }
                }
            }

            // Wait, stopping exactly at the release time when one is pending here
            let mut wait = self.wait_step_sec;
            if let Some(goal) = goals.get(node.goal) {
                if goal.vertex == node.vertex && goal.release > node.time + TIME_TOLERANCE {
                    wait = wait.min(goal.release - node.time);
                }
            }
            let wait_end = node.time + wait;
            if !constraints.blocks_stay(node.vertex, node.time, wait_end)
                && !self.corridor_blocked(&motion, constraints, node.vertex, node.time, wait_end)
            {
                children.push((node.vertex, node.goal, wait_end, Step::Wait));
            }

            for step in motion.moves(node.vertex) {
                let arrive = node.time + step.duration;
                if constraints.blocks_traversal(node.vertex, step.to, node.time, arrive)
                    || constraints.blocks_stay(step.to, arrive, arrive)
                {
                    continue;
                }
                let corridor_ok = match step.vertical {
                    Some(c) => !constraints.blocks_corridor(c, node.time, arrive),
                    None => !self.corridor_blocked(&motion, constraints, step.to, arrive, arrive),
                };
                if corridor_ok {
                    children.push((step.to, node.goal, arrive, Step::Move));
                }
            }

            for (vertex, goal, time, step) in children {
                if time > deadline + TIME_TOLERANCE {
                    continue;
                }
                let mut energy = node.energy;
                if tracks_energy {
                    energy -= segment_energy_wh(workspace, node.vertex, vertex, time - node.time);
                    if energy < -ENERGY_EPSILON_WH {
                        continue;
                    }
                    energy = energy.max(0.0);
                    if vertex != node.vertex && is_charging_pad(workspace, vertex) {
                        energy = capacity;
                    }
                }
                let child = SearchNode {
                    vertex,
                    goal,
                    time,
                    energy,
                    parent: Some(open_node.idx),
                    step,
                };
                if frontier.is_dominated(&child) {
                    continue;
                }
                let Some(h) = self.heuristic(robot, goals, vertex, goal, time) else {
                    continue;
                };
                let g = time - t0;
                frontier.push(child, g, g + h + self.field_term(request, vertex));
            }
        }

        None
    }

    /// Lower bound on the time left to serve `goals[next..]` from `vertex`.
    /// `None` when a goal is unreachable or its latest start cannot be met.
    fn heuristic(
        &self,
        robot: &Robot,
        goals: &[Goal],
        vertex: VertexId,
        next: usize,
        time: f64,
    ) -> Option<f64> {
        let mut clock = time;
        let mut at = vertex;
        for goal in goals.get(next..).unwrap_or(&[]) {
            let travel = self.tables.travel_time(robot.id, at, goal.vertex)?;
            clock = (clock + travel).max(goal.release);
            if goal.latest_start.is_some_and(|l| clock > l + TIME_TOLERANCE) {
                return None;
            }
            clock += goal.service_sec;
            at = goal.vertex;
        }
        Some(clock - time)
    }

    fn field_term(&self, request: &SearchRequest<'_>, vertex: VertexId) -> f64 {
        request
            .field
            .map_or(0.0, |(field, weight)| weight * field.value(vertex))
    }

    fn corridor_blocked(
        &self,
        motion: &Motion<'_>,
        constraints: &ConstraintSet,
        vertex: VertexId,
        start: f64,
        end: f64,
    ) -> bool {
        motion
            .corridor_at(vertex)
            .is_some_and(|c| constraints.blocks_corridor(c, start, end))
    }

    /// Resting at `vertex` from `time` on is safe only if every constraint
    /// on it (and on the corridor it belongs to) has already expired.
    fn can_rest(
        &self,
        motion: &Motion<'_>,
        constraints: &ConstraintSet,
        vertex: VertexId,
        time: f64,
    ) -> bool {
        let vertex_free = constraints
            .last_vertex_block(vertex)
            .map_or(true, |end| end < time - TIME_TOLERANCE);
        let corridor_free = motion.corridor_at(vertex).map_or(true, |c| {
            constraints
                .last_corridor_block(c)
                .map_or(true, |end| end < time - TIME_TOLERANCE)
        });
        vertex_free && corridor_free
    }

    fn reconstruct(&self, nodes: &[SearchNode], last: usize, goals: &[Goal]) -> PlannedRoute {
        let mut chain = Vec::new();
        let mut cursor = Some(last);
        while let Some(idx) = cursor {
            chain.push(idx);
            cursor = nodes[idx].parent;
        }
        chain.reverse();

        let mut samples: Vec<TimedVertex> = Vec::new();
        let mut visits = Vec::new();
        for (pos, &idx) in chain.iter().enumerate() {
            let node = nodes[idx];
            if let Step::Serve(goal) = node.step {
                let start = pos
                    .checked_sub(1)
                    .map(|p| nodes[chain[p]].time)
                    .unwrap_or(node.time);
                visits.push(Visit {
                    goal,
                    vertex: node.vertex,
                    task: goals.get(goal).and_then(|g| g.task),
                    start,
                    end: node.time,
                });
            }
            let duplicate = samples
                .last()
                .is_some_and(|s| s.vertex == node.vertex && (s.time - node.time).abs() < 1e-9);
            if !duplicate {
                samples.push(TimedVertex {
                    vertex: node.vertex,
                    time: node.time,
                });
            }
        }

        let path = compress_waits(samples);
        let end_time = path.last().map(|tv| tv.time).unwrap_or(0.0);
        PlannedRoute {
            path,
            visits,
            end_time,
        }
    }
}

/// Keep only the first and last sample of every run at the same vertex.
fn compress_waits(samples: Vec<TimedVertex>) -> Path {
    let mut path: Path = Vec::with_capacity(samples.len());
    for sample in samples {
        let len = path.len();
        let waiting = len >= 2 && path[len - 2].vertex == sample.vertex;
        if waiting && path[len - 1].vertex == sample.vertex {
            path[len - 1] = sample;
        } else {
            path.push(sample);
        }
    }
    path
}
