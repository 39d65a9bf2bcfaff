//! MIXED-CBS: conflict resolution by the pair of robot kinds involved.
//!
//! Rails cannot pass each other inside a segment, so the robot that entered
//! later yields until the segment clears. Drones sharing a corridor are
//! serialized the same way. Mixed ground traffic and air/ground encounters
//! are split with a time buffer around the meeting instant.

use crate::config::SolverConfig;
use crate::conflict::{occupancy, Conflict, ConflictKind};
use crate::constraint::{Constraint, TimeWindow, TIME_TOLERANCE};
use crate::instance::Instance;
use crate::robot::{RobotId, RobotKind};
use crate::solution::TimedVertex;
use crate::workspace::{VertexId, Workspace};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use super::{split, Branch, ConflictResolver, HighLevelNode, PlanContext, Resolution, Violation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictClass {
    /// Two rail robots
    Linear,
    /// Two planar robots
    Planar,
    /// Two drones on one layer
    Aerial,
    /// Rail and planar robots
    Crossing,
    /// A drone and a ground robot
    AirGround,
    /// Two drones inside one corridor
    Vertical,
}

pub fn classify(instance: &Instance, conflict: &Conflict) -> ConflictClass {
    if matches!(conflict.kind, ConflictKind::Corridor { .. }) {
        return ConflictClass::Vertical;
    }
    let (Some(a), Some(b)) = (
        instance.robot_kind(conflict.first),
        instance.robot_kind(conflict.second),
    ) else {
        return ConflictClass::Planar;
    };
    match (a, b) {
        (RobotKind::Rail, RobotKind::Rail) => ConflictClass::Linear,
        (RobotKind::Planar, RobotKind::Planar) => ConflictClass::Planar,
        (RobotKind::Aerial, RobotKind::Aerial) => ConflictClass::Aerial,
        (RobotKind::Aerial, _) | (_, RobotKind::Aerial) => ConflictClass::AirGround,
        _ => ConflictClass::Crossing,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(pub u32);

/// Stretch of track between junctions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RailSegment {
    pub id: SegmentId,
    pub vertices: Vec<VertexId>,
    /// Junctions bounding the segment
    pub junctions: Vec<VertexId>,
}

/// Rail-restricted vertices grouped into segments. A vertex with three or
/// more rail neighbors is a junction and belongs to no segment.
#[derive(Debug, Clone, Default)]
pub struct RailNetwork {
    segments: Vec<RailSegment>,
    index: HashMap<VertexId, SegmentId>,
}

fn is_rail(workspace: &Workspace, vertex: VertexId) -> bool {
    workspace
        .vertex(vertex)
        .is_some_and(|v| !v.allowed.is_empty() && v.allowed.iter().all(|k| *k == RobotKind::Rail))
}

impl RailNetwork {
    pub fn build(workspace: &Workspace) -> Self {
        let rail: BTreeSet<VertexId> = workspace
            .vertices()
            .map(|v| v.id)
            .filter(|v| is_rail(workspace, *v))
            .collect();
        let rail_neighbors = |v: VertexId| -> Vec<VertexId> {
            let mut ns: Vec<VertexId> =
                workspace.neighbors(v).filter(|n| rail.contains(n)).collect();
            ns.sort();
            ns.dedup();
            ns
        };
        let junction = |v: VertexId| rail_neighbors(v).len() >= 3;

        let mut network = RailNetwork::default();
        for &start in &rail {
            if junction(start) || network.index.contains_key(&start) {
                continue;
            }
            let id = SegmentId(network.segments.len() as u32);
            let mut vertices = Vec::new();
            let mut junctions = BTreeSet::new();
            let mut stack = vec![start];
            network.index.insert(start, id);
            while let Some(v) = stack.pop() {
                vertices.push(v);
                for n in rail_neighbors(v) {
                    if junction(n) {
                        junctions.insert(n);
                    } else if !network.index.contains_key(&n) {
                        network.index.insert(n, id);
                        stack.push(n);
                    }
                }
            }
            vertices.sort();
            network.segments.push(RailSegment {
                id,
                vertices,
                junctions: junctions.into_iter().collect(),
            });
        }

        tracing::debug!("Rail network: {} segments", network.segments.len());
        network
    }

    pub fn segments(&self) -> &[RailSegment] {
        &self.segments
    }

    pub fn segment(&self, id: SegmentId) -> Option<&RailSegment> {
        self.segments.get(id.0 as usize)
    }

    pub fn segment_of(&self, vertex: VertexId) -> Option<SegmentId> {
        self.index.get(&vertex).copied()
    }

    pub fn is_junction(&self, workspace: &Workspace, vertex: VertexId) -> bool {
        is_rail(workspace, vertex) && !self.index.contains_key(&vertex)
    }

    /// Segment holding the conflict location.
    fn segment_at(&self, kind: &ConflictKind) -> Option<SegmentId> {
        match *kind {
            ConflictKind::Vertex { vertex } => self.segment_of(vertex),
            ConflictKind::Edge { from, to } => {
                self.segment_of(from).or_else(|| self.segment_of(to))
            }
            ConflictKind::Corridor { .. } => None,
        }
    }
}

/// Time a robot spends inside a set of vertices around `t`: from leaving
/// the last vertex outside the set to arriving at the next one. Also returns
/// the departure from the last vertex of the run. Both ends are infinite
/// when the robot never leaves.
fn occupancy_run(
    path: &[TimedVertex],
    members: &BTreeSet<VertexId>,
    t: f64,
) -> Option<(TimeWindow, f64)> {
    let (stays, _) = occupancy(path);
    let mut i = 0;
    while i < stays.len() {
        if !members.contains(&stays[i].vertex) {
            i += 1;
            continue;
        }
        let first = i;
        while i < stays.len() && members.contains(&stays[i].vertex) {
            i += 1;
        }
        let enter = if first > 0 {
            stays[first - 1].depart
        } else {
            stays[first].arrive
        };
        let exit = stays.get(i).map_or(f64::INFINITY, |next| next.arrive);
        if enter <= t + TIME_TOLERANCE && t <= exit + TIME_TOLERANCE {
            return Some((TimeWindow::new(enter, exit), stays[i - 1].depart));
        }
    }
    None
}

/// Orders the two robots by entry time, lower id first on ties.
fn earlier_later(
    a: (RobotId, TimeWindow),
    b: (RobotId, TimeWindow),
) -> ((RobotId, TimeWindow), (RobotId, TimeWindow)) {
    if b.1.start + TIME_TOLERANCE < a.1.start {
        (b, a)
    } else {
        (a, b)
    }
}

#[derive(Debug, Clone)]
pub struct MixedResolver {
    rails: RailNetwork,
    crossing_buffer_sec: f64,
}

impl MixedResolver {
    pub fn new(workspace: &Workspace, config: &SolverConfig) -> Self {
        Self {
            rails: RailNetwork::build(workspace),
            crossing_buffer_sec: config.crossing_buffer_sec.max(0.0),
        }
    }

    pub fn rails(&self) -> &RailNetwork {
        &self.rails
    }

    /// The robot that entered the segment later stays off it and off its
    /// bounding junctions until the earlier one has left the junction it
    /// heads for. Without the junction the later robot could park on it and
    /// turn the head-on meeting into a vertex conflict.
    fn linear(&self, node: &HighLevelNode, conflict: &Conflict) -> Option<Branch> {
        let segment = self.rails.segment(self.rails.segment_at(&conflict.kind)?)?;
        let members: BTreeSet<VertexId> = segment.vertices.iter().copied().collect();
        let (first, _) = occupancy_run(node.path(conflict.first)?, &members, conflict.time)?;
        let (second, _) = occupancy_run(node.path(conflict.second)?, &members, conflict.time)?;
        let ((early_robot, early), (late, _)) =
            earlier_later((conflict.first, first), (conflict.second, second));

        let mut guarded = members;
        guarded.extend(segment.junctions.iter().copied());
        let (_, released) = occupancy_run(node.path(early_robot)?, &guarded, conflict.time)?;
        let end = released.max(early.end);
        if !end.is_finite() {
            return None;
        }
        let window = TimeWindow::new(early.start, end);
        let constraints = guarded
            .iter()
            .map(|v| Constraint::vertex(late, *v, window))
            .collect();
        Some(Branch::constrain(late, constraints))
    }

    fn vertical(&self, conflict: &Conflict) -> Option<Branch> {
        let ConflictKind::Corridor { corridor } = conflict.kind else {
            return None;
        };
        let ((_, early), (late, _)) = earlier_later(
            (conflict.first, conflict.first_interval),
            (conflict.second, conflict.second_interval),
        );
        if !early.end.is_finite() {
            return None;
        }
        Some(Branch::constrain(
            late,
            vec![Constraint::corridor(late, corridor, early)],
        ))
    }
}

impl ConflictResolver for MixedResolver {
    fn name(&self) -> &'static str {
        "MIXED-CBS"
    }

    // Single-child resolutions commit to one ordering
    fn exact(&self) -> bool {
        false
    }

    fn select(&self, ctx: &PlanContext<'_>, node: &HighLevelNode) -> Option<Violation> {
        ctx.first_conflict(node).map(Violation::Conflict)
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
        let generic = split(conflict, TimeWindow::point(conflict.time));
        let class = classify(ctx.instance, conflict);
        tracing::trace!("{:?} conflict: {}", class, conflict);

        let single = match class {
            ConflictClass::Linear => self.linear(node, conflict),
            ConflictClass::Vertical => self.vertical(conflict),
            ConflictClass::Crossing | ConflictClass::AirGround => {
                return split(conflict, TimeWindow::around(conflict.time, self.crossing_buffer_sec))
                    .with_fallback(generic.branches);
            }
            ConflictClass::Planar | ConflictClass::Aerial => None,
        };
        match single {
            Some(branch) => Resolution::new(vec![branch]).with_fallback(generic.branches),
            None => generic,
        }
    }
}

/// Conflicts per class, for reporting.
pub fn class_histogram(instance: &Instance, conflicts: &[Conflict]) -> BTreeMap<String, usize> {
    let mut histogram = BTreeMap::new();
    for conflict in conflicts {
        *histogram
            .entry(format!("{:?}", classify(instance, conflict)))
            .or_insert(0) += 1;
    }
    histogram
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::airspace::Layer;
    use crate::cbs::{CbsSolver, StandardResolver};
    use crate::conflict::ConflictDetector;
    use crate::robot::Robot;
    use crate::solution::Assignment;
    use crate::task::{Task, TaskDuration, TaskId, TaskType};
    use crate::workspace::{Edge, Pos, Vertex};

    fn rail(id: u32, x: f64, y: f64) -> Vertex {
        Vertex::new(id, Pos::new(x, y, 0.0)).restricted_to(&[RobotKind::Rail])
    }

    /// Track with a junction at 2:
    ///
    /// ```text
    /// 0 - 1 - 2 - 3 - 4
    ///         |
    ///         5
    /// ```
    fn track() -> Workspace {
        let mut ws = Workspace::new();
        for i in 0..5 {
            ws.add_vertex(rail(i, i as f64, 0.0));
        }
        ws.add_vertex(rail(5, 2.0, -1.0));
        for i in 0..4 {
            ws.add_edge(Edge::timed(i, i + 1, 1.0));
        }
        ws.add_edge(Edge::timed(2, 5, 1.0));
        ws
    }

    fn conflict_between(first: u32, second: u32, kind: ConflictKind) -> Conflict {
        Conflict {
            first: RobotId(first),
            second: RobotId(second),
            kind,
            time: 1.0,
            first_interval: TimeWindow::new(0.0, 2.0),
            second_interval: TimeWindow::new(1.0, 3.0),
        }
    }

    #[test]
    fn segments_are_bounded_by_junctions() {
        let ws = track();
        let rails = RailNetwork::build(&ws);
        assert_eq!(rails.segments().len(), 3);
        assert_eq!(rails.segment_of(VertexId(2)), None);
        assert!(rails.is_junction(&ws, VertexId(2)));
        let right = rails.segment_of(VertexId(3)).unwrap();
        assert_eq!(rails.segment_of(VertexId(4)), Some(right));
        let segment = rails.segment(right).unwrap();
        assert_eq!(segment.vertices, vec![VertexId(3), VertexId(4)]);
        assert_eq!(segment.junctions, vec![VertexId(2)]);
    }

    #[test]
    fn robot_kinds_pick_the_class() {
        let mut ws = track();
        ws.add_vertex(Vertex::new(6, Pos::new(9.0, 9.0, 0.0)));
        ws.add_vertex(Vertex::new(7, Pos::new(9.0, 8.0, 0.0)).with_pad());
        let robots = vec![
            Robot::new(1, RobotKind::Rail, 0),
            Robot::new(2, RobotKind::Rail, 4),
            Robot::new(3, RobotKind::Planar, 6),
            Robot::drone(4, 7, 7, 50.0),
        ];
        let inst = Instance::new(ws, robots, Vec::new(), 100.0);
        let at = ConflictKind::Vertex { vertex: VertexId(1) };
        assert_eq!(classify(&inst, &conflict_between(1, 2, at)), ConflictClass::Linear);
        assert_eq!(classify(&inst, &conflict_between(1, 3, at)), ConflictClass::Crossing);
        assert_eq!(classify(&inst, &conflict_between(3, 4, at)), ConflictClass::AirGround);
        let corridor = ConflictKind::Corridor {
            corridor: crate::airspace::CorridorId(0),
        };
        assert_eq!(classify(&inst, &conflict_between(4, 4, corridor)), ConflictClass::Vertical);
        let conflicts = [conflict_between(1, 2, at), conflict_between(2, 1, at)];
        let histogram = class_histogram(&inst, &conflicts);
        assert_eq!(histogram["Linear"], 2);
    }

    #[test]
    fn run_spans_entry_and_exit_edges() {
        let members = BTreeSet::from([VertexId(0), VertexId(1)]);
        let path = vec![
            TimedVertex::new(2, 0.0),
            TimedVertex::new(1, 1.0),
            TimedVertex::new(1, 3.0),
            TimedVertex::new(0, 4.0),
            TimedVertex::new(1, 5.0),
            TimedVertex::new(2, 6.0),
        ];
        assert_eq!(
            occupancy_run(&path, &members, 3.5),
            Some((TimeWindow::new(0.0, 6.0), 5.0))
        );
        let parked = vec![TimedVertex::new(2, 0.0), TimedVertex::new(1, 1.0)];
        let (run, released) = occupancy_run(&parked, &members, 10.0).unwrap();
        assert!(run.end.is_infinite() && released.is_infinite());
        assert_eq!(occupancy_run(&parked, &members, 0.0).map(|(w, _)| w.start), Some(0.0));
    }

    #[test]
    fn head_on_rails_resolve_through_the_junction() {
        let ws = track();
        let robots = vec![
            Robot::new(1, RobotKind::Rail, 0),
            Robot::new(2, RobotKind::Rail, 5),
        ];
        let tasks = vec![
            Task::new(1, TaskType::SwapBattery, 4).with_duration(TaskDuration::fixed(0.0)),
            Task::new(2, TaskType::SwapBattery, 0).with_duration(TaskDuration::fixed(0.0)),
        ];
        let inst = Instance::new(ws, robots, tasks, 100.0);
        let assignment = Assignment::from([(TaskId(1), RobotId(1)), (TaskId(2), RobotId(2))]);
        let config = SolverConfig::default();
        let solution = CbsSolver::new(MixedResolver::new(&inst.workspace, &config), config.clone())
            .solve_with_assignment(&inst, assignment.clone())
            .unwrap();

        assert_eq!(solution.solver, "MIXED-CBS");
        assert!(!solution.exact);
        let detector = ConflictDetector::for_instance(&inst, true);
        let paths: Vec<_> = solution.paths.iter().map(|(id, p)| (*id, p.as_slice())).collect();
        assert!(detector.first_conflict(paths).is_none());
        // Robot 2 holds at 5 until robot 1 has passed the junction at t=2
        let waiting = &solution.paths[&RobotId(2)];
        assert!(waiting.iter().all(|tv| tv.vertex != VertexId(2) || tv.time > 2.0));
        assert_eq!(solution.makespan, 5.0);
        // A single yield suffices; no point splits along the track
        assert!(solution.stats.nodes_expanded <= 3);

        let exact = CbsSolver::new(StandardResolver, config)
            .solve_with_assignment(&inst, assignment)
            .unwrap();
        assert_eq!(solution.makespan, exact.makespan);
    }

    /// One corridor over a shared pad, two work-layer targets beside it.
    fn corridor_field() -> Instance {
        let mut ws = Workspace::new();
        ws.add_vertex(Vertex::new(0, Pos::default()).with_pad().shared());
        ws.add_vertex(Vertex::aerial(1, 0.0, 0.0, Layer::Handoff).with_corridor());
        ws.add_vertex(Vertex::aerial(2, 0.0, 0.0, Layer::Work).with_corridor());
        ws.add_vertex(Vertex::aerial(3, 10.0, 0.0, Layer::Work));
        ws.add_vertex(Vertex::aerial(4, -10.0, 0.0, Layer::Work));
        ws.add_edge(Edge::timed(2, 3, 2.0));
        ws.add_edge(Edge::timed(2, 4, 2.0));
        let robots = vec![Robot::drone(1, 0, 0, 50.0), Robot::drone(2, 0, 0, 50.0)];
        let tasks = vec![
            Task::new(1, TaskType::AerialInspect, 3).with_duration(TaskDuration::fixed(0.0)),
            Task::new(2, TaskType::AerialInspect, 4).with_duration(TaskDuration::fixed(0.0)),
        ];
        Instance::new(ws, robots, tasks, 100.0)
    }

    #[test]
    fn later_drone_waits_for_the_corridor() {
        let inst = corridor_field();
        let assignment = Assignment::from([(TaskId(1), RobotId(1)), (TaskId(2), RobotId(2))]);
        let config = SolverConfig::default();
        let solution = CbsSolver::new(MixedResolver::new(&inst.workspace, &config), config)
            .solve_with_assignment(&inst, assignment)
            .unwrap();
        // Alone, a drone climbs for 5 s and flies 2 s. The second one has to
        // wait for the first to leave the corridor before it can climb.
        assert!(solution.makespan >= 7.0 + 5.0);
        let detector = ConflictDetector::for_instance(&inst, true);
        let paths: Vec<_> = solution.paths.iter().map(|(id, p)| (*id, p.as_slice())).collect();
        assert!(detector.first_conflict(paths).is_none());
    }
}
