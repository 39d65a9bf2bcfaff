//! Interval-based conflict detection.
//!
//! Robots move at different speeds, so paths are never compared sample by
//! sample. Each path is turned into stays `(vertex, arrive, depart)` and
//! traversals `(from, to, start, end)` and every pair of intervals touching
//! the same vertex, edge or corridor is compared.

use crate::airspace::{Airspace, CorridorId};
use crate::constraint::{TimeWindow, TIME_TOLERANCE};
use crate::instance::Instance;
use crate::robot::RobotId;
use crate::solution::TimedVertex;
use crate::workspace::{VertexId, Workspace};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// Both robots on the same exclusive vertex
    Vertex { vertex: VertexId },
    /// Opposite traversals of one edge; `from -> to` is the first robot's direction
    Edge { from: VertexId, to: VertexId },
    /// Both drones inside the airborne part of one corridor
    Corridor { corridor: CorridorId },
}

impl ConflictKind {
    fn rank(&self) -> u8 {
        match self {
            ConflictKind::Vertex { .. } => 0,
            ConflictKind::Edge { .. } => 1,
            ConflictKind::Corridor { .. } => 2,
        }
    }
}

/// Two robots violating exclusivity. `first` always has the lower id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conflict {
    pub first: RobotId,
    pub second: RobotId,
    pub kind: ConflictKind,
    /// Earliest instant both robots are in violation
    pub time: f64,
    /// The first robot's stay, traversal or corridor occupancy
    pub first_interval: TimeWindow,
    pub second_interval: TimeWindow,
}

impl Conflict {
    pub fn involves(&self, robot: RobotId) -> bool {
        self.first == robot || self.second == robot
    }

    pub fn interval_of(&self, robot: RobotId) -> Option<TimeWindow> {
        if robot == self.first {
            Some(self.first_interval)
        } else if robot == self.second {
            Some(self.second_interval)
        } else {
            None
        }
    }

    fn order_key(&self) -> (f64, RobotId, RobotId, u8) {
        (self.time, self.first, self.second, self.kind.rank())
    }

    fn cmp_order(&self, other: &Self) -> std::cmp::Ordering {
        let (ta, fa, sa, ka) = self.order_key();
        let (tb, fb, sb, kb) = other.order_key();
        ta.total_cmp(&tb)
            .then(fa.cmp(&fb))
            .then(sa.cmp(&sb))
            .then(ka.cmp(&kb))
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ConflictKind::Vertex { vertex } => write!(
                f,
                "vertex conflict between {} and {} at {} (t={:.3}s)",
                self.first, self.second, vertex, self.time
            ),
            ConflictKind::Edge { from, to } => write!(
                f,
                "edge conflict between {} and {} on {}-{} (t={:.3}s)",
                self.first, self.second, from, to, self.time
            ),
            ConflictKind::Corridor { corridor } => write!(
                f,
                "corridor conflict between {} and {} in {} (t={:.3}s)",
                self.first, self.second, corridor, self.time
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stay {
    pub vertex: VertexId,
    pub arrive: f64,
    /// Infinite for the final vertex
    pub depart: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Traversal {
    pub from: VertexId,
    pub to: VertexId,
    pub start: f64,
    pub end: f64,
}

/// Split a path into stays and traversals. The last stay never ends.
pub fn occupancy(path: &[TimedVertex]) -> (Vec<Stay>, Vec<Traversal>) {
    let mut stays = Vec::new();
    let mut traversals = Vec::new();
    let Some(first) = path.first() else {
        return (stays, traversals);
    };

    let mut current = Stay {
        vertex: first.vertex,
        arrive: first.time,
        depart: first.time,
    };
    for pair in path.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a.vertex == b.vertex {
            current.depart = b.time;
            continue;
        }
        current.depart = a.time;
        stays.push(current);
        traversals.push(Traversal {
            from: a.vertex,
            to: b.vertex,
            start: a.time,
            end: b.time,
        });
        current = Stay {
            vertex: b.vertex,
            arrive: b.time,
            depart: b.time,
        };
    }
    current.depart = f64::INFINITY;
    stays.push(current);
    (stays, traversals)
}

/// Intervals a drone spends inside each corridor: hovering at an airborne
/// corridor vertex or climbing / descending through it. Contiguous pieces
/// are merged.
pub fn corridor_occupancy(
    airspace: &Airspace,
    path: &[TimedVertex],
) -> Vec<(CorridorId, TimeWindow)> {
    let (stays, traversals) = occupancy(path);
    let mut pieces: Vec<(CorridorId, TimeWindow)> = Vec::new();
    for stay in &stays {
        if let Some(c) = airspace.airborne_corridor_of(stay.vertex) {
            pieces.push((c, TimeWindow::new(stay.arrive, stay.depart)));
        }
    }
    for traversal in &traversals {
        if airspace.can_transition(traversal.from, traversal.to) {
            if let Some(c) = airspace.corridor_of(traversal.from) {
                pieces.push((c.id, TimeWindow::new(traversal.start, traversal.end)));
            }
        }
    }
    pieces.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.start.total_cmp(&b.1.start)));

    let mut merged: Vec<(CorridorId, TimeWindow)> = Vec::new();
    for (c, w) in pieces {
        match merged.last_mut() {
            Some((lc, lw)) if *lc == c && w.start <= lw.end + TIME_TOLERANCE => {
                lw.end = lw.end.max(w.end);
            }
            _ => merged.push((c, w)),
        }
    }
    merged
}

fn closed_overlap(a: TimeWindow, b: TimeWindow) -> Option<f64> {
    let start = a.start.max(b.start);
    (start <= a.end.min(b.end) + TIME_TOLERANCE).then_some(start)
}

/// Detects conflicts in a set of planned paths.
#[derive(Debug, Clone)]
pub struct ConflictDetector<'a> {
    workspace: &'a Workspace,
    airspace: Option<&'a Airspace>,
    aerial: BTreeSet<RobotId>,
}

impl<'a> ConflictDetector<'a> {
    /// Vertex and edge conflicts only.
    pub fn new(workspace: &'a Workspace) -> Self {
        Self {
            workspace,
            airspace: None,
            aerial: BTreeSet::new(),
        }
    }

    /// Adds corridor exclusivity between drones when `corridor_exclusive` is set.
    pub fn for_instance(instance: &'a Instance, corridor_exclusive: bool) -> Self {
        let aerial = instance
            .robots
            .iter()
            .filter(|r| r.kind.is_aerial())
            .map(|r| r.id)
            .collect();
        Self {
            workspace: &instance.workspace,
            airspace: corridor_exclusive.then_some(&instance.airspace),
            aerial,
        }
    }

    /// Earliest conflict by time, then robot ids, then kind.
    pub fn first_conflict<'p>(
        &self,
        paths: impl IntoIterator<Item = (RobotId, &'p [TimedVertex])>,
    ) -> Option<Conflict> {
        self.collect(paths)
            .into_iter()
            .min_by(|a, b| a.cmp_order(b))
    }

    /// Every conflict, sorted like [`ConflictDetector::first_conflict`].
    pub fn all_conflicts<'p>(
        &self,
        paths: impl IntoIterator<Item = (RobotId, &'p [TimedVertex])>,
    ) -> Vec<Conflict> {
        let mut conflicts = self.collect(paths);
        conflicts.sort_by(|a, b| a.cmp_order(b));
        conflicts
    }

    pub fn count<'p>(
        &self,
        paths: impl IntoIterator<Item = (RobotId, &'p [TimedVertex])>,
    ) -> usize {
        self.collect(paths).len()
    }

    fn collect<'p>(
        &self,
        paths: impl IntoIterator<Item = (RobotId, &'p [TimedVertex])>,
    ) -> Vec<Conflict> {
        let mut at_vertex: HashMap<VertexId, Vec<(RobotId, TimeWindow)>> = HashMap::new();
        let mut on_edge: HashMap<(VertexId, VertexId), Vec<(RobotId, Traversal)>> = HashMap::new();
        let mut in_corridor: HashMap<CorridorId, Vec<(RobotId, TimeWindow)>> = HashMap::new();

        for (robot, path) in paths {
            let (stays, traversals) = occupancy(path);
            for stay in stays {
                if self.workspace.is_shared(stay.vertex) {
                    continue;
                }
                at_vertex
                    .entry(stay.vertex)
                    .or_default()
                    .push((robot, TimeWindow::new(stay.arrive, stay.depart)));
            }
            for traversal in traversals {
                let key = if traversal.from <= traversal.to {
                    (traversal.from, traversal.to)
                } else {
                    (traversal.to, traversal.from)
                };
                on_edge.entry(key).or_default().push((robot, traversal));
            }
            if let Some(airspace) = self.airspace {
                if self.aerial.contains(&robot) {
                    for (c, window) in corridor_occupancy(airspace, path) {
                        in_corridor.entry(c).or_default().push((robot, window));
                    }
                }
            }
        }

        let mut conflicts = Vec::new();

        for (vertex, entries) in &at_vertex {
            for_each_pair(entries, |(ra, wa), (rb, wb)| {
                if let Some(time) = closed_overlap(*wa, *wb) {
                    conflicts.push(ordered(*ra, *wa, *rb, *wb, time, |_| ConflictKind::Vertex {
                        vertex: *vertex,
                    }));
                }
            });
        }

        for entries in on_edge.values() {
            for_each_pair(entries, |(ra, ta), (rb, tb)| {
                if ta.from != tb.to || ta.to != tb.from {
                    return;
                }
                let start = ta.start.max(tb.start);
                if start + TIME_TOLERANCE < ta.end.min(tb.end) {
                    let wa = TimeWindow::new(ta.start, ta.end);
                    let wb = TimeWindow::new(tb.start, tb.end);
                    conflicts.push(ordered(*ra, wa, *rb, wb, start, |first_is_a| {
                        let lead = if first_is_a { ta } else { tb };
                        ConflictKind::Edge {
                            from: lead.from,
                            to: lead.to,
                        }
                    }));
                }
            });
        }

        for (corridor, entries) in &in_corridor {
            for_each_pair(entries, |(ra, wa), (rb, wb)| {
                if let Some(time) = closed_overlap(*wa, *wb) {
                    conflicts.push(ordered(*ra, *wa, *rb, *wb, time, |_| ConflictKind::Corridor {
                        corridor: *corridor,
                    }));
                }
            });
        }

        conflicts
    }
}

/// Visit every pair of entries that belong to different robots.
fn for_each_pair<T>(entries: &[(RobotId, T)], mut f: impl FnMut(&(RobotId, T), &(RobotId, T))) {
    for (i, a) in entries.iter().enumerate() {
        for b in &entries[i + 1..] {
            if a.0 != b.0 {
                f(a, b);
            }
        }
    }
}

fn ordered(
    ra: RobotId,
    wa: TimeWindow,
    rb: RobotId,
    wb: TimeWindow,
    time: f64,
    kind: impl FnOnce(bool) -> ConflictKind,
) -> Conflict {
    let a_first = ra < rb;
    let (first, first_interval, second, second_interval) = if a_first {
        (ra, wa, rb, wb)
    } else {
        (rb, wb, ra, wa)
    };
    Conflict {
        first,
        second,
        kind: kind(a_first),
        time,
        first_interval,
        second_interval,
    }
}
