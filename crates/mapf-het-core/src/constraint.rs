//! Constraints imposed by the high-level search on individual robots.

use crate::airspace::CorridorId;
use crate::robot::RobotId;
use crate::solution::TimedVertex;
use crate::workspace::VertexId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Slack used for every floating-point time comparison.
pub const TIME_TOLERANCE: f64 = 0.001;

/// Closed time interval. `end` may be infinite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

impl TimeWindow {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn point(t: f64) -> Self {
        Self { start: t, end: t }
    }

    /// Symmetric buffer around `t`, clamped at zero.
    pub fn around(t: f64, buffer: f64) -> Self {
        Self {
            start: (t - buffer).max(0.0),
            end: t + buffer,
        }
    }

    /// Overlap with a stay `[start, end]` at a vertex (closed on both sides).
    pub fn overlaps_stay(&self, start: f64, end: f64) -> bool {
        self.start <= end + TIME_TOLERANCE && start <= self.end + TIME_TOLERANCE
    }

    /// Overlap with a traversal `[start, end)`; arriving exactly as the
    /// window opens does not count.
    pub fn overlaps_traversal(&self, start: f64, end: f64) -> bool {
        self.start < end - TIME_TOLERANCE && start <= self.end + TIME_TOLERANCE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintTarget {
    Vertex { vertex: VertexId },
    /// Directed: only `from -> to` traversals are forbidden
    Edge { from: VertexId, to: VertexId },
    /// Any airborne level of a vertical corridor
    Corridor { corridor: CorridorId },
}

/// Forbids `robot` from `target` during `window`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub robot: RobotId,
    pub target: ConstraintTarget,
    pub window: TimeWindow,
}

impl Constraint {
    pub fn vertex(robot: RobotId, vertex: VertexId, window: TimeWindow) -> Self {
        Self {
            robot,
            target: ConstraintTarget::Vertex { vertex },
            window,
        }
    }

    pub fn edge(robot: RobotId, from: VertexId, to: VertexId, window: TimeWindow) -> Self {
        Self {
            robot,
            target: ConstraintTarget::Edge { from, to },
            window,
        }
    }

    pub fn corridor(robot: RobotId, corridor: CorridorId, window: TimeWindow) -> Self {
        Self {
            robot,
            target: ConstraintTarget::Corridor { corridor },
            window,
        }
    }
}

/// Drone must be standing on `pad` no later than `by`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MustReachBy {
    pub robot: RobotId,
    pub pad: VertexId,
    pub by: f64,
}

impl MustReachBy {
    pub fn is_satisfied_by(&self, path: &[TimedVertex]) -> bool {
        path.iter()
            .any(|tv| tv.vertex == self.pad && tv.time <= self.by + TIME_TOLERANCE)
    }
}

/// One robot's constraints indexed by target, as consumed by the low-level search.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    vertex: HashMap<VertexId, Vec<TimeWindow>>,
    edge: HashMap<(VertexId, VertexId), Vec<TimeWindow>>,
    corridor: HashMap<CorridorId, Vec<TimeWindow>>,
    len: usize,
}

impl ConstraintSet {
    pub fn for_robot<'a>(
        constraints: impl IntoIterator<Item = &'a Constraint>,
        robot: RobotId,
    ) -> Self {
        let mut set = Self::default();
        for c in constraints.into_iter().filter(|c| c.robot == robot) {
            set.insert(c);
        }
        set
    }

    pub fn insert(&mut self, constraint: &Constraint) {
        let window = constraint.window;
        match constraint.target {
            ConstraintTarget::Vertex { vertex } => {
                self.vertex.entry(vertex).or_default().push(window)
            }
            ConstraintTarget::Edge { from, to } => {
                self.edge.entry((from, to)).or_default().push(window)
            }
            ConstraintTarget::Corridor { corridor } => {
                self.corridor.entry(corridor).or_default().push(window)
            }
        }
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Standing on `vertex` during `[start, end]` violates a constraint.
    pub fn blocks_stay(&self, vertex: VertexId, start: f64, end: f64) -> bool {
        self.vertex
            .get(&vertex)
            .is_some_and(|ws| ws.iter().any(|w| w.overlaps_stay(start, end)))
    }

    /// Traversing `from -> to` during `[start, end)` violates a constraint.
    pub fn blocks_traversal(&self, from: VertexId, to: VertexId, start: f64, end: f64) -> bool {
        self.edge
            .get(&(from, to))
            .is_some_and(|ws| ws.iter().any(|w| w.overlaps_traversal(start, end)))
    }

    /// Being inside `corridor` during `[start, end]` violates a constraint.
    pub fn blocks_corridor(&self, corridor: CorridorId, start: f64, end: f64) -> bool {
        self.corridor
            .get(&corridor)
            .is_some_and(|ws| ws.iter().any(|w| w.overlaps_stay(start, end)))
    }

    /// Latest end of any vertex constraint on `vertex`. A robot may only
    /// come to rest there after this instant.
    pub fn last_vertex_block(&self, vertex: VertexId) -> Option<f64> {
        self.vertex
            .get(&vertex)
            .and_then(|ws| ws.iter().map(|w| w.end).reduce(f64::max))
    }

    pub fn last_corridor_block(&self, corridor: CorridorId) -> Option<f64> {
        self.corridor
            .get(&corridor)
            .and_then(|ws| ws.iter().map(|w| w.end).reduce(f64::max))
    }
}
