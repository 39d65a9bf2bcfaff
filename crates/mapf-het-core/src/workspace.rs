//! Workspace graph: vertices with occupancy rules and the edges between them.

use crate::airspace::Layer;
use crate::robot::RobotKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Traversal time used when an edge carries neither a length nor a fixed time.
pub const DEFAULT_TRAVEL_TIME_SEC: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexId(pub u32);

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Position in meters. `z` is altitude.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pos {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Pos {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Pos) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// True when both positions share the same horizontal coordinates.
    pub fn stacked_with(&self, other: &Pos) -> bool {
        (self.x - other.x).abs() < 1e-6 && (self.y - other.y).abs() < 1e-6
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Occupancy {
    /// At most one robot at a time
    #[default]
    Exclusive,
    /// Any number of robots (depots, open floor)
    Shared,
}

/// A location in the workspace. Immutable once the instance is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub id: VertexId,
    pub pos: Pos,
    #[serde(default)]
    pub occupancy: Occupancy,
    /// Robot kinds allowed here. Empty means every kind.
    #[serde(default)]
    pub allowed: Vec<RobotKind>,
    #[serde(default)]
    pub layer: Layer,
    /// Part of a vertical corridor (layer changes permitted)
    #[serde(default)]
    pub corridor: bool,
    /// Charging / landing pad
    #[serde(default)]
    pub pad: bool,
    /// Closed to aerial traffic
    #[serde(default)]
    pub no_fly: bool,
}

impl Vertex {
    pub fn new(id: u32, pos: Pos) -> Self {
        Self {
            id: VertexId(id),
            pos,
            occupancy: Occupancy::Exclusive,
            allowed: Vec::new(),
            layer: Layer::Ground,
            corridor: false,
            pad: false,
            no_fly: false,
        }
    }

    /// Vertex placed on an airspace layer, altitude taken from the layer.
    pub fn aerial(id: u32, x: f64, y: f64, layer: Layer) -> Self {
        let mut vertex = Self::new(id, Pos::new(x, y, layer.height_m()));
        vertex.layer = layer;
        vertex.allowed = vec![RobotKind::Aerial];
        vertex
    }

    pub fn shared(mut self) -> Self {
        self.occupancy = Occupancy::Shared;
        self
    }

    pub fn restricted_to(mut self, kinds: &[RobotKind]) -> Self {
        self.allowed = kinds.to_vec();
        self
    }

    pub fn with_corridor(mut self) -> Self {
        self.corridor = true;
        self
    }

    pub fn with_pad(mut self) -> Self {
        self.pad = true;
        self
    }

    pub fn with_no_fly(mut self) -> Self {
        self.no_fly = true;
        self
    }

    pub fn is_shared(&self) -> bool {
        self.occupancy == Occupancy::Shared
    }

    /// Whether a robot of `kind` may stand on this vertex.
    pub fn permits(&self, kind: RobotKind) -> bool {
        if !self.allowed.is_empty() && !self.allowed.contains(&kind) {
            return false;
        }
        match kind {
            RobotKind::Aerial => !self.no_fly,
            RobotKind::Rail | RobotKind::Planar => self.layer == Layer::Ground,
        }
    }

    /// Ground-level pad where a drone recharges.
    pub fn is_charging_pad(&self) -> bool {
        self.pad && self.layer == Layer::Ground
    }
}

/// Connection between two vertices. Either a physical length (time follows
/// from robot speed) or a fixed traversal time that overrides speed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: VertexId,
    pub to: VertexId,
    #[serde(default)]
    pub length_m: Option<f64>,
    #[serde(default)]
    pub travel_time_sec: Option<f64>,
}

impl Edge {
    pub fn new(from: u32, to: u32, length_m: f64) -> Self {
        Self {
            from: VertexId(from),
            to: VertexId(to),
            length_m: Some(length_m),
            travel_time_sec: None,
        }
    }

    /// Edge with a fixed traversal time (elevator, gate).
    pub fn timed(from: u32, to: u32, travel_time_sec: f64) -> Self {
        Self {
            from: VertexId(from),
            to: VertexId(to),
            length_m: None,
            travel_time_sec: Some(travel_time_sec),
        }
    }

    pub fn reversed(&self) -> Self {
        Self {
            from: self.to,
            to: self.from,
            ..*self
        }
    }

    /// Seconds for a robot moving at `speed_mps` to cross this edge.
    pub fn travel_time(&self, speed_mps: f64) -> f64 {
        if let Some(secs) = self.travel_time_sec {
            return secs;
        }
        match self.length_m {
            Some(length) if speed_mps > 0.0 => length / speed_mps,
            _ => DEFAULT_TRAVEL_TIME_SEC,
        }
    }
}

/// Vertex set plus bidirectional adjacency.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "WorkspaceData", into = "WorkspaceData")]
pub struct Workspace {
    vertices: BTreeMap<VertexId, Vertex>,
    adjacency: BTreeMap<VertexId, Vec<Edge>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceData {
    vertices: Vec<Vertex>,
    #[serde(default)]
    edges: Vec<Edge>,
}

impl From<WorkspaceData> for Workspace {
    fn from(data: WorkspaceData) -> Self {
        let mut workspace = Workspace::new();
        for vertex in data.vertices {
            workspace.add_vertex(vertex);
        }
        for edge in data.edges {
            workspace.add_edge(edge);
        }
        workspace
    }
}

impl From<Workspace> for WorkspaceData {
    fn from(workspace: Workspace) -> Self {
        let edges = workspace.undirected_edges();
        WorkspaceData {
            vertices: workspace.vertices.into_values().collect(),
            edges,
        }
    }
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, vertex: Vertex) {
        self.adjacency.entry(vertex.id).or_default();
        self.vertices.insert(vertex.id, vertex);
    }

    /// Insert an edge in both directions. Replaces any existing edge between the pair.
    pub fn add_edge(&mut self, edge: Edge) {
        self.insert_directed(edge);
        self.insert_directed(edge.reversed());
    }

    fn insert_directed(&mut self, edge: Edge) {
        let list = self.adjacency.entry(edge.from).or_default();
        match list.iter_mut().find(|e| e.to == edge.to) {
            Some(existing) => *existing = edge,
            None => list.push(edge),
        }
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.vertices.get(&id)
    }

    pub fn contains(&self, id: VertexId) -> bool {
        self.vertices.contains_key(&id)
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.values()
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn edges_from(&self, id: VertexId) -> &[Edge] {
        self.adjacency.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn neighbors(&self, id: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        self.edges_from(id).iter().map(|e| e.to)
    }

    pub fn edge(&self, from: VertexId, to: VertexId) -> Option<&Edge> {
        self.edges_from(from).iter().find(|e| e.to == to)
    }

    /// Every edge once, with `from < to`.
    pub fn undirected_edges(&self) -> Vec<Edge> {
        self.adjacency
            .values()
            .flatten()
            .filter(|e| e.from <= e.to)
            .copied()
            .collect()
    }

    /// Whether a robot of `kind` may occupy `id`. Unknown vertices are never occupiable.
    pub fn can_occupy(&self, id: VertexId, kind: RobotKind) -> bool {
        self.vertex(id).is_some_and(|v| v.permits(kind))
    }

    pub fn is_shared(&self, id: VertexId) -> bool {
        self.vertex(id).is_some_and(Vertex::is_shared)
    }

    pub fn layer_of(&self, id: VertexId) -> Layer {
        self.vertex(id).map(|v| v.layer).unwrap_or_default()
    }

    pub fn distance(&self, a: VertexId, b: VertexId) -> Option<f64> {
        Some(self.vertex(a)?.pos.distance(&self.vertex(b)?.pos))
    }
}
