//! Layered airspace view derived from the workspace.
//!
//! Drones fly horizontally inside one layer and change layer only through a
//! vertical corridor: a stack of corridor-flagged vertices sitting above a
//! ground pad. Transitions move one layer at a time.

use crate::robot::CLIMB_SPEED_MPS;
use crate::workspace::{VertexId, Workspace};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// 0 m: pads, ground robots
    #[default]
    Ground,
    /// 5 m: handoff between ground and air
    Handoff,
    /// 10 m: inspection work
    Work,
    /// 15 m: fast transit
    Transit,
}

impl Layer {
    pub const ALL: [Layer; 4] = [Layer::Ground, Layer::Handoff, Layer::Work, Layer::Transit];

    pub fn height_m(self) -> f64 {
        match self {
            Layer::Ground => 0.0,
            Layer::Handoff => 5.0,
            Layer::Work => 10.0,
            Layer::Transit => 15.0,
        }
    }

    /// How much drones favour flying on this layer, in `[0, 1]`.
    pub fn preference(self) -> f64 {
        match self {
            Layer::Ground => 0.0,
            Layer::Handoff => 0.3,
            Layer::Work => 0.7,
            Layer::Transit => 1.0,
        }
    }

    pub fn up(self) -> Option<Layer> {
        match self {
            Layer::Ground => Some(Layer::Handoff),
            Layer::Handoff => Some(Layer::Work),
            Layer::Work => Some(Layer::Transit),
            Layer::Transit => None,
        }
    }

    pub fn down(self) -> Option<Layer> {
        match self {
            Layer::Ground => None,
            Layer::Handoff => Some(Layer::Ground),
            Layer::Work => Some(Layer::Handoff),
            Layer::Transit => Some(Layer::Work),
        }
    }

    pub fn is_adjacent(self, other: Layer) -> bool {
        self.up() == Some(other) || self.down() == Some(other)
    }

    /// Seconds to climb or descend from `self` to `other` at the vertical speed.
    pub fn transit_time_sec(self, other: Layer) -> f64 {
        (other.height_m() - self.height_m()).abs() / CLIMB_SPEED_MPS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorridorId(pub u32);

impl fmt::Display for CorridorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Vertical stack of vertices, one per layer, above a ground pad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Corridor {
    pub id: CorridorId,
    pub base: VertexId,
    pub levels: BTreeMap<Layer, VertexId>,
}

impl Corridor {
    pub fn vertex_at(&self, layer: Layer) -> Option<VertexId> {
        self.levels.get(&layer).copied()
    }

    pub fn layer_of(&self, vertex: VertexId) -> Option<Layer> {
        self.levels
            .iter()
            .find(|(_, v)| **v == vertex)
            .map(|(layer, _)| *layer)
    }

    pub fn contains(&self, vertex: VertexId) -> bool {
        self.layer_of(vertex).is_some()
    }

    /// Corridor vertices above the ground pad. Occupying one of these counts
    /// as being inside the corridor.
    pub fn airborne_vertices(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.levels
            .iter()
            .filter(|(layer, _)| **layer != Layer::Ground)
            .map(|(_, v)| *v)
    }

    /// Time for a full climb from the pad to the highest level.
    pub fn full_transit_sec(&self) -> f64 {
        match self.levels.keys().next_back() {
            Some(top) => Layer::Ground.transit_time_sec(*top),
            None => 0.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Airspace {
    layers: BTreeMap<Layer, Vec<VertexId>>,
    corridors: Vec<Corridor>,
    corridor_index: HashMap<VertexId, CorridorId>,
    layer_graph: BTreeMap<Layer, BTreeMap<VertexId, Vec<VertexId>>>,
    pads: Vec<VertexId>,
}

impl Airspace {
    pub fn build(workspace: &Workspace) -> Self {
        let mut airspace = Airspace::default();

        for vertex in workspace.vertices() {
            airspace.layers.entry(vertex.layer).or_default().push(vertex.id);
            if vertex.is_charging_pad() {
                airspace.pads.push(vertex.id);
            }
        }

        for &pad in &airspace.pads {
            let Some(base) = workspace.vertex(pad) else {
                continue;
            };
            let mut levels = BTreeMap::new();
            levels.insert(Layer::Ground, pad);
            for vertex in workspace.vertices() {
                if vertex.corridor
                    && vertex.layer != Layer::Ground
                    && vertex.pos.stacked_with(&base.pos)
                {
                    // Lowest id wins if two vertices claim the same level
                    levels.entry(vertex.layer).or_insert(vertex.id);
                }
            }
            if levels.len() < 2 {
                continue;
            }
            let id = CorridorId(airspace.corridors.len() as u32);
            for v in levels.values() {
                airspace.corridor_index.entry(*v).or_insert(id);
            }
            airspace.corridors.push(Corridor { id, base: pad, levels });
        }

        for vertex in workspace.vertices() {
            let neighbors: Vec<VertexId> = workspace
                .neighbors(vertex.id)
                .filter(|n| workspace.layer_of(*n) == vertex.layer)
                .collect();
            airspace
                .layer_graph
                .entry(vertex.layer)
                .or_default()
                .insert(vertex.id, neighbors);
        }

        airspace
    }

    pub fn corridors(&self) -> &[Corridor] {
        &self.corridors
    }

    pub fn corridor(&self, id: CorridorId) -> Option<&Corridor> {
        self.corridors.get(id.0 as usize)
    }

    pub fn corridor_of(&self, vertex: VertexId) -> Option<&Corridor> {
        self.corridor_index
            .get(&vertex)
            .and_then(|id| self.corridor(*id))
    }

    /// Corridor whose airborne part contains `vertex`. Ground pads are excluded.
    pub fn airborne_corridor_of(&self, vertex: VertexId) -> Option<CorridorId> {
        let corridor = self.corridor_of(vertex)?;
        match corridor.layer_of(vertex) {
            Some(Layer::Ground) | None => None,
            Some(_) => Some(corridor.id),
        }
    }

    pub fn layer_vertices(&self, layer: Layer) -> &[VertexId] {
        self.layers.get(&layer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Same-layer neighbors of `vertex`.
    pub fn layer_neighbors(&self, layer: Layer, vertex: VertexId) -> &[VertexId] {
        self.layer_graph
            .get(&layer)
            .and_then(|graph| graph.get(&vertex))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn vertex_at_layer(&self, vertex: VertexId, layer: Layer) -> Option<VertexId> {
        self.corridor_of(vertex)?.vertex_at(layer)
    }

    /// Legal single-step layer change: same corridor, adjacent layers.
    pub fn can_transition(&self, from: VertexId, to: VertexId) -> bool {
        let Some(corridor) = self.corridor_of(from) else {
            return false;
        };
        match (corridor.layer_of(from), corridor.layer_of(to)) {
            (Some(a), Some(b)) => a.is_adjacent(b),
            _ => false,
        }
    }

    /// Corridor vertices one layer up and one layer down from `vertex`.
    pub fn vertical_neighbors(&self, vertex: VertexId) -> Vec<(VertexId, Layer, Layer)> {
        let Some(corridor) = self.corridor_of(vertex) else {
            return Vec::new();
        };
        let Some(layer) = corridor.layer_of(vertex) else {
            return Vec::new();
        };
        [layer.up(), layer.down()]
            .into_iter()
            .flatten()
            .filter_map(|next| corridor.vertex_at(next).map(|v| (v, layer, next)))
            .collect()
    }

    pub fn pads(&self) -> &[VertexId] {
        &self.pads
    }

    /// Closest charging pad to `vertex` by straight-line distance, lowest id on ties.
    pub fn nearest_pad(&self, workspace: &Workspace, vertex: VertexId) -> Option<VertexId> {
        let origin = workspace.vertex(vertex)?.pos;
        let mut best: Option<(f64, VertexId)> = None;
        for &pad in &self.pads {
            let Some(pad_vertex) = workspace.vertex(pad) else {
                continue;
            };
            let dist = origin.distance(&pad_vertex.pos);
            if best.map_or(true, |(d, _)| dist < d - 1e-9) {
                best = Some((dist, pad));
            }
        }
        best.map(|(_, pad)| pad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::{Edge, Pos, Vertex};

    fn tower() -> Workspace {
        let mut ws = Workspace::new();
        ws.add_vertex(Vertex::new(0, Pos::new(0.0, 0.0, 0.0)).with_pad());
        ws.add_vertex(Vertex::aerial(1, 0.0, 0.0, Layer::Handoff).with_corridor());
        ws.add_vertex(Vertex::aerial(2, 0.0, 0.0, Layer::Work).with_corridor());
        ws.add_vertex(Vertex::aerial(3, 10.0, 0.0, Layer::Work));
        ws.add_vertex(Vertex::new(4, Pos::new(30.0, 0.0, 0.0)).with_pad());
        ws.add_edge(Edge::new(2, 3, 10.0));
        ws
    }

    #[test]
    fn layers_are_ordered_and_adjacent() {
        assert_eq!(Layer::Ground.up(), Some(Layer::Handoff));
        assert_eq!(Layer::Transit.up(), None);
        assert!(Layer::Work.is_adjacent(Layer::Transit));
        assert!(!Layer::Ground.is_adjacent(Layer::Work));
        assert_eq!(Layer::Ground.transit_time_sec(Layer::Handoff), 2.5);
    }

    #[test]
    fn corridor_is_built_above_pad() {
        let airspace = Airspace::build(&tower());
        assert_eq!(airspace.corridors().len(), 1);
        let corridor = &airspace.corridors()[0];
        assert_eq!(corridor.base, VertexId(0));
        assert_eq!(corridor.vertex_at(Layer::Work), Some(VertexId(2)));
        assert_eq!(corridor.full_transit_sec(), 5.0);
        // Second pad has nothing stacked above it
        assert!(airspace.corridor_of(VertexId(4)).is_none());
    }

    #[test]
    fn transitions_require_adjacent_corridor_levels() {
        let airspace = Airspace::build(&tower());
        assert!(airspace.can_transition(VertexId(0), VertexId(1)));
        assert!(airspace.can_transition(VertexId(2), VertexId(1)));
        assert!(!airspace.can_transition(VertexId(0), VertexId(2)));
        assert!(!airspace.can_transition(VertexId(3), VertexId(2)));

        let up_down: Vec<VertexId> = airspace
            .vertical_neighbors(VertexId(1))
            .into_iter()
            .map(|(v, _, _)| v)
            .collect();
        assert_eq!(up_down, vec![VertexId(2), VertexId(0)]);
    }

    #[test]
    fn airborne_corridor_excludes_ground_pad() {
        let airspace = Airspace::build(&tower());
        assert_eq!(airspace.airborne_corridor_of(VertexId(2)), Some(CorridorId(0)));
        assert_eq!(airspace.airborne_corridor_of(VertexId(0)), None);
    }

    #[test]
    fn nearest_pad_uses_distance() {
        let ws = tower();
        let airspace = Airspace::build(&ws);
        assert_eq!(airspace.nearest_pad(&ws, VertexId(3)), Some(VertexId(0)));
        assert_eq!(airspace.pads(), &[VertexId(0), VertexId(4)]);
    }

    #[test]
    fn layer_graph_keeps_same_layer_edges_only() {
        let airspace = Airspace::build(&tower());
        assert_eq!(airspace.layer_neighbors(Layer::Work, VertexId(2)), &[VertexId(3)]);
        assert_eq!(airspace.layer_vertices(Layer::Work).len(), 2);
    }
}
