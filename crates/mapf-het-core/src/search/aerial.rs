//! Drone motion through the layered airspace.
//!
//! Horizontal flight follows the per-layer graph and never enters a
//! `no_fly` vertex. Drones do not taxi on the ground: from a pad the only
//! way out is up the corridor above it. Layer changes go one level at a
//! time through a corridor.

use crate::airspace::{Airspace, CorridorId, Layer};
use crate::robot::Robot;
use crate::search::Move;
use crate::workspace::{VertexId, Workspace};

#[derive(Debug, Clone, Copy)]
pub struct AerialMotion<'a> {
    workspace: &'a Workspace,
    airspace: &'a Airspace,
    robot: &'a Robot,
}

impl<'a> AerialMotion<'a> {
    pub fn new(workspace: &'a Workspace, airspace: &'a Airspace, robot: &'a Robot) -> Self {
        Self {
            workspace,
            airspace,
            robot,
        }
    }

    pub fn moves(&self, from: VertexId) -> Vec<Move> {
        let kind = self.robot.kind;
        if !self.workspace.can_occupy(from, kind) {
            return Vec::new();
        }
        let layer = self.workspace.layer_of(from);
        let mut moves = Vec::new();

        if layer != Layer::Ground {
            for &to in self.airspace.layer_neighbors(layer, from) {
                if !self.workspace.can_occupy(to, kind) {
                    continue;
                }
                if let Some(edge) = self.workspace.edge(from, to) {
                    moves.push(Move {
                        to,
                        duration: self.robot.travel_time(edge),
                        vertical: None,
                    });
                }
            }
        }

        let corridor = self.airspace.corridor_of(from).map(|c| c.id);
        for (to, from_layer, to_layer) in self.airspace.vertical_neighbors(from) {
            if !self.workspace.can_occupy(to, kind) {
                continue;
            }
            moves.push(Move {
                to,
                duration: from_layer.transit_time_sec(to_layer),
                vertical: corridor,
            });
        }

        moves
    }

    /// Corridor the drone is inside while hovering at `vertex`.
    pub fn corridor_at(&self, vertex: VertexId) -> Option<CorridorId> {
        self.airspace.airborne_corridor_of(vertex)
    }
}
