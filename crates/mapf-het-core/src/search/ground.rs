//! Planar and rail motion: edge moves between ground vertices the robot's
//! kind may occupy.

use crate::robot::Robot;
use crate::search::Move;
use crate::workspace::{VertexId, Workspace};

#[derive(Debug, Clone, Copy)]
pub struct GroundMotion<'a> {
    workspace: &'a Workspace,
    robot: &'a Robot,
}

impl<'a> GroundMotion<'a> {
    pub fn new(workspace: &'a Workspace, robot: &'a Robot) -> Self {
        Self { workspace, robot }
    }

    pub fn moves(&self, from: VertexId) -> Vec<Move> {
        let kind = self.robot.kind;
        if !self.workspace.can_occupy(from, kind) {
            return Vec::new();
        }
        self.workspace
            .edges_from(from)
            .iter()
            .filter(|edge| self.workspace.can_occupy(edge.to, kind))
            .map(|edge| Move {
                to: edge.to,
                duration: self.robot.travel_time(edge),
                vertical: None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::airspace::Layer;
    use crate::robot::RobotKind;
    use crate::workspace::{Edge, Pos, Vertex};

    #[test]
    fn ground_robots_stay_on_their_vertices() {
        let mut ws = Workspace::new();
        ws.add_vertex(Vertex::new(0, Pos::default()));
        ws.add_vertex(Vertex::new(1, Pos::new(4.0, 0.0, 0.0)).restricted_to(&[RobotKind::Rail]));
        ws.add_vertex(Vertex::new(2, Pos::new(0.0, 4.0, 0.0)));
        ws.add_vertex(Vertex::aerial(3, 0.0, 0.0, Layer::Handoff));
        ws.add_edge(Edge::new(0, 1, 4.0));
        ws.add_edge(Edge::new(0, 2, 4.0));
        ws.add_edge(Edge::timed(0, 3, 2.5));

        let planar = Robot::new(1, RobotKind::Planar, 0);
        let moves = GroundMotion::new(&ws, &planar).moves(VertexId(0));
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].to, VertexId(2));
        assert_eq!(moves[0].duration, 8.0);

        let rail = Robot::new(2, RobotKind::Rail, 0);
        let targets: Vec<_> = GroundMotion::new(&ws, &rail)
            .moves(VertexId(0))
            .into_iter()
            .map(|m| m.to)
            .collect();
        assert_eq!(targets, vec![VertexId(1), VertexId(2)]);
    }
}
