//! The planning problem: workspace, airspace, robots, tasks and a deadline.

use crate::airspace::Airspace;
use crate::error::InstanceError;
use crate::robot::{Robot, RobotId, RobotKind};
use crate::task::{Task, TaskId};
use crate::workspace::Workspace;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "InstanceData", into = "InstanceData")]
pub struct Instance {
    pub workspace: Workspace,
    pub airspace: Airspace,
    pub robots: Vec<Robot>,
    pub tasks: Vec<Task>,
    pub deadline_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstanceData {
    workspace: Workspace,
    robots: Vec<Robot>,
    tasks: Vec<Task>,
    deadline_sec: f64,
}

impl From<InstanceData> for Instance {
    fn from(data: InstanceData) -> Self {
        Instance::new(data.workspace, data.robots, data.tasks, data.deadline_sec)
    }
}

impl From<Instance> for InstanceData {
    fn from(instance: Instance) -> Self {
        InstanceData {
            workspace: instance.workspace,
            robots: instance.robots,
            tasks: instance.tasks,
            deadline_sec: instance.deadline_sec,
        }
    }
}

impl Instance {
    /// Builds the airspace view; call [`Instance::validate`] before planning.
    pub fn new(
        workspace: Workspace,
        robots: Vec<Robot>,
        tasks: Vec<Task>,
        deadline_sec: f64,
    ) -> Self {
        let airspace = Airspace::build(&workspace);
        Self {
            workspace,
            airspace,
            robots,
            tasks,
            deadline_sec,
        }
    }

    pub fn robot(&self, id: RobotId) -> Option<&Robot> {
        self.robots.iter().find(|r| r.id == id)
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn robot_kind(&self, id: RobotId) -> Option<RobotKind> {
        self.robot(id).map(|r| r.kind)
    }

    /// Effective deadline of a task.
    pub fn task_deadline(&self, task: &Task) -> f64 {
        task.deadline_or(self.deadline_sec)
    }

    /// Referential integrity, executed once before any search.
    pub fn validate(&self) -> Result<(), InstanceError> {
        if !(self.deadline_sec > 0.0) {
            return Err(InstanceError::InvalidDeadline(self.deadline_sec));
        }

        for edge in self.workspace.undirected_edges() {
            if edge.from == edge.to {
                return Err(InstanceError::SelfLoop(edge.from));
            }
            if !self.workspace.contains(edge.from) || !self.workspace.contains(edge.to) {
                return Err(InstanceError::UnknownEdgeVertex {
                    from: edge.from,
                    to: edge.to,
                });
            }
            let fixed_ok = edge.travel_time_sec.map_or(true, |t| t > 0.0);
            let length_ok = edge.length_m.map_or(true, |l| l > 0.0);
            if !fixed_ok || !length_ok {
                return Err(InstanceError::InvalidEdge {
                    from: edge.from,
                    to: edge.to,
                });
            }
        }

        let mut robot_ids = HashSet::new();
        for robot in &self.robots {
            if !robot_ids.insert(robot.id) {
                return Err(InstanceError::DuplicateRobot(robot.id));
            }
            if !self.workspace.contains(robot.start) {
                return Err(InstanceError::UnknownRobotVertex {
                    robot: robot.id,
                    vertex: robot.start,
                });
            }
            if !self.workspace.can_occupy(robot.start, robot.kind) {
                return Err(InstanceError::ForbiddenStart {
                    robot: robot.id,
                    kind: robot.kind,
                    vertex: robot.start,
                });
            }
            match (robot.kind, robot.battery) {
                (RobotKind::Aerial, None) => return Err(InstanceError::MissingBattery(robot.id)),
                (RobotKind::Aerial, Some(battery)) => {
                    if !battery.is_valid() {
                        return Err(InstanceError::InvalidBattery {
                            robot: robot.id,
                            charge_wh: battery.charge_wh,
                            capacity_wh: battery.capacity_wh,
                        });
                    }
                    if !self.workspace.contains(battery.home) {
                        return Err(InstanceError::UnknownRobotVertex {
                            robot: robot.id,
                            vertex: battery.home,
                        });
                    }
                }
                (_, Some(_)) => return Err(InstanceError::UnexpectedBattery(robot.id)),
                (_, None) => {}
            }
        }

        let mut task_ids = HashSet::new();
        for task in &self.tasks {
            if !task_ids.insert(task.id) {
                return Err(InstanceError::DuplicateTask(task.id));
            }
        }
        for task in &self.tasks {
            if !self.workspace.contains(task.location) {
                return Err(InstanceError::UnknownTaskVertex {
                    task: task.id,
                    vertex: task.location,
                });
            }
            if !(task.duration.mean_sec >= 0.0) || !(task.duration.std_sec >= 0.0) {
                return Err(InstanceError::InvalidDuration {
                    task: task.id,
                    duration_sec: task.duration.mean_sec,
                });
            }
            for pred in &task.precedence {
                if !task_ids.contains(pred) {
                    return Err(InstanceError::UnknownPrecedence {
                        task: task.id,
                        missing: *pred,
                    });
                }
            }
            let capable = self.robots.iter().any(|r| {
                r.can_perform(task.task_type) && self.workspace.can_occupy(task.location, r.kind)
            });
            if !capable {
                return Err(InstanceError::NoCompatibleRobot {
                    task: task.id,
                    task_type: task.task_type,
                });
            }
        }

        self.precedence_order().map(|_| ())
    }

    /// Precedence DAG with an edge from every predecessor to its successor.
    /// Nodes are added by ascending task id, so unrelated tasks keep that
    /// order in [`Instance::precedence_order`].
    pub fn precedence_graph(&self) -> Result<DiGraph<TaskId, ()>, InstanceError> {
        let mut ids: Vec<TaskId> = self.tasks.iter().map(|t| t.id).collect();
        ids.sort();
        let mut graph = DiGraph::with_capacity(ids.len(), ids.len());
        let nodes: HashMap<TaskId, NodeIndex> =
            ids.iter().map(|id| (*id, graph.add_node(*id))).collect();

        for task in &self.tasks {
            let Some(&to) = nodes.get(&task.id) else {
                continue;
            };
            for pred in &task.precedence {
                let from = nodes.get(pred).ok_or(InstanceError::UnknownPrecedence {
                    task: task.id,
                    missing: *pred,
                })?;
                graph.add_edge(*from, to, ());
            }
        }
        Ok(graph)
    }

    /// Tasks in an order consistent with precedence.
    pub fn precedence_order(&self) -> Result<Vec<TaskId>, InstanceError> {
        let graph = self.precedence_graph()?;
        let order = toposort(&graph, None)
            .map_err(|cycle| InstanceError::PrecedenceCycle(graph[cycle.node_id()]))?;
        Ok(order.into_iter().map(|node| graph[node]).collect())
    }

    /// Whether `later` transitively waits on `earlier`.
    pub fn must_follow(&self, later: TaskId, earlier: TaskId) -> Result<bool, InstanceError> {
        let graph = self.precedence_graph()?;
        let find = |id: TaskId| graph.node_indices().find(|n| graph[*n] == id);
        let (Some(from), Some(to)) = (find(earlier), find(later)) else {
            return Ok(false);
        };
        Ok(from != to && has_path_connecting(&graph, from, to, None))
    }
}
