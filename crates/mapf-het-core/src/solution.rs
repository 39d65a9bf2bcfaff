//! Planner output: timed paths, task schedule and makespan.

use crate::constraint::TIME_TOLERANCE;
use crate::instance::Instance;
use crate::robot::RobotId;
use crate::task::TaskId;
use crate::trace::SearchStats;
use crate::workspace::VertexId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedVertex {
    pub vertex: VertexId,
    pub time: f64,
}

impl TimedVertex {
    pub fn new(vertex: u32, time: f64) -> Self {
        Self {
            vertex: VertexId(vertex),
            time,
        }
    }
}

/// Time-ordered positions of one robot. Between two samples the robot either
/// waits (same vertex) or traverses the edge joining them.
pub type Path = Vec<TimedVertex>;

pub type Assignment = BTreeMap<TaskId, RobotId>;

/// Task -> service start time.
pub type Schedule = BTreeMap<TaskId, f64>;

/// Time the robot comes to rest for good.
pub fn path_end_time(path: &[TimedVertex]) -> f64 {
    path.last().map(|tv| tv.time).unwrap_or(0.0)
}

/// Vertex occupied at time `t`. While traversing an edge a robot is reported
/// at the vertex it left.
pub fn position_at(path: &[TimedVertex], t: f64) -> Option<VertexId> {
    let first = path.first()?;
    if t <= first.time {
        return Some(first.vertex);
    }
    let mut current = first.vertex;
    for tv in path {
        if tv.time > t + TIME_TOLERANCE {
            break;
        }
        current = tv.vertex;
    }
    Some(current)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Solution {
    /// Variant that produced the solution
    pub solver: String,
    pub paths: BTreeMap<RobotId, Path>,
    pub assignment: Assignment,
    pub schedule: Schedule,
    pub makespan: f64,
    pub sum_of_costs: f64,
    /// Conflict-free and energy-feasible
    pub feasible: bool,
    /// Produced by a variant with an optimality guarantee
    pub exact: bool,
    #[serde(default)]
    pub stats: SearchStats,
}

impl Solution {
    /// Maximum task completion time (start + nominal duration).
    pub fn compute_makespan(&self, instance: &Instance) -> f64 {
        self.schedule
            .iter()
            .filter_map(|(id, start)| instance.task(*id).map(|t| start + t.service_sec()))
            .fold(0.0, f64::max)
    }

    pub fn meets_deadline(&self, instance: &Instance) -> bool {
        self.makespan <= instance.deadline_sec + TIME_TOLERANCE
    }

    /// Tasks finishing after their own deadline.
    pub fn late_tasks(&self, instance: &Instance) -> Vec<TaskId> {
        self.schedule
            .iter()
            .filter_map(|(id, start)| {
                let task = instance.task(*id)?;
                let done = start + task.service_sec();
                (done > instance.task_deadline(task) + TIME_TOLERANCE).then_some(*id)
            })
            .collect()
    }

    pub fn position_at(&self, robot: RobotId, t: f64) -> Option<VertexId> {
        self.paths.get(&robot).and_then(|p| position_at(p, t))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_reports_departure_vertex_while_moving() {
        let path = vec![TimedVertex::new(1, 0.0), TimedVertex::new(2, 4.0)];
        assert_eq!(position_at(&path, 0.0), Some(VertexId(1)));
        assert_eq!(position_at(&path, 3.9), Some(VertexId(1)));
        assert_eq!(position_at(&path, 4.0), Some(VertexId(2)));
        assert_eq!(position_at(&path, 100.0), Some(VertexId(2)));
        assert_eq!(position_at(&[], 1.0), None);
        assert_eq!(path_end_time(&path), 4.0);
    }

    #[test]
    fn solution_serializes_to_json() {
        let mut solution = Solution {
            solver: "CBS".to_string(),
            feasible: true,
            ..Default::default()
        };
        solution
            .paths
            .insert(RobotId(1), vec![TimedVertex::new(0, 0.0)]);
        solution.schedule.insert(TaskId(3), 1.5);
        let json = solution.to_json().unwrap();
        assert!(json.contains("\"solver\": \"CBS\""));
        let back: Solution = serde_json::from_str(&json).unwrap();
        assert_eq!(back.schedule[&TaskId(3)], 1.5);
    }
}
