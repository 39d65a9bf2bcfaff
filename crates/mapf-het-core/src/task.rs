//! Task types, durations and robot compatibility.

use crate::robot::RobotKind;
use crate::workspace::VertexId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Full pack swap
    SwapBattery,
    /// Single module swap
    SwapModule,
    /// Diagnostic scan
    Diagnose,
    Clean,
    /// Visual inspection from the air
    AerialInspect,
    /// Carry small parts
    AerialDelivery,
    /// Mapping / monitoring pass
    AerialSurvey,
}

impl TaskType {
    pub const ALL: [TaskType; 7] = [
        TaskType::SwapBattery,
        TaskType::SwapModule,
        TaskType::Diagnose,
        TaskType::Clean,
        TaskType::AerialInspect,
        TaskType::AerialDelivery,
        TaskType::AerialSurvey,
    ];

    /// Nominal service duration (mean, std) in seconds.
    pub fn nominal_duration(self) -> TaskDuration {
        let (mean_sec, std_sec) = match self {
            TaskType::SwapBattery => (120.0, 15.0),
            TaskType::SwapModule => (45.0, 8.0),
            TaskType::Diagnose => (30.0, 5.0),
            TaskType::Clean => (60.0, 10.0),
            TaskType::AerialInspect => (20.0, 3.0),
            TaskType::AerialDelivery => (15.0, 2.0),
            TaskType::AerialSurvey => (90.0, 12.0),
        };
        TaskDuration { mean_sec, std_sec }
    }

    /// Pull of a task location on the navigation field. Battery swaps
    /// and deliveries draw hardest.
    pub fn attraction(self) -> f64 {
        match self {
            TaskType::SwapBattery => 10.0,
            TaskType::AerialDelivery => 8.0,
            TaskType::SwapModule => 7.0,
            TaskType::AerialInspect => 6.0,
            TaskType::Diagnose => 5.0,
            TaskType::AerialSurvey => 4.0,
            TaskType::Clean => 3.0,
        }
    }

    pub fn compatible_kinds(self) -> &'static [RobotKind] {
        match self {
            TaskType::SwapBattery => &[RobotKind::Rail],
            TaskType::SwapModule | TaskType::Diagnose => &[RobotKind::Planar, RobotKind::Rail],
            TaskType::Clean => &[RobotKind::Planar],
            TaskType::AerialInspect | TaskType::AerialDelivery | TaskType::AerialSurvey => {
                &[RobotKind::Aerial]
            }
        }
    }

    pub fn capability(self) -> Capability {
        let bit = match self {
            TaskType::SwapBattery => 0,
            TaskType::SwapModule => 1,
            TaskType::Diagnose => 2,
            TaskType::Clean => 3,
            TaskType::AerialInspect => 4,
            TaskType::AerialDelivery => 5,
            TaskType::AerialSurvey => 6,
        };
        Capability(1 << bit)
    }
}

/// Capability bitmask used when matching tasks against an executor that
/// advertises what it can do at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(pub u16);

impl Capability {
    pub const NONE: Capability = Capability(0);

    pub fn contains(self, need: Capability) -> bool {
        can_perform(self, need)
    }
}

impl BitOr for Capability {
    type Output = Capability;

    fn bitor(self, rhs: Capability) -> Capability {
        Capability(self.0 | rhs.0)
    }
}

/// `true` when every required bit is present.
#[inline]
pub fn can_perform(have: Capability, need: Capability) -> bool {
    (have.0 & need.0) == need.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskDuration {
    pub mean_sec: f64,
    #[serde(default)]
    pub std_sec: f64,
}

impl TaskDuration {
    pub fn fixed(sec: f64) -> Self {
        Self {
            mean_sec: sec,
            std_sec: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub location: VertexId,
    pub duration: TaskDuration,
    /// Hard deadline; the instance deadline applies when unset
    #[serde(default)]
    pub deadline_sec: Option<f64>,
    /// Tasks that must complete before this one may start
    #[serde(default)]
    pub precedence: Vec<TaskId>,
}

impl Task {
    /// Task with its type's nominal duration and no deadline.
    pub fn new(id: u32, task_type: TaskType, location: u32) -> Self {
        Self {
            id: TaskId(id),
            task_type,
            location: VertexId(location),
            duration: task_type.nominal_duration(),
            deadline_sec: None,
            precedence: Vec::new(),
        }
    }

    pub fn with_duration(mut self, duration: TaskDuration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_deadline(mut self, deadline_sec: f64) -> Self {
        self.deadline_sec = Some(deadline_sec);
        self
    }

    pub fn after(mut self, predecessor: u32) -> Self {
        self.precedence.push(TaskId(predecessor));
        self
    }

    pub fn deadline_or(&self, global_deadline_sec: f64) -> f64 {
        self.deadline_sec.unwrap_or(global_deadline_sec)
    }

    pub fn service_sec(&self) -> f64 {
        self.duration.mean_sec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nominal_durations_match_task_type() {
        let d = TaskType::SwapBattery.nominal_duration();
        assert_eq!((d.mean_sec, d.std_sec), (120.0, 15.0));
        let task = Task::new(1, TaskType::AerialDelivery, 3);
        assert_eq!(task.service_sec(), 15.0);
    }

    #[test]
    fn compatibility_relation() {
        assert_eq!(TaskType::SwapBattery.compatible_kinds(), &[RobotKind::Rail]);
        assert!(TaskType::Diagnose.compatible_kinds().contains(&RobotKind::Planar));
        assert!(!TaskType::Clean.compatible_kinds().contains(&RobotKind::Aerial));
    }

    #[test]
    fn capability_bits_are_distinct() {
        let all = TaskType::ALL
            .iter()
            .fold(Capability::NONE, |acc, t| acc | t.capability());
        assert_eq!(all.0.count_ones(), 7);
        assert!(can_perform(all, TaskType::Clean.capability()));
        assert!(!can_perform(
            TaskType::Clean.capability(),
            TaskType::Clean.capability() | TaskType::Diagnose.capability()
        ));
    }

    #[test]
    fn deadline_falls_back_to_global() {
        let task = Task::new(1, TaskType::Clean, 0);
        assert_eq!(task.deadline_or(300.0), 300.0);
        assert_eq!(task.with_deadline(90.0).deadline_or(300.0), 90.0);
    }
}
