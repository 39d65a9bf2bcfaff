//! Robot kinds, kinematics and the drone energy model.

use crate::task::{Capability, TaskType};
use crate::workspace::{Edge, VertexId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hover draw of a reference drone, in watts.
pub const HOVER_POWER_W: f64 = 50.0;
/// Vertical speed used for climbs and descents.
pub const CLIMB_SPEED_MPS: f64 = 2.0;
/// Charge below which a drone is drawn towards the pads
pub const LOW_BATTERY_PERCENT: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RobotId(pub u32);

impl fmt::Display for RobotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotKind {
    /// Rail-mounted, 1D, exclusive segment occupancy
    Rail,
    /// Holonomic ground robot, 2D
    Planar,
    /// Drone, 3D, energy-bounded
    Aerial,
}

impl RobotKind {
    pub const ALL: [RobotKind; 3] = [RobotKind::Rail, RobotKind::Planar, RobotKind::Aerial];

    pub fn default_speed_mps(self) -> f64 {
        match self {
            RobotKind::Rail => 2.0,
            RobotKind::Planar => 0.5,
            RobotKind::Aerial => 15.0,
        }
    }

    pub fn payload_kg(self) -> f64 {
        match self {
            RobotKind::Rail => 500.0,
            RobotKind::Planar => 50.0,
            RobotKind::Aerial => 2.0,
        }
    }

    pub fn dimensions(self) -> u8 {
        match self {
            RobotKind::Rail => 1,
            RobotKind::Planar => 2,
            RobotKind::Aerial => 3,
        }
    }

    /// Radius within which other robots are pushed away on the navigation field.
    pub fn footprint_radius_m(self) -> f64 {
        match self {
            RobotKind::Rail => 5.0,
            RobotKind::Planar => 2.0,
            RobotKind::Aerial => 1.5,
        }
    }

    pub fn is_aerial(self) -> bool {
        self == RobotKind::Aerial
    }

    /// Union of the capability bits of every task type this kind can perform.
    pub fn capabilities(self) -> Capability {
        TaskType::ALL
            .iter()
            .filter(|t| t.compatible_kinds().contains(&self))
            .fold(Capability::NONE, |acc, t| acc | t.capability())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveAction {
    Hover,
    Horizontal,
    Climb,
    Descend,
}

impl MoveAction {
    pub fn power_w(self) -> f64 {
        let factor = match self {
            MoveAction::Hover => 1.0,
            MoveAction::Horizontal => 1.5,
            MoveAction::Climb => 2.5,
            MoveAction::Descend => 0.8,
        };
        HOVER_POWER_W * factor
    }

    /// Energy in Wh drawn by performing this action for `duration_sec`.
    pub fn energy_wh(self, duration_sec: f64) -> f64 {
        self.power_w() * duration_sec.max(0.0) / 3600.0
    }
}

/// Drone battery. Charge stays within `[0, capacity_wh]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    pub capacity_wh: f64,
    pub charge_wh: f64,
    /// Home / charging pad
    pub home: VertexId,
}

impl Battery {
    pub fn full(capacity_wh: f64, home: VertexId) -> Self {
        Self {
            capacity_wh,
            charge_wh: capacity_wh,
            home,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.capacity_wh > 0.0 && self.charge_wh >= 0.0 && self.charge_wh <= self.capacity_wh
    }

    pub fn percentage(&self) -> f64 {
        if self.capacity_wh <= 0.0 {
            return 0.0;
        }
        self.charge_wh / self.capacity_wh * 100.0
    }

    pub fn is_low(&self) -> bool {
        self.percentage() < LOW_BATTERY_PERCENT
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Robot {
    pub id: RobotId,
    pub kind: RobotKind,
    pub start: VertexId,
    /// Overrides the kind's nominal speed
    #[serde(default)]
    pub speed_mps: Option<f64>,
    /// Present for aerial robots only
    #[serde(default)]
    pub battery: Option<Battery>,
}

impl Robot {
    pub fn new(id: u32, kind: RobotKind, start: u32) -> Self {
        Self {
            id: RobotId(id),
            kind,
            start: VertexId(start),
            speed_mps: None,
            battery: None,
        }
    }

    /// Fully charged drone homed at `home`.
    pub fn drone(id: u32, start: u32, home: u32, capacity_wh: f64) -> Self {
        Self {
            battery: Some(Battery::full(capacity_wh, VertexId(home))),
            ..Self::new(id, RobotKind::Aerial, start)
        }
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    pub fn with_charge(mut self, charge_wh: f64) -> Self {
        if let Some(battery) = self.battery.as_mut() {
            battery.charge_wh = charge_wh;
        }
        self
    }

    pub fn speed(&self) -> f64 {
        self.speed_mps.unwrap_or_else(|| self.kind.default_speed_mps())
    }

    pub fn travel_time(&self, edge: &Edge) -> f64 {
        edge.travel_time(self.speed())
    }

    pub fn tracks_energy(&self) -> bool {
        self.kind.is_aerial() && self.battery.is_some()
    }

    pub fn capacity_wh(&self) -> f64 {
        self.battery.map(|b| b.capacity_wh).unwrap_or(0.0)
    }

    pub fn initial_charge_wh(&self) -> f64 {
        self.battery.map(|b| b.charge_wh).unwrap_or(0.0)
    }

    pub fn can_perform(&self, task_type: TaskType) -> bool {
        task_type.compatible_kinds().contains(&self.kind)
    }
}
