//! Forward energy simulation for aerial robots.
//!
//! A path is walked segment by segment. Each segment is classified as hover,
//! horizontal flight, climb or descent and draws that action's power for its
//! duration. Standing on a ground charging pad restores the battery to
//! capacity.

use crate::instance::Instance;
use crate::robot::{MoveAction, Robot, RobotId};
use crate::solution::{Path, TimedVertex};
use crate::workspace::{VertexId, Workspace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Charge below this is treated as depleted.
const DEPLETION_EPSILON_WH: f64 = 1e-9;

/// Action performed between two consecutive path samples.
pub fn classify(workspace: &Workspace, from: VertexId, to: VertexId) -> MoveAction {
    if from == to {
        return MoveAction::Hover;
    }
    let from_layer = workspace.layer_of(from);
    let to_layer = workspace.layer_of(to);
    if to_layer > from_layer {
        MoveAction::Climb
    } else if to_layer < from_layer {
        MoveAction::Descend
    } else {
        MoveAction::Horizontal
    }
}

/// Energy drawn between two samples. Sitting on a charging pad draws nothing.
pub fn segment_energy_wh(
    workspace: &Workspace,
    from: VertexId,
    to: VertexId,
    duration_sec: f64,
) -> f64 {
    if from == to && is_charging_pad(workspace, from) {
        return 0.0;
    }
    classify(workspace, from, to).energy_wh(duration_sec)
}

pub fn is_charging_pad(workspace: &Workspace, vertex: VertexId) -> bool {
    workspace.vertex(vertex).is_some_and(|v| v.is_charging_pad())
}

/// First point at which a drone's battery would go negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyViolation {
    pub robot: RobotId,
    /// Instant the charge reaches zero
    pub time: f64,
    /// Vertex the drone was leaving when it ran dry
    pub vertex: VertexId,
}

impl fmt::Display for EnergyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} depletes its battery at t={:.3}s near {}",
            self.robot, self.time, self.vertex
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergySample {
    pub time: f64,
    pub vertex: VertexId,
    /// Charge on arrival at this sample, after any pad reset
    pub charge_wh: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnergyProfile {
    pub samples: Vec<EnergySample>,
    pub consumed_wh: f64,
    pub min_charge_wh: f64,
    pub recharges: usize,
}

/// Walk `path` and return the charge at every sample, or the first depletion.
/// Robots that do not track energy get an empty profile.
pub fn simulate(
    instance: &Instance,
    robot: &Robot,
    path: &[TimedVertex],
) -> Result<EnergyProfile, EnergyViolation> {
    let mut profile = EnergyProfile::default();
    if !robot.tracks_energy() {
        return Ok(profile);
    }
    let workspace = &instance.workspace;
    let capacity = robot.capacity_wh();
    let Some(first) = path.first() else {
        profile.min_charge_wh = robot.initial_charge_wh();
        return Ok(profile);
    };

    let mut charge = if is_charging_pad(workspace, first.vertex) {
        capacity
    } else {
        robot.initial_charge_wh()
    };
    profile.min_charge_wh = charge;
    profile.samples.push(EnergySample {
        time: first.time,
        vertex: first.vertex,
        charge_wh: charge,
    });

    for pair in path.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        let duration = (to.time - from.time).max(0.0);
        let drawn = segment_energy_wh(workspace, from.vertex, to.vertex, duration);

        if charge - drawn < -DEPLETION_EPSILON_WH {
            let power = classify(workspace, from.vertex, to.vertex).power_w();
            let time = from.time + charge.max(0.0) * 3600.0 / power;
            return Err(EnergyViolation {
                robot: robot.id,
                time,
                vertex: from.vertex,
            });
        }

        charge = (charge - drawn).max(0.0);
        profile.consumed_wh += drawn;
        profile.min_charge_wh = profile.min_charge_wh.min(charge);

        if to.vertex != from.vertex && is_charging_pad(workspace, to.vertex) {
            charge = capacity;
            profile.recharges += 1;
        }
        profile.samples.push(EnergySample {
            time: to.time,
            vertex: to.vertex,
            charge_wh: charge,
        });
    }

    Ok(profile)
}

/// Earliest depletion across every robot, lower robot id on ties.
pub fn first_violation(
    instance: &Instance,
    paths: &BTreeMap<RobotId, Path>,
) -> Option<EnergyViolation> {
    let mut earliest: Option<EnergyViolation> = None;
    for (id, path) in paths {
        let Some(robot) = instance.robot(*id) else {
            continue;
        };
        if let Err(violation) = simulate(instance, robot, path) {
            // BTreeMap order means the first robot to hit a given time wins the tie
            if earliest.map_or(true, |e| violation.time < e.time) {
                earliest = Some(violation);
            }
        }
    }
    earliest
}
