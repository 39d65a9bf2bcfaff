//! E-CBS: battery depletion treated as a violation of the node.
//!
//! The low level plans drones as if their batteries were unlimited. The
//! high level simulates every drone's charge and, at the first depletion,
//! branches by inserting a visit to the nearest pad that must happen a
//! safety margin before the battery would run dry.

use crate::config::SolverConfig;
use crate::constraint::{MustReachBy, TimeWindow, TIME_TOLERANCE};
use crate::energy::{self, EnergyViolation};
use crate::plan::Stop;
use crate::robot::RobotId;
use crate::search::EnergyMode;
use super::{split, Branch, ConflictResolver, HighLevelNode, PlanContext, Resolution, Violation};

#[derive(Debug, Clone, Copy)]
pub struct EnergyResolver {
    charge_margin_sec: f64,
    max_charge_stops: usize,
}

impl EnergyResolver {
    pub fn new(config: &SolverConfig) -> Self {
        Self {
            charge_margin_sec: config.charge_margin_sec.max(0.0),
            max_charge_stops: config.max_charge_stops,
        }
    }

    fn recharge(
        &self,
        ctx: &PlanContext<'_>,
        node: &HighLevelNode,
        violation: &EnergyViolation,
    ) -> Resolution {
        let robot = violation.robot;
        let Some(pad) = ctx
            .instance
            .airspace
            .nearest_pad(&ctx.instance.workspace, violation.vertex)
        else {
            tracing::debug!("{} has no pad to recharge at", robot);
            return Resolution::default();
        };
        if node.charge_stops(robot) >= self.max_charge_stops {
            tracing::debug!("{} reached {} charging stops", robot, self.max_charge_stops);
            return Resolution::default();
        }

        let by = (violation.time - self.charge_margin_sec).max(0.0);
        let itinerary = node.itineraries.get(&robot).map(Vec::as_slice).unwrap_or(&[]);
        // Before the first goal not yet finished when the battery runs out
        let index = node
            .plans
            .get(&robot)
            .and_then(|plan| {
                plan.visits
                    .iter()
                    .find(|v| v.end > violation.time + TIME_TOLERANCE)
                    .map(|v| v.goal)
            })
            .unwrap_or(itinerary.len());

        let duplicate = index
            .checked_sub(1)
            .and_then(|i| itinerary.get(i))
            .is_some_and(|stop| matches!(stop, Stop::Charge { pad: p, .. } if *p == pad));
        if duplicate {
            tracing::debug!("{} already charges at {} before stop {}", robot, pad, index);
            return Resolution::default();
        }

        Resolution::new(vec![Branch {
            robot,
            constraints: Vec::new(),
            must_reach: vec![MustReachBy { robot, pad, by }],
            insert_stop: Some((index, Stop::Charge { pad, by })),
        }])
    }
}

impl ConflictResolver for EnergyResolver {
    fn name(&self) -> &'static str {
        "E-CBS"
    }

    fn energy_mode(&self) -> EnergyMode {
        EnergyMode::Ignore
    }

    // Pad choice and stop placement are greedy
    fn exact(&self) -> bool {
        false
    }

    fn select(&self, ctx: &PlanContext<'_>, node: &HighLevelNode) -> Option<Violation> {
        if let Some(violation) = energy::first_violation(ctx.instance, &node.paths_map()) {
            return Some(Violation::Energy(violation));
        }
        ctx.first_conflict(node).map(Violation::Conflict)
    }

    fn resolve(
        &self,
        ctx: &PlanContext<'_>,
        node: &HighLevelNode,
        violation: &Violation,
    ) -> Resolution {
        match violation {
            Violation::Energy(depletion) => self.recharge(ctx, node, depletion),
            Violation::Conflict(conflict) => split(conflict, TimeWindow::point(conflict.time)),
        }
    }

    fn accept(&self, _ctx: &PlanContext<'_>, child: &HighLevelNode, robot: RobotId) -> bool {
        let Some(path) = child.path(robot) else {
            return false;
        };
        child
            .must_reach
            .iter()
            .filter(|m| m.robot == robot)
            .all(|m| m.is_satisfied_by(path))
    }
}
