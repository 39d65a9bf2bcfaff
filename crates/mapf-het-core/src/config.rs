//! Solver configuration.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Field weight of the HYBRID preset
pub const HYBRID_FIELD_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    /// Generic two-way split
    #[default]
    Cbs,
    /// Dimensional conflict classification
    Mixed,
    /// Energy repair before spatial conflicts
    Energy,
    /// Slack-driven conflict selection and deadline pruning
    Deadline,
    /// Lognormal durations with a focal set
    Stochastic,
    /// One robot at a time, no backtracking
    Prioritized,
    /// CBS with a potential-field guided low level and path refinement
    Hybrid,
    /// Monte-Carlo tree search with field-guided rollouts
    Mcts,
}

impl SolverKind {
    /// Name reported in `Solution::solver` and the logs.
    pub fn name(self) -> &'static str {
        match self {
            SolverKind::Cbs => "CBS",
            SolverKind::Mixed => "MIXED-CBS",
            SolverKind::Energy => "E-CBS",
            SolverKind::Deadline => "DEADLINE-CBS",
            SolverKind::Stochastic => "STOCHASTIC-ECBS",
            SolverKind::Prioritized => "PRIORITIZED",
            SolverKind::Hybrid => "HYBRID-CBS",
            SolverKind::Mcts => "FIELD-GUIDED-MCTS",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "cbs" => Some(SolverKind::Cbs),
            "mixed" => Some(SolverKind::Mixed),
            "energy" | "ecbs" => Some(SolverKind::Energy),
            "deadline" => Some(SolverKind::Deadline),
            "stochastic" => Some(SolverKind::Stochastic),
            "prioritized" => Some(SolverKind::Prioritized),
            "hybrid" => Some(SolverKind::Hybrid),
            "mcts" => Some(SolverKind::Mcts),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Latest task completion
    #[default]
    Makespan,
    /// Sum of per-robot completion times
    SumOfCosts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub solver: SolverKind,
    pub objective: Objective,
    /// Planning horizon for the low-level search (seconds)
    pub horizon_sec: f64,
    /// Duration of a single wait action (seconds)
    pub wait_step_sec: f64,
    /// Low-level expansions before a single replan gives up
    pub low_level_expansions: usize,
    /// High-level nodes expanded before reporting a timeout
    pub node_budget: usize,
    /// Wall-clock budget for one solve call
    pub time_budget_ms: Option<u64>,
    /// Worker threads expanding high-level nodes
    pub workers: usize,
    /// Enforce one drone per vertical corridor at a time
    pub corridor_exclusive: bool,
    /// Buffer around rail/planar crossings and air-ground handoffs (seconds)
    pub crossing_buffer_sec: f64,
    /// Margin before projected depletion for must-reach-by deadlines (seconds)
    pub charge_margin_sec: f64,
    /// Charging stops inserted per drone before the branch is abandoned
    pub max_charge_stops: usize,
    /// Slack below which a task is critical (seconds)
    pub slack_threshold_sec: f64,
    /// Suboptimality bound of the focal set
    pub focal_weight: f64,
    /// Accepted probability of missing the deadline
    pub deadline_epsilon: f64,
    /// Monte-Carlo samples for deadline probability, 0 for the analytic estimate only
    pub monte_carlo_samples: usize,
    pub seed: u64,
    /// Weight of the potential-field term in the low-level heuristic
    pub field_weight: f64,
    /// Tree-search iterations of the MCTS solver
    pub mcts_iterations: usize,
    /// Single-robot actions per rollout
    pub mcts_depth: usize,
    /// Bias of MCTS expansion towards field-aligned moves
    pub mcts_field_bias: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            solver: SolverKind::Cbs,
            objective: Objective::Makespan,
            horizon_sec: 3600.0,
            wait_step_sec: 1.0,
            low_level_expansions: 250_000,
            node_budget: 10_000,
            time_budget_ms: None,
            workers: 1,
            corridor_exclusive: true,
            crossing_buffer_sec: 1.0,
            charge_margin_sec: 5.0,
            max_charge_stops: 4,
            slack_threshold_sec: 10.0,
            focal_weight: 1.5,
            deadline_epsilon: 0.05,
            monte_carlo_samples: 100,
            seed: 42,
            field_weight: 0.0,
            mcts_iterations: 500,
            mcts_depth: 200,
            mcts_field_bias: 2.0,
        }
    }
}

impl SolverConfig {
    /// Defaults for a given variant.
    pub fn for_kind(solver: SolverKind) -> Self {
        let mut config = Self {
            solver,
            ..Self::default()
        };
        if solver == SolverKind::Hybrid {
            config.field_weight = HYBRID_FIELD_WEIGHT;
        }
        config
    }

    /// Defaults overridden by `MAPF_HET_*` environment variables.
    pub fn from_env() -> Self {
        let solver = env::var("MAPF_HET_SOLVER")
            .ok()
            .and_then(|s| SolverKind::parse(&s))
            .unwrap_or_default();
        let defaults = Self::for_kind(solver);
        Self {
            horizon_sec: env_parse("MAPF_HET_HORIZON_SEC").unwrap_or(defaults.horizon_sec),
            wait_step_sec: env_parse("MAPF_HET_WAIT_STEP_SEC").unwrap_or(defaults.wait_step_sec),
            node_budget: env_parse("MAPF_HET_NODE_BUDGET").unwrap_or(defaults.node_budget),
            time_budget_ms: env_parse("MAPF_HET_TIME_BUDGET_MS").or(defaults.time_budget_ms),
            workers: env_parse("MAPF_HET_WORKERS").unwrap_or(defaults.workers),
            charge_margin_sec: env_parse("MAPF_HET_CHARGE_MARGIN_SEC")
                .unwrap_or(defaults.charge_margin_sec),
            seed: env_parse("MAPF_HET_SEED").unwrap_or(defaults.seed),
            field_weight: env_parse("MAPF_HET_FIELD_WEIGHT").unwrap_or(defaults.field_weight),
            mcts_iterations: env_parse("MAPF_HET_MCTS_ITERATIONS")
                .unwrap_or(defaults.mcts_iterations),
            ..defaults
        }
    }

    /// Wall-clock budget, if one is configured.
    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_ms.map(Duration::from_millis)
    }

    /// Field weight the low level actually uses. HYBRID always steers by
    /// the field and falls back to its preset weight when none is set.
    pub fn effective_field_weight(&self) -> f64 {
        if self.solver == SolverKind::Hybrid && self.field_weight <= 0.0 {
            HYBRID_FIELD_WEIGHT
        } else {
            self.field_weight.max(0.0)
        }
    }

    /// Whether the low level keeps an admissible heuristic.
    pub fn is_exact(&self) -> bool {
        self.effective_field_weight() <= 0.0
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}
