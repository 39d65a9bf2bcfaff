//! Conflict-based search.
//!
//! One high-level driver serves every variant. What differs between CBS,
//! MIXED-CBS, E-CBS and the deadline / stochastic variants is how a node's
//! violation is chosen and turned into child branches; that policy lives
//! behind [`ConflictResolver`].
//!
//! Nodes are value snapshots. A child clones its parent, adds the branch's
//! constraints and replans only the branch's robot (plus robots whose
//! precedence release times move).

pub mod deadline;
pub mod energy;
pub mod mixed;
pub mod standard;
pub mod stochastic;

pub use deadline::DeadlineResolver;
pub use energy::EnergyResolver;
pub use mixed::{ConflictClass, MixedResolver, RailNetwork};
pub use standard::StandardResolver;
pub use stochastic::StochasticResolver;

use crate::assignment::{greedy_assignment, validate_assignment};
use crate::config::SolverConfig;
use crate::conflict::{Conflict, ConflictDetector, ConflictKind};
use crate::constraint::{Constraint, MustReachBy, TimeWindow, TIME_TOLERANCE};
use crate::energy::EnergyViolation;
use crate::error::{SolveError, SolveResult};
use crate::heuristic::HeuristicTables;
use crate::instance::Instance;
use crate::plan::{self, Itinerary, Planner, Plans, Stop};
use crate::robot::RobotId;
use crate::search::{EnergyMode, FloatOrd};
use crate::solution::{Assignment, Path, Solution, TimedVertex};
use crate::trace::{NodeDiagnostic, NodeInfo, NoopTrace, SearchStats, SearchTrace};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

/// Cooperative cancellation shared with the caller.
pub type CancelFlag = Arc<AtomicBool>;

/// What a node is branched on.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    Conflict(Conflict),
    Energy(EnergyViolation),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Conflict(c) => write!(f, "{}", c),
            Violation::Energy(e) => write!(f, "{}", e),
        }
    }
}

/// One child: the robot to replan and what changes for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub robot: RobotId,
    pub constraints: Vec<Constraint>,
    pub must_reach: Vec<MustReachBy>,
    /// Stop inserted into the robot's itinerary at the given index
    pub insert_stop: Option<(usize, Stop)>,
}

impl Branch {
    pub fn constrain(robot: RobotId, constraints: Vec<Constraint>) -> Self {
        Self {
            robot,
            constraints,
            must_reach: Vec::new(),
            insert_stop: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub branches: Vec<Branch>,
    /// Tried only when every primary branch is infeasible
    pub fallback: Vec<Branch>,
}

impl Resolution {
    pub fn new(branches: Vec<Branch>) -> Self {
        Self {
            branches,
            fallback: Vec::new(),
        }
    }

    pub fn with_fallback(mut self, fallback: Vec<Branch>) -> Self {
        self.fallback = fallback;
        self
    }
}

/// Generic two-way split: each robot is kept out of the conflict location
/// during `window`. Point windows keep the split complete and optimal.
pub fn split(conflict: &Conflict, window: TimeWindow) -> Resolution {
    let (a, b) = (conflict.first, conflict.second);
    let branches = match conflict.kind {
        ConflictKind::Vertex { vertex } => vec![
            Branch::constrain(a, vec![Constraint::vertex(a, vertex, window)]),
            Branch::constrain(b, vec![Constraint::vertex(b, vertex, window)]),
        ],
        ConflictKind::Edge { from, to } => vec![
            Branch::constrain(a, vec![Constraint::edge(a, from, to, window)]),
            Branch::constrain(b, vec![Constraint::edge(b, to, from, window)]),
        ],
        ConflictKind::Corridor { corridor } => vec![
            Branch::constrain(a, vec![Constraint::corridor(a, corridor, window)]),
            Branch::constrain(b, vec![Constraint::corridor(b, corridor, window)]),
        ],
    };
    Resolution::new(branches)
}

/// High-level search node.
#[derive(Debug, Clone)]
pub struct HighLevelNode {
    pub id: u64,
    pub parent: Option<u64>,
    pub depth: usize,
    pub constraints: Vec<Constraint>,
    pub must_reach: Vec<MustReachBy>,
    pub itineraries: BTreeMap<RobotId, Itinerary>,
    pub plans: Plans,
    /// Makespan or sum of costs, per the configured objective
    pub cost: f64,
    pub sum_of_costs: f64,
}

impl HighLevelNode {
    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            id: self.id,
            parent: self.parent,
            depth: self.depth,
            cost: self.cost,
            constraints: self.constraints.len(),
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = (RobotId, &[TimedVertex])> + '_ {
        self.plans.iter().map(|(id, p)| (*id, p.path.as_slice()))
    }

    pub fn path(&self, robot: RobotId) -> Option<&Path> {
        self.plans.get(&robot).map(|p| &p.path)
    }

    pub fn paths_map(&self) -> BTreeMap<RobotId, Path> {
        self.plans
            .iter()
            .map(|(id, p)| (*id, p.path.clone()))
            .collect()
    }

    pub fn charge_stops(&self, robot: RobotId) -> usize {
        self.itineraries
            .get(&robot)
            .map_or(0, |it| it.iter().filter(|s| matches!(s, Stop::Charge { .. })).count())
    }

    fn refresh_cost(&mut self, config: &SolverConfig) {
        self.cost = plan::objective_cost(config.objective, &self.plans);
        self.sum_of_costs = plan::sum_of_costs(&self.plans);
    }
}

/// Read-only state shared by the driver and the resolver.
pub struct PlanContext<'a> {
    pub instance: &'a Instance,
    pub config: &'a SolverConfig,
    pub detector: ConflictDetector<'a>,
    pub planner: Planner<'a>,
}

impl PlanContext<'_> {
    pub fn first_conflict(&self, node: &HighLevelNode) -> Option<Conflict> {
        self.detector.first_conflict(node.paths())
    }

    pub fn conflict_count(&self, node: &HighLevelNode) -> usize {
        self.detector.count(node.paths())
    }
}

/// Branching policy plugged into [`CbsSolver`].
pub trait ConflictResolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// How the low level treats drone energy for this variant.
    fn energy_mode(&self) -> EnergyMode {
        EnergyMode::Prune
    }

    /// Whether the first solution popped is cost-optimal.
    fn exact(&self) -> bool {
        true
    }

    /// Violation to branch on; `None` when the node is a solution.
    fn select(&self, ctx: &PlanContext<'_>, node: &HighLevelNode) -> Option<Violation>;

    fn resolve(
        &self,
        ctx: &PlanContext<'_>,
        node: &HighLevelNode,
        violation: &Violation,
    ) -> Resolution;

    /// Validates a child after its robot was replanned.
    fn accept(&self, _ctx: &PlanContext<'_>, _child: &HighLevelNode, _robot: RobotId) -> bool {
        true
    }

    /// Drops a node before it enters the open set.
    fn prune(&self, _ctx: &PlanContext<'_>, _node: &HighLevelNode) -> bool {
        false
    }

    /// Last check on a violation-free node.
    fn accept_solution(&self, _ctx: &PlanContext<'_>, _node: &HighLevelNode) -> bool {
        true
    }

    /// Suboptimality bound of a focal list, when the variant uses one.
    fn focal_weight(&self) -> Option<f64> {
        None
    }

    /// Secondary ordering inside the focal list. `None` keeps the node out of it.
    fn focal_score(&self, _ctx: &PlanContext<'_>, _node: &HighLevelNode) -> Option<f64> {
        None
    }
}

struct OpenEntry {
    cost: FloatOrd,
    soc: FloatOrd,
    id: u64,
    focal: Option<f64>,
    node: Box<HighLevelNode>,
}

impl OpenEntry {
    fn key(&self) -> (FloatOrd, FloatOrd, u64) {
        (self.cost, self.soc, self.id)
    }
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

type OpenSet = BinaryHeap<Reverse<OpenEntry>>;

enum Expansion {
    Solution(HighLevelNode),
    Children(Vec<HighLevelNode>),
}

/// Forwards trace events to the caller while counting them.
struct Recorder<'t> {
    stats: SearchStats,
    user: &'t mut dyn SearchTrace,
}

impl SearchTrace for Recorder<'_> {
    fn node_generated(&mut self, node: &NodeInfo) {
        self.stats.node_generated(node);
        self.user.node_generated(node);
    }

    fn node_expanded(&mut self, node: &NodeInfo) {
        self.stats.node_expanded(node);
        self.user.node_expanded(node);
    }

    fn node_pruned(&mut self, node: &NodeInfo) {
        self.stats.node_pruned(node);
        self.user.node_pruned(node);
    }

    fn violation_found(&mut self, node: &NodeInfo, violation: &Violation) {
        self.stats.violation_found(node, violation);
        self.user.violation_found(node, violation);
    }

    fn solution_found(&mut self, node: &NodeInfo) {
        self.stats.solution_found(node);
        self.user.solution_found(node);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Result of the high-level loop.
struct Found {
    node: HighLevelNode,
    /// False when a parallel run stopped on budget with only an incumbent
    proven: bool,
}

/// Shared state of a parallel run.
struct Shared {
    open: OpenSet,
    in_flight: usize,
    expanded: usize,
    lower_bound: f64,
    incumbent: Option<HighLevelNode>,
    best: Option<NodeDiagnostic>,
    failure: Option<SolveError>,
    done: bool,
}

/// High-level CBS driver.
pub struct CbsSolver<R> {
    resolver: R,
    config: SolverConfig,
    cancel: Option<CancelFlag>,
}

impl<R: ConflictResolver> CbsSolver<R> {
    pub fn new(resolver: R, config: SolverConfig) -> Self {
        Self {
            resolver,
            config,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn solve(&self, instance: &Instance) -> SolveResult<Solution> {
        self.solve_traced(instance, None, &mut NoopTrace)
    }

    /// Solve with a caller-chosen task assignment instead of the greedy one.
    pub fn solve_with_assignment(
        &self,
        instance: &Instance,
        assignment: Assignment,
    ) -> SolveResult<Solution> {
        self.solve_traced(instance, Some(assignment), &mut NoopTrace)
    }

    pub fn solve_traced(
        &self,
        instance: &Instance,
        assignment: Option<Assignment>,
        trace: &mut dyn SearchTrace,
    ) -> SolveResult<Solution> {
        let started = Instant::now();
        instance.validate()?;
        let order = instance.precedence_order()?;
        let tables = HeuristicTables::build(instance);
        let assignment = match assignment {
            Some(given) => {
                validate_assignment(instance, &given)?;
                given
            }
            None => greedy_assignment(instance, &tables, &order)?,
        };

        tracing::info!(
            "{} starting: {} robots, {} tasks, {} worker(s)",
            self.resolver.name(),
            instance.robots.len(),
            instance.tasks.len(),
            self.config.workers.max(1)
        );

        let ctx = PlanContext {
            instance,
            config: &self.config,
            detector: ConflictDetector::for_instance(instance, self.config.corridor_exclusive),
            planner: Planner::new(instance, &self.config, &tables, order),
        };

        let recorder = Mutex::new(Recorder {
            stats: SearchStats::default(),
            user: trace,
        });
        let found = self.search(&ctx, &assignment, &recorder, started);
        let mut stats = recorder
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .stats;
        stats.low_level_calls = ctx.planner.low_level_calls();
        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        let found = match found {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!("{} failed: {}", self.resolver.name(), err);
                return Err(err);
            }
        };

        let node = found.node;
        let mut solution = Solution {
            solver: self.resolver.name().to_string(),
            paths: node.paths_map(),
            assignment: plan::assignment_of(&node.itineraries),
            schedule: plan::schedule(&node.plans),
            makespan: 0.0,
            sum_of_costs: node.sum_of_costs,
            feasible: true,
            exact: found.proven && self.resolver.exact() && self.config.is_exact(),
            stats,
        };
        solution.makespan = solution.compute_makespan(instance);

        tracing::info!(
            "{} finished: makespan {:.3}s after {} expansions ({} ms)",
            self.resolver.name(),
            solution.makespan,
            solution.stats.nodes_expanded,
            solution.stats.elapsed_ms
        );
        Ok(solution)
    }

    fn search(
        &self,
        ctx: &PlanContext<'_>,
        assignment: &Assignment,
        trace: &Mutex<Recorder<'_>>,
        started: Instant,
    ) -> SolveResult<Found> {
        let mode = self.resolver.energy_mode();
        let itineraries = ctx.planner.root_itineraries(assignment);
        let Some(plans) = ctx.planner.plan_all(&[], &itineraries, mode) else {
            return Err(SolveError::NoSolution { lower_bound: 0.0 });
        };
        let mut root = HighLevelNode {
            id: 0,
            parent: None,
            depth: 0,
            constraints: Vec::new(),
            must_reach: Vec::new(),
            itineraries,
            plans,
            cost: 0.0,
            sum_of_costs: 0.0,
        };
        root.refresh_cost(&self.config);
        lock(trace).node_generated(&root.info());

        if self.resolver.prune(ctx, &root) {
            lock(trace).node_pruned(&root.info());
            tracing::info!("{} pruned the root node", self.resolver.name());
            return Err(SolveError::NoSolution {
                lower_bound: root.cost,
            });
        }

        let next_id = AtomicU64::new(1);
        let workers = self.config.workers.max(1);
        if workers > 1 && self.resolver.focal_weight().is_none() {
            self.search_parallel(ctx, root, &next_id, trace, started, workers)
        } else {
            self.search_sequential(ctx, root, &next_id, trace, started)
        }
    }

    fn search_sequential(
        &self,
        ctx: &PlanContext<'_>,
        root: HighLevelNode,
        next_id: &AtomicU64,
        trace: &Mutex<Recorder<'_>>,
        started: Instant,
    ) -> SolveResult<Found> {
        let mut open = OpenSet::new();
        self.push(ctx, &mut open, root);
        let mut expanded = 0usize;
        let mut lower_bound: f64 = 0.0;
        let mut best: Option<NodeDiagnostic> = None;

        loop {
            if self.exhausted(expanded, started) {
                tracing::warn!(
                    "{} stopped after {} expansions (lower bound {:.3}s)",
                    self.resolver.name(),
                    expanded,
                    lower_bound
                );
                return Err(SolveError::Timeout {
                    expanded,
                    lower_bound,
                    best,
                });
            }
            let Some(entry) = self.pop(&mut open) else {
                return Err(SolveError::NoSolution { lower_bound });
            };
            let node = *entry.node;
            lower_bound = lower_bound.max(node.cost);
            expanded += 1;
            lock(trace).node_expanded(&node.info());
            if expanded % 500 == 0 {
                tracing::debug!(
                    "{} expanded {} nodes, open {}, cost {:.3}",
                    self.resolver.name(),
                    expanded,
                    open.len(),
                    node.cost
                );
            }

            match self.expand(ctx, node, next_id, trace, &mut best) {
                Expansion::Solution(node) => {
                    return Ok(Found { node, proven: true });
                }
                Expansion::Children(children) => {
                    for child in children {
                        self.push(ctx, &mut open, child);
                    }
                }
            }
        }
    }

    fn search_parallel(
        &self,
        ctx: &PlanContext<'_>,
        root: HighLevelNode,
        next_id: &AtomicU64,
        trace: &Mutex<Recorder<'_>>,
        started: Instant,
        workers: usize,
    ) -> SolveResult<Found> {
        let mut open = OpenSet::new();
        self.push(ctx, &mut open, root);
        let shared = Mutex::new(Shared {
            open,
            in_flight: 0,
            expanded: 0,
            lower_bound: 0.0,
            incumbent: None,
            best: None,
            failure: None,
            done: false,
        });
        let wake = Condvar::new();

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| self.worker(ctx, &shared, &wake, next_id, trace, started));
            }
        });

        let shared = shared.into_inner().unwrap_or_else(PoisonError::into_inner);
        match (shared.incumbent, shared.failure) {
            (Some(node), None) => Ok(Found { node, proven: true }),
            (Some(node), Some(_)) => Ok(Found { node, proven: false }),
            (None, Some(err)) => Err(err),
            (None, None) => Err(SolveError::NoSolution {
                lower_bound: shared.lower_bound,
            }),
        }
    }

    fn worker(
        &self,
        ctx: &PlanContext<'_>,
        shared: &Mutex<Shared>,
        wake: &Condvar,
        next_id: &AtomicU64,
        trace: &Mutex<Recorder<'_>>,
        started: Instant,
    ) {
        let mut state = lock(shared);
        loop {
            if state.done {
                return;
            }
            let open_min = state.open.peek().map(|Reverse(e)| e.cost.0);
            let incumbent_cost = state.incumbent.as_ref().map(|n| n.cost);
            // Nothing left that could beat the incumbent
            let settled = match (open_min, incumbent_cost) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(min), Some(best)) => min >= best - TIME_TOLERANCE,
            };
            if (settled || state.open.is_empty()) && state.in_flight == 0 {
                state.done = true;
                wake.notify_all();
                return;
            }
            if settled || state.open.is_empty() {
                state = wake.wait(state).unwrap_or_else(PoisonError::into_inner);
                continue;
            }
            if self.exhausted(state.expanded, started) {
                tracing::warn!(
                    "{} stopped after {} expansions (lower bound {:.3}s)",
                    self.resolver.name(),
                    state.expanded,
                    state.lower_bound
                );
                state.failure = Some(SolveError::Timeout {
                    expanded: state.expanded,
                    lower_bound: state.lower_bound,
                    best: state.best.clone(),
                });
                state.done = true;
                wake.notify_all();
                return;
            }

            let Some(Reverse(entry)) = state.open.pop() else {
                continue;
            };
            state.in_flight += 1;
            state.expanded += 1;
            state.lower_bound = state.lower_bound.max(entry.cost.0);
            let mut best = state.best.clone();
            drop(state);

            let node = *entry.node;
            lock(trace).node_expanded(&node.info());
            let expansion = self.expand(ctx, node, next_id, trace, &mut best);

            state = lock(shared);
            state.in_flight -= 1;
            if diagnostic_improves(state.best.as_ref(), best.as_ref()) {
                state.best = best;
            }
            match expansion {
                Expansion::Solution(node) => {
                    let key =
                        |n: &HighLevelNode| (FloatOrd(n.cost), FloatOrd(n.sum_of_costs), n.id);
                    let better = state.incumbent.as_ref().map_or(true, |inc| key(&node) < key(inc));
                    if better {
                        tracing::debug!("{} new incumbent {:.3}s", self.resolver.name(), node.cost);
                        state.incumbent = Some(node);
                    }
                }
                Expansion::Children(children) => {
                    for child in children {
                        self.push(ctx, &mut state.open, child);
                    }
                }
            }
            wake.notify_all();
        }
    }

    fn exhausted(&self, expanded: usize, started: Instant) -> bool {
        if expanded >= self.config.node_budget {
            return true;
        }
        if self
            .config
            .time_budget()
            .is_some_and(|budget| started.elapsed() >= budget)
        {
            return true;
        }
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(AtomicOrdering::Relaxed))
    }

    fn push(&self, ctx: &PlanContext<'_>, open: &mut OpenSet, node: HighLevelNode) {
        let focal = match self.resolver.focal_weight() {
            Some(_) => self.resolver.focal_score(ctx, &node),
            None => None,
        };
        open.push(Reverse(OpenEntry {
            cost: FloatOrd(node.cost),
            soc: FloatOrd(node.sum_of_costs),
            id: node.id,
            focal,
            node: Box::new(node),
        }));
    }

    /// Lowest-cost entry, or the best focal entry when a focal list is in use.
    fn pop(&self, open: &mut OpenSet) -> Option<OpenEntry> {
        let Some(weight) = self.resolver.focal_weight() else {
            return open.pop().map(|Reverse(e)| e);
        };
        let min_cost = open.peek()?.0.cost.0;
        let bound = min_cost * weight + TIME_TOLERANCE;

        let mut entries: Vec<OpenEntry> = std::mem::take(open)
            .into_vec()
            .into_iter()
            .map(|Reverse(e)| e)
            .collect();
        let mut chosen: Option<usize> = None;
        for (i, entry) in entries.iter().enumerate() {
            let Some(score) = entry.focal.filter(|_| entry.cost.0 <= bound) else {
                continue;
            };
            let better = match chosen {
                None => true,
                Some(j) => {
                    let current = entries[j].focal.unwrap_or(f64::INFINITY);
                    let tied = (score - current).abs() <= 1e-12;
                    score < current - 1e-12 || (tied && entry.key() < entries[j].key())
                }
            };
            if better {
                chosen = Some(i);
            }
        }
        let index = match chosen {
            Some(i) => i,
            None => entries
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.key().cmp(&b.1.key()))
                .map(|(i, _)| i)?,
        };
        let entry = entries.swap_remove(index);
        *open = entries.into_iter().map(Reverse).collect();
        Some(entry)
    }

    fn expand(
        &self,
        ctx: &PlanContext<'_>,
        node: HighLevelNode,
        next_id: &AtomicU64,
        trace: &Mutex<Recorder<'_>>,
        best: &mut Option<NodeDiagnostic>,
    ) -> Expansion {
        let Some(violation) = self.resolver.select(ctx, &node) else {
            if self.resolver.accept_solution(ctx, &node) {
                lock(trace).solution_found(&node.info());
                return Expansion::Solution(node);
            }
            lock(trace).node_pruned(&node.info());
            return Expansion::Children(Vec::new());
        };

        lock(trace).violation_found(&node.info(), &violation);
        let diagnostic = NodeDiagnostic {
            node: node.info(),
            conflicts: ctx.conflict_count(&node).max(1),
            first_violation: Some(violation.to_string()),
        };
        if diagnostic_improves(best.as_ref(), Some(&diagnostic)) {
            *best = Some(diagnostic);
        }

        let resolution = self.resolver.resolve(ctx, &node, &violation);
        let mut children = self.make_children(ctx, &node, &resolution.branches, next_id, trace);
        if children.is_empty() && !resolution.fallback.is_empty() {
            children = self.make_children(ctx, &node, &resolution.fallback, next_id, trace);
        }
        Expansion::Children(children)
    }

    fn make_children(
        &self,
        ctx: &PlanContext<'_>,
        parent: &HighLevelNode,
        branches: &[Branch],
        next_id: &AtomicU64,
        trace: &Mutex<Recorder<'_>>,
    ) -> Vec<HighLevelNode> {
        let mut children = Vec::new();
        for branch in branches {
            let id = next_id.fetch_add(1, AtomicOrdering::Relaxed);
            match self.make_child(ctx, parent, branch, id) {
                Ok(child) => {
                    lock(trace).node_generated(&child.info());
                    children.push(child);
                }
                Err(info) => lock(trace).node_pruned(&info),
            }
        }
        children
    }

    fn make_child(
        &self,
        ctx: &PlanContext<'_>,
        parent: &HighLevelNode,
        branch: &Branch,
        id: u64,
    ) -> Result<HighLevelNode, NodeInfo> {
        let mut child = parent.clone();
        child.id = id;
        child.parent = Some(parent.id);
        child.depth = parent.depth + 1;
        child.constraints.extend(branch.constraints.iter().copied());
        child.must_reach.extend(branch.must_reach.iter().copied());
        if let Some((index, stop)) = branch.insert_stop {
            let itinerary = child.itineraries.entry(branch.robot).or_default();
            let index = index.min(itinerary.len());
            itinerary.insert(index, stop);
        }

        let feasible = ctx.planner.replan(
            &child.constraints,
            &child.itineraries,
            &mut child.plans,
            branch.robot,
            self.resolver.energy_mode(),
        );
        child.refresh_cost(&self.config);
        if !feasible
            || !self.resolver.accept(ctx, &child, branch.robot)
            || self.resolver.prune(ctx, &child)
        {
            return Err(child.info());
        }
        Ok(child)
    }
}

fn diagnostic_improves(
    current: Option<&NodeDiagnostic>,
    candidate: Option<&NodeDiagnostic>,
) -> bool {
    match (current, candidate) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(cur), Some(cand)) => cand.conflicts < cur.conflicts,
    }
}
