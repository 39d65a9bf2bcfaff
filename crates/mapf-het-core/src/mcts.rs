//! FIELD-GUIDED-MCTS: Monte-Carlo tree search over single-robot actions.
//!
//! The simulated world advances event by event. The robot that becomes free
//! first (lower id on ties) picks its next action: wait, serve the task it
//! stands on, or take one of its best-aligned moves. Alignment is progress
//! towards the current task on the travel-time tables minus the robot's
//! field cost at the target. Expansion samples untried actions with weight
//! `exp(bias * alignment)`; rollouts follow the best-aligned progressing
//! move. The search is anytime and incomplete, so plans are never exact.

use crate::airspace::CorridorId;
use crate::assignment::{greedy_assignment, validate_assignment};
use crate::cbs::CancelFlag;
use crate::config::{SolverConfig, SolverKind};
use crate::conflict::ConflictDetector;
use crate::constraint::TIME_TOLERANCE;
use crate::energy;
use crate::error::{SolveError, SolveResult};
use crate::heuristic::{HeuristicTables, PotentialField};
use crate::instance::Instance;
use crate::robot::RobotId;
use crate::search::{Motion, Move};
use crate::solution::{path_end_time, Assignment, Path, Schedule, Solution, TimedVertex};
use crate::task::{Task, TaskId};
use crate::trace::SearchStats;
use crate::workspace::VertexId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::Ordering;
use std::time::Instant;

const EXPLORATION: f64 = std::f64::consts::SQRT_2;
/// Moves offered per decision besides waiting
const BRANCHING: usize = 2;
const MAKESPAN_PENALTY: f64 = 0.5;
/// Keeps `exp(bias * alignment)` finite
const MAX_ALIGNMENT: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Action {
    Wait,
    Move(Move),
    Serve(TaskId),
}

#[derive(Debug, Clone, Copy)]
struct Choice {
    action: Action,
    /// Travel time saved towards the current task
    progress: f64,
    alignment: f64,
}

impl Choice {
    fn fixed(action: Action) -> Self {
        Self {
            action,
            progress: 0.0,
            alignment: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
struct Agent {
    id: RobotId,
    aerial: bool,
    vertex: VertexId,
    /// End of the action in progress
    ready: f64,
    /// Where and when the action in progress started
    from: VertexId,
    departed: f64,
    /// Corridor held and until when; infinite while hovering inside it
    corridor: Option<(CorridorId, f64)>,
    goals: Vec<TaskId>,
    next: usize,
    path: Path,
}

impl Agent {
    fn goal(&self) -> Option<TaskId> {
        self.goals.get(self.next).copied()
    }

    fn advance(&mut self, vertex: VertexId, duration: f64) {
        self.from = self.vertex;
        self.departed = self.ready;
        self.vertex = vertex;
        self.ready += duration;
        self.path.push(TimedVertex {
            vertex,
            time: self.ready,
        });
    }
}

#[derive(Debug, Clone)]
struct State {
    agents: Vec<Agent>,
    /// Service interval of every task served so far
    served: HashMap<TaskId, (f64, f64)>,
}

impl State {
    /// Robot that decides next.
    fn actor(&self) -> Option<usize> {
        self.agents
            .iter()
            .enumerate()
            .filter(|(_, a)| a.goal().is_some())
            .min_by(|(_, a), (_, b)| a.ready.total_cmp(&b.ready).then(a.id.cmp(&b.id)))
            .map(|(i, _)| i)
    }

    fn finished(&self) -> bool {
        self.agents.iter().all(|a| a.goal().is_none())
    }

    fn span(&self) -> f64 {
        self.agents.iter().map(|a| a.ready).fold(0.0, f64::max)
    }
}

struct TreeNode {
    state: State,
    parent: Option<usize>,
    children: Vec<usize>,
    untried: Vec<Choice>,
    visits: u32,
    reward: f64,
}

impl TreeNode {
    fn ucb(&self, parent_visits: f64) -> f64 {
        if self.visits == 0 {
            return f64::INFINITY;
        }
        let visits = f64::from(self.visits);
        self.reward / visits + EXPLORATION * (parent_visits.ln() / visits).sqrt()
    }
}

/// World model shared by expansion, rollouts and extraction.
struct Simulator<'a> {
    instance: &'a Instance,
    config: &'a SolverConfig,
    tables: &'a HeuristicTables,
    fields: BTreeMap<RobotId, PotentialField>,
}

impl<'a> Simulator<'a> {
    fn root(&self, goals: &BTreeMap<RobotId, Vec<TaskId>>) -> State {
        let agents = self
            .instance
            .robots
            .iter()
            .map(|robot| Agent {
                id: robot.id,
                aerial: robot.kind.is_aerial(),
                vertex: robot.start,
                ready: 0.0,
                from: robot.start,
                departed: 0.0,
                corridor: self
                    .instance
                    .airspace
                    .airborne_corridor_of(robot.start)
                    .map(|c| (c, f64::INFINITY)),
                goals: goals.get(&robot.id).cloned().unwrap_or_default(),
                next: 0,
                path: vec![TimedVertex {
                    vertex: robot.start,
                    time: 0.0,
                }],
            })
            .collect();
        State {
            agents,
            served: HashMap::new(),
        }
    }

    fn terminal(&self, state: &State) -> bool {
        match state.actor() {
            Some(i) => state.agents[i].ready > self.config.horizon_sec,
            None => true,
        }
    }

    fn released(&self, state: &State, task: &Task, t: f64) -> bool {
        task.precedence.iter().all(|pred| {
            state
                .served
                .get(pred)
                .is_some_and(|(_, end)| *end <= t + TIME_TOLERANCE)
        })
    }

    /// Actions open to the next robot. Standing on its task with every
    /// predecessor done, it serves; otherwise it may wait or move.
    fn choices(&self, state: &State) -> Vec<Choice> {
        if self.terminal(state) {
            return Vec::new();
        }
        let Some(i) = state.actor() else {
            return Vec::new();
        };
        let agent = &state.agents[i];
        let Some(task) = agent.goal().and_then(|id| self.instance.task(id)) else {
            return Vec::new();
        };
        if agent.vertex == task.location {
            if self.released(state, task, agent.ready) {
                return vec![Choice::fixed(Action::Serve(task.id))];
            }
            return vec![Choice::fixed(Action::Wait)];
        }
        let (Some(robot), Some(here)) = (
            self.instance.robot(agent.id),
            self.tables.travel_time(agent.id, agent.vertex, task.location),
        ) else {
            return vec![Choice::fixed(Action::Wait)];
        };
        let field = self.fields.get(&agent.id);

        let mut choices: Vec<Choice> = Motion::for_robot(self.instance, robot)
            .moves(agent.vertex)
            .into_iter()
            .filter(|m| self.is_free(state, i, m))
            .filter_map(|m| {
                let there = self.tables.travel_time(agent.id, m.to, task.location)?;
                let progress = here - there;
                let cost = field.map_or(0.0, |f| f.value(m.to));
                Some(Choice {
                    action: Action::Move(m),
                    progress,
                    alignment: progress - cost,
                })
            })
            .collect();
        choices.sort_by(|a, b| b.alignment.total_cmp(&a.alignment));
        choices.truncate(BRANCHING);
        choices.push(Choice::fixed(Action::Wait));
        choices
    }

    /// Whether robot `i` may take `m` now without colliding with what the
    /// others have already committed to.
    fn is_free(&self, state: &State, i: usize, m: &Move) -> bool {
        let agent = &state.agents[i];
        let t = agent.ready;
        let airspace = &self.instance.airspace;
        let entering = if agent.aerial && self.config.corridor_exclusive {
            m.vertical.or_else(|| airspace.airborne_corridor_of(m.to))
        } else {
            None
        };
        let shared = self.instance.workspace.is_shared(m.to);

        state
            .agents
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .all(|(_, other)| {
                if other.vertex == m.to && !shared {
                    return false;
                }
                let swapping = other.from == m.to
                    && other.vertex == agent.vertex
                    && other.ready > t + TIME_TOLERANCE;
                if swapping {
                    return false;
                }
                match (entering, other.corridor) {
                    (Some(c), Some((held, until))) if other.aerial && held == c => {
                        t > until + TIME_TOLERANCE
                    }
                    _ => true,
                }
            })
    }

    fn apply(&self, state: &mut State, action: Action) {
        let Some(i) = state.actor() else {
            return;
        };
        let airspace = &self.instance.airspace;
        let agent = &mut state.agents[i];
        match action {
            Action::Wait => {
                let vertex = agent.vertex;
                agent.advance(vertex, self.config.wait_step_sec.max(TIME_TOLERANCE));
            }
            Action::Move(m) => {
                let left = agent.ready;
                let before = airspace.airborne_corridor_of(agent.vertex);
                agent.corridor = match (airspace.airborne_corridor_of(m.to), m.vertical, before) {
                    (Some(c), _, _) => Some((c, f64::INFINITY)),
                    (None, Some(c), _) => Some((c, left + m.duration)),
                    (None, None, Some(c)) => Some((c, left)),
                    (None, None, None) => agent.corridor,
                };
                agent.advance(m.to, m.duration);
            }
            Action::Serve(task) => {
                let service = self.instance.task(task).map_or(0.0, Task::service_sec);
                let start = agent.ready;
                let vertex = agent.vertex;
                agent.advance(vertex, service);
                agent.next += 1;
                state.served.insert(task, (start, start + service));
            }
        }
    }

    /// Serve when possible, else the best-aligned move that makes progress,
    /// else wait.
    fn greedy(&self, state: &State) -> Option<Action> {
        let choices = self.choices(state);
        if choices.is_empty() {
            return None;
        }
        if let Some(serve) = choices.iter().find(|c| matches!(c.action, Action::Serve(_))) {
            return Some(serve.action);
        }
        let best = choices
            .iter()
            .filter(|c| matches!(c.action, Action::Move(_)) && c.progress > TIME_TOLERANCE)
            .max_by(|a, b| a.alignment.total_cmp(&b.alignment));
        Some(best.map_or(Action::Wait, |c| c.action))
    }

    fn rollout(&self, state: &mut State, actions: usize) {
        for _ in 0..actions {
            let Some(action) = self.greedy(state) else {
                break;
            };
            self.apply(state, action);
        }
    }

    fn reward(&self, state: &State) -> f64 {
        let total = self.instance.tasks.len();
        let completion = if total == 0 {
            1.0
        } else {
            state.served.len() as f64 / total as f64
        };
        completion - MAKESPAN_PENALTY * state.span() / self.instance.deadline_sec.max(1.0)
    }
}

/// Field-guided Monte-Carlo tree search over robot actions. Never exact.
pub struct MctsSolver {
    config: SolverConfig,
    cancel: Option<CancelFlag>,
}

impl MctsSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config: SolverConfig {
                solver: SolverKind::Mcts,
                ..config
            },
            cancel: None,
        }
    }

    /// Checked once per iteration; a raised flag aborts with no solution.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn solve(&self, instance: &Instance) -> SolveResult<Solution> {
        self.solve_with(instance, None)
    }

    /// Runs the tree search, then follows the most visited children and
    /// completes the plan greedily. Fails when the completed plan leaves a
    /// task unserved, a conflict, or a drone without charge.
    pub fn solve_with(
        &self,
        instance: &Instance,
        assignment: Option<Assignment>,
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
        let mut goals: BTreeMap<RobotId, Vec<TaskId>> = BTreeMap::new();
        for task in &order {
            if let Some(robot) = assignment.get(task) {
                goals.entry(*robot).or_default().push(*task);
            }
        }

        let sim = Simulator {
            instance,
            config: &self.config,
            tables: &tables,
            fields: instance
                .robots
                .iter()
                .map(|r| (r.id, PotentialField::for_robot(instance, r.id)))
                .collect(),
        };
        tracing::info!(
            "FIELD-GUIDED-MCTS starting: {} robots, {} tasks, {} iterations",
            instance.robots.len(),
            instance.tasks.len(),
            self.config.mcts_iterations
        );

        let root = sim.root(&goals);
        let mut tree = vec![TreeNode {
            untried: sim.choices(&root),
            state: root,
            parent: None,
            children: Vec::new(),
            visits: 0,
            reward: 0.0,
        }];
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut iterations = 0;
        while iterations < self.config.mcts_iterations {
            if self.cancelled() {
                tracing::warn!("FIELD-GUIDED-MCTS cancelled after {} iterations", iterations);
                return Err(SolveError::NoSolution { lower_bound: 0.0 });
            }
            if self
                .config
                .time_budget()
                .is_some_and(|budget| started.elapsed() >= budget)
            {
                break;
            }
            iterations += 1;
            let leaf = self.expand(&sim, &mut tree, &mut rng);
            let mut state = tree[leaf].state.clone();
            sim.rollout(&mut state, self.config.mcts_depth);
            let reward = sim.reward(&state);
            let mut cursor = Some(leaf);
            while let Some(i) = cursor {
                tree[i].visits += 1;
                tree[i].reward += reward;
                cursor = tree[i].parent;
            }
        }

        let mut node = 0;
        while let Some(next) = tree[node]
            .children
            .iter()
            .copied()
            .max_by_key(|c| tree[*c].visits)
        {
            node = next;
        }
        let mut state = tree[node].state.clone();
        let budget = self.config.mcts_depth.max(1) * instance.robots.len().max(1);
        sim.rollout(&mut state, budget);
        if !state.finished() {
            tracing::warn!(
                "FIELD-GUIDED-MCTS: {} of {} tasks served",
                state.served.len(),
                instance.tasks.len()
            );
            return Err(SolveError::NoSolution { lower_bound: 0.0 });
        }

        let paths: BTreeMap<RobotId, Path> =
            state.agents.iter().map(|a| (a.id, a.path.clone())).collect();
        let detector = ConflictDetector::for_instance(instance, self.config.corridor_exclusive);
        let conflict = detector.first_conflict(paths.iter().map(|(id, p)| (*id, p.as_slice())));
        if let Some(conflict) = conflict {
            tracing::warn!("FIELD-GUIDED-MCTS: plan left a conflict: {}", conflict);
            return Err(SolveError::NoSolution { lower_bound: 0.0 });
        }
        if let Some(violation) = energy::first_violation(instance, &paths) {
            tracing::warn!("FIELD-GUIDED-MCTS: {}", violation);
            return Err(SolveError::NoSolution { lower_bound: 0.0 });
        }

        let stats = SearchStats {
            nodes_generated: tree.len(),
            nodes_expanded: iterations,
            elapsed_ms: started.elapsed().as_millis() as u64,
            ..SearchStats::default()
        };
        let mut solution = Solution {
            solver: SolverKind::Mcts.name().to_string(),
            sum_of_costs: paths.values().map(|p| path_end_time(p)).sum(),
            paths,
            assignment,
            schedule: state
                .served
                .iter()
                .map(|(t, (start, _))| (*t, *start))
                .collect::<Schedule>(),
            makespan: 0.0,
            feasible: true,
            exact: false,
            stats,
        };
        solution.makespan = solution.compute_makespan(instance);
        tracing::info!(
            "FIELD-GUIDED-MCTS finished: makespan {:.3}s after {} iterations",
            solution.makespan,
            iterations
        );
        Ok(solution)
    }

    /// Selection by UCB1 down to a node with untried actions, then one
    /// field-weighted expansion. Returns the node to roll out from.
    fn expand(&self, sim: &Simulator<'_>, tree: &mut Vec<TreeNode>, rng: &mut StdRng) -> usize {
        let mut node = 0;
        while tree[node].untried.is_empty() {
            let parent_visits = f64::from(tree[node].visits.max(1));
            let best = tree[node]
                .children
                .iter()
                .copied()
                .max_by(|a, b| {
                    let (ua, ub) = (tree[*a].ucb(parent_visits), tree[*b].ucb(parent_visits));
                    ua.total_cmp(&ub)
                });
            match best {
                Some(child) => node = child,
                None => return node,
            }
        }

        let untried = &tree[node].untried;
        let bias = self.config.mcts_field_bias;
        let weights: Vec<f64> = untried
            .iter()
            .map(|c| (bias * c.alignment.clamp(-MAX_ALIGNMENT, MAX_ALIGNMENT)).exp())
            .collect();
        let mut target = rng.random::<f64>() * weights.iter().sum::<f64>();
        let mut pick = weights.len() - 1;
        for (i, w) in weights.iter().enumerate() {
            if target <= *w {
                pick = i;
                break;
            }
            target -= w;
        }

        let choice = tree[node].untried.remove(pick);
        let mut state = tree[node].state.clone();
        sim.apply(&mut state, choice.action);
        tree.push(TreeNode {
            untried: sim.choices(&state),
            state,
            parent: Some(node),
            children: Vec::new(),
            visits: 0,
            reward: 0.0,
        });
        let child = tree.len() - 1;
        tree[node].children.push(child);
        child
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::airspace::Layer;
    use crate::robot::{Robot, RobotKind};
    use crate::task::{TaskDuration, TaskType};
    use crate::workspace::{Edge, Pos, Vertex, Workspace};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn fixed(id: u32, task_type: TaskType, location: u32) -> Task {
        Task::new(id, task_type, location).with_duration(TaskDuration::fixed(0.0))
    }

    /// Robot 1 crosses 1-0-2 and robot 2 crosses 3-0-4.
    fn junction() -> Instance {
        let mut ws = Workspace::new();
        ws.add_vertex(Vertex::new(0, Pos::new(0.0, 0.0, 0.0)));
        ws.add_vertex(Vertex::new(1, Pos::new(-1.0, 0.0, 0.0)));
        ws.add_vertex(Vertex::new(2, Pos::new(1.0, 0.0, 0.0)));
        ws.add_vertex(Vertex::new(3, Pos::new(0.0, -1.0, 0.0)));
        ws.add_vertex(Vertex::new(4, Pos::new(0.0, 1.0, 0.0)));
        for arm in 1..=4 {
            ws.add_edge(Edge::timed(0, arm, 1.0));
        }
        let robots = vec![
            Robot::new(1, RobotKind::Planar, 1),
            Robot::new(2, RobotKind::Planar, 3),
        ];
        let tasks = vec![fixed(1, TaskType::Clean, 2), fixed(2, TaskType::Clean, 4)];
        Instance::new(ws, robots, tasks, 60.0)
    }

    fn assigned() -> Assignment {
        Assignment::from([(TaskId(1), RobotId(1)), (TaskId(2), RobotId(2))])
    }

    #[test]
    fn robots_take_turns_at_the_junction() {
        let inst = junction();
        let solution = MctsSolver::new(SolverConfig::default())
            .solve_with(&inst, Some(assigned()))
            .unwrap();
        assert_eq!(solution.solver, "FIELD-GUIDED-MCTS");
        assert!(!solution.exact);
        assert!(solution.feasible);
        assert_eq!(solution.schedule.len(), 2);
        // Only one robot can stand on the junction at t=1
        assert!(solution.makespan >= 3.0 - TIME_TOLERANCE);
        let detector = ConflictDetector::new(&inst.workspace);
        let paths: Vec<_> = solution.paths.iter().map(|(id, p)| (*id, p.as_slice())).collect();
        assert!(detector.first_conflict(paths).is_none());
    }

    #[test]
    fn same_seed_gives_the_same_plan() {
        let inst = junction();
        let a = MctsSolver::new(SolverConfig::default()).solve(&inst).unwrap();
        let b = MctsSolver::new(SolverConfig::default()).solve(&inst).unwrap();
        assert_eq!(a.paths, b.paths);
        assert_eq!(a.schedule, b.schedule);
    }

    #[test]
    fn successor_starts_after_predecessor_ends() {
        let mut ws = Workspace::new();
        for i in 0..4 {
            ws.add_vertex(Vertex::new(i, Pos::new(i as f64, 0.0, 0.0)));
        }
        ws.add_edge(Edge::timed(0, 1, 1.0));
        ws.add_edge(Edge::timed(2, 3, 1.0));
        let robots = vec![
            Robot::new(1, RobotKind::Planar, 0),
            Robot::new(2, RobotKind::Planar, 2),
        ];
        let tasks = vec![
            Task::new(1, TaskType::Clean, 1).with_duration(TaskDuration::fixed(5.0)),
            fixed(2, TaskType::Clean, 3).after(1),
        ];
        let inst = Instance::new(ws, robots, tasks, 60.0);
        let solution = MctsSolver::new(SolverConfig::default())
            .solve_with(&inst, Some(assigned()))
            .unwrap();
        let (first, second) = (solution.schedule[&TaskId(1)], solution.schedule[&TaskId(2)]);
        assert!(first >= 1.0 - TIME_TOLERANCE);
        assert!(second >= first + 5.0 - TIME_TOLERANCE);
    }

    #[test]
    fn second_drone_waits_for_the_corridor() {
        let mut ws = Workspace::new();
        ws.add_vertex(Vertex::new(0, Pos::default()).with_pad().shared());
        ws.add_vertex(Vertex::aerial(1, 0.0, 0.0, Layer::Handoff).with_corridor());
        ws.add_vertex(Vertex::aerial(2, 0.0, 0.0, Layer::Work).with_corridor());
        ws.add_vertex(Vertex::aerial(3, 10.0, 0.0, Layer::Work));
        ws.add_vertex(Vertex::aerial(4, -10.0, 0.0, Layer::Work));
        ws.add_edge(Edge::timed(2, 3, 2.0));
        ws.add_edge(Edge::timed(2, 4, 2.0));
        let robots = vec![Robot::drone(1, 0, 0, 50.0), Robot::drone(2, 0, 0, 50.0)];
        let tasks = vec![
            fixed(1, TaskType::AerialInspect, 3),
            fixed(2, TaskType::AerialInspect, 4),
        ];
        let inst = Instance::new(ws, robots, tasks, 100.0);
        let solution = MctsSolver::new(SolverConfig::default())
            .solve_with(&inst, Some(assigned()))
            .unwrap();
        let detector = ConflictDetector::for_instance(&inst, true);
        let paths: Vec<_> = solution.paths.iter().map(|(id, p)| (*id, p.as_slice())).collect();
        assert!(detector.first_conflict(paths).is_none());
        // The later drone climbs only once the earlier one has left the
        // corridor, so the two inspections start a full climb apart
        let full_transit = inst.airspace.corridors()[0].full_transit_sec();
        let (first, second) = (solution.schedule[&TaskId(1)], solution.schedule[&TaskId(2)]);
        assert!((first - second).abs() >= full_transit - TIME_TOLERANCE);
    }

    #[test]
    fn cancellation_stops_the_search() {
        let flag: CancelFlag = Arc::new(AtomicBool::new(true));
        let err = MctsSolver::new(SolverConfig::default())
            .with_cancel(flag)
            .solve(&junction())
            .unwrap_err();
        assert!(matches!(err, SolveError::NoSolution { .. }));
    }
}
