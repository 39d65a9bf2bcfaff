//! Solver variant integration tests.
//!
//! Runs each variant through `solve`/`solve_with` on mixed fleets and checks
//! the properties every returned plan must have: no conflicts, drones that
//! never run dry, and each robot kind staying in the space it can move in.

use mapf_het_core::energy;
use mapf_het_core::{
    solve, solve_with, Assignment, ConflictDetector, Edge, Instance, Layer, Pos, Robot, RobotId,
    RobotKind, SolveError, SolveOptions, Solution, SolverConfig, SolverKind, Task, TaskDuration,
    TaskId, TaskType, Vertex, VertexId, Workspace,
};

fn fixed(id: u32, task_type: TaskType, location: u32) -> Task {
    Task::new(id, task_type, location).with_duration(TaskDuration::fixed(0.0))
}

fn with_assignment(pairs: &[(u32, u32)]) -> SolveOptions {
    SolveOptions {
        assignment: Some(
            pairs
                .iter()
                .map(|(t, r)| (TaskId(*t), RobotId(*r)))
                .collect::<Assignment>(),
        ),
        ..SolveOptions::default()
    }
}

fn assert_conflict_free(instance: &Instance, solution: &Solution) {
    let detector = ConflictDetector::for_instance(instance, true);
    let paths: Vec<_> = solution.paths.iter().map(|(id, p)| (*id, p.as_slice())).collect();
    if let Some(conflict) = detector.first_conflict(paths) {
        panic!("{} left a conflict: {conflict}", solution.solver);
    }
}

/// Ground robots stay on the ground; drones move within a layer along an
/// edge or change layer through a corridor.
fn assert_moves_are_legal(instance: &Instance, solution: &Solution) {
    for (robot, path) in &solution.paths {
        let kind = instance.robot_kind(*robot).unwrap();
        for step in path.windows(2) {
            let (a, b) = (step[0].vertex, step[1].vertex);
            assert!(step[1].time >= step[0].time, "{robot} goes back in time");
            if a == b {
                continue;
            }
            if kind.is_aerial() {
                let horizontal = instance.workspace.edge(a, b).is_some()
                    && instance.workspace.layer_of(a) == instance.workspace.layer_of(b);
                assert!(
                    horizontal || instance.airspace.can_transition(a, b),
                    "{robot} jumps from {a} to {b}"
                );
            } else {
                assert!(instance.workspace.edge(a, b).is_some(), "{robot} leaves the graph");
                assert_eq!(instance.workspace.layer_of(b), Layer::Ground);
                assert!(instance.workspace.can_occupy(b, kind));
            }
        }
    }
}

/// Pad 0 under a corridor reaching the work layer, two work waypoints, and a
/// separate ground lane 10-11-12 for a cleaner.
fn corridor_field() -> Instance {
    let mut ws = Workspace::new();
    ws.add_vertex(Vertex::new(0, Pos::default()).with_pad().shared());
    ws.add_vertex(Vertex::aerial(1, 0.0, 0.0, Layer::Handoff).with_corridor());
    ws.add_vertex(Vertex::aerial(2, 0.0, 0.0, Layer::Work).with_corridor());
    ws.add_vertex(Vertex::aerial(3, 10.0, 0.0, Layer::Work));
    ws.add_vertex(Vertex::aerial(4, -10.0, 0.0, Layer::Work));
    ws.add_edge(Edge::timed(2, 3, 2.0));
    ws.add_edge(Edge::timed(2, 4, 2.0));
    for (i, id) in [10, 11, 12].into_iter().enumerate() {
        ws.add_vertex(Vertex::new(id, Pos::new(20.0 + i as f64, 0.0, 0.0)));
    }
    ws.add_edge(Edge::timed(10, 11, 1.0));
    ws.add_edge(Edge::timed(11, 12, 1.0));
    let robots = vec![
        Robot::drone(1, 0, 0, 50.0),
        Robot::drone(2, 0, 0, 50.0),
        Robot::new(3, RobotKind::Planar, 10),
    ];
    let tasks = vec![
        fixed(1, TaskType::AerialInspect, 3),
        fixed(2, TaskType::AerialInspect, 4),
        fixed(3, TaskType::Clean, 12),
    ];
    Instance::new(ws, robots, tasks, 100.0)
}

fn rail(id: u32, x: f64, y: f64) -> Vertex {
    Vertex::new(id, Pos::new(x, y, 0.0)).restricted_to(&[RobotKind::Rail])
}

/// Rail line 0-1-2-3-4. A planar robot crosses it at 2 on its way from 5
/// to 6 and reaches the crossing at the same instant as the rail robot.
fn rail_crossing(deadline: f64) -> Instance {
    let mut ws = Workspace::new();
    for i in [0, 1, 3, 4] {
        ws.add_vertex(rail(i, i as f64, 0.0));
    }
    ws.add_vertex(
        Vertex::new(2, Pos::new(2.0, 0.0, 0.0))
            .restricted_to(&[RobotKind::Rail, RobotKind::Planar]),
    );
    ws.add_vertex(
        Vertex::new(5, Pos::new(2.0, -2.0, 0.0)).restricted_to(&[RobotKind::Planar]),
    );
    ws.add_vertex(Vertex::new(6, Pos::new(2.0, 1.0, 0.0)).restricted_to(&[RobotKind::Planar]));
    for i in 0..4 {
        ws.add_edge(Edge::timed(i, i + 1, 1.0));
    }
    ws.add_edge(Edge::timed(5, 2, 2.0));
    ws.add_edge(Edge::timed(2, 6, 1.0));
    let robots = vec![
        Robot::new(1, RobotKind::Rail, 0),
        Robot::new(2, RobotKind::Planar, 5),
    ];
    let tasks = vec![
        fixed(1, TaskType::SwapBattery, 4),
        fixed(2, TaskType::Clean, 6),
    ];
    Instance::new(ws, robots, tasks, deadline)
}

/// Only one drone may be inside the corridor, so the second one waits for a
/// full transit of the first.
#[test]
fn test_corridor_is_exclusive() {
    let instance = corridor_field();
    let assignment = [(1, 1), (2, 2), (3, 3)];
    let solution = solve_with(&instance, &SolverConfig::default(), with_assignment(&assignment))
        .unwrap();
    let full_transit = instance.airspace.corridors()[0].full_transit_sec();
    assert_eq!(full_transit, 5.0);
    // Alone, each drone needs a 5 s climb and a 2 s flight
    assert!(solution.makespan >= 7.0 + full_transit - 1e-6);
    assert!(solution.exact);
    assert_conflict_free(&instance, &solution);
    assert_moves_are_legal(&instance, &solution);

    // Without exclusivity the second drone climbs right behind the first
    let relaxed_config = SolverConfig {
        corridor_exclusive: false,
        ..SolverConfig::default()
    };
    let relaxed = solve_with(&instance, &relaxed_config, with_assignment(&assignment)).unwrap();
    assert!(relaxed.exact);
    assert!(solution.makespan > relaxed.makespan + 1e-6);
    let exclusive = ConflictDetector::for_instance(&instance, true);
    let paths: Vec<_> = relaxed.paths.iter().map(|(id, p)| (*id, p.as_slice())).collect();
    assert!(exclusive.first_conflict(paths).is_some());

    // Each drone alone reaches its target after a single climb
    for (task, drone) in [(1, 1), (2, 2)] {
        let mut alone = instance.clone();
        alone.robots.retain(|r| r.id == RobotId(drone));
        alone.tasks.retain(|t| t.id == TaskId(task));
        let solo = solve_with(&alone, &SolverConfig::default(), with_assignment(&[(task, drone)]))
            .unwrap();
        assert_eq!(solo.makespan, 7.0);
        assert!(solution.makespan >= solo.makespan + full_transit - 1e-6);
    }
}

#[test]
fn test_mixed_variant_keeps_each_kind_in_its_space() {
    let instance = corridor_field();
    let config = SolverConfig::for_kind(SolverKind::Mixed);
    let solution =
        solve_with(&instance, &config, with_assignment(&[(1, 1), (2, 2), (3, 3)])).unwrap();
    assert_eq!(solution.solver, "MIXED-CBS");
    assert!(!solution.exact);
    assert_conflict_free(&instance, &solution);
    assert_moves_are_legal(&instance, &solution);
    assert_eq!(solution.schedule[&TaskId(3)], 2.0);
}

#[test]
fn test_rail_crossing_is_resolved_by_every_search_variant() {
    let instance = rail_crossing(60.0);
    for kind in [
        SolverKind::Cbs,
        SolverKind::Mixed,
        SolverKind::Deadline,
        SolverKind::Prioritized,
        SolverKind::Hybrid,
        SolverKind::Mcts,
    ] {
        let config = SolverConfig::for_kind(kind);
        let solution = solve(&instance, &config).unwrap();
        assert_eq!(solution.solver, kind.name());
        assert_eq!(solution.assignment[&TaskId(1)], RobotId(1));
        assert_eq!(solution.assignment[&TaskId(2)], RobotId(2));
        assert!(solution.makespan >= 4.0);
        assert_conflict_free(&instance, &solution);
        assert_moves_are_legal(&instance, &solution);
    }
}

#[test]
fn test_only_exact_variants_claim_optimality() {
    let instance = rail_crossing(60.0);
    let exact = solve(&instance, &SolverConfig::for_kind(SolverKind::Cbs)).unwrap();
    assert!(exact.exact);
    assert_eq!(exact.makespan, 4.0);
    for kind in [
        SolverKind::Prioritized,
        SolverKind::Hybrid,
        SolverKind::Mixed,
        SolverKind::Mcts,
    ] {
        let solution = solve(&instance, &SolverConfig::for_kind(kind)).unwrap();
        assert!(!solution.exact, "{} claims optimality", solution.solver);
        assert!(solution.makespan >= exact.makespan - 1e-6);
    }
}

/// HYBRID steers by the field even when the config leaves its weight at 0.
#[test]
fn test_hybrid_defaults_differ_from_plain_cbs() {
    let instance = rail_crossing(60.0);
    let cbs = solve(&instance, &SolverConfig::default()).unwrap();
    let config = SolverConfig {
        solver: SolverKind::Hybrid,
        ..SolverConfig::default()
    };
    assert_eq!(config.field_weight, 0.0);
    let hybrid = solve(&instance, &config).unwrap();
    assert_eq!(cbs.solver, "CBS");
    assert_eq!(hybrid.solver, "HYBRID-CBS");
    assert!(cbs.exact);
    assert!(!hybrid.exact);
    assert!(hybrid.makespan >= cbs.makespan - 1e-6);
    assert_conflict_free(&instance, &hybrid);
    assert_moves_are_legal(&instance, &hybrid);
}

/// Rail line 0-1-2-3-4 with a siding 2-5. The rail robots meet head-on
/// between the junction and the end of the line.
fn head_on_rails() -> Instance {
    let mut ws = Workspace::new();
    for i in 0..5 {
        ws.add_vertex(rail(i, i as f64, 0.0));
    }
    ws.add_vertex(rail(5, 2.0, -1.0));
    for i in 0..4 {
        ws.add_edge(Edge::timed(i, i + 1, 1.0));
    }
    ws.add_edge(Edge::timed(2, 5, 1.0));
    let robots = vec![
        Robot::new(1, RobotKind::Rail, 0),
        Robot::new(2, RobotKind::Rail, 5),
    ];
    let tasks = vec![fixed(1, TaskType::SwapBattery, 4), fixed(2, TaskType::SwapBattery, 0)];
    Instance::new(ws, robots, tasks, 100.0)
}

/// One segment-wide yield resolves the head-on meeting at the CBS optimum.
#[test]
fn test_mixed_head_on_rails_match_cbs() {
    let instance = head_on_rails();
    let options = || with_assignment(&[(1, 1), (2, 2)]);
    let cbs = solve_with(&instance, &SolverConfig::default(), options()).unwrap();
    let mixed =
        solve_with(&instance, &SolverConfig::for_kind(SolverKind::Mixed), options()).unwrap();
    assert_eq!(mixed.solver, "MIXED-CBS");
    assert_eq!(cbs.makespan, 5.0);
    assert_eq!(mixed.makespan, cbs.makespan);
    assert_conflict_free(&instance, &mixed);
    assert_moves_are_legal(&instance, &mixed);
}

/// The tree search finishes every task on a plan the exact search would
/// accept, without claiming optimality.
#[test]
fn test_mcts_completes_the_corridor_field() {
    let instance = corridor_field();
    let config = SolverConfig::for_kind(SolverKind::Mcts);
    let solution =
        solve_with(&instance, &config, with_assignment(&[(1, 1), (2, 2), (3, 3)])).unwrap();
    assert_eq!(solution.solver, "FIELD-GUIDED-MCTS");
    assert!(!solution.exact);
    assert_eq!(solution.schedule.len(), 3);
    assert_conflict_free(&instance, &solution);
    assert_moves_are_legal(&instance, &solution);
    assert!(energy::first_violation(&instance, &solution.paths).is_none());

    let exact = solve_with(
        &instance,
        &SolverConfig::default(),
        with_assignment(&[(1, 1), (2, 2), (3, 3)]),
    )
    .unwrap();
    assert!(solution.makespan >= exact.makespan - 1e-6);
}

#[test]
fn test_deadline_variant_rejects_an_impossible_deadline() {
    // The rail robot alone needs 4 s
    let instance = rail_crossing(3.0);
    let err = solve(&instance, &SolverConfig::for_kind(SolverKind::Deadline)).unwrap_err();
    assert!(matches!(err, SolveError::NoSolution { .. }));
}

/// Drone hovering at 3 on a low battery; the task at 4 lies past the
/// corridor above pad 0.
fn low_battery() -> Instance {
    let mut ws = Workspace::new();
    ws.add_vertex(Vertex::new(0, Pos::default()).with_pad());
    ws.add_vertex(Vertex::aerial(1, 0.0, 0.0, Layer::Handoff).with_corridor());
    ws.add_vertex(Vertex::aerial(2, 0.0, 0.0, Layer::Work).with_corridor());
    ws.add_vertex(Vertex::aerial(3, 10.0, 0.0, Layer::Work));
    ws.add_vertex(Vertex::aerial(4, -40.0, 0.0, Layer::Work));
    ws.add_edge(Edge::timed(3, 2, 4.0));
    ws.add_edge(Edge::timed(2, 4, 20.0));
    let robots = vec![Robot::drone(1, 3, 0, 50.0).with_charge(0.3)];
    let tasks = vec![fixed(1, TaskType::AerialInspect, 4)];
    Instance::new(ws, robots, tasks, 500.0)
}

#[test]
fn test_energy_variant_never_runs_a_drone_dry() {
    let instance = low_battery();
    let config = SolverConfig::for_kind(SolverKind::Energy);
    let solution = solve_with(&instance, &config, with_assignment(&[(1, 1)])).unwrap();
    assert_eq!(solution.solver, "E-CBS");
    assert!(solution.stats.energy_violations >= 1);

    let drone = instance.robot(RobotId(1)).unwrap();
    let profile = energy::simulate(&instance, drone, &solution.paths[&RobotId(1)]).unwrap();
    assert!(profile.samples.iter().all(|s| s.charge_wh >= 0.0));
    assert!(solution.paths[&RobotId(1)].iter().any(|tv| tv.vertex == VertexId(0)));
    assert_moves_are_legal(&instance, &solution);
}

#[test]
fn test_energy_aware_low_level_detours_to_the_pad() {
    // Plain CBS tracks charge in the low level and finds the same detour
    let instance = low_battery();
    let solution =
        solve_with(&instance, &SolverConfig::default(), with_assignment(&[(1, 1)])).unwrap();
    assert_eq!(solution.stats.energy_violations, 0);
    assert!(solution.paths[&RobotId(1)].iter().any(|tv| tv.vertex == VertexId(0)));
    assert!(energy::first_violation(&instance, &solution.paths).is_none());
}

/// Single robot with a 40 s clean whose duration is uncertain.
fn uncertain_clean(std_sec: f64, deadline: f64) -> Instance {
    let mut ws = Workspace::new();
    ws.add_vertex(Vertex::new(0, Pos::default()));
    ws.add_vertex(Vertex::new(1, Pos::new(1.0, 0.0, 0.0)));
    ws.add_edge(Edge::timed(0, 1, 10.0));
    let robots = vec![Robot::new(1, RobotKind::Planar, 0)];
    let tasks = vec![Task::new(1, TaskType::Clean, 1).with_duration(TaskDuration {
        mean_sec: 40.0,
        std_sec,
    })];
    Instance::new(ws, robots, tasks, deadline)
}

#[test]
fn test_stochastic_variant_respects_the_risk_bound() {
    let config = SolverConfig::for_kind(SolverKind::Stochastic);

    let relaxed = uncertain_clean(4.0, 120.0);
    let solution = solve(&relaxed, &config).unwrap();
    assert_eq!(solution.solver, "STOCHASTIC-ECBS");
    assert!(!solution.exact);
    assert_eq!(solution.makespan, 50.0);

    // Mean completion already sits past the deadline
    let hopeless = uncertain_clean(4.0, 45.0);
    let err = solve(&hopeless, &config).unwrap_err();
    assert!(matches!(err, SolveError::NoSolution { .. }));
}
