//! Entry points that pick a solver from [`SolverConfig::solver`].

use crate::cbs::{
    CancelFlag, CbsSolver, ConflictResolver, DeadlineResolver, EnergyResolver, MixedResolver,
    StandardResolver, StochasticResolver,
};
use crate::config::{SolverConfig, SolverKind};
use crate::error::SolveResult;
use crate::hybrid::HybridSolver;
use crate::instance::Instance;
use crate::mcts::MctsSolver;
use crate::prioritized::PrioritizedSolver;
use crate::solution::{Assignment, Solution};
use crate::trace::{NoopTrace, SearchTrace};

/// Per-call options beyond the solver configuration.
#[derive(Debug, Clone, Default)]
pub struct SolveOptions {
    /// Fixed task assignment; the greedy allocator runs when unset
    pub assignment: Option<Assignment>,
    /// Set to stop the search early; the call then fails with
    /// [`SolveError::NoSolution`](crate::error::SolveError::NoSolution)
    pub cancel: Option<CancelFlag>,
}

/// Plan `instance` with the variant named in `config`.
pub fn solve(instance: &Instance, config: &SolverConfig) -> SolveResult<Solution> {
    solve_traced(instance, config, SolveOptions::default(), &mut NoopTrace)
}

/// Like [`solve`], with a fixed assignment or a cancellation flag.
pub fn solve_with(
    instance: &Instance,
    config: &SolverConfig,
    options: SolveOptions,
) -> SolveResult<Solution> {
    solve_traced(instance, config, options, &mut NoopTrace)
}

/// Like [`solve_with`], reporting constraint-tree events to `trace`.
/// PRIORITIZED and FIELD-GUIDED-MCTS build no constraint tree and report
/// nothing.
pub fn solve_traced(
    instance: &Instance,
    config: &SolverConfig,
    options: SolveOptions,
    trace: &mut dyn SearchTrace,
) -> SolveResult<Solution> {
    let config = config.clone();
    match config.solver {
        SolverKind::Cbs => run(StandardResolver, config, options, instance, trace),
        SolverKind::Hybrid => {
            let mut solver = HybridSolver::new(config);
            if let Some(cancel) = options.cancel {
                solver = solver.with_cancel(cancel);
            }
            solver.solve_traced(instance, options.assignment, trace)
        }
        SolverKind::Mixed => {
            let resolver = MixedResolver::new(&instance.workspace, &config);
            run(resolver, config, options, instance, trace)
        }
        SolverKind::Energy => {
            let resolver = EnergyResolver::new(&config);
            run(resolver, config, options, instance, trace)
        }
        SolverKind::Deadline => {
            let resolver = DeadlineResolver::new(&config);
            run(resolver, config, options, instance, trace)
        }
        SolverKind::Stochastic => {
            let resolver = StochasticResolver::new(&config);
            run(resolver, config, options, instance, trace)
        }
        SolverKind::Prioritized => {
            PrioritizedSolver::new(config).solve_with(instance, options.assignment)
        }
        SolverKind::Mcts => {
            let mut solver = MctsSolver::new(config);
            if let Some(cancel) = options.cancel {
                solver = solver.with_cancel(cancel);
            }
            solver.solve_with(instance, options.assignment)
        }
    }
}

fn run<R: ConflictResolver>(
    resolver: R,
    config: SolverConfig,
    options: SolveOptions,
    instance: &Instance,
    trace: &mut dyn SearchTrace,
) -> SolveResult<Solution> {
    let mut solver = CbsSolver::new(resolver, config);
    if let Some(cancel) = options.cancel {
        solver = solver.with_cancel(cancel);
    }
    solver.solve_traced(instance, options.assignment, trace)
}
