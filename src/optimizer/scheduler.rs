//! Priority Scheduler
//!
//! Solves priority levels in strictly increasing order. After each level the
//! achievement of every goal at that level is recorded and imposed as a hard
//! constraint on all later levels.
//!
//! Extra objective terms (smoothing) never compete with goals. When any are
//! registered, one more problem is solved after the last level: it minimises
//! only those terms, with every achieved constraint held, and the final
//! assignment is taken from it. That solve runs under the last priority.
//!
//! ```text
//! PENDING ──► SOLVING_LEVEL(k) ──► LEVEL_SOLVED(k) ──► SOLVING_LEVEL(k') ── … ──► DONE
//!                    │
//!                    └──► FAILED(k)   (infeasible, solver error, timeout, cancellation)
//! ```

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;
use validator::Validate;

use super::{
    check_coefficients, group_by_priority, AchievedConstraint, CoefficientLimits, Degradation, GoalExpander,
    CoefficientReport, LevelSnapshot, LevelSummary, ObjectiveTermProvider, OptimizationProblem, PriorityLevel,
    PriorityObserver, ProblemBuilder, RunResults, SolveOutcome, Solver, SolverStatus, TieBreakSummary, Tolerance,
};
use crate::domain::Goal;
use crate::error::{GoalProgrammingError, Result};
use crate::model::ModelProvider;

/// Backend feasibility noise ignored by the degradation check
const DEGRADATION_NOISE: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Pending,
    SolvingLevel(i32),
    LevelSolved(i32),
    Failed(i32),
    Done,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Pending => write!(f, "PENDING"),
            SchedulerState::SolvingLevel(p) => write!(f, "SOLVING_LEVEL({})", p),
            SchedulerState::LevelSolved(p) => write!(f, "LEVEL_SOLVED({})", p),
            SchedulerState::Failed(p) => write!(f, "FAILED({})", p),
            SchedulerState::Done => write!(f, "DONE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Relaxation of achieved constraints
    pub tolerance: Tolerance,
    /// Largest violation still reported as met
    pub met_tolerance: f64,
    /// Per-level limit, enforced by [`PriorityScheduler::run_async`]
    pub time_limit: Option<Duration>,
    /// Run coefficient range checks on every built problem
    pub checks: Option<CoefficientLimits>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tolerance: Tolerance::default(),
            met_tolerance: 1e-4,
            time_limit: None,
            checks: None,
        }
    }
}

pub struct PrioritySchedulerBuilder {
    goals: Vec<Goal>,
    config: SchedulerConfig,
    extra_terms: Vec<Box<dyn ObjectiveTermProvider>>,
    observers: Vec<Arc<dyn PriorityObserver>>,
}

impl PrioritySchedulerBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Objective term minimised after the last level, subject to every
    /// achieved constraint
    pub fn objective_term(mut self, term: Box<dyn ObjectiveTermProvider>) -> Self {
        self.extra_terms.push(term);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PriorityObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Validate everything against `model` and expand the goals into levels
    pub fn build(self, model: &dyn ModelProvider) -> Result<PriorityScheduler> {
        if self.goals.is_empty() {
            return Err(GoalProgrammingError::config("at least one goal is required"));
        }
        self.config.tolerance.validate()?;
        if let Some(limits) = &self.config.checks {
            limits.validate()?;
        }
        if self.config.met_tolerance.is_nan() || self.config.met_tolerance < 0.0 {
            return Err(GoalProgrammingError::config(format!(
                "met tolerance must be non-negative, got {}",
                self.config.met_tolerance
            )));
        }

        let mut names = HashSet::new();
        for goal in &self.goals {
            if model.get_variable(goal.state()).is_none() {
                return Err(GoalProgrammingError::config(format!(
                    "goal '{}' references unknown variable '{}'",
                    goal.name(),
                    goal.state()
                )));
            }
            if !names.insert(goal.name()) {
                return Err(GoalProgrammingError::config(format!("duplicate goal name '{}'", goal.name())));
            }
        }
        for term in &self.extra_terms {
            term.validate(model)?;
        }

        let time_grid = model.time_grid().to_vec();
        let levels = group_by_priority(GoalExpander::new(&time_grid).expand_all(&self.goals));

        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            goals = self.goals.len(),
            levels = levels.len(),
            steps = time_grid.len(),
            "priority scheduler ready"
        );

        Ok(PriorityScheduler {
            run_id,
            goals: self.goals,
            levels,
            next_level: 0,
            state: SchedulerState::Pending,
            records: Vec::new(),
            summaries: Vec::new(),
            degradations: Vec::new(),
            in_flight: None,
            in_flight_checks: None,
            time_grid,
            extra_terms: self.extra_terms,
            observers: self.observers,
            config: self.config,
            results: None,
        })
    }
}

/// Owns all state of one lexicographic run
pub struct PriorityScheduler {
    run_id: Uuid,
    goals: Vec<Goal>,
    levels: Vec<PriorityLevel>,
    next_level: usize,
    state: SchedulerState,
    /// Append-only; one entry per sub-goal of every solved level
    records: Vec<AchievedConstraint>,
    summaries: Vec<LevelSummary>,
    degradations: Vec<Degradation>,
    in_flight: Option<Arc<OptimizationProblem>>,
    in_flight_checks: Option<CoefficientReport>,
    time_grid: Vec<f64>,
    extra_terms: Vec<Box<dyn ObjectiveTermProvider>>,
    observers: Vec<Arc<dyn PriorityObserver>>,
    config: SchedulerConfig,
    results: Option<RunResults>,
}

impl PriorityScheduler {
    pub fn builder(goals: Vec<Goal>) -> PrioritySchedulerBuilder {
        PrioritySchedulerBuilder {
            goals,
            config: SchedulerConfig::default(),
            extra_terms: Vec::new(),
            observers: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn levels(&self) -> &[PriorityLevel] {
        &self.levels
    }

    pub fn records(&self) -> &[AchievedConstraint] {
        &self.records
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn results(&self) -> Result<&RunResults> {
        match (&self.state, &self.results) {
            (SchedulerState::Done, Some(results)) => Ok(results),
            _ => Err(GoalProgrammingError::ResultUnavailable { state: self.state }),
        }
    }

    /// Build the problem of the lowest unvisited level and enter
    /// SOLVING_LEVEL. Returns `None` once the run is DONE.
    pub fn next_problem(&mut self, model: &dyn ModelProvider) -> Result<Option<Arc<OptimizationProblem>>> {
        match self.state {
            SchedulerState::Pending | SchedulerState::LevelSolved(_) => {}
            SchedulerState::Done => return Ok(None),
            state => {
                return Err(GoalProgrammingError::InvalidTransition {
                    action: "start the next level",
                    state,
                })
            }
        }

        // Past the last level only the tie-break solve remains
        let tie_break = self.next_level == self.levels.len();
        let empty;
        let level = if tie_break {
            let Some(last) = self.levels.last() else {
                return Ok(None);
            };
            empty = PriorityLevel {
                priority: last.priority,
                goals: Vec::new(),
            };
            &empty
        } else {
            &self.levels[self.next_level]
        };
        let priority = level.priority;
        let sub_goals = level.goals.len();

        let conflicting = level.conflicting_goals(&self.goals);
        if !conflicting.is_empty() {
            let goals = level.goal_names(&self.goals);
            warn!(
                run_id = %self.run_id,
                priority,
                conflicting = ?conflicting,
                "goal bands on one variable do not intersect"
            );
            return Err(self.fail(GoalProgrammingError::Infeasible { priority, goals }));
        }

        let extra: Vec<&dyn ObjectiveTermProvider> = if tie_break {
            self.extra_terms.iter().map(|t| t.as_ref()).collect()
        } else {
            Vec::new()
        };

        let problem = match ProblemBuilder::new(model).build(level, &self.records, &extra) {
            Ok(problem) => problem,
            Err(err) => {
                self.state = SchedulerState::Failed(priority);
                error!(run_id = %self.run_id, priority, error = %err, "failed to build level problem");
                return Err(err);
            }
        };
        let checks = self.config.checks.as_ref().map(|limits| check_coefficients(&problem, limits));

        if tie_break {
            info!(
                run_id = %self.run_id,
                priority,
                terms = self.extra_terms.len(),
                retained = self.records.len(),
                "solving tie-break objective"
            );
        } else {
            info!(
                run_id = %self.run_id,
                priority,
                level = self.next_level + 1,
                of = self.levels.len(),
                sub_goals,
                retained = self.records.len(),
                "solving priority level"
            );
        }

        let problem = Arc::new(problem);
        self.in_flight = Some(Arc::clone(&problem));
        self.in_flight_checks = checks;
        self.state = SchedulerState::SolvingLevel(priority);
        Ok(Some(problem))
    }

    /// Consume the solver's answer for the level in flight
    pub fn complete_level(&mut self, outcome: SolveOutcome) -> Result<()> {
        let priority = match self.state {
            SchedulerState::SolvingLevel(p) => p,
            state => {
                return Err(GoalProgrammingError::InvalidTransition {
                    action: "complete a level",
                    state,
                })
            }
        };
        let Some(problem) = self.in_flight.take() else {
            return Err(self.fail(GoalProgrammingError::Solver {
                priority,
                diagnostics: "no problem in flight".to_string(),
            }));
        };
        let coefficients = self.in_flight_checks.take();
        let tie_break = self.next_level == self.levels.len();

        match outcome.status {
            SolverStatus::Infeasible => {
                let goals = self
                    .current_level()
                    .map(|level| level.goal_names(&self.goals))
                    .unwrap_or_default();
                debug!(priority, diagnostics = %outcome.diagnostics, "backend diagnostics");
                return Err(self.fail(GoalProgrammingError::Infeasible { priority, goals }));
            }
            SolverStatus::Error => {
                return Err(self.fail(GoalProgrammingError::Solver {
                    priority,
                    diagnostics: outcome.diagnostics,
                }));
            }
            SolverStatus::Optimal => {}
        }

        if outcome.values.len() != problem.variables.len() {
            return Err(self.fail(GoalProgrammingError::Solver {
                priority,
                diagnostics: format!(
                    "solver returned {} values for {} columns",
                    outcome.values.len(),
                    problem.variables.len()
                ),
            }));
        }

        let assignment = problem.assignment(&outcome.values);
        self.check_retained(priority, &assignment);

        if tie_break {
            info!(
                run_id = %self.run_id,
                priority,
                objective_value = outcome.objective_value,
                "tie-break objective solved"
            );
            let summary = TieBreakSummary {
                priority,
                objective_value: outcome.objective_value,
                coefficients,
            };
            self.finish(assignment, Some(summary));
            return Ok(());
        }

        let level = &self.levels[self.next_level];
        let new_records: Vec<AchievedConstraint> = level
            .goals
            .iter()
            .map(|sub| {
                let series = assignment.get(&sub.state).map(Vec::as_slice).unwrap_or(&[]);
                AchievedConstraint::record(sub, series, &self.config.tolerance)
            })
            .collect();
        let achieved_objective: f64 = new_records.iter().map(AchievedConstraint::achieved_objective).sum();

        info!(
            run_id = %self.run_id,
            priority,
            objective_value = outcome.objective_value,
            achieved_objective,
            "priority level solved"
        );

        let snapshot = LevelSnapshot {
            priority,
            objective_value: outcome.objective_value,
            achieved_objective,
            variables: assignment,
        };
        for observer in &self.observers {
            observer.priority_completed(&snapshot);
        }

        self.summaries.push(LevelSummary {
            priority,
            objective_value: outcome.objective_value,
            achieved_objective,
            goals: level.goal_names(&self.goals),
            coefficients,
        });
        self.records.extend(new_records);
        self.next_level += 1;

        if self.next_level < self.levels.len() || !self.extra_terms.is_empty() {
            self.state = SchedulerState::LevelSolved(priority);
            return Ok(());
        }

        self.finish(snapshot.variables, None);
        Ok(())
    }

    /// Abandon the run. The problem in flight, if any, is discarded.
    pub fn cancel(&mut self) -> GoalProgrammingError {
        match self.state {
            SchedulerState::Pending | SchedulerState::SolvingLevel(_) | SchedulerState::LevelSolved(_) => {
                let priority = self.current_level().map_or(0, |l| l.priority);
                self.in_flight = None;
                self.in_flight_checks = None;
                warn!(run_id = %self.run_id, priority, "run cancelled");
                self.fail(GoalProgrammingError::Cancelled { priority })
            }
            state => GoalProgrammingError::InvalidTransition { action: "cancel", state },
        }
    }

    /// Solve every level with a blocking solver
    pub fn run(&mut self, model: &dyn ModelProvider, solver: &dyn Solver) -> Result<&RunResults> {
        let span = info_span!("goal_programming", run_id = %self.run_id);
        let _enter = span.enter();

        while let Some(problem) = self.next_problem(model)? {
            let outcome = solver.solve(&problem);
            self.complete_level(outcome)?;
        }
        self.results()
    }

    /// Solve every level on the blocking pool, bounded by the configured
    /// time limit and raced against `cancel`. A solve that is cancelled or
    /// times out keeps running detached; its outcome is discarded.
    pub async fn run_async(
        &mut self,
        model: &dyn ModelProvider,
        solver: Arc<dyn Solver>,
        cancel: &CancellationToken,
    ) -> Result<&RunResults> {
        let span = info_span!("goal_programming", run_id = %self.run_id);
        self.drive(model, solver, cancel).instrument(span).await?;
        self.results()
    }

    async fn drive(
        &mut self,
        model: &dyn ModelProvider,
        solver: Arc<dyn Solver>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        while let Some(problem) = self.next_problem(model)? {
            let worker = {
                let solver = Arc::clone(&solver);
                tokio::task::spawn_blocking(move || solver.solve(&problem))
            };
            let limit = self.config.time_limit;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancel()),
                outcome = await_solve(worker, limit) => outcome,
            };
            self.complete_level(outcome)?;
        }
        Ok(())
    }

    fn check_retained(&mut self, priority: i32, assignment: &IndexMap<String, Vec<f64>>) {
        for record in &self.records {
            let series = assignment.get(&record.state).map(Vec::as_slice).unwrap_or(&[]);
            let amount = record.degradation(series);
            if amount > DEGRADATION_NOISE {
                warn!(
                    run_id = %self.run_id,
                    goal = %record.label,
                    recorded_at = record.priority,
                    observed_at = priority,
                    amount,
                    "achieved goal degraded by a later level"
                );
                self.degradations.push(Degradation {
                    goal: record.label.clone(),
                    recorded_at: record.priority,
                    observed_at: priority,
                    amount,
                });
            }
        }
    }

    /// Level in flight, or the next one between levels. The tie-break solve
    /// counts as the last level.
    fn current_level(&self) -> Option<&PriorityLevel> {
        self.levels.get(self.next_level).or_else(|| self.levels.last())
    }

    fn finish(&mut self, variables: IndexMap<String, Vec<f64>>, tie_break: Option<TieBreakSummary>) {
        let mut results = RunResults::assemble(
            self.run_id,
            &self.time_grid,
            &self.goals,
            variables,
            self.summaries.clone(),
            self.degradations.clone(),
            self.config.met_tolerance,
        );
        results.tie_break = tie_break;
        self.results = Some(results);
        self.state = SchedulerState::Done;
        info!(run_id = %self.run_id, levels = self.levels.len(), "goal programming run complete");
    }

    /// Enter FAILED at the level in flight (or the next one between levels)
    fn fail(&mut self, err: GoalProgrammingError) -> GoalProgrammingError {
        let priority = self.current_level().map_or(0, |l| l.priority);
        self.state = SchedulerState::Failed(priority);
        error!(run_id = %self.run_id, state = %self.state, error = %err, "run failed");
        err
    }
}

async fn await_solve(worker: tokio::task::JoinHandle<SolveOutcome>, limit: Option<Duration>) -> SolveOutcome {
    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, worker).await {
            Ok(joined) => joined,
            Err(_) => {
                return SolveOutcome::error(format!(
                    "solver exceeded the time limit of {:.3} s",
                    limit.as_secs_f64()
                ))
            }
        },
        None => worker.await,
    };
    joined.unwrap_or_else(|err| SolveOutcome::error(format!("solver task failed: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinearDaeModel;
    use crate::optimizer::{ConstraintSource, MockSolver, SmoothingTerm, SnapshotRecorder};

    fn model() -> LinearDaeModel {
        LinearDaeModel::builder(vec![0.0, 1.0, 2.0])
            .state("level", 0.0, 100.0, Some(11.0))
            .control("extraction", 0.0, 20.0)
            .input("inflow", 7.0)
            .derivative("level", &[("inflow", 1.0), ("extraction", -1.0)], 0.0)
            .build()
            .unwrap()
    }

    fn goals() -> Vec<Goal> {
        vec![
            Goal::range("level", 10.0, 12.0).name("band").priority(1).build().unwrap(),
            Goal::target("extraction", 5.0)
                .name("release")
                .priority(2)
                .path(false)
                .build()
                .unwrap(),
        ]
    }

    /// Pretend solution holding `level` constant
    fn solution(problem: &OptimizationProblem, level: f64) -> SolveOutcome {
        let mut values = vec![0.0; problem.variables.len()];
        for v in &problem.model_columns["level"] {
            values[v.0] = level;
        }
        for v in &problem.model_columns["extraction"] {
            values[v.0] = 5.0;
        }
        SolveOutcome::optimal(values, 0.0)
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SchedulerState::Pending.to_string(), "PENDING");
        assert_eq!(SchedulerState::SolvingLevel(3).to_string(), "SOLVING_LEVEL(3)");
        assert_eq!(SchedulerState::Failed(-1).to_string(), "FAILED(-1)");
    }

    #[test]
    fn test_empty_goal_set_rejected() {
        let err = PriorityScheduler::builder(Vec::new()).build(&model()).err().unwrap();
        assert!(matches!(err, GoalProgrammingError::Configuration(_)));
    }

    #[test]
    fn test_unknown_variable_rejected() {
        let goals = vec![Goal::range("volume", 0.0, 1.0).build().unwrap()];
        let err = PriorityScheduler::builder(goals).build(&model()).err().unwrap();
        assert!(err.to_string().contains("volume"));
    }

    #[test]
    fn test_duplicate_goal_names_rejected() {
        let goals = vec![
            Goal::range("level", 10.0, 12.0).build().unwrap(),
            Goal::range("level", 9.0, 13.0).build().unwrap(),
        ];
        let err = PriorityScheduler::builder(goals).build(&model()).err().unwrap();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_levels_in_ascending_order() {
        let scheduler = PriorityScheduler::builder(goals()).build(&model()).unwrap();
        let priorities: Vec<i32> = scheduler.levels().iter().map(|l| l.priority).collect();
        assert_eq!(priorities, vec![1, 2]);
        assert_eq!(scheduler.state(), SchedulerState::Pending);
        assert_eq!(
            scheduler.results().unwrap_err(),
            GoalProgrammingError::ResultUnavailable {
                state: SchedulerState::Pending
            }
        );
    }

    #[test]
    fn test_infeasible_level_stops_sweep() {
        let model = model();
        let mut solver = MockSolver::new();
        solver
            .expect_solve()
            .times(1)
            .returning(|_| SolveOutcome::infeasible("primal infeasible"));

        let mut scheduler = PriorityScheduler::builder(goals()).build(&model).unwrap();
        let err = scheduler.run(&model, &solver).unwrap_err();

        assert_eq!(
            err,
            GoalProgrammingError::Infeasible {
                priority: 1,
                goals: vec!["band".to_string()],
            }
        );
        assert_eq!(scheduler.state(), SchedulerState::Failed(1));
        assert!(scheduler.records().is_empty());
        assert!(scheduler.results().is_err());
    }

    #[test]
    fn test_solver_error_at_second_level() {
        let model = model();
        let mut solver = MockSolver::new();
        solver.expect_solve().times(2).returning(|problem| {
            if problem.priority == 1 {
                solution(problem, 11.0)
            } else {
                SolveOutcome::error("numerical trouble")
            }
        });

        let mut scheduler = PriorityScheduler::builder(goals()).build(&model).unwrap();
        let err = scheduler.run(&model, &solver).unwrap_err();

        assert_eq!(
            err,
            GoalProgrammingError::Solver {
                priority: 2,
                diagnostics: "numerical trouble".to_string(),
            }
        );
        assert_eq!(scheduler.state(), SchedulerState::Failed(2));
        // level 1 stays recorded
        assert_eq!(scheduler.records().len(), 3);
    }

    #[test]
    fn test_full_sweep_records_and_notifies() {
        let model = model();
        let mut solver = MockSolver::new();
        solver.expect_solve().times(2).returning(|problem| solution(problem, 11.0));
        let recorder = Arc::new(SnapshotRecorder::new());

        let mut scheduler = PriorityScheduler::builder(goals())
            .observer(recorder.clone())
            .build(&model)
            .unwrap();
        let results = scheduler.run(&model, &solver).unwrap();

        assert!(results.goal("band").unwrap().met);
        assert!(results.goal("release").unwrap().met);
        assert!(results.is_monotone());
        assert_eq!(results.levels.len(), 2);
        assert_eq!(scheduler.state(), SchedulerState::Done);
        // three path records for the band, one horizon record for the release
        assert_eq!(scheduler.records().len(), 4);

        let snapshots = recorder.snapshots();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].variables["level"], vec![11.0; 3]);
    }

    #[test]
    fn test_degradation_is_reported() {
        let model = model();
        let mut solver = MockSolver::new();
        solver
            .expect_solve()
            .returning(|problem| solution(problem, if problem.priority == 1 { 11.0 } else { 15.0 }));

        let mut scheduler = PriorityScheduler::builder(goals()).build(&model).unwrap();
        let results = scheduler.run(&model, &solver).unwrap();

        assert!(!results.is_monotone());
        assert_eq!(results.degradations.len(), 3);
        assert_eq!(results.degradations[0].recorded_at, 1);
        assert_eq!(results.degradations[0].observed_at, 2);
        assert!((results.degradations[0].amount - 3.0).abs() < 1e-3);
    }

    #[test]
    fn test_value_count_mismatch_is_solver_error() {
        let model = model();
        let mut solver = MockSolver::new();
        solver.expect_solve().returning(|_| SolveOutcome::optimal(vec![1.0], 0.0));

        let mut scheduler = PriorityScheduler::builder(goals()).build(&model).unwrap();
        let err = scheduler.run(&model, &solver).unwrap_err();
        assert!(matches!(err, GoalProgrammingError::Solver { priority: 1, .. }));
    }

    #[test]
    fn test_transitions_are_guarded() {
        let model = model();
        let mut scheduler = PriorityScheduler::builder(goals()).build(&model).unwrap();

        let err = scheduler.complete_level(SolveOutcome::error("early")).unwrap_err();
        assert!(matches!(err, GoalProgrammingError::InvalidTransition { .. }));

        let problem = scheduler.next_problem(&model).unwrap().unwrap();
        assert_eq!(problem.priority, 1);
        assert_eq!(scheduler.state(), SchedulerState::SolvingLevel(1));
        assert!(matches!(
            scheduler.next_problem(&model),
            Err(GoalProgrammingError::InvalidTransition { .. })
        ));

        assert_eq!(scheduler.cancel(), GoalProgrammingError::Cancelled { priority: 1 });
        assert_eq!(scheduler.state(), SchedulerState::Failed(1));
        assert!(matches!(
            scheduler.cancel(),
            GoalProgrammingError::InvalidTransition { action: "cancel", .. }
        ));
    }

    #[test]
    fn test_done_yields_no_more_problems() {
        let model = model();
        let mut scheduler = PriorityScheduler::builder(goals()).build(&model).unwrap();
        while let Some(problem) = scheduler.next_problem(&model).unwrap() {
            let outcome = solution(&problem, 11.0);
            scheduler.complete_level(outcome).unwrap();
        }
        assert_eq!(scheduler.state(), SchedulerState::Done);
        assert!(scheduler.next_problem(&model).unwrap().is_none());
    }

    #[test]
    fn test_disjoint_bands_fail_without_solving() {
        let model = model();
        let goals = vec![
            Goal::range("level", 10.0, 12.0).name("low").priority(1).build().unwrap(),
            Goal::range("level", 20.0, 22.0).name("high").priority(1).build().unwrap(),
        ];
        let mut solver = MockSolver::new();
        solver.expect_solve().times(0);

        let mut scheduler = PriorityScheduler::builder(goals).build(&model).unwrap();
        let err = scheduler.run(&model, &solver).unwrap_err();

        assert_eq!(
            err,
            GoalProgrammingError::Infeasible {
                priority: 1,
                goals: vec!["low".to_string(), "high".to_string()],
            }
        );
        assert_eq!(scheduler.state(), SchedulerState::Failed(1));
    }

    #[test]
    fn test_extra_terms_solved_after_last_level() {
        let model = model();
        let smoothing = SmoothingTerm::new(vec!["extraction".to_string()], 1e-3).unwrap();
        let mut scheduler = PriorityScheduler::builder(goals())
            .objective_term(Box::new(smoothing))
            .build(&model)
            .unwrap();

        let mut seen = Vec::new();
        while let Some(problem) = scheduler.next_problem(&model).unwrap() {
            seen.push((
                problem.priority,
                problem.count_constraints(ConstraintSource::Goal),
                problem.count_constraints(ConstraintSource::Smoothing),
                problem.count_constraints(ConstraintSource::Achieved),
            ));
            let outcome = solution(&problem, 11.0);
            scheduler.complete_level(outcome).unwrap();
        }

        // levels carry no smoothing; the last solve carries no goals and
        // holds every record of both levels
        assert_eq!(seen, vec![(1, 6, 0, 0), (2, 6, 0, 3), (2, 0, 4, 6)]);
        let results = scheduler.results().unwrap();
        assert_eq!(results.levels.len(), 2);
        let tie_break = results.tie_break.as_ref().unwrap();
        assert_eq!(tie_break.priority, 2);
        assert_eq!(tie_break.objective_value, 0.0);
        assert!(results.goal("band").unwrap().met);
    }

    #[test]
    fn test_failure_in_tie_break_reports_last_priority() {
        let model = model();
        let smoothing = SmoothingTerm::new(vec!["extraction".to_string()], 1e-3).unwrap();
        let mut solver = MockSolver::new();
        solver.expect_solve().times(3).returning(|problem| {
            if problem.count_constraints(ConstraintSource::Smoothing) > 0 {
                SolveOutcome::error("stalled")
            } else {
                solution(problem, 11.0)
            }
        });

        let mut scheduler = PriorityScheduler::builder(goals())
            .objective_term(Box::new(smoothing))
            .build(&model)
            .unwrap();
        let err = scheduler.run(&model, &solver).unwrap_err();

        assert!(matches!(err, GoalProgrammingError::Solver { priority: 2, .. }));
        assert_eq!(scheduler.state(), SchedulerState::Failed(2));
        assert_eq!(scheduler.records().len(), 4);
    }

    #[test]
    fn test_coefficient_report_kept_per_level() {
        let model = model();
        let mut solver = MockSolver::new();
        solver.expect_solve().times(2).returning(|problem| solution(problem, 11.0));
        let config = SchedulerConfig {
            checks: Some(CoefficientLimits {
                tol_up: 0.5,
                ..CoefficientLimits::default()
            }),
            ..SchedulerConfig::default()
        };

        let mut scheduler = PriorityScheduler::builder(goals()).config(config).build(&model).unwrap();
        let results = scheduler.run(&model, &solver).unwrap();

        for level in &results.levels {
            let report = level.coefficients.as_ref().unwrap();
            assert!(!report.is_clean(), "priority {}", level.priority);
        }
        assert!(results.tie_break.is_none());
    }

    #[test]
    fn test_no_coefficient_report_without_checks() {
        let model = model();
        let mut scheduler = PriorityScheduler::builder(goals()).build(&model).unwrap();
        while let Some(problem) = scheduler.next_problem(&model).unwrap() {
            let outcome = solution(&problem, 11.0);
            scheduler.complete_level(outcome).unwrap();
        }
        let results = scheduler.results().unwrap();
        assert!(results.levels.iter().all(|l| l.coefficients.is_none()));
    }

    struct SlowSolver(Duration);

    impl Solver for SlowSolver {
        fn solve(&self, problem: &OptimizationProblem) -> SolveOutcome {
            std::thread::sleep(self.0);
            solution(problem, 11.0)
        }
    }

    #[tokio::test]
    async fn test_run_async_completes() {
        let model = model();
        let mut scheduler = PriorityScheduler::builder(goals()).build(&model).unwrap();
        let solver: Arc<dyn Solver> = Arc::new(SlowSolver(Duration::from_millis(1)));

        let results = scheduler
            .run_async(&model, solver, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results.objective_values().len(), 2);
    }

    #[tokio::test]
    async fn test_run_async_cancelled() {
        let model = model();
        let mut scheduler = PriorityScheduler::builder(goals()).build(&model).unwrap();
        let solver: Arc<dyn Solver> = Arc::new(SlowSolver(Duration::from_millis(50)));
        let token = CancellationToken::new();
        token.cancel();

        let err = scheduler.run_async(&model, solver, &token).await.unwrap_err();
        assert_eq!(err, GoalProgrammingError::Cancelled { priority: 1 });
        assert_eq!(scheduler.state(), SchedulerState::Failed(1));
    }

    #[tokio::test]
    async fn test_run_async_time_limit() {
        let model = model();
        let config = SchedulerConfig {
            time_limit: Some(Duration::from_millis(10)),
            ..SchedulerConfig::default()
        };
        let mut scheduler = PriorityScheduler::builder(goals()).config(config).build(&model).unwrap();
        let solver: Arc<dyn Solver> = Arc::new(SlowSolver(Duration::from_millis(300)));

        let err = scheduler
            .run_async(&model, solver, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            GoalProgrammingError::Solver { priority, diagnostics } => {
                assert_eq!(priority, 1);
                assert!(diagnostics.contains("time limit"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
