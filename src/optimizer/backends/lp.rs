//! Linear programming backend on top of `good_lp`
//!
//! Every priority level is a pure LP: goal penalties are absolute deviations
//! carried by non-negative violation columns, so no integer variables are
//! needed and the pure-Rust simplex is sufficient for typical horizons.

use good_lp::solvers::{ResolutionError, SolverModel};
use good_lp::{constraint, variable, Expression, ProblemVariables, Solution, Variable};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use strum::{Display, EnumString};
use tracing::{debug, warn};

use super::{SolveOutcome, Solver};
use crate::optimizer::{LinearExpr, OptimizationProblem};

/// LP engine used by [`GoodLpSolver`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Backend {
    /// Pure-Rust simplex (default)
    #[default]
    MiniLp,
    /// COIN-OR CBC, requires the `cbc` feature
    Cbc,
    /// HiGHS, requires the `highs` feature
    Highs,
}

enum BackendFailure {
    Infeasible,
    Failed(String),
}

impl From<ResolutionError> for BackendFailure {
    fn from(err: ResolutionError) -> Self {
        match err {
            ResolutionError::Infeasible => BackendFailure::Infeasible,
            other => BackendFailure::Failed(other.to_string()),
        }
    }
}

/// Warn above this many columns; dense simplex slows down quickly
const LARGE_PROBLEM_COLUMNS: usize = 20_000;

#[derive(Debug, Clone, Default)]
pub struct GoodLpSolver {
    backend: Backend,
}

impl GoodLpSolver {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    fn run_backend(&self, problem: &OptimizationProblem) -> Result<Vec<f64>, BackendFailure> {
        match self.backend {
            #[cfg(feature = "minilp")]
            Backend::MiniLp => Ok(solve_with(good_lp::solvers::minilp::minilp, problem)?),
            #[cfg(feature = "cbc")]
            Backend::Cbc => Ok(solve_with(good_lp::solvers::coin_cbc::coin_cbc, problem)?),
            #[cfg(feature = "highs")]
            Backend::Highs => Ok(solve_with(good_lp::solvers::highs::highs, problem)?),
            #[allow(unreachable_patterns)]
            other => Err(BackendFailure::Failed(format!(
                "backend '{}' requires the '{}' feature to be enabled",
                other,
                feature_name(other)
            ))),
        }
    }
}

fn feature_name(backend: Backend) -> &'static str {
    match backend {
        Backend::MiniLp => "minilp",
        Backend::Cbc => "cbc",
        Backend::Highs => "highs",
    }
}

impl Solver for GoodLpSolver {
    fn solve(&self, problem: &OptimizationProblem) -> SolveOutcome {
        if problem.variables.len() > LARGE_PROBLEM_COLUMNS {
            warn!(
                columns = problem.variables.len(),
                backend = %self.backend,
                "large LP; consider a coarser time grid or the highs backend"
            );
        }
        if problem.variables.is_empty() {
            return SolveOutcome::optimal(Vec::new(), problem.objective.constant);
        }

        let started = Instant::now();
        let result = self.run_backend(problem);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(values) => {
                let objective_value = problem.objective.evaluate(&values);
                debug!(
                    priority = problem.priority,
                    backend = %self.backend,
                    elapsed_ms,
                    objective_value,
                    "LP solved"
                );
                SolveOutcome::optimal(values, objective_value)
            }
            Err(BackendFailure::Infeasible) => SolveOutcome::infeasible(format!(
                "{} reported the problem infeasible after {} ms ({} columns, {} rows)",
                self.backend,
                elapsed_ms,
                problem.variables.len(),
                problem.constraints.len()
            )),
            Err(BackendFailure::Failed(msg)) => {
                SolveOutcome::error(format!("{} failed after {} ms: {}", self.backend, elapsed_ms, msg))
            }
        }
    }
}

fn to_expression(expr: &LinearExpr, columns: &[Variable]) -> Expression {
    expr.terms
        .iter()
        .map(|(var, coefficient)| columns[var.0] * *coefficient)
        .sum::<Expression>()
        + expr.constant
}

fn solve_with<S>(solver: S, problem: &OptimizationProblem) -> Result<Vec<f64>, ResolutionError>
where
    S: good_lp::solvers::Solver,
    S::Model: SolverModel<Error = ResolutionError>,
{
    let mut vars = ProblemVariables::new();
    let columns: Vec<Variable> = problem
        .variables
        .iter()
        .map(|v| {
            let mut definition = variable();
            if v.lower.is_finite() {
                definition = definition.min(v.lower);
            }
            if v.upper.is_finite() {
                definition = definition.max(v.upper);
            }
            vars.add(definition)
        })
        .collect();

    let objective = to_expression(&problem.objective, &columns);
    let mut model = vars.minimise(objective).using(solver);

    for row in &problem.constraints {
        let expr = to_expression(&row.expr, &columns);
        let (lower, upper) = (row.lower, row.upper);
        if lower == upper {
            model.add_constraint(constraint!(expr == lower));
            continue;
        }
        if lower.is_finite() {
            model.add_constraint(constraint!(expr.clone() >= lower));
        }
        if upper.is_finite() {
            model.add_constraint(constraint!(expr <= upper));
        }
    }

    let solution = model.solve()?;
    Ok(columns.iter().map(|&v| solution.value(v)).collect())
}

#[cfg(all(test, feature = "minilp"))]
mod tests {
    use super::*;
    use crate::optimizer::{ColumnOrigin, ConstraintSource, SolverStatus, VarId};

    fn column(problem: &mut OptimizationProblem, index: usize, lower: f64, upper: f64) -> VarId {
        problem.add_variable(
            ColumnOrigin::Model {
                signal: "x".into(),
                index,
            },
            lower,
            upper,
        )
    }

    #[test]
    fn test_minimises_simple_lp() {
        // min x0 + 2 x1  s.t.  x0 + x1 >= 3, x0 <= 2
        let mut problem = OptimizationProblem::new(1);
        let x0 = column(&mut problem, 0, 0.0, 2.0);
        let x1 = column(&mut problem, 1, 0.0, f64::INFINITY);
        problem.add_constraint(
            ConstraintSource::Model,
            "demand",
            LinearExpr::term(x0, 1.0).with_term(x1, 1.0),
            3.0,
            f64::INFINITY,
        );
        problem.objective = LinearExpr::term(x0, 1.0).with_term(x1, 2.0);

        let outcome = GoodLpSolver::default().solve(&problem);
        assert_eq!(outcome.status, SolverStatus::Optimal);
        assert!((outcome.values[0] - 2.0).abs() < 1e-6);
        assert!((outcome.values[1] - 1.0).abs() < 1e-6);
        assert!((outcome.objective_value - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_reports_infeasible() {
        let mut problem = OptimizationProblem::new(1);
        let x = column(&mut problem, 0, 0.0, 10.0);
        problem.add_constraint(ConstraintSource::Goal, "low", LinearExpr::term(x, 1.0), f64::NEG_INFINITY, 2.0);
        problem.add_constraint(ConstraintSource::Goal, "high", LinearExpr::term(x, 1.0), 5.0, f64::INFINITY);
        problem.objective = LinearExpr::term(x, 1.0);

        let outcome = GoodLpSolver::default().solve(&problem);
        assert_eq!(outcome.status, SolverStatus::Infeasible);
        assert!(outcome.values.is_empty());
    }

    #[test]
    fn test_equality_rows() {
        let mut problem = OptimizationProblem::new(1);
        let x = column(&mut problem, 0, f64::NEG_INFINITY, f64::INFINITY);
        problem.add_constraint(ConstraintSource::Model, "pin", LinearExpr::term(x, 2.0), 7.0, 7.0);
        problem.objective = LinearExpr::term(x, 1.0);

        let outcome = GoodLpSolver::default().solve(&problem);
        assert_eq!(outcome.status, SolverStatus::Optimal);
        assert!((outcome.values[0] - 3.5).abs() < 1e-6);
    }

    #[test]
    fn test_backend_parses_from_config_string() {
        assert_eq!("mini_lp".parse::<Backend>().unwrap(), Backend::MiniLp);
        assert_eq!(Backend::Highs.to_string(), "highs");
    }

    #[cfg(not(feature = "cbc"))]
    #[test]
    fn test_missing_backend_is_an_error() {
        let mut problem = OptimizationProblem::new(4);
        let x = column(&mut problem, 0, 0.0, 1.0);
        problem.objective = LinearExpr::term(x, 1.0);

        let outcome = GoodLpSolver::new(Backend::Cbc).solve(&problem);
        assert_eq!(outcome.status, SolverStatus::Error);
        assert!(outcome.diagnostics.contains("cbc"));
    }
}
