//! Solver backends
//!
//! The scheduler only sees the [`Solver`] trait. `GoodLpSolver` is the
//! bundled implementation on top of `good_lp`:
//! - MiniLp: pure-Rust simplex (default)
//! - Cbc: COIN-OR CBC, behind the `cbc` feature
//! - Highs: HiGHS, behind the `highs` feature

pub mod lp;

pub use lp::*;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::OptimizationProblem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SolverStatus {
    Optimal,
    Infeasible,
    Error,
}

/// Result of one blocking solver call
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    pub status: SolverStatus,
    /// One value per column of the problem; empty unless optimal
    pub values: Vec<f64>,
    pub objective_value: f64,
    pub diagnostics: String,
}

impl SolveOutcome {
    pub fn optimal(values: Vec<f64>, objective_value: f64) -> Self {
        Self {
            status: SolverStatus::Optimal,
            values,
            objective_value,
            diagnostics: String::new(),
        }
    }

    pub fn infeasible(diagnostics: impl Into<String>) -> Self {
        Self {
            status: SolverStatus::Infeasible,
            values: Vec::new(),
            objective_value: f64::NAN,
            diagnostics: diagnostics.into(),
        }
    }

    pub fn error(diagnostics: impl Into<String>) -> Self {
        Self {
            status: SolverStatus::Error,
            values: Vec::new(),
            objective_value: f64::NAN,
            diagnostics: diagnostics.into(),
        }
    }
}

/// Opaque solver: minimise the problem's objective subject to its bounds and
/// constraints. Implementations block until they have an answer.
#[cfg_attr(test, mockall::automock)]
pub trait Solver: Send + Sync {
    fn solve(&self, problem: &OptimizationProblem) -> SolveOutcome;
}
