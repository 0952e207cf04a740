//! Coefficient range checks
//!
//! Badly scaled rows or columns are a common reason for an LP backend to
//! report spurious infeasibility. These checks do not change the problem;
//! they only report rows and columns whose coefficients are out of range.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;
use validator::Validate;

use super::OptimizationProblem;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct CoefficientLimits {
    /// Largest acceptable absolute coefficient
    #[validate(range(min = 0.0))]
    pub tol_up: f64,
    /// Smallest acceptable non-zero absolute coefficient
    #[validate(range(min = 0.0))]
    pub tol_down: f64,
    /// Largest acceptable ratio max / min within a row or column
    #[validate(range(min = 1.0))]
    pub tol_range: f64,
}

impl Default for CoefficientLimits {
    fn default() -> Self {
        Self {
            tol_up: 100.0,
            tol_down: 0.01,
            tol_range: 1000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoefficientFinding {
    pub name: String,
    pub min_abs: f64,
    pub max_abs: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoefficientReport {
    pub rows: Vec<CoefficientFinding>,
    pub columns: Vec<CoefficientFinding>,
}

impl CoefficientReport {
    pub fn is_clean(&self) -> bool {
        self.rows.is_empty() && self.columns.is_empty()
    }
}

fn abs_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .map(f64::abs)
        .filter(|v| *v > 0.0)
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

pub fn check_coefficients(problem: &OptimizationProblem, limits: &CoefficientLimits) -> CoefficientReport {
    let mut report = CoefficientReport::default();
    let mut per_column: BTreeMap<usize, Vec<f64>> = BTreeMap::new();

    for row in &problem.constraints {
        for (var, c) in &row.expr.terms {
            per_column.entry(var.0).or_default().push(*c);
        }
        if let Some((min_abs, max_abs)) = abs_range(row.expr.terms.iter().map(|(_, c)| *c)) {
            if max_abs > limits.tol_up || min_abs < limits.tol_down || max_abs / min_abs > limits.tol_range {
                report.rows.push(CoefficientFinding {
                    name: row.label.clone(),
                    min_abs,
                    max_abs,
                });
            }
        }
    }

    for (column, coefficients) in per_column {
        if let Some((min_abs, max_abs)) = abs_range(coefficients.into_iter()) {
            if max_abs / min_abs > limits.tol_range {
                let name = problem
                    .variables
                    .get(column)
                    .map(|v| v.origin.to_string())
                    .unwrap_or_else(|| format!("#{}", column));
                report.columns.push(CoefficientFinding { name, min_abs, max_abs });
            }
        }
    }

    if !report.rows.is_empty() {
        info!(
            priority = problem.priority,
            count = report.rows.len(),
            tol_up = limits.tol_up,
            tol_down = limits.tol_down,
            tol_range = limits.tol_range,
            rows = ?report.rows.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            "constraint rows with coefficients out of range"
        );
    }
    if !report.columns.is_empty() {
        info!(
            priority = problem.priority,
            count = report.columns.len(),
            tol_range = limits.tol_range,
            columns = ?report.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "columns with coefficient ratio out of range"
        );
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::{ColumnOrigin, ConstraintSource, LinearExpr, VarId};
    use rstest::rstest;

    fn problem_with_rows(rows: &[&[f64]]) -> OptimizationProblem {
        let mut problem = OptimizationProblem::new(1);
        for i in 0..3 {
            problem.add_variable(
                ColumnOrigin::Model {
                    signal: ["x", "y", "z"][i].to_string(),
                    index: 0,
                },
                0.0,
                1.0,
            );
        }
        for (r, coefficients) in rows.iter().enumerate() {
            let mut expr = LinearExpr::new();
            for (i, c) in coefficients.iter().enumerate() {
                expr.add_term(VarId(i), *c);
            }
            problem.add_constraint(ConstraintSource::Model, format!("row{}", r), expr, 0.0, 0.0);
        }
        problem
    }

    #[rstest]
    #[case(&[1000.0, -1.0])]
    #[case(&[0.001, -1.0])]
    #[case(&[0.01, -100.0])]
    fn test_row_exceedences(#[case] coefficients: &[f64]) {
        let report = check_coefficients(&problem_with_rows(&[coefficients]), &CoefficientLimits::default());
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].name, "row0");
    }

    #[test]
    fn test_column_range() {
        // each row alone is acceptable, but x spans 100 / 0.01
        let report = check_coefficients(
            &problem_with_rows(&[&[100.0, -1.0], &[0.01, 0.0, -1.0]]),
            &CoefficientLimits::default(),
        );
        assert!(report.rows.iter().all(|r| r.name != "row0"));
        assert_eq!(report.columns.len(), 1);
        assert_eq!(report.columns[0].name, "x[0]");
    }

    #[test]
    fn test_wider_range_allowed() {
        let limits = CoefficientLimits {
            tol_up: 1e4,
            tol_down: 1e-4,
            tol_range: 1e4,
        };
        let report = check_coefficients(&problem_with_rows(&[&[0.01, -100.0]]), &limits);
        assert!(report.is_clean());
    }
}
