//! Extra objective terms, minimised after the last priority level
//!
//! Providers never add hard restrictions on model variables: any auxiliary
//! rows they add only define their own auxiliary columns.

use super::{ColumnOrigin, ConstraintSource, LinearExpr, OptimizationProblem};
use crate::error::{GoalProgrammingError, Result};
use crate::model::ModelProvider;

/// Composable contribution to the last level's objective
pub trait ObjectiveTermProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Reject references the model cannot satisfy
    fn validate(&self, model: &dyn ModelProvider) -> Result<()>;

    fn contribute(&self, problem: &mut OptimizationProblem, grid: &[f64]);
}

/// Penalizes `Σ |du/dt|` over designated controls with a small weight
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingTerm {
    controls: Vec<String>,
    weight: f64,
}

impl SmoothingTerm {
    pub fn new(controls: Vec<String>, weight: f64) -> Result<Self> {
        if !weight.is_finite() || weight <= 0.0 {
            return Err(GoalProgrammingError::config(format!(
                "smoothing weight must be positive, got {}",
                weight
            )));
        }
        if controls.is_empty() {
            return Err(GoalProgrammingError::config("smoothing needs at least one control"));
        }
        Ok(Self { controls, weight })
    }

    pub fn controls(&self) -> &[String] {
        &self.controls
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }
}

impl ObjectiveTermProvider for SmoothingTerm {
    fn name(&self) -> &str {
        "smoothing"
    }

    fn validate(&self, model: &dyn ModelProvider) -> Result<()> {
        for control in &self.controls {
            match model.get_variable(control) {
                Some(signal) if signal.is_control() => {}
                Some(signal) => {
                    return Err(GoalProgrammingError::config(format!(
                        "smoothing target '{}' is a {} signal, not a control",
                        control, signal.kind
                    )))
                }
                None => {
                    return Err(GoalProgrammingError::config(format!(
                        "smoothing references unknown variable '{}'",
                        control
                    )))
                }
            }
        }
        Ok(())
    }

    fn contribute(&self, problem: &mut OptimizationProblem, grid: &[f64]) {
        for control in &self.controls {
            for i in 0..grid.len().saturating_sub(1) {
                let (Some(u0), Some(u1)) = (problem.column(control, i), problem.column(control, i + 1)) else {
                    continue;
                };
                let inv_dt = 1.0 / (grid[i + 1] - grid[i]);
                let rate = problem.add_variable(
                    ColumnOrigin::Smoothing {
                        signal: control.clone(),
                        index: i,
                    },
                    0.0,
                    f64::INFINITY,
                );

                // rate >= |u1 - u0| / dt
                let up = LinearExpr::term(rate, 1.0)
                    .with_term(u1, -inv_dt)
                    .with_term(u0, inv_dt);
                let down = LinearExpr::term(rate, 1.0)
                    .with_term(u1, inv_dt)
                    .with_term(u0, -inv_dt);
                let label = format!("smoothing({})[{}]", control, i);
                problem.add_constraint(ConstraintSource::Smoothing, format!("{}+", label), up, 0.0, f64::INFINITY);
                problem.add_constraint(ConstraintSource::Smoothing, format!("{}-", label), down, 0.0, f64::INFINITY);

                problem.objective.add_term(rate, self.weight);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinearDaeModel;

    fn model() -> LinearDaeModel {
        LinearDaeModel::builder(vec![0.0, 1.0, 2.0])
            .state("level", 0.0, 20.0, Some(10.0))
            .control("gate", 0.0, 5.0)
            .build()
            .unwrap()
    }

    #[test]
    fn test_rejects_non_positive_weight() {
        assert!(SmoothingTerm::new(vec!["gate".into()], 0.0).is_err());
        assert!(SmoothingTerm::new(vec![], 1e-3).is_err());
    }

    #[test]
    fn test_validate_requires_controls() {
        let model = model();
        assert!(SmoothingTerm::new(vec!["gate".into()], 1e-3).unwrap().validate(&model).is_ok());
        assert!(SmoothingTerm::new(vec!["level".into()], 1e-3).unwrap().validate(&model).is_err());
        assert!(SmoothingTerm::new(vec!["nope".into()], 1e-3).unwrap().validate(&model).is_err());
    }

    #[test]
    fn test_contribute_adds_rate_columns() {
        let mut problem = OptimizationProblem::new(1);
        let cols: Vec<_> = (0..3)
            .map(|i| {
                problem.add_variable(
                    ColumnOrigin::Model {
                        signal: "gate".into(),
                        index: i,
                    },
                    0.0,
                    5.0,
                )
            })
            .collect();
        problem.model_columns.insert("gate".into(), cols);

        let term = SmoothingTerm::new(vec!["gate".into()], 1e-3).unwrap();
        term.contribute(&mut problem, &[0.0, 1.0, 2.0]);

        assert_eq!(problem.variables.len(), 5);
        assert_eq!(problem.count_constraints(ConstraintSource::Smoothing), 4);
        assert_eq!(problem.objective.terms.len(), 2);
        assert!(problem
            .constraints
            .iter()
            .all(|c| c.lower == 0.0 && c.upper == f64::INFINITY));
    }
}
