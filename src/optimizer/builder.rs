//! Problem Builder
//!
//! Turns one priority level into a linear program over the model's columns:
//! - model equations and signal bounds,
//! - per sub-goal a violation column `eps >= 0` with `x + eps >= min` and
//!   `x - eps <= max` at each of its steps, weighted into the objective,
//! - hard envelopes (`function_range`, critical bands),
//! - retained bands from every earlier level's achieved constraints,
//! - extra objective terms (smoothing), passed only for the tie-break solve
//!   that follows the last level.

use tracing::debug;

use super::{
    AchievedConstraint, ColumnOrigin, ConstraintSource, LinearExpr, ObjectiveTermProvider,
    OptimizationProblem, PriorityLevel, SubGoal, VarId,
};
use crate::error::{GoalProgrammingError, Result};
use crate::model::ModelProvider;

pub struct ProblemBuilder<'a> {
    model: &'a dyn ModelProvider,
}

impl<'a> ProblemBuilder<'a> {
    pub fn new(model: &'a dyn ModelProvider) -> Self {
        Self { model }
    }

    pub fn build(
        &self,
        level: &PriorityLevel,
        achieved: &[AchievedConstraint],
        extra_terms: &[&dyn ObjectiveTermProvider],
    ) -> Result<OptimizationProblem> {
        let grid = self.model.time_grid();
        let mut problem = OptimizationProblem::new(level.priority);

        self.add_model(&mut problem, grid.len())?;

        for sub in &level.goals {
            add_goal(&mut problem, sub)?;
        }

        for record in achieved {
            add_achieved(&mut problem, record)?;
        }

        for provider in extra_terms {
            provider.contribute(&mut problem, grid);
        }

        debug!(
            priority = level.priority,
            columns = problem.variables.len(),
            rows = problem.constraints.len(),
            goal_rows = problem.count_constraints(ConstraintSource::Goal),
            achieved_rows = problem.count_constraints(ConstraintSource::Achieved),
            "built level problem"
        );

        Ok(problem)
    }

    fn add_model(&self, problem: &mut OptimizationProblem, steps: usize) -> Result<()> {
        for signal in self.model.signals() {
            let columns = (0..steps)
                .map(|index| {
                    let (lower, upper) = signal.bounds_at(index);
                    problem.add_variable(
                        ColumnOrigin::Model {
                            signal: signal.name.clone(),
                            index,
                        },
                        lower,
                        upper,
                    )
                })
                .collect();
            problem.model_columns.insert(signal.name.clone(), columns);
        }

        for equation in self.model.equations() {
            let mut expr = LinearExpr::new();
            for term in equation.terms() {
                let column = problem.column(term.signal, term.index).ok_or_else(|| {
                    GoalProgrammingError::config(format!(
                        "model equation '{}' references {}[{}], which does not exist",
                        equation.label, term.signal, term.index
                    ))
                })?;
                expr.add_term(column, term.coefficient);
            }
            problem.add_constraint(
                ConstraintSource::Model,
                equation.label.clone(),
                expr,
                equation.lower,
                equation.upper,
            );
        }
        Ok(())
    }
}

fn state_column(problem: &OptimizationProblem, state: &str, index: usize, label: &str) -> Result<VarId> {
    problem.column(state, index).ok_or_else(|| {
        GoalProgrammingError::config(format!(
            "goal '{}' references unknown variable {}[{}]",
            label, state, index
        ))
    })
}

fn add_goal(problem: &mut OptimizationProblem, sub: &SubGoal) -> Result<()> {
    let (lo, hi) = sub.function_range;
    if lo.is_finite() || hi.is_finite() {
        for step in &sub.steps {
            let x = state_column(problem, &sub.state, step.index, &sub.label)?;
            problem.add_constraint(
                ConstraintSource::Goal,
                format!("{}:envelope", sub.label),
                LinearExpr::term(x, 1.0),
                lo,
                hi,
            );
        }
    }

    if sub.critical {
        for step in &sub.steps {
            let x = state_column(problem, &sub.state, step.index, &sub.label)?;
            problem.add_constraint(
                ConstraintSource::Goal,
                format!("{}:critical", sub.label),
                LinearExpr::term(x, 1.0),
                step.min,
                step.max,
            );
        }
        return Ok(());
    }

    let eps = problem.add_variable(
        ColumnOrigin::Violation {
            goal: sub.label.clone(),
        },
        0.0,
        f64::INFINITY,
    );
    for step in &sub.steps {
        let x = state_column(problem, &sub.state, step.index, &sub.label)?;
        if step.min.is_finite() {
            problem.add_constraint(
                ConstraintSource::Goal,
                format!("{}:min", sub.label),
                LinearExpr::term(x, 1.0).with_term(eps, 1.0),
                step.min,
                f64::INFINITY,
            );
        }
        if step.max.is_finite() {
            problem.add_constraint(
                ConstraintSource::Goal,
                format!("{}:max", sub.label),
                LinearExpr::term(x, 1.0).with_term(eps, -1.0),
                f64::NEG_INFINITY,
                step.max,
            );
        }
    }
    problem.objective.add_term(eps, sub.weight / sub.nominal);
    Ok(())
}

fn add_achieved(problem: &mut OptimizationProblem, record: &AchievedConstraint) -> Result<()> {
    for step in &record.steps {
        let (lower, upper) = record.retained_band(step);
        if !lower.is_finite() && !upper.is_finite() {
            continue;
        }
        let x = state_column(problem, &record.state, step.index, &record.label)?;
        problem.add_constraint(
            ConstraintSource::Achieved,
            format!("{}:achieved@p{}", record.label, record.priority),
            LinearExpr::term(x, 1.0),
            lower,
            upper,
        );
    }
    Ok(())
}
