use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// Column index into [`OptimizationProblem::variables`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VarId(pub usize);

/// Affine expression `constant + Σ coefficient * column`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinearExpr {
    pub terms: Vec<(VarId, f64)>,
    pub constant: f64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn term(var: VarId, coefficient: f64) -> Self {
        Self {
            terms: vec![(var, coefficient)],
            constant: 0.0,
        }
    }

    pub fn add_term(&mut self, var: VarId, coefficient: f64) {
        if coefficient != 0.0 {
            self.terms.push((var, coefficient));
        }
    }

    pub fn with_term(mut self, var: VarId, coefficient: f64) -> Self {
        self.add_term(var, coefficient);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|(v, c)| c * values.get(v.0).copied().unwrap_or(0.0))
            .sum::<f64>()
            + self.constant
    }
}

/// Why a column exists
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ColumnOrigin {
    /// Model signal at a grid index
    Model { signal: String, index: usize },
    /// Violation of a sub-goal at the level being solved
    Violation { goal: String },
    /// Absolute rate of change of a smoothed control
    Smoothing { signal: String, index: usize },
}

impl fmt::Display for ColumnOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnOrigin::Model { signal, index } => write!(f, "{}[{}]", signal, index),
            ColumnOrigin::Violation { goal } => write!(f, "eps({})", goal),
            ColumnOrigin::Smoothing { signal, index } => write!(f, "rate({})[{}]", signal, index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionVariable {
    pub origin: ColumnOrigin,
    pub lower: f64,
    pub upper: f64,
}

/// `lower <= expr <= upper`; either side may be infinite
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinearConstraint {
    pub label: String,
    pub expr: LinearExpr,
    pub lower: f64,
    pub upper: f64,
}

/// Where a constraint came from, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConstraintSource {
    Model,
    Goal,
    Achieved,
    Smoothing,
}

/// One priority level's problem: minimise `objective` subject to column
/// bounds and `constraints`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizationProblem {
    pub priority: i32,
    pub variables: Vec<DecisionVariable>,
    pub constraints: Vec<LinearConstraint>,
    pub sources: Vec<ConstraintSource>,
    pub objective: LinearExpr,
    /// Model columns per signal, one per grid index
    pub model_columns: IndexMap<String, Vec<VarId>>,
}

impl OptimizationProblem {
    pub fn new(priority: i32) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    pub fn add_variable(&mut self, origin: ColumnOrigin, lower: f64, upper: f64) -> VarId {
        self.variables.push(DecisionVariable {
            origin,
            lower,
            upper,
        });
        VarId(self.variables.len() - 1)
    }

    pub fn add_constraint(
        &mut self,
        source: ConstraintSource,
        label: impl Into<String>,
        expr: LinearExpr,
        lower: f64,
        upper: f64,
    ) {
        self.constraints.push(LinearConstraint {
            label: label.into(),
            expr,
            lower,
            upper,
        });
        self.sources.push(source);
    }

    pub fn column(&self, signal: &str, index: usize) -> Option<VarId> {
        self.model_columns.get(signal).and_then(|cols| cols.get(index)).copied()
    }

    /// Split a column assignment back into per-signal timeseries
    pub fn assignment(&self, values: &[f64]) -> IndexMap<String, Vec<f64>> {
        self.model_columns
            .iter()
            .map(|(name, cols)| {
                let series = cols
                    .iter()
                    .map(|v| values.get(v.0).copied().unwrap_or(f64::NAN))
                    .collect();
                (name.clone(), series)
            })
            .collect()
    }

    pub fn count_constraints(&self, source: ConstraintSource) -> usize {
        self.sources.iter().filter(|s| **s == source).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_evaluation() {
        let expr = LinearExpr::term(VarId(0), 2.0).with_term(VarId(2), -1.0);
        assert_eq!(expr.evaluate(&[3.0, 100.0, 1.0]), 5.0);
    }

    #[test]
    fn test_zero_coefficients_dropped() {
        let expr = LinearExpr::new().with_term(VarId(0), 0.0);
        assert!(expr.is_empty());
    }

    #[test]
    fn test_assignment_by_signal() {
        let mut problem = OptimizationProblem::new(1);
        let a = problem.add_variable(
            ColumnOrigin::Model {
                signal: "x".into(),
                index: 0,
            },
            0.0,
            1.0,
        );
        let b = problem.add_variable(
            ColumnOrigin::Model {
                signal: "x".into(),
                index: 1,
            },
            0.0,
            1.0,
        );
        problem.model_columns.insert("x".into(), vec![a, b]);

        let assignment = problem.assignment(&[0.25, 0.75]);
        assert_eq!(assignment["x"], vec![0.25, 0.75]);
        assert_eq!(problem.column("x", 1), Some(b));
        assert_eq!(problem.column("y", 0), None);
    }
}
