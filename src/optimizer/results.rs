//! Result Accessor
//!
//! Built once the scheduler reaches DONE. Holds the final assignment of every
//! model variable, the per-goal achievement, and a per-level summary.

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use serde::Serialize;
use uuid::Uuid;

use super::CoefficientReport;
use crate::domain::Goal;

/// Achievement of one declared goal on the final assignment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalOutcome {
    pub name: String,
    pub state: String,
    pub priority: i32,
    pub kind: &'static str,
    /// Value of the goal's variable at every grid point
    pub values: Vec<f64>,
    /// Distance outside the band at every grid point
    pub violations: Vec<f64>,
    /// Value at the step with the largest violation
    pub worst_value: f64,
    pub worst_violation: f64,
    /// Penalty as seen by the objective: summed over steps for path goals,
    /// worst case for horizon goals, divided by the nominal
    pub objective_contribution: f64,
    pub met: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelSummary {
    pub priority: i32,
    pub objective_value: f64,
    pub achieved_objective: f64,
    pub goals: Vec<String>,
    /// Coefficient range findings, when checks are enabled
    pub coefficients: Option<CoefficientReport>,
}

/// Solve of the extra objective terms with every achievement held
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TieBreakSummary {
    pub priority: i32,
    pub objective_value: f64,
    pub coefficients: Option<CoefficientReport>,
}

/// Achieved constraint found violated beyond its retained band
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Degradation {
    pub goal: String,
    /// Level the achievement was recorded at
    pub recorded_at: i32,
    /// Level whose solution exceeded it
    pub observed_at: i32,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResults {
    pub run_id: Uuid,
    pub time_grid: Vec<f64>,
    pub variables: IndexMap<String, Vec<f64>>,
    pub goals: Vec<GoalOutcome>,
    pub levels: Vec<LevelSummary>,
    pub degradations: Vec<Degradation>,
    /// Present when extra objective terms were minimised after the last level
    pub tie_break: Option<TieBreakSummary>,
}

impl RunResults {
    pub(crate) fn assemble(
        run_id: Uuid,
        time_grid: &[f64],
        goals: &[Goal],
        variables: IndexMap<String, Vec<f64>>,
        levels: Vec<LevelSummary>,
        degradations: Vec<Degradation>,
        met_tolerance: f64,
    ) -> Self {
        let goals = goals
            .iter()
            .map(|goal| evaluate_goal(goal, time_grid, &variables, met_tolerance))
            .collect();
        Self {
            run_id,
            time_grid: time_grid.to_vec(),
            variables,
            goals,
            levels,
            degradations,
            tie_break: None,
        }
    }

    pub fn goal(&self, name: &str) -> Option<&GoalOutcome> {
        self.goals.iter().find(|g| g.name == name)
    }

    pub fn variable(&self, name: &str) -> Option<&[f64]> {
        self.variables.get(name).map(Vec::as_slice)
    }

    /// Objective value of every level, in solve order
    pub fn objective_values(&self) -> Vec<(i32, f64)> {
        self.levels.iter().map(|l| (l.priority, l.objective_value)).collect()
    }

    pub fn is_monotone(&self) -> bool {
        self.degradations.is_empty()
    }

    /// Tabular form: one row per grid point, one column per variable.
    /// Grid times are seconds from `reference` when one is given.
    pub fn export_table(&self, reference: Option<DateTime<Utc>>) -> ResultTable {
        let columns: Vec<String> = self.variables.keys().cloned().collect();
        let rows = self
            .time_grid
            .iter()
            .enumerate()
            .map(|(i, &time)| ResultRow {
                time,
                timestamp: reference.and_then(|r| offset(r, time)),
                values: self
                    .variables
                    .values()
                    .map(|series| series.get(i).copied().unwrap_or(f64::NAN))
                    .collect(),
            })
            .collect();
        ResultTable { columns, rows }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub values: Vec<f64>,
}

/// `None` when the offset does not fit in a timestamp
fn offset(reference: DateTime<Utc>, seconds: f64) -> Option<DateTime<Utc>> {
    let delta = TimeDelta::try_milliseconds((seconds * 1000.0).round() as i64)?;
    reference.checked_add_signed(delta)
}

fn evaluate_goal(
    goal: &Goal,
    time_grid: &[f64],
    variables: &IndexMap<String, Vec<f64>>,
    met_tolerance: f64,
) -> GoalOutcome {
    let values: Vec<f64> = match variables.get(goal.state()) {
        Some(series) => series.clone(),
        None => vec![f64::NAN; time_grid.len()],
    };
    let violations: Vec<f64> = values
        .iter()
        .zip(time_grid)
        .map(|(&v, &t)| goal.violation(v, t))
        .collect();

    let worst = violations
        .iter()
        .enumerate()
        .max_by_key(|(_, v)| OrderedFloat(**v));
    let (worst_value, worst_violation) = match worst {
        Some((i, &violation)) => (values[i], violation),
        None => (f64::NAN, 0.0),
    };

    let objective_contribution = if goal.is_path_goal() {
        violations.iter().sum::<f64>() / goal.nominal()
    } else {
        worst_violation / goal.nominal()
    };

    GoalOutcome {
        name: goal.name().to_string(),
        state: goal.state().to_string(),
        priority: goal.priority(),
        kind: goal.kind().label(),
        values,
        violations,
        worst_value,
        worst_violation,
        objective_contribution,
        met: worst_violation <= met_tolerance,
    }
}
