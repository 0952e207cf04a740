use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{StepBound, SubGoal};

/// Margin added to an achieved violation before it is imposed on later levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct Tolerance {
    /// Floor of the margin, in the goal variable's units
    #[validate(range(min = 0.0))]
    pub absolute: f64,
    /// Fraction of the achieved violation added on top
    #[validate(range(min = 0.0, max = 1.0))]
    pub relative: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            absolute: 1e-5,
            relative: 1e-4,
        }
    }
}

impl Tolerance {
    pub fn margin(&self, achieved: f64) -> f64 {
        self.absolute.max(self.relative * achieved.abs())
    }
}

/// Retained achievement of one sub-goal, imposed as a hard constraint on
/// every later priority level. Written once, never modified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AchievedConstraint {
    pub priority: i32,
    pub goal: usize,
    pub label: String,
    pub state: String,
    pub nominal: f64,
    pub steps: Vec<StepBound>,
    /// Worst distance outside the band when its level was solved
    pub achieved: f64,
    /// `achieved` plus the tolerance margin
    pub allowed: f64,
}

impl AchievedConstraint {
    pub fn record(sub: &SubGoal, series: &[f64], tolerance: &Tolerance) -> Self {
        let achieved = sub.violation_in(series);
        Self {
            priority: sub.priority,
            goal: sub.goal,
            label: sub.label.clone(),
            state: sub.state.clone(),
            nominal: sub.nominal,
            steps: sub.steps.clone(),
            achieved,
            allowed: achieved + tolerance.margin(achieved),
        }
    }

    /// Achieved value as the goal's objective contribution
    pub fn achieved_objective(&self) -> f64 {
        self.achieved / self.nominal
    }

    /// Band widened by the retained violation at one step
    pub fn retained_band(&self, step: &StepBound) -> (f64, f64) {
        (step.min - self.allowed, step.max + self.allowed)
    }

    /// Worst violation of the retained band by `series`
    pub fn degradation(&self, series: &[f64]) -> f64 {
        self.steps
            .iter()
            .map(|s| {
                let value = series.get(s.index).copied().unwrap_or(f64::NAN);
                s.violation(value) - self.allowed
            })
            .fold(f64::NEG_INFINITY, f64::max)
            .max(0.0)
    }
}
