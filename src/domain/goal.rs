//! Declarative goals
//!
//! A goal asks one model variable to stay inside a band (`Range`) or to follow
//! a single trajectory (`Target`). Goals are ranked by priority: lower numbers
//! are solved first and are never traded away by later priorities.

use serde::{Deserialize, Serialize};

use super::{Interpolation, Timeseries};
use crate::error::{GoalProgrammingError, Result};

/// What a goal asks of its variable
#[derive(Debug, Clone, PartialEq)]
pub enum TargetKind {
    /// Keep the value within `[min(t), max(t)]`. A missing side is unbounded.
    Range {
        min: Option<Timeseries>,
        max: Option<Timeseries>,
    },
    /// Minimize the deviation from `target(t)`
    Target { target: Timeseries },
}

impl TargetKind {
    pub fn label(&self) -> &'static str {
        match self {
            TargetKind::Range { .. } => "range",
            TargetKind::Target { .. } => "target",
        }
    }
}

/// A validated, ranked objective over one model variable
#[derive(Debug, Clone, PartialEq)]
pub struct Goal {
    name: String,
    state: String,
    priority: i32,
    target: TargetKind,
    weight: f64,
    nominal: f64,
    path: bool,
    critical: bool,
    function_range: (f64, f64),
}

impl Goal {
    /// Band goal on `state`
    pub fn range(
        state: impl Into<String>,
        min: impl Into<Timeseries>,
        max: impl Into<Timeseries>,
    ) -> GoalBuilder {
        GoalBuilder::new(
            state.into(),
            TargetKind::Range {
                min: Some(min.into()),
                max: Some(max.into()),
            },
        )
    }

    /// One-sided band: `state >= min(t)`
    pub fn at_least(state: impl Into<String>, min: impl Into<Timeseries>) -> GoalBuilder {
        GoalBuilder::new(
            state.into(),
            TargetKind::Range {
                min: Some(min.into()),
                max: None,
            },
        )
    }

    /// One-sided band: `state <= max(t)`
    pub fn at_most(state: impl Into<String>, max: impl Into<Timeseries>) -> GoalBuilder {
        GoalBuilder::new(
            state.into(),
            TargetKind::Range {
                min: None,
                max: Some(max.into()),
            },
        )
    }

    /// Tracking goal on `state`
    pub fn target(state: impl Into<String>, target: impl Into<Timeseries>) -> GoalBuilder {
        GoalBuilder::new(
            state.into(),
            TargetKind::Target {
                target: target.into(),
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn kind(&self) -> &TargetKind {
        &self.target
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn nominal(&self) -> f64 {
        self.nominal
    }

    pub fn is_path_goal(&self) -> bool {
        self.path
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    /// Hard envelope the variable may reach when the goal is fully relaxed
    pub fn function_range(&self) -> (f64, f64) {
        self.function_range
    }

    /// Acceptable `(min, max)` at time `t`; unbounded sides are infinite
    pub fn evaluate_bound(&self, t: f64) -> (f64, f64) {
        match &self.target {
            TargetKind::Range { min, max } => (
                min.as_ref().map_or(f64::NEG_INFINITY, |s| s.value_at(t)),
                max.as_ref().map_or(f64::INFINITY, |s| s.value_at(t)),
            ),
            TargetKind::Target { target } => {
                let v = target.value_at(t);
                (v, v)
            }
        }
    }

    /// Distance of `value` outside the band at `t`, in the variable's units
    pub fn violation(&self, value: f64, t: f64) -> f64 {
        let (min, max) = self.evaluate_bound(t);
        (min - value).max(0.0) + (value - max).max(0.0)
    }

    /// Objective penalty of `value` at `t`: zero inside the band, growing
    /// linearly with the distance outside it, scaled by the goal's nominal.
    pub fn objective_contribution(&self, value: f64, t: f64) -> f64 {
        self.violation(value, t) / self.nominal
    }
}

/// Builder for [`Goal`]; all invariants are checked in [`GoalBuilder::build`]
#[derive(Debug, Clone)]
pub struct GoalBuilder {
    name: Option<String>,
    state: String,
    priority: i32,
    target: TargetKind,
    weight: f64,
    nominal: f64,
    path: bool,
    critical: bool,
    function_range: (f64, f64),
}

impl GoalBuilder {
    fn new(state: String, target: TargetKind) -> Self {
        Self {
            name: None,
            state,
            priority: 1,
            target,
            weight: 1.0,
            nominal: 1.0,
            path: true,
            critical: false,
            function_range: (f64::NEG_INFINITY, f64::INFINITY),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn nominal(mut self, nominal: f64) -> Self {
        self.nominal = nominal;
        self
    }

    /// `false` turns the goal into a horizon-wide goal with a single violation
    /// measure shared by every time step.
    pub fn path(mut self, path: bool) -> Self {
        self.path = path;
        self
    }

    /// Enforce the band as a hard constraint
    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn function_range(mut self, lower: f64, upper: f64) -> Self {
        self.function_range = (lower, upper);
        self
    }

    pub fn build(self) -> Result<Goal> {
        let name = self.name.unwrap_or_else(|| {
            format!("{}:{}@p{}", self.state, self.target.label(), self.priority)
        });

        if self.state.trim().is_empty() {
            return Err(GoalProgrammingError::config(format!(
                "goal '{}' does not reference a variable",
                name
            )));
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(GoalProgrammingError::config(format!(
                "goal '{}' has invalid weight {}",
                name, self.weight
            )));
        }
        if !self.nominal.is_finite() || self.nominal <= 0.0 {
            return Err(GoalProgrammingError::config(format!(
                "goal '{}' has invalid nominal {}",
                name, self.nominal
            )));
        }
        let (lo, hi) = self.function_range;
        if lo.is_nan() || hi.is_nan() || lo > hi {
            return Err(GoalProgrammingError::config(format!(
                "goal '{}' has invalid function range [{}, {}]",
                name, lo, hi
            )));
        }

        match &self.target {
            TargetKind::Range { min: None, max: None } => {
                return Err(GoalProgrammingError::config(format!(
                    "goal '{}' has neither a minimum nor a maximum",
                    name
                )));
            }
            TargetKind::Range {
                min: Some(min),
                max: Some(max),
            } => check_ordered(&name, min, max)?,
            TargetKind::Target { target } => {
                if target.values().iter().any(|v| !v.is_finite()) {
                    return Err(GoalProgrammingError::config(format!(
                        "goal '{}' has a non-finite target",
                        name
                    )));
                }
            }
            TargetKind::Range { .. } => {}
        }

        Ok(Goal {
            name,
            state: self.state,
            priority: self.priority,
            target: self.target,
            weight: self.weight,
            nominal: self.nominal,
            path: self.path,
            critical: self.critical,
            function_range: self.function_range,
        })
    }
}

/// Both series are linear or constant between the union of their breakpoints,
/// so comparing values and left limits at those breakpoints covers every t.
fn check_ordered(name: &str, min: &Timeseries, max: &Timeseries) -> Result<()> {
    let mut breakpoints: Vec<f64> = min.times().iter().chain(max.times()).copied().collect();
    breakpoints.sort_by(f64::total_cmp);
    breakpoints.dedup();

    for t in breakpoints {
        let at = (min.value_at(t), max.value_at(t));
        let before = (min.value_before(t), max.value_before(t));
        for (lo, hi) in [at, before] {
            if lo > hi {
                return Err(GoalProgrammingError::config(format!(
                    "goal '{}' has target_min {} > target_max {} at t = {}",
                    name, lo, hi, t
                )));
            }
        }
    }
    Ok(())
}

/// Serialized form of a goal, as read from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub state: String,
    pub priority: i32,
    #[serde(flatten)]
    pub target: TargetSpec,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_nominal")]
    pub nominal: f64,
    #[serde(default = "default_path")]
    pub path: bool,
    #[serde(default)]
    pub critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_range: Option<(f64, f64)>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_nominal() -> f64 {
    1.0
}

fn default_path() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetSpec {
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<SeriesSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<SeriesSpec>,
    },
    Target {
        target: SeriesSpec,
    },
}

/// A constant or a list of breakpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeriesSpec {
    Constant(f64),
    Points {
        times: Vec<f64>,
        values: Vec<f64>,
        #[serde(default)]
        interpolation: Interpolation,
    },
}

impl TryFrom<SeriesSpec> for Timeseries {
    type Error = GoalProgrammingError;

    fn try_from(spec: SeriesSpec) -> Result<Self> {
        match spec {
            SeriesSpec::Constant(v) if v.is_nan() => {
                Err(GoalProgrammingError::config("constant series must not be NaN"))
            }
            SeriesSpec::Constant(v) => Ok(Timeseries::constant(v)),
            SeriesSpec::Points {
                times,
                values,
                interpolation,
            } => Timeseries::with_interpolation(times, values, interpolation),
        }
    }
}

impl TryFrom<GoalSpec> for Goal {
    type Error = GoalProgrammingError;

    fn try_from(spec: GoalSpec) -> Result<Self> {
        let target = match spec.target {
            TargetSpec::Range { min, max } => TargetKind::Range {
                min: min.map(Timeseries::try_from).transpose()?,
                max: max.map(Timeseries::try_from).transpose()?,
            },
            TargetSpec::Target { target } => TargetKind::Target {
                target: Timeseries::try_from(target)?,
            },
        };

        let mut builder = GoalBuilder::new(spec.state, target)
            .priority(spec.priority)
            .weight(spec.weight)
            .nominal(spec.nominal)
            .path(spec.path)
            .critical(spec.critical);
        if let Some(name) = spec.name {
            builder = builder.name(name);
        }
        if let Some((lo, hi)) = spec.function_range {
            builder = builder.function_range(lo, hi);
        }
        builder.build()
    }
}
