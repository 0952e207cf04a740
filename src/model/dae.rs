//! Linear DAE model transcribed on a time grid
//!
//! Differential equations `der(x) = Σ c_j v_j + c0` are discretized with the
//! θ-method
//!
//! ```text
//! x[i+1] = x[i] + Δt (θ f[i+1] + (1 - θ) f[i])
//! ```
//!
//! θ = 1 (backward Euler) is the default. θ = 0 is forward Euler; the control
//! input at the final time step is then unused.

use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::debug;

use super::{ModelConstraint, ModelProvider, Signal, SignalKind};
use crate::domain::Timeseries;
use crate::error::{GoalProgrammingError, Result};

#[derive(Debug, Clone)]
struct Derivative {
    state: String,
    terms: Vec<(String, f64)>,
    constant: f64,
}

#[derive(Debug, Clone)]
struct PathRelation {
    label: String,
    terms: Vec<(String, f64)>,
    lower: f64,
    upper: f64,
}

/// `input(t) = output(t - duration)`, with `history` before the grid starts
#[derive(Debug, Clone)]
struct Delay {
    input: String,
    output: String,
    duration: f64,
    history: f64,
}

/// A discretized linear model ready to be handed to the scheduler
#[derive(Debug, Clone)]
pub struct LinearDaeModel {
    grid: Vec<f64>,
    signals: Vec<Signal>,
    equations: Vec<ModelConstraint>,
}

impl LinearDaeModel {
    pub fn builder(grid: Vec<f64>) -> LinearDaeBuilder {
        LinearDaeBuilder {
            grid,
            theta: 1.0,
            signals: Vec::new(),
            initial: Vec::new(),
            inputs: Vec::new(),
            derivatives: Vec::new(),
            relations: Vec::new(),
            delays: Vec::new(),
        }
    }
}

impl ModelProvider for LinearDaeModel {
    fn time_grid(&self) -> &[f64] {
        &self.grid
    }

    fn signals(&self) -> &[Signal] {
        &self.signals
    }

    fn equations(&self) -> &[ModelConstraint] {
        &self.equations
    }
}

pub struct LinearDaeBuilder {
    grid: Vec<f64>,
    theta: f64,
    signals: Vec<Signal>,
    initial: Vec<(String, f64)>,
    inputs: Vec<(String, Timeseries)>,
    derivatives: Vec<Derivative>,
    relations: Vec<PathRelation>,
    delays: Vec<Delay>,
}

fn owned_terms(terms: &[(&str, f64)]) -> Vec<(String, f64)> {
    terms.iter().map(|(s, c)| (s.to_string(), *c)).collect()
}

impl LinearDaeBuilder {
    pub fn theta(mut self, theta: f64) -> Self {
        self.theta = theta;
        self
    }

    /// Differential state, optionally pinned at the first grid point
    pub fn state(mut self, name: &str, lower: f64, upper: f64, initial: Option<f64>) -> Self {
        self.signals.push(Signal::new(name, SignalKind::State, lower, upper));
        if let Some(x0) = initial {
            self.initial.push((name.to_string(), x0));
        }
        self
    }

    pub fn control(mut self, name: &str, lower: f64, upper: f64) -> Self {
        self.signals.push(Signal::new(name, SignalKind::Control, lower, upper));
        self
    }

    pub fn algebraic(mut self, name: &str, lower: f64, upper: f64) -> Self {
        self.signals.push(Signal::new(name, SignalKind::Algebraic, lower, upper));
        self
    }

    /// Exogenous input, sampled on the grid
    pub fn input(mut self, name: &str, series: impl Into<Timeseries>) -> Self {
        let series = series.into();
        self.signals.push(Signal::new(
            name,
            SignalKind::Input,
            f64::NEG_INFINITY,
            f64::INFINITY,
        ));
        self.inputs.push((name.to_string(), series));
        self
    }

    /// `der(state) = Σ c_j v_j + constant`
    pub fn derivative(mut self, state: &str, terms: &[(&str, f64)], constant: f64) -> Self {
        self.derivatives.push(Derivative {
            state: state.to_string(),
            terms: owned_terms(terms),
            constant,
        });
        self
    }

    /// `Σ c_j v_j = rhs` at every grid point
    pub fn equation(mut self, label: &str, terms: &[(&str, f64)], rhs: f64) -> Self {
        self.relations.push(PathRelation {
            label: label.to_string(),
            terms: owned_terms(terms),
            lower: rhs,
            upper: rhs,
        });
        self
    }

    /// `lower <= Σ c_j v_j <= upper` at every grid point
    pub fn path_constraint(mut self, label: &str, terms: &[(&str, f64)], lower: f64, upper: f64) -> Self {
        self.relations.push(PathRelation {
            label: label.to_string(),
            terms: owned_terms(terms),
            lower,
            upper,
        });
        self
    }

    /// `input(t) = output(t - duration)`; values before the first grid point
    /// are taken from `history`.
    pub fn delay(mut self, input: &str, output: &str, duration: f64, history: f64) -> Self {
        self.delays.push(Delay {
            input: input.to_string(),
            output: output.to_string(),
            duration,
            history,
        });
        self
    }

    pub fn build(self) -> Result<LinearDaeModel> {
        self.validate()?;

        let grid = self.grid;
        let n = grid.len();
        let mut signals = self.signals;
        for (name, series) in &self.inputs {
            if let Some(signal) = signals.iter_mut().find(|s| &s.name == name) {
                signal.fixed = Some(series.sample(&grid));
            }
        }

        let mut equations = Vec::new();

        for (state, x0) in &self.initial {
            equations.push(ModelConstraint::equality(
                format!("initial({})", state),
                vec![(state.clone(), 0, 1.0)],
                *x0,
            ));
        }

        let theta = self.theta;
        for der in &self.derivatives {
            for i in 0..n - 1 {
                let dt = grid[i + 1] - grid[i];
                let mut terms = vec![(der.state.clone(), i + 1, 1.0), (der.state.clone(), i, -1.0)];
                for (v, c) in &der.terms {
                    if theta > 0.0 {
                        terms.push((v.clone(), i + 1, -dt * theta * c));
                    }
                    if theta < 1.0 {
                        terms.push((v.clone(), i, -dt * (1.0 - theta) * c));
                    }
                }
                equations.push(ModelConstraint::equality(
                    format!("der({})[{}]", der.state, i + 1),
                    merge_terms(terms),
                    dt * der.constant,
                ));
            }
        }

        for rel in &self.relations {
            for i in 0..n {
                let terms = rel.terms.iter().map(|(v, c)| (v.clone(), i, *c)).collect();
                equations.push(ModelConstraint {
                    label: format!("{}[{}]", rel.label, i),
                    terms: merge_terms(terms),
                    lower: rel.lower,
                    upper: rel.upper,
                });
            }
        }

        for delay in &self.delays {
            for (i, &t) in grid.iter().enumerate() {
                equations.push(delay_equation(delay, &grid, i, t));
            }
        }

        debug!(
            signals = signals.len(),
            equations = equations.len(),
            steps = n,
            theta,
            "transcribed linear model"
        );

        Ok(LinearDaeModel {
            grid,
            signals,
            equations,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.grid.len() < 2 {
            return Err(GoalProgrammingError::config("time grid needs at least two points"));
        }
        if self.grid.iter().any(|t| !t.is_finite()) || self.grid.windows(2).any(|w| w[1] <= w[0]) {
            return Err(GoalProgrammingError::config(
                "time grid must be finite and strictly increasing",
            ));
        }
        if !(0.0..=1.0).contains(&self.theta) {
            return Err(GoalProgrammingError::config(format!(
                "theta must lie in [0, 1], got {}",
                self.theta
            )));
        }

        let mut names = HashSet::new();
        for signal in &self.signals {
            if !names.insert(signal.name.as_str()) {
                return Err(GoalProgrammingError::config(format!(
                    "signal '{}' declared twice",
                    signal.name
                )));
            }
            if signal.lower.is_nan() || signal.upper.is_nan() || signal.lower > signal.upper {
                return Err(GoalProgrammingError::config(format!(
                    "signal '{}' has invalid bounds [{}, {}]",
                    signal.name, signal.lower, signal.upper
                )));
            }
        }

        let known = |name: &str| -> Result<()> {
            if names.contains(name) {
                Ok(())
            } else {
                Err(GoalProgrammingError::config(format!("unknown signal '{}'", name)))
            }
        };

        let mut differentiated = HashSet::new();
        for der in &self.derivatives {
            let is_state = self
                .signals
                .iter()
                .any(|s| s.name == der.state && s.kind == SignalKind::State);
            if !is_state {
                return Err(GoalProgrammingError::config(format!(
                    "derivative declared for '{}', which is not a state",
                    der.state
                )));
            }
            if !differentiated.insert(der.state.as_str()) {
                return Err(GoalProgrammingError::config(format!(
                    "state '{}' has more than one derivative equation",
                    der.state
                )));
            }
            for (v, c) in &der.terms {
                known(v)?;
                if !c.is_finite() {
                    return Err(GoalProgrammingError::config(format!(
                        "non-finite coefficient on '{}' in der({})",
                        v, der.state
                    )));
                }
            }
            if !der.constant.is_finite() {
                return Err(GoalProgrammingError::config(format!(
                    "non-finite constant in der({})",
                    der.state
                )));
            }
        }

        for rel in &self.relations {
            for (v, c) in &rel.terms {
                known(v)?;
                if !c.is_finite() {
                    return Err(GoalProgrammingError::config(format!(
                        "non-finite coefficient on '{}' in '{}'",
                        v, rel.label
                    )));
                }
            }
            if rel.lower.is_nan() || rel.upper.is_nan() || rel.lower > rel.upper {
                return Err(GoalProgrammingError::config(format!(
                    "'{}' has invalid bounds [{}, {}]",
                    rel.label, rel.lower, rel.upper
                )));
            }
        }

        for delay in &self.delays {
            known(&delay.input)?;
            known(&delay.output)?;
            if !delay.duration.is_finite() || delay.duration < 0.0 {
                return Err(GoalProgrammingError::config(format!(
                    "delay of '{}' must be finite and non-negative, got {}",
                    delay.input, delay.duration
                )));
            }
            if !delay.history.is_finite() {
                return Err(GoalProgrammingError::config(format!(
                    "delay history of '{}' must be finite",
                    delay.input
                )));
            }
        }

        for (name, _) in &self.initial {
            if !self.signals.iter().any(|s| &s.name == name) {
                return Err(GoalProgrammingError::config(format!("unknown signal '{}'", name)));
            }
        }

        // A constant series extends to any horizon; anything else must span the grid.
        let (start, end) = (self.grid[0], self.grid[self.grid.len() - 1]);
        for (name, series) in &self.inputs {
            if series.is_constant() {
                continue;
            }
            let times = series.times();
            let covers = times.first().is_some_and(|&t| t <= start)
                && times.last().is_some_and(|&t| t >= end);
            if !covers {
                return Err(GoalProgrammingError::config(format!(
                    "input '{}' does not cover the time grid [{}, {}]",
                    name, start, end
                )));
            }
        }
        Ok(())
    }
}

/// Sum coefficients of repeated (signal, index) pairs, keeping first-seen order
fn merge_terms(terms: Vec<(String, usize, f64)>) -> Vec<(String, usize, f64)> {
    let mut merged: IndexMap<(String, usize), f64> = IndexMap::with_capacity(terms.len());
    for (signal, index, coefficient) in terms {
        *merged.entry((signal, index)).or_insert(0.0) += coefficient;
    }
    merged
        .into_iter()
        .filter(|(_, c)| *c != 0.0)
        .map(|((signal, index), c)| (signal, index, c))
        .collect()
}

fn delay_equation(delay: &Delay, grid: &[f64], i: usize, t: f64) -> ModelConstraint {
    let label = format!("delay({})[{}]", delay.input, i);
    let input = (delay.input.clone(), i, 1.0);
    let tau = t - delay.duration;

    if delay.duration == 0.0 {
        return ModelConstraint::equality(
            label,
            merge_terms(vec![input, (delay.output.clone(), i, -1.0)]),
            0.0,
        );
    }
    if tau < grid[0] {
        return ModelConstraint::equality(label, vec![input], delay.history);
    }

    // tau <= t, so the bracketing interval ends at or before i
    let j = grid.partition_point(|&x| x <= tau).saturating_sub(1);
    if grid[j] == tau || j + 1 >= grid.len() {
        return ModelConstraint::equality(
            label,
            merge_terms(vec![input, (delay.output.clone(), j, -1.0)]),
            0.0,
        );
    }
    let w = (tau - grid[j]) / (grid[j + 1] - grid[j]);
    ModelConstraint::equality(
        label,
        merge_terms(vec![
            input,
            (delay.output.clone(), j, -(1.0 - w)),
            (delay.output.clone(), j + 1, -w),
        ]),
        0.0,
    )
}
