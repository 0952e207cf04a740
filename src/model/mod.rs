//! Model provider boundary
//!
//! The engine never looks inside the physical model. It only needs the time
//! grid, the discretized signals with their bounds, and the model's own
//! equations expressed over (signal, time index) pairs.

pub mod dae;

pub use dae::*;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SignalKind {
    /// Differential state
    State,
    /// Decision input chosen by the optimizer
    Control,
    /// Algebraic variable defined by the model equations
    Algebraic,
    /// Exogenous input with fixed values on the grid
    Input,
}

/// One timeseries-valued model variable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub name: String,
    pub kind: SignalKind,
    pub lower: f64,
    pub upper: f64,
    /// Values on the grid for inputs; `None` for free variables
    pub fixed: Option<Vec<f64>>,
}

impl Signal {
    pub fn new(name: impl Into<String>, kind: SignalKind, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            lower,
            upper,
            fixed: None,
        }
    }

    /// Bounds of the signal at grid index `index`
    pub fn bounds_at(&self, index: usize) -> (f64, f64) {
        match self.fixed.as_ref().and_then(|v| v.get(index)) {
            Some(&v) => (v, v),
            None => (self.lower, self.upper),
        }
    }

    pub fn is_control(&self) -> bool {
        self.kind == SignalKind::Control
    }
}

/// Coefficient on one signal at one grid index
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Term<'a> {
    pub signal: &'a str,
    pub index: usize,
    pub coefficient: f64,
}

/// `lower <= Σ coefficient * signal[index] <= upper`; equal bounds for equations
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelConstraint {
    pub label: String,
    pub terms: Vec<(String, usize, f64)>,
    pub lower: f64,
    pub upper: f64,
}

impl ModelConstraint {
    pub fn equality(label: impl Into<String>, terms: Vec<(String, usize, f64)>, rhs: f64) -> Self {
        Self {
            label: label.into(),
            terms,
            lower: rhs,
            upper: rhs,
        }
    }

    pub fn terms(&self) -> impl Iterator<Item = Term<'_>> {
        self.terms.iter().map(|(signal, index, coefficient)| Term {
            signal: signal.as_str(),
            index: *index,
            coefficient: *coefficient,
        })
    }
}

/// Read-only view of a discretized model
pub trait ModelProvider {
    /// Strictly increasing collocation times, in seconds
    fn time_grid(&self) -> &[f64];

    fn signals(&self) -> &[Signal];

    /// Equations and path constraints of the model over the whole grid
    fn equations(&self) -> &[ModelConstraint];

    fn get_variable(&self, name: &str) -> Option<&Signal> {
        self.signals().iter().find(|s| s.name == name)
    }
}
