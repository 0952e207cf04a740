use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{GoalProgrammingError, Result};

/// How values between two breakpoints are obtained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Interpolation {
    #[default]
    Linear,
    /// Piecewise constant, holding the value of the last breakpoint at or before t
    HoldPrevious,
}

/// Time-indexed values (times in seconds relative to the run's reference time).
///
/// Outside the covered range the first/last value is held constant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeseries {
    times: Vec<f64>,
    values: Vec<f64>,
    interpolation: Interpolation,
}

impl Timeseries {
    pub fn new(times: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        Self::with_interpolation(times, values, Interpolation::Linear)
    }

    pub fn with_interpolation(
        times: Vec<f64>,
        values: Vec<f64>,
        interpolation: Interpolation,
    ) -> Result<Self> {
        if times.is_empty() {
            return Err(GoalProgrammingError::config("timeseries must have at least one point"));
        }
        if times.len() != values.len() {
            return Err(GoalProgrammingError::config(format!(
                "timeseries has {} times but {} values",
                times.len(),
                values.len()
            )));
        }
        if times.iter().any(|t| !t.is_finite()) {
            return Err(GoalProgrammingError::config("timeseries times must be finite"));
        }
        if values.iter().any(|v| v.is_nan()) {
            return Err(GoalProgrammingError::config("timeseries values must not be NaN"));
        }
        if times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(GoalProgrammingError::config(
                "timeseries times must be strictly increasing",
            ));
        }
        Ok(Self {
            times,
            values,
            interpolation,
        })
    }

    /// A series that takes `value` at every time
    pub fn constant(value: f64) -> Self {
        Self {
            times: vec![0.0],
            values: vec![value],
            interpolation: Interpolation::HoldPrevious,
        }
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn is_constant(&self) -> bool {
        self.values.windows(2).all(|w| w[0] == w[1])
    }

    pub fn value_at(&self, t: f64) -> f64 {
        let n = self.times.len();
        if n == 1 || t <= self.times[0] {
            return self.values[0];
        }
        if t >= self.times[n - 1] {
            return self.values[n - 1];
        }

        // First breakpoint strictly after t; guaranteed in 1..n by the checks above
        let upper = self.times.partition_point(|&x| x <= t);
        let lower = upper - 1;
        let (t0, t1) = (self.times[lower], self.times[upper]);
        let (v0, v1) = (self.values[lower], self.values[upper]);

        match self.interpolation {
            Interpolation::HoldPrevious => v0,
            Interpolation::Linear => {
                if v0 == v1 || t == t0 {
                    // Also covers infinite plateaus, where the weighted sum would be NaN
                    v0
                } else {
                    let w = (t - t0) / (t1 - t0);
                    v0 + w * (v1 - v0)
                }
            }
        }
    }

    /// Limit of the series approaching `t` from the left
    pub fn value_before(&self, t: f64) -> f64 {
        match self.interpolation {
            Interpolation::Linear => self.value_at(t),
            Interpolation::HoldPrevious => {
                let idx = self.times.partition_point(|&x| x < t);
                self.values[idx.saturating_sub(1)]
            }
        }
    }

    /// Sample the series at every point of `grid`
    pub fn sample(&self, grid: &[f64]) -> Vec<f64> {
        grid.iter().map(|&t| self.value_at(t)).collect()
    }
}

impl From<f64> for Timeseries {
    fn from(value: f64) -> Self {
        Self::constant(value)
    }
}
