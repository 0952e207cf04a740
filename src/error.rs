use itertools::Itertools;
use thiserror::Error;

use crate::optimizer::SchedulerState;

/// Errors produced while declaring goals, building problems, or running a
/// priority sweep.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GoalProgrammingError {
    /// Malformed goal bounds, unknown variable references, invalid model or
    /// engine settings. Raised before any solve is attempted.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No assignment satisfies the hard envelopes active at this priority.
    #[error("Priority {priority} is infeasible (active goals: {})", .goals.iter().join(", "))]
    Infeasible { priority: i32, goals: Vec<String> },

    /// The backend failed numerically, timed out, or could not be run.
    #[error("Solver error at priority {priority}: {diagnostics}")]
    Solver { priority: i32, diagnostics: String },

    #[error("Results unavailable while scheduler is {state}")]
    ResultUnavailable { state: SchedulerState },

    #[error("Cannot {action} while scheduler is {state}")]
    InvalidTransition {
        action: &'static str,
        state: SchedulerState,
    },

    #[error("Run cancelled while solving priority {priority}")]
    Cancelled { priority: i32 },
}

impl GoalProgrammingError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

impl From<validator::ValidationErrors> for GoalProgrammingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        GoalProgrammingError::Configuration(errors.to_string())
    }
}

pub type Result<T, E = GoalProgrammingError> = std::result::Result<T, E>;
