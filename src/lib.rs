//! Lexicographic goal programming over time-discretized system models.
//!
//! Goals are ranked by priority. Each priority level is solved as one linear
//! program, and the achievement of every goal is carried forward as a hard
//! constraint so later levels can never make it worse.
//!
//! ```no_run
//! use goal_programming::{Goal, GoodLpSolver, LinearDaeModel, PriorityScheduler};
//!
//! # fn main() -> goal_programming::Result<()> {
//! let model = LinearDaeModel::builder((0..=24).map(|h| h as f64 * 3600.0).collect())
//!     .state("level", 0.0, 100.0, Some(11.0))
//!     .control("extraction", 0.0, 20.0)
//!     .input("inflow", 7.0)
//!     .derivative("level", &[("inflow", 1.0 / 3600.0), ("extraction", -1.0 / 3600.0)], 0.0)
//!     .build()?;
//!
//! let goals = vec![
//!     Goal::range("level", 10.0, 12.0).priority(1).build()?,
//!     Goal::target("extraction", 5.0).priority(2).build()?,
//! ];
//!
//! let mut scheduler = PriorityScheduler::builder(goals).build(&model)?;
//! let results = scheduler.run(&model, &GoodLpSolver::default())?;
//! println!("{:?}", results.variable("level"));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod model;
pub mod optimizer;
pub mod telemetry;

pub use config::EngineConfig;
pub use domain::{Goal, GoalSpec, Interpolation, TargetKind, Timeseries};
pub use error::{GoalProgrammingError, Result};
pub use model::{LinearDaeModel, ModelProvider, Signal, SignalKind};
pub use optimizer::{
    Backend, GoodLpSolver, LevelSnapshot, PriorityObserver, PriorityScheduler, RunResults, SchedulerConfig,
    SchedulerState, SmoothingTerm, SnapshotRecorder, SolveOutcome, Solver, SolverStatus,
};
