use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

use crate::domain::{Goal, GoalSpec};
use crate::error::GoalProgrammingError;
use crate::optimizer::{Backend, CoefficientLimits, GoodLpSolver, SchedulerConfig, SmoothingTerm, Tolerance};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const ENV_PREFIX: &str = "GOALPROG__";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EngineConfig {
    #[validate(nested)]
    pub solver: SolverConfig,
    #[validate(nested)]
    pub tolerance: ToleranceConfig,
    #[validate(nested)]
    pub smoothing: SmoothingConfig,
    #[validate(nested)]
    pub checks: ChecksConfig,
    pub goals: Vec<GoalSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SolverConfig {
    pub backend: Backend,
    /// Per-level wall clock limit; only enforced by the async runner
    #[validate(range(exclusive_min = 0.0))]
    pub time_limit_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ToleranceConfig {
    #[validate(range(min = 0.0))]
    pub absolute: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub relative: f64,
    /// Largest violation still reported as met
    #[validate(range(min = 0.0))]
    pub met: f64,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        let achieved = Tolerance::default();
        Self {
            absolute: achieved.absolute,
            relative: achieved.relative,
            met: 1e-4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SmoothingConfig {
    pub enabled: bool,
    #[validate(range(exclusive_min = 0.0))]
    pub weight: f64,
    pub controls: Vec<String>,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            weight: 1e-4,
            controls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ChecksConfig {
    pub enabled: bool,
    #[validate(nested)]
    pub limits: CoefficientLimits,
}

impl EngineConfig {
    /// Defaults, then `config/default.toml`, then `GOALPROG__*` variables
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: EngineConfig = figment.extract().context("failed to read engine configuration")?;
        config
            .validate()
            .map_err(GoalProgrammingError::from)
            .context("invalid engine configuration")?;
        Ok(config)
    }

    pub fn build_goals(&self) -> crate::Result<Vec<Goal>> {
        self.goals.iter().cloned().map(Goal::try_from).collect()
    }

    /// `None` unless smoothing is enabled
    pub fn smoothing_term(&self) -> crate::Result<Option<SmoothingTerm>> {
        if !self.smoothing.enabled {
            return Ok(None);
        }
        SmoothingTerm::new(self.smoothing.controls.clone(), self.smoothing.weight).map(Some)
    }

    pub fn solver(&self) -> GoodLpSolver {
        GoodLpSolver::new(self.solver.backend)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tolerance: Tolerance {
                absolute: self.tolerance.absolute,
                relative: self.tolerance.relative,
            },
            met_tolerance: self.tolerance.met,
            time_limit: self.solver.time_limit_seconds.map(Duration::from_secs_f64),
            checks: self.checks.enabled.then_some(self.checks.limits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    const ENGINE_TOML: &str = r#"
        [solver]
        backend = "mini_lp"
        time_limit_seconds = 30.0

        [tolerance]
        relative = 0.001

        [smoothing]
        enabled = true
        controls = ["extraction"]

        [[goals]]
        name = "level band"
        state = "level"
        priority = 1
        kind = "range"
        min = 10.0
        max = 12.0

        [[goals]]
        state = "extraction"
        priority = 2
        kind = "target"
        target = 5.0
        path = false
    "#;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.solver.backend, Backend::MiniLp);
        assert_eq!(config.tolerance.absolute, 1e-5);
        assert!(config.goals.is_empty());

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.time_limit, None);
        assert_eq!(scheduler.checks, None);
    }

    #[test]
    fn test_load_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file("engine.toml", ENGINE_TOML)?;
            jail.set_env("GOALPROG__SOLVER__BACKEND", "highs");
            jail.set_env("GOALPROG__CHECKS__ENABLED", "true");

            let config = EngineConfig::load_from("engine.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.solver.backend, Backend::Highs);
            assert_eq!(config.tolerance.relative, 0.001);
            assert_eq!(config.tolerance.absolute, 1e-5);
            assert!(config.checks.enabled);

            let goals = config.build_goals().map_err(|e| e.to_string())?;
            assert_eq!(goals.len(), 2);
            assert_eq!(goals[0].name(), "level band");
            assert!(!goals[1].is_path_goal());

            let scheduler = config.scheduler_config();
            assert_eq!(scheduler.time_limit, Some(Duration::from_secs(30)));
            assert_eq!(scheduler.checks, Some(CoefficientLimits::default()));

            let smoothing = config.smoothing_term().map_err(|e| e.to_string())?;
            assert_eq!(smoothing.map(|s| s.controls().to_vec()), Some(vec!["extraction".to_string()]));
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = EngineConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config, EngineConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_tolerance_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("GOALPROG__TOLERANCE__RELATIVE", "2.0");
            assert!(EngineConfig::load().is_err());
            Ok(())
        });
    }

    #[test]
    fn test_malformed_goal_fails_to_build() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "engine.toml",
                r#"
                [[goals]]
                state = "level"
                priority = 1
                kind = "range"
                min = 5.0
                max = 3.0
                "#,
            )?;
            let config = EngineConfig::load_from("engine.toml").map_err(|e| e.to_string())?;
            let err = config.build_goals().unwrap_err();
            assert!(matches!(err, GoalProgrammingError::Configuration(_)));
            Ok(())
        });
    }
}
