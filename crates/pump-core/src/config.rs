//! The configuration surface for a rolling MPC run, loadable from TOML.
//!
//! Mirrors the `serde(default = "...")` pattern used for scenario defaults elsewhere in
//! this codebase: every field has a sensible default so a config file only needs to
//! override what differs from it.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{PumpError, PumpResult};

fn default_time_step_minutes() -> u32 {
    15
}

fn default_tactical_horizon_minutes() -> u32 {
    120
}

fn default_strategic_horizon_minutes() -> u32 {
    1440
}

fn default_full_solve_timeout_seconds() -> f64 {
    30.0
}

fn default_simplified_solve_timeout_seconds() -> f64 {
    5.0
}

fn default_advisor_timeout_seconds() -> f64 {
    10.0
}

fn default_forecast_error_window() -> usize {
    10
}

fn default_quality_mae_window() -> usize {
    5
}

fn default_good_streak_to_release() -> u8 {
    2
}

fn default_true() -> bool {
    true
}

/// The full set of knobs a rolling driver reads before starting a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default = "default_time_step_minutes")]
    pub time_step_minutes: u32,
    #[serde(default = "default_tactical_horizon_minutes")]
    pub tactical_horizon_minutes: u32,
    #[serde(default = "default_strategic_horizon_minutes")]
    pub strategic_horizon_minutes: u32,
    #[serde(default = "default_full_solve_timeout_seconds")]
    pub full_solve_timeout_seconds: f64,
    #[serde(default = "default_simplified_solve_timeout_seconds")]
    pub simplified_solve_timeout_seconds: f64,
    #[serde(default = "default_advisor_timeout_seconds")]
    pub advisor_timeout_seconds: f64,
    #[serde(default = "default_forecast_error_window")]
    pub forecast_error_window: usize,
    #[serde(default = "default_quality_mae_window")]
    pub quality_mae_window: usize,
    #[serde(default = "default_good_streak_to_release")]
    pub good_streak_to_release: u8,
    #[serde(default = "default_true")]
    pub advisor_enabled: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            time_step_minutes: default_time_step_minutes(),
            tactical_horizon_minutes: default_tactical_horizon_minutes(),
            strategic_horizon_minutes: default_strategic_horizon_minutes(),
            full_solve_timeout_seconds: default_full_solve_timeout_seconds(),
            simplified_solve_timeout_seconds: default_simplified_solve_timeout_seconds(),
            advisor_timeout_seconds: default_advisor_timeout_seconds(),
            forecast_error_window: default_forecast_error_window(),
            quality_mae_window: default_quality_mae_window(),
            good_streak_to_release: default_good_streak_to_release(),
            advisor_enabled: default_true(),
        }
    }
}

impl DriverConfig {
    pub fn from_toml_str(text: &str) -> PumpResult<Self> {
        let config: DriverConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> PumpResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> PumpResult<()> {
        if self.time_step_minutes == 0 {
            return Err(PumpError::InvalidConfig(
                "time_step_minutes must be positive".into(),
            ));
        }
        if self.tactical_horizon_minutes < self.time_step_minutes {
            return Err(PumpError::InvalidConfig(
                "tactical_horizon_minutes must cover at least one time step".into(),
            ));
        }
        if self.strategic_horizon_minutes < self.tactical_horizon_minutes {
            return Err(PumpError::InvalidConfig(
                "strategic_horizon_minutes must be at least the tactical horizon".into(),
            ));
        }
        Ok(())
    }

    pub fn time_step(&self) -> Duration {
        Duration::from_secs(u64::from(self.time_step_minutes) * 60)
    }

    pub fn full_solve_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.full_solve_timeout_seconds)
    }

    pub fn simplified_solve_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.simplified_solve_timeout_seconds)
    }

    pub fn advisor_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.advisor_timeout_seconds)
    }

    pub fn tactical_steps(&self) -> usize {
        (self.tactical_horizon_minutes / self.time_step_minutes) as usize
    }

    pub fn strategic_steps(&self) -> usize {
        (self.strategic_horizon_minutes / self.time_step_minutes) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(DriverConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config = DriverConfig::from_toml_str("time_step_minutes = 5\n").unwrap();
        assert_eq!(config.time_step_minutes, 5);
        assert_eq!(
            config.tactical_horizon_minutes,
            default_tactical_horizon_minutes()
        );
    }

    #[test]
    fn rejects_strategic_horizon_shorter_than_tactical() {
        let bad = DriverConfig {
            strategic_horizon_minutes: 60,
            tactical_horizon_minutes: 120,
            ..DriverConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn step_counts_divide_horizon_by_time_step() {
        let config = DriverConfig::default();
        assert_eq!(config.tactical_steps(), 8);
        assert_eq!(config.strategic_steps(), 96);
    }
}
