//! Unified error type for the pump scheduling system.
//!
//! [`PumpError`] distinguishes ordinary degraded-operation outcomes (missing data,
//! solver infeasibility, a slow advisor) from genuine invariant breaches. Callers in
//! `pump-driver` fold the former into `Option`/`success: bool` fields per the recovery
//! table; only the latter are expected to propagate as `Err` out of a running simulation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PumpError {
    /// A data source could not produce a value for the requested timestamp.
    #[error("missing data: {0}")]
    MissingData(String),

    /// The forecast provider failed or returned no usable forecast.
    #[error("forecast unavailable: {0}")]
    ForecastUnavailable(String),

    /// Every optimization tier failed to produce a usable schedule.
    #[error("solver infeasible: {0}")]
    SolverInfeasible(String),

    /// The strategic advisor did not respond within its allotted budget.
    #[error("advisor timeout after {0:?}")]
    AdvisorTimeout(std::time::Duration),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An internal invariant was violated; this indicates a bug, not a runtime condition.
    #[error("invariant breach: {0}")]
    InvariantBreach(String),

    /// I/O errors (config file loading, report writing).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic wrapping for external errors.
    #[error("{0}")]
    Other(String),
}

pub type PumpResult<T> = Result<T, PumpError>;

impl From<anyhow::Error> for PumpError {
    fn from(err: anyhow::Error) -> Self {
        PumpError::Other(err.to_string())
    }
}

impl From<String> for PumpError {
    fn from(s: String) -> Self {
        PumpError::Other(s)
    }
}

impl From<&str> for PumpError {
    fn from(s: &str) -> Self {
        PumpError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for PumpError {
    fn from(err: serde_json::Error) -> Self {
        PumpError::Other(err.to_string())
    }
}

impl From<toml::de::Error> for PumpError {
    fn from(err: toml::de::Error) -> Self {
        PumpError::InvalidConfig(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_variant_context() {
        let err = PumpError::SolverInfeasible("all tiers exhausted".into());
        assert!(err.to_string().contains("solver infeasible"));
        assert!(err.to_string().contains("all tiers exhausted"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let pump_err: PumpError = io_err.into();
        assert!(matches!(pump_err, PumpError::Io(_)));
    }

    #[test]
    fn question_mark_propagates() {
        fn inner() -> PumpResult<()> {
            Err(PumpError::InvalidConfig("bad".into()))
        }
        fn outer() -> PumpResult<()> {
            inner()?;
            Ok(())
        }
        assert!(outer().is_err());
    }
}
