//! The three-tier fallback chain: try the full MIP, then a simplified relaxation of it,
//! then the rule-based heuristic that cannot fail. Grounded on this codebase's solver
//! dispatch pattern of trying a preferred backend and stepping down a fixed priority
//! list of cheaper-but-always-available alternatives rather than surfacing failure to
//! the caller.
//!
//! Each tier is strictly cheaper to run than the one before it: FULL enforces minimum
//! on/off duration and the specific-energy term with a generous time limit; SIMPLIFIED
//! drops both to shrink the search space and gives the solver less time; RULE_BASED
//! skips the solver entirely. A tier is only attempted after the one above it both
//! failed to solve and ran out of its time budget or returned an error.

use std::time::Duration;

use pump_core::model::{CurrentState, ForecastData, OptimizationMode, OptimizationResult, PumpSpec, SystemConstraints};

use crate::builder::{build_problem, BuilderOptions};
use crate::risk::ObjectiveWeights;
use crate::rule_based;
use crate::solve::solve as solve_mip;

/// Time budgets for the two MIP tiers.
#[derive(Debug, Clone, Copy)]
pub struct FallbackTimeouts {
    pub full: Duration,
    pub simplified: Duration,
}

impl Default for FallbackTimeouts {
    fn default() -> Self {
        FallbackTimeouts {
            full: Duration::from_secs(30),
            simplified: Duration::from_secs(5),
        }
    }
}

/// Run FULL, then SIMPLIFIED, then RULE_BASED, returning the first tier that reports
/// `success`. RULE_BASED always reports success, so this function never returns `Err`;
/// the `Result` exists only to surface the rare case where even the pure-Rust heuristic
/// panics-free path could not be reached, which in practice means pump data was empty.
#[allow(clippy::too_many_arguments)]
pub fn run(
    pumps: &[PumpSpec],
    constraints: &SystemConstraints,
    state: &CurrentState,
    forecast: &ForecastData,
    weights: ObjectiveWeights,
    time_step_minutes: u32,
    initial_running: &[bool],
    minutes_since_last_switch: &[u32],
    cumulative_usage_hours: &[f64],
    timeouts: FallbackTimeouts,
) -> OptimizationResult {
    if pumps.is_empty() {
        return OptimizationResult {
            explanation: "no pumps configured; rule_based heuristic has nothing to schedule".into(),
            ..OptimizationResult::default()
        };
    }

    if let Some(result) = try_tier(
        OptimizationMode::Full,
        BuilderOptions::full(),
        pumps,
        constraints,
        state,
        forecast,
        weights,
        time_step_minutes,
        initial_running,
        minutes_since_last_switch,
        cumulative_usage_hours,
        timeouts.full,
    ) {
        return result;
    }

    if let Some(result) = try_tier(
        OptimizationMode::Simplified,
        BuilderOptions::simplified(),
        pumps,
        constraints,
        state,
        forecast,
        weights,
        time_step_minutes,
        initial_running,
        minutes_since_last_switch,
        cumulative_usage_hours,
        timeouts.simplified,
    ) {
        return result;
    }

    tracing::warn!("both MIP tiers failed; falling back to rule_based heuristic");
    rule_based::solve(pumps, constraints, state, forecast, time_step_minutes, initial_running)
}

#[allow(clippy::too_many_arguments)]
fn try_tier(
    mode: OptimizationMode,
    options: BuilderOptions,
    pumps: &[PumpSpec],
    constraints: &SystemConstraints,
    state: &CurrentState,
    forecast: &ForecastData,
    weights: ObjectiveWeights,
    time_step_minutes: u32,
    initial_running: &[bool],
    minutes_since_last_switch: &[u32],
    cumulative_usage_hours: &[f64],
    time_limit: Duration,
) -> Option<OptimizationResult> {
    let problem = build_problem(
        pumps,
        constraints,
        state,
        forecast,
        weights,
        time_step_minutes,
        initial_running,
        minutes_since_last_switch,
        cumulative_usage_hours,
        options,
    );

    match solve_mip(problem, pumps, forecast, mode, time_step_minutes, time_limit) {
        Ok(result) if result.success => Some(result),
        Ok(result) => {
            tracing::warn!(%mode, "tier solved but reported failure");
            let _ = result;
            None
        }
        Err(err) => {
            tracing::warn!(%mode, error = %err, "tier failed to solve");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pump_core::model::RiskLevel;

    fn pumps() -> Vec<PumpSpec> {
        PumpSpec::default_fleet()
    }

    fn forecast(steps: usize) -> ForecastData {
        let now = Utc::now();
        ForecastData {
            timestamps: (0..steps).map(|i| now + chrono::Duration::minutes(15 * i as i64)).collect(),
            inflow_m3_s: vec![2.5; steps],
            price_c_kwh: vec![11.0; steps],
        }
    }

    fn state() -> CurrentState {
        CurrentState {
            timestamp: Utc::now(),
            l1_m: 3.0,
            inflow_m3_s: 2.5,
            outflow_m3_s: 0.0,
            pump_states: Vec::new(),
            price_c_kwh: 11.0,
        }
    }

    #[test]
    fn empty_fleet_short_circuits_without_a_solver_call() {
        let result = run(
            &[],
            &SystemConstraints::default(),
            &state(),
            &forecast(4),
            ObjectiveWeights::for_risk_level(RiskLevel::Normal),
            15,
            &[],
            &[],
            &[],
            FallbackTimeouts::default(),
        );
        assert!(result.schedules.is_empty());
    }

    #[test]
    fn default_timeouts_favor_the_full_tier() {
        let timeouts = FallbackTimeouts::default();
        assert!(timeouts.full > timeouts.simplified);
    }
}
