//! The plain-data records shared by every crate in the workspace.
//!
//! None of these types carry behaviour beyond simple derived helpers; the algorithms that
//! operate on them live in `pump-algo` and `pump-driver`. Keeping the data model free of
//! solver or simulation logic means `pump-sources` can depend on it without dragging in
//! `good_lp`, and tests can construct fixtures without touching a driver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::units::{FlowM3S, FrequencyHz, LevelM, PowerKw, PriceCKwh};

/// One physical pump in the fleet (§3): identifier, max flow, max power, min/max
/// operating frequency, preferred frequency band, and the power-vs-level slope and
/// reference level the optional head correction needs. Small vs. big pumps differ only
/// in capacity; all share the same control law.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpSpec {
    pub id: String,
    pub station: u8,
    pub min_frequency_hz: f64,
    pub max_frequency_hz: f64,
    pub preferred_freq_min_hz: f64,
    pub preferred_freq_max_hz: f64,
    pub nominal_frequency_hz: f64,
    /// Max flow at max frequency, m3/s; scales linearly with frequency fraction (§4.B).
    pub max_flow_m3_s: f64,
    /// Max power at max frequency, kW; the piecewise-affine power law's upper anchor
    /// (§4.B): `base_power = max_power · (min_freq/max_freq)^2.5`.
    pub max_power_kw: f64,
    /// Power-vs-level slope, kW per metre of tunnel level: the optional head correction
    /// subtracts `power_vs_l1_slope_kw_per_m · (L1 − reference_level_m)` to reflect
    /// reduced lift at higher tunnel level (§4.B).
    pub power_vs_l1_slope_kw_per_m: f64,
    /// Tunnel level the head correction is anchored to, m.
    pub reference_level_m: f64,
}

impl PumpSpec {
    /// The eight-pump fleet used across the demo scenarios: two stations of four pumps
    /// each, named the way the historical dataset names them.
    pub fn default_fleet() -> Vec<PumpSpec> {
        let mut fleet = Vec::with_capacity(8);
        for (station, prefix) in [(1u8, "P1"), (2u8, "P2")] {
            for unit in 1..=4 {
                fleet.push(PumpSpec {
                    id: format!("{prefix}{unit}"),
                    station,
                    min_frequency_hz: 47.8,
                    max_frequency_hz: 50.0,
                    preferred_freq_min_hz: 47.8,
                    preferred_freq_max_hz: 49.0,
                    nominal_frequency_hz: 50.0,
                    max_flow_m3_s: 1.2,
                    max_power_kw: 480.0,
                    power_vs_l1_slope_kw_per_m: 15.0,
                    reference_level_m: 4.0,
                });
            }
        }
        fleet
    }
}

/// Fleet-wide and hydraulic constraints, independent of any one pump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConstraints {
    pub l1_min_m: f64,
    pub l1_max_m: f64,
    pub tunnel_volume_m3: f64,
    pub min_pumps_on: u32,
    pub min_pump_on_duration_minutes: u32,
    pub min_pump_off_duration_minutes: u32,
    pub flush_frequency_days: u32,
    pub flush_target_level_m: f64,
    pub allow_l1_violations: bool,
    pub l1_violation_tolerance_m: f64,
    pub l1_violation_penalty: f64,
    /// Target specific energy, kWh per m3 delivered; the specific-energy objective term
    /// penalizes deviation above this target. Not present in the historical dataset's
    /// per-pump records, so it lives here as a fleet-wide tuning knob.
    pub specific_energy_target_kwh_m3: f64,
}

impl Default for SystemConstraints {
    fn default() -> Self {
        SystemConstraints {
            l1_min_m: 0.5,
            l1_max_m: 8.0,
            tunnel_volume_m3: 50_000.0,
            min_pumps_on: 1,
            min_pump_on_duration_minutes: 120,
            min_pump_off_duration_minutes: 120,
            flush_frequency_days: 1,
            flush_target_level_m: 0.5,
            allow_l1_violations: true,
            l1_violation_tolerance_m: 0.5,
            l1_violation_penalty: 1000.0,
            specific_energy_target_kwh_m3: 0.4,
        }
    }
}

/// Forecast inputs covering a horizon, sampled at the control time step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastData {
    pub timestamps: Vec<DateTime<Utc>>,
    pub inflow_m3_s: Vec<f64>,
    pub price_c_kwh: Vec<f64>,
}

impl ForecastData {
    pub fn horizon_len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_consistent(&self) -> bool {
        self.inflow_m3_s.len() == self.timestamps.len()
            && self.price_c_kwh.len() == self.timestamps.len()
    }
}

/// The operating state of a single pump at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpState {
    pub pump_id: String,
    pub running: bool,
    pub frequency_hz: f64,
}

/// One pump's realized operating point in a historical baseline schedule: what a pump
/// actually did (or would have done under a non-optimized control policy) at one
/// instant, as reported by `HistoricalDataSource::baseline_schedule_at`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselinePumpState {
    pub is_on: bool,
    pub frequency_hz: f64,
    pub flow_m3_s: f64,
    pub power_kw: f64,
}

/// A snapshot of the whole system at the instant a tactical solve begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentState {
    pub timestamp: DateTime<Utc>,
    pub l1_m: f64,
    pub inflow_m3_s: f64,
    pub outflow_m3_s: f64,
    pub pump_states: Vec<PumpState>,
    pub price_c_kwh: f64,
}

/// A solved operating trajectory for one pump across the solved horizon. `flows_m3_s`
/// and `powers_kw` are parallel to `frequencies_hz`, one entry per solved step, so a
/// consumer that only cares about delivered volume or energy never has to re-derive them
/// from frequency and the pump's band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpSchedule {
    pub pump_id: String,
    pub frequencies_hz: Vec<f64>,
    pub flows_m3_s: Vec<f64>,
    pub powers_kw: Vec<f64>,
}

/// Which tier of the fallback chain produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationMode {
    Full,
    Simplified,
    RuleBased,
}

impl std::fmt::Display for OptimizationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizationMode::Full => write!(f, "full"),
            OptimizationMode::Simplified => write!(f, "simplified"),
            OptimizationMode::RuleBased => write!(f, "rule_based"),
        }
    }
}

/// Tunnel-level risk tier, driving which objective weight preset is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Critical,
    High,
    Normal,
    Low,
}

/// The outcome of one tactical solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub success: bool,
    pub mode: OptimizationMode,
    pub schedules: Vec<PumpSchedule>,
    pub l1_trajectory: Vec<f64>,
    pub total_energy_kwh: f64,
    pub total_cost_c: f64,
    pub explanation: String,
    pub solve_time_seconds: f64,
    pub l1_violations: usize,
    pub max_violation_m: f64,
}

impl Default for OptimizationResult {
    fn default() -> Self {
        OptimizationResult {
            success: false,
            mode: OptimizationMode::RuleBased,
            schedules: Vec::new(),
            l1_trajectory: Vec::new(),
            total_energy_kwh: 0.0,
            total_cost_c: 0.0,
            explanation: String::new(),
            solve_time_seconds: 0.0,
            l1_violations: 0,
            max_violation_m: 0.0,
        }
    }
}

/// Qualitative strategy label for one band of the strategic horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeBandStrategy {
    PreDrain,
    Hold,
    Balance,
    RideOut,
}

/// One labelled band of the 24h strategic plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBandGuidance {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub strategy: TimeBandStrategy,
}

/// A qualitative 24h plan biasing the tactical optimizer's objective weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategicPlan {
    pub generated_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub bands: Vec<TimeBandGuidance>,
}

impl StrategicPlan {
    /// The guidance band covering `at`, if any band of this plan covers it.
    pub fn band_at(&self, at: DateTime<Utc>) -> Option<&TimeBandGuidance> {
        self.bands.iter().find(|b| b.start <= at && at < b.end)
    }
}

// Quantity-level helpers kept for call sites that prefer the unit-safe newtypes.
impl CurrentState {
    pub fn level(&self) -> LevelM {
        LevelM(self.l1_m)
    }

    pub fn inflow(&self) -> FlowM3S {
        FlowM3S(self.inflow_m3_s)
    }

    pub fn price(&self) -> PriceCKwh {
        PriceCKwh(self.price_c_kwh)
    }
}

impl PumpState {
    pub fn frequency(&self) -> FrequencyHz {
        FrequencyHz(self.frequency_hz)
    }
}

/// Flow and power pair returned by the physics model, kept together because callers
/// almost always want both.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowPower {
    pub flow: FlowM3S,
    pub power: PowerKw,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fleet_has_eight_pumps_in_two_stations() {
        let fleet = PumpSpec::default_fleet();
        assert_eq!(fleet.len(), 8);
        assert_eq!(fleet.iter().filter(|p| p.station == 1).count(), 4);
        assert_eq!(fleet.iter().filter(|p| p.station == 2).count(), 4);
    }

    #[test]
    fn default_constraints_match_known_good_values() {
        let c = SystemConstraints::default();
        assert_eq!(c.l1_min_m, 0.5);
        assert_eq!(c.l1_max_m, 8.0);
        assert_eq!(c.min_pumps_on, 1);
    }

    #[test]
    fn forecast_consistency_checks_lengths() {
        let now = Utc::now();
        let consistent = ForecastData {
            timestamps: vec![now, now],
            inflow_m3_s: vec![1.0, 2.0],
            price_c_kwh: vec![10.0, 11.0],
        };
        assert!(consistent.is_consistent());

        let broken = ForecastData {
            timestamps: vec![now, now],
            inflow_m3_s: vec![1.0],
            price_c_kwh: vec![10.0, 11.0],
        };
        assert!(!broken.is_consistent());
    }

    #[test]
    fn strategic_plan_finds_band_covering_timestamp() {
        let start = Utc::now();
        let plan = StrategicPlan {
            generated_at: start,
            valid_until: start + chrono::Duration::hours(24),
            bands: vec![TimeBandGuidance {
                start,
                end: start + chrono::Duration::hours(6),
                strategy: TimeBandStrategy::PreDrain,
            }],
        };
        assert_eq!(
            plan.band_at(start + chrono::Duration::hours(1))
                .map(|b| b.strategy),
            Some(TimeBandStrategy::PreDrain)
        );
        assert!(plan.band_at(start + chrono::Duration::hours(7)).is_none());
    }
}
