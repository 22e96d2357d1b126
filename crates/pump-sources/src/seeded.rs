//! A deterministic, in-memory data source used by tests and the CLI's demo scenarios.
//!
//! This is not a production data feed — there is no network client or database driver
//! here, by design (see the scope notes on `HistoricalDataSource`/`ForecastProvider`).
//! It generates a plausible diurnal inflow and price pattern perturbed by a seeded RNG, the
//! same way a stress-test scenario generator perturbs a baseline schedule: same seed,
//! same trace, every time.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use pump_core::error::PumpResult;
use pump_core::model::{BaselinePumpState, CurrentState, ForecastData, PumpSpec, PumpState};

use crate::traits::{ForecastProvider, HistoricalDataSource};

/// Nominal (50Hz) power draw assumed for the baseline's fixed-speed-equivalent policy,
/// kW. The baseline never sees the tactical optimizer's pump curve model (`pump-algo` is
/// not a dependency here by design, to keep the historical-data layer free of solver
/// machinery); it uses this single flat figure the way an un-optimized fixed-speed fleet
/// would report to SCADA.
const BASELINE_NOMINAL_POWER_KW: f64 = 420.0;

/// The naive control policy this data source plays back as "what would have happened
/// without optimization": bring pumps on one at a time at full (nominal) speed, in fleet
/// order, until rated capacity covers the realized inflow plus a fixed margin. No price
/// awareness, no duty rotation, no smoothness — exactly the kind of threshold policy the
/// historical schedule reportedly uses.
/// Discriminates the call sites that draw jitter, so two different calls for the same
/// instant never collide on the same draw.
const STATE_JITTER_SALT: u64 = 1;
const BASELINE_JITTER_SALT: u64 = 2;
const FORECAST_JITTER_SALT: u64 = 3;

/// Deterministic jitter: a pure function of `(seed, at, salt)`, not a draw from shared
/// mutable RNG state. `RollingDriver::tick` fans state/forecast/baseline lookups out
/// concurrently (§5), so a shared `Mutex<StdRng>` consumed sequentially would make the
/// trace depend on which task's draw lands first — this keeps "same seed, same trace"
/// true regardless of call order or concurrency.
fn jitter_for(seed: u64, at: DateTime<Utc>, salt: u64, low: f64, high: f64) -> f64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    at.timestamp_nanos_opt()
        .unwrap_or_else(|| at.timestamp().saturating_mul(1_000_000_000))
        .hash(&mut hasher);
    salt.hash(&mut hasher);
    let combined = hasher.finish();
    StdRng::seed_from_u64(combined).gen_range(low..high)
}

fn naive_pumps_on(pumps: &[PumpSpec], inflow_m3_s: f64) -> usize {
    let margin = 1.15;
    let mut cumulative = 0.0;
    let mut count = 0;
    for pump in pumps {
        if cumulative >= inflow_m3_s * margin {
            break;
        }
        cumulative += pump.max_flow_m3_s;
        count += 1;
    }
    count.max(1).min(pumps.len())
}

/// Synthetic inflow/price generator: a diurnal sine wave plus seeded jitter.
pub struct SeededDataSource {
    seed: u64,
    base_inflow_m3_s: f64,
    base_price_c_kwh: f64,
    time_step_minutes: u32,
}

impl SeededDataSource {
    pub fn new(seed: u64, time_step_minutes: u32) -> Self {
        SeededDataSource {
            seed,
            base_inflow_m3_s: 2.0,
            base_price_c_kwh: 12.0,
            time_step_minutes,
        }
    }

    fn inflow_at(&self, at: DateTime<Utc>, jitter: f64) -> f64 {
        let hour_frac = at.time().hour() as f64 + at.time().minute() as f64 / 60.0;
        let diurnal = (hour_frac / 24.0 * std::f64::consts::TAU).sin();
        (self.base_inflow_m3_s + 0.8 * diurnal + jitter).max(0.05)
    }

    fn price_at(&self, at: DateTime<Utc>, jitter: f64) -> f64 {
        let hour_frac = at.time().hour() as f64 + at.time().minute() as f64 / 60.0;
        let peak_bias = if (17.0..21.0).contains(&hour_frac) {
            6.0
        } else if (1.0..5.0).contains(&hour_frac) {
            -4.0
        } else {
            0.0
        };
        (self.base_price_c_kwh + peak_bias + jitter).max(1.0)
    }
}

impl HistoricalDataSource for SeededDataSource {
    fn state_at(&self, at: DateTime<Utc>) -> PumpResult<CurrentState> {
        let jitter = jitter_for(self.seed, at, STATE_JITTER_SALT, -0.1, 0.1);
        Ok(CurrentState {
            timestamp: at,
            l1_m: 2.5,
            inflow_m3_s: self.inflow_at(at, jitter),
            outflow_m3_s: 0.0,
            pump_states: Vec::new(),
            price_c_kwh: self.price_at(at, jitter * 2.0),
        })
    }

    fn realized(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> PumpResult<ForecastData> {
        self.forecast(
            start,
            ((end - start).num_minutes()).max(0) as u32,
        )
    }

    fn baseline_schedule_at(&self, at: DateTime<Utc>) -> PumpResult<HashMap<String, BaselinePumpState>> {
        let jitter = jitter_for(self.seed, at, BASELINE_JITTER_SALT, -0.1, 0.1);
        let inflow = self.inflow_at(at, jitter);
        let pumps = PumpSpec::default_fleet();
        let on_count = naive_pumps_on(&pumps, inflow);

        let mut schedule = HashMap::with_capacity(pumps.len());
        for (i, pump) in pumps.iter().enumerate() {
            let is_on = i < on_count;
            schedule.insert(
                pump.id.clone(),
                BaselinePumpState {
                    is_on,
                    frequency_hz: if is_on { pump.nominal_frequency_hz } else { 0.0 },
                    flow_m3_s: if is_on { pump.max_flow_m3_s } else { 0.0 },
                    power_kw: if is_on { BASELINE_NOMINAL_POWER_KW } else { 0.0 },
                },
            );
        }
        Ok(schedule)
    }

    fn data_range(&self) -> PumpResult<(DateTime<Utc>, DateTime<Utc>)> {
        let now = Utc::now();
        Ok((now - ChronoDuration::days(365), now + ChronoDuration::days(365)))
    }
}

impl ForecastProvider for SeededDataSource {
    fn forecast(&self, from: DateTime<Utc>, horizon_minutes: u32) -> PumpResult<ForecastData> {
        let steps = (horizon_minutes / self.time_step_minutes).max(1) as usize;
        let mut timestamps = Vec::with_capacity(steps);
        let mut inflow_m3_s = Vec::with_capacity(steps);
        let mut price_c_kwh = Vec::with_capacity(steps);

        for i in 0..steps {
            let at = from + ChronoDuration::minutes(i64::from(self.time_step_minutes) * i as i64);
            let jitter = jitter_for(self.seed, at, FORECAST_JITTER_SALT, -0.15, 0.15);
            timestamps.push(at);
            inflow_m3_s.push(self.inflow_at(at, jitter));
            price_c_kwh.push(self.price_at(at, jitter * 3.0));
        }

        Ok(ForecastData {
            timestamps,
            inflow_m3_s,
            price_c_kwh,
        })
    }
}

/// Convenience constructor matching the default eight-pump fleet's idle state.
pub fn idle_pump_states() -> Vec<PumpState> {
    pump_core::model::PumpSpec::default_fleet()
        .into_iter()
        .map(|p| PumpState {
            pump_id: p.id,
            running: false,
            frequency_hz: 0.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_produces_same_trace() {
        let a = SeededDataSource::new(42, 15);
        let b = SeededDataSource::new(42, 15);
        let from = Utc::now();
        let fa = a.forecast(from, 120).unwrap();
        let fb = b.forecast(from, 120).unwrap();
        assert_eq!(fa.inflow_m3_s, fb.inflow_m3_s);
        assert_eq!(fa.price_c_kwh, fb.price_c_kwh);
    }

    #[test]
    fn jitter_is_independent_of_call_order() {
        // `RollingDriver::tick` fans state/baseline/forecast lookups out concurrently, so
        // the order these methods are actually invoked in is not guaranteed. Call them in
        // one order on `a` and the reverse order on `b` and confirm the results still
        // agree — this would fail under the old shared-RNG design, where whichever call
        // happened to acquire the lock first consumed the next draw.
        let a = SeededDataSource::new(42, 15);
        let b = SeededDataSource::new(42, 15);
        let at = Utc::now();

        let a_state = a.state_at(at).unwrap();
        let a_baseline = a.baseline_schedule_at(at).unwrap();

        let b_baseline = b.baseline_schedule_at(at).unwrap();
        let b_state = b.state_at(at).unwrap();

        assert_eq!(a_state.inflow_m3_s, b_state.inflow_m3_s);
        assert_eq!(a_state.price_c_kwh, b_state.price_c_kwh);
        for (id, a_pump) in &a_baseline {
            let b_pump = &b_baseline[id];
            assert_eq!(a_pump.is_on, b_pump.is_on);
            assert_eq!(a_pump.flow_m3_s, b_pump.flow_m3_s);
        }
    }

    #[test]
    fn forecast_is_internally_consistent() {
        let source = SeededDataSource::new(7, 15);
        let forecast = source.forecast(Utc::now(), 120).unwrap();
        assert!(forecast.is_consistent());
        assert_eq!(forecast.horizon_len(), 8);
    }

    #[test]
    fn inflow_never_goes_negative() {
        let source = SeededDataSource::new(1, 15);
        let forecast = source.forecast(Utc::now(), 1440).unwrap();
        assert!(forecast.inflow_m3_s.iter().all(|&v| v > 0.0));
    }

    #[test]
    fn baseline_schedule_covers_every_fleet_pump() {
        let source = SeededDataSource::new(5, 15);
        let schedule = source.baseline_schedule_at(Utc::now()).unwrap();
        assert_eq!(schedule.len(), PumpSpec::default_fleet().len());
    }

    #[test]
    fn baseline_schedule_brings_on_at_least_one_pump() {
        let source = SeededDataSource::new(5, 15);
        let schedule = source.baseline_schedule_at(Utc::now()).unwrap();
        assert!(schedule.values().any(|s| s.is_on));
    }

    #[test]
    fn naive_pumps_on_scales_with_inflow() {
        let pumps = PumpSpec::default_fleet();
        let low = naive_pumps_on(&pumps, 0.1);
        let high = naive_pumps_on(&pumps, 6.0);
        assert!(high >= low);
        assert!(high <= pumps.len());
    }

    #[test]
    fn data_range_is_ordered() {
        let source = SeededDataSource::new(5, 15);
        let (start, end) = source.data_range().unwrap();
        assert!(start < end);
    }
}
