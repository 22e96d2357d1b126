//! End-to-end rolling-simulation scenarios: duty rotation (S4) and a forecast shock (S5),
//! plus the no-op-advisor idempotence law.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use pump_core::config::DriverConfig;
use pump_core::error::PumpResult;
use pump_core::model::{
    BaselinePumpState, CurrentState, ForecastData, PumpSpec, StrategicPlan, SystemConstraints,
    TimeBandGuidance, TimeBandStrategy,
};
use pump_driver::RollingDriver;
use pump_sources::{ForecastProvider, HistoricalDataSource, NullAdvisor, SeededDataSource, StrategicAdvisor};

/// A data source whose realized inflow spikes to 3x a flat baseline for the first few
/// steps while its forecast keeps predicting the unshocked baseline — the forecast is
/// never updated to anticipate the spike, so every one of those steps registers as a
/// large forecast error.
struct ShockSource {
    start: DateTime<Utc>,
    step_minutes: i64,
    shock_steps: i64,
}

impl ShockSource {
    fn step_index(&self, at: DateTime<Utc>) -> i64 {
        (at - self.start).num_minutes() / self.step_minutes.max(1)
    }

    fn actual_inflow(&self, at: DateTime<Utc>) -> f64 {
        if self.step_index(at) < self.shock_steps {
            3.0
        } else {
            1.0
        }
    }
}

impl HistoricalDataSource for ShockSource {
    fn state_at(&self, at: DateTime<Utc>) -> PumpResult<CurrentState> {
        Ok(CurrentState {
            timestamp: at,
            l1_m: 4.0,
            inflow_m3_s: self.actual_inflow(at),
            outflow_m3_s: 0.0,
            pump_states: Vec::new(),
            price_c_kwh: 10.0,
        })
    }

    fn realized(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> PumpResult<ForecastData> {
        self.forecast(start, ((end - start).num_minutes()).max(0) as u32)
    }

    fn baseline_schedule_at(&self, _at: DateTime<Utc>) -> PumpResult<HashMap<String, BaselinePumpState>> {
        Ok(HashMap::new())
    }

    fn data_range(&self) -> PumpResult<(DateTime<Utc>, DateTime<Utc>)> {
        Ok((self.start - chrono::Duration::days(1), self.start + chrono::Duration::days(1)))
    }
}

impl ForecastProvider for ShockSource {
    fn forecast(&self, from: DateTime<Utc>, horizon_minutes: u32) -> PumpResult<ForecastData> {
        let steps = (horizon_minutes as i64 / self.step_minutes.max(1)).max(1) as usize;
        let timestamps: Vec<DateTime<Utc>> = (0..steps)
            .map(|i| from + chrono::Duration::minutes(self.step_minutes * i as i64))
            .collect();
        Ok(ForecastData {
            timestamps,
            inflow_m3_s: vec![1.0; steps],
            price_c_kwh: vec![10.0; steps],
        })
    }
}

/// A fixed strategic advisor always proposing a 24h plan whose every band is `Balance` —
/// the band `PlanBias::for_time` maps onto `PlanBias::NEUTRAL`, so this advisor's guidance
/// should never move the tactical schedule away from what an absent advisor produces.
struct AllBalanceAdvisor;

impl StrategicAdvisor for AllBalanceAdvisor {
    fn propose_plan(&self, state: &CurrentState, _forecast: &ForecastData) -> PumpResult<Option<StrategicPlan>> {
        Ok(Some(StrategicPlan {
            generated_at: state.timestamp,
            valid_until: state.timestamp + chrono::Duration::hours(24),
            bands: vec![TimeBandGuidance {
                start: state.timestamp - chrono::Duration::hours(1),
                end: state.timestamp + chrono::Duration::hours(24),
                strategy: TimeBandStrategy::Balance,
            }],
        }))
    }
}

/// S4 — duty rotation: over a long enough run, the fairness/rotation-bias terms should
/// keep any one pump from monopolizing the fleet's running hours.
#[tokio::test]
async fn duty_rotation_spreads_usage_across_more_than_one_pump() {
    let pumps = PumpSpec::default_fleet();
    let constraints = SystemConstraints::default();
    let config = DriverConfig::default();
    let source = Arc::new(SeededDataSource::new(11, config.time_step_minutes));
    let advisor = Arc::new(NullAdvisor);

    let driver = RollingDriver::new(source.clone(), source.clone(), advisor, pumps.clone(), constraints, config);
    let cancel = tokio_util::sync::CancellationToken::new();
    let (handle, mut records) = driver.run(Utc::now(), 48, cancel);

    let mut last_usage: HashMap<String, f64> = HashMap::new();
    while let Some(record) = records.recv().await {
        last_usage = record.pump_usage_hours;
    }
    handle.await.unwrap().unwrap();

    let pumps_with_usage = last_usage.values().filter(|&&h| h > 0.0).count();
    assert!(pumps_with_usage >= 2, "expected rotation across at least two pumps, got {last_usage:?}");

    let total: f64 = last_usage.values().sum();
    let max_share = last_usage.values().cloned().fold(0.0_f64, f64::max);
    if total > 0.0 {
        assert!(max_share / total < 0.9, "one pump accounts for nearly all usage: {last_usage:?}");
    }
}

/// S5 — forecast shock: a sustained large inflow surprise must be flagged as an
/// emergency within the shock window.
#[tokio::test]
async fn forecast_shock_is_flagged_as_an_emergency() {
    let pumps = PumpSpec::default_fleet();
    let constraints = SystemConstraints::default();
    let config = DriverConfig::default();
    let start = Utc::now();
    let source = Arc::new(ShockSource {
        start,
        step_minutes: i64::from(config.time_step_minutes),
        shock_steps: 5,
    });
    let advisor = Arc::new(NullAdvisor);

    let driver = RollingDriver::new(source.clone(), source.clone(), advisor, pumps, constraints, config);
    let cancel = tokio_util::sync::CancellationToken::new();
    let (handle, mut records) = driver.run(start, 8, cancel);

    let mut any_emergency = false;
    while let Some(record) = records.recv().await {
        if record.step_index <= 5 && record.emergency {
            any_emergency = true;
        }
    }
    handle.await.unwrap().unwrap();

    assert!(any_emergency, "expected the shock window to trip the emergency flag at least once");
}

/// Idempotence of the no-op advisor: an absent advisor and an advisor proposing a plan
/// whose every band is `Balance` (the strategy `PlanBias` maps to `NEUTRAL`) must drive
/// the fleet identically, tick for tick.
#[tokio::test]
async fn all_balance_plan_matches_no_advisor_schedule() {
    let pumps = PumpSpec::default_fleet();
    let constraints = SystemConstraints::default();
    let config = DriverConfig::default();
    let start = Utc::now();

    let source_a = Arc::new(SeededDataSource::new(99, config.time_step_minutes));
    let driver_a = RollingDriver::new(
        source_a.clone(),
        source_a.clone(),
        Arc::new(NullAdvisor),
        pumps.clone(),
        constraints.clone(),
        config.clone(),
    );
    let cancel_a = tokio_util::sync::CancellationToken::new();
    let (handle_a, mut records_a) = driver_a.run(start, 6, cancel_a);
    let mut schedules_a = Vec::new();
    while let Some(record) = records_a.recv().await {
        schedules_a.push(record.schedules);
    }
    handle_a.await.unwrap().unwrap();

    let source_b = Arc::new(SeededDataSource::new(99, config.time_step_minutes));
    let driver_b = RollingDriver::new(
        source_b.clone(),
        source_b.clone(),
        Arc::new(AllBalanceAdvisor),
        pumps,
        constraints,
        config,
    );
    let cancel_b = tokio_util::sync::CancellationToken::new();
    let (handle_b, mut records_b) = driver_b.run(start, 6, cancel_b);
    let mut schedules_b = Vec::new();
    while let Some(record) = records_b.recv().await {
        schedules_b.push(record.schedules);
    }
    handle_b.await.unwrap().unwrap();

    assert_eq!(schedules_a.len(), schedules_b.len());
    for (a, b) in schedules_a.iter().zip(schedules_b.iter()) {
        let freqs_a: Vec<f64> = a.iter().flat_map(|s| s.frequencies_hz.iter().copied()).collect();
        let freqs_b: Vec<f64> = b.iter().flat_map(|s| s.frequencies_hz.iter().copied()).collect();
        assert_eq!(freqs_a, freqs_b);
    }
}
