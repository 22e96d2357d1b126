//! Compares a completed optimized simulation against the baseline operating points
//! collected alongside it, producing the per-metric pairs a report can render.
//!
//! Builds parallel `Vec`s of per-step metrics and assembles one summary record, returned
//! as a plain struct rather than a dataframe — nothing downstream needs a dataframe
//! engine (see DESIGN.md for dependency notes). Each `SimulationRecord`'s
//! `baseline_schedule` was fetched concurrently with that step's state/forecast (§5), so
//! this comparison replays no further I/O — it only reduces over what the driver already
//! collected.

use std::collections::HashMap;

use crate::rolling::SimulationRecord;

/// One metric's optimized/baseline/delta triple.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricComparison {
    pub optimized: f64,
    pub baseline: f64,
    pub delta_pct: f64,
}

impl MetricComparison {
    fn new(optimized: f64, baseline: f64) -> Self {
        let delta_pct = if baseline.abs() < 1e-9 {
            0.0
        } else {
            (optimized - baseline) / baseline * 100.0
        };
        MetricComparison {
            optimized,
            baseline,
            delta_pct,
        }
    }
}

/// The full metric table produced by comparing an optimized run against a baseline.
#[derive(Debug, Clone)]
pub struct ComparisonReport {
    pub total_energy_kwh: MetricComparison,
    pub total_cost_c: MetricComparison,
    pub l1_violation_count: MetricComparison,
    pub max_violation_m: MetricComparison,
    pub outflow_variance: MetricComparison,
    pub specific_energy_kwh_m3: MetricComparison,
    pub per_pump_hours: HashMap<String, f64>,
}

/// Build a `ComparisonReport` from a completed optimized run, reducing over each
/// record's `baseline_schedule` (steps with no baseline data simply contribute zero to
/// the baseline side, rather than the run as a whole).
pub fn compare(optimized: &[SimulationRecord]) -> ComparisonReport {
    let opt_energy: f64 = optimized.iter().map(|r| r.total_energy_kwh).sum();
    let opt_cost: f64 = optimized.iter().map(|r| r.total_cost_c).sum();
    let opt_violations: f64 = optimized.iter().map(|r| r.l1_violations as f64).sum();
    let opt_max_violation = optimized.iter().map(|r| r.max_violation_m).fold(0.0_f64, f64::max);

    let opt_outflow: Vec<f64> = optimized
        .iter()
        .map(|r| r.schedules.iter().map(|s| s.flows_m3_s.first().copied().unwrap_or(0.0)).sum())
        .collect();
    let opt_outflow_variance = variance(&opt_outflow);

    // Step duration isn't carried on `SimulationRecord`; derive it from consecutive
    // timestamps (falling back to the first gap, or 15 minutes for a single-record run).
    let dt_hours_for = |i: usize| -> f64 {
        if optimized.len() < 2 {
            return 0.25;
        }
        let j = if i + 1 < optimized.len() { i + 1 } else { i };
        let k = if j == i { i - 1 } else { i };
        (optimized[j].timestamp - optimized[k].timestamp).num_seconds() as f64 / 3600.0
    };

    let mut baseline_energy = 0.0;
    let mut baseline_cost = 0.0;
    let mut baseline_outflow = Vec::with_capacity(optimized.len());
    for (i, record) in optimized.iter().enumerate() {
        let dt_hours = dt_hours_for(i).abs();
        // The same real-world instant, so the optimized run's observed price applies to
        // the baseline's power draw too — price is environmental, not policy-dependent.
        let price = record.state.price_c_kwh;
        if let Some(schedule) = record.baseline_schedule.as_ref() {
            let step_power_kw: f64 = schedule.values().map(|s| s.power_kw).sum();
            let step_flow: f64 = schedule.values().map(|s| s.flow_m3_s).sum();
            baseline_energy += step_power_kw * dt_hours;
            baseline_cost += step_power_kw * dt_hours * price;
            baseline_outflow.push(step_flow);
        }
    }
    let baseline_outflow_variance = variance(&baseline_outflow);

    // The last record's `pump_usage_hours` is already the cumulative total across the
    // whole run (it is threaded step to step by the rolling driver), so no re-derivation
    // from individual schedules is needed here.
    let per_pump_hours: HashMap<String, f64> = optimized
        .last()
        .map(|last| last.pump_usage_hours.clone())
        .unwrap_or_default();

    let opt_volume: f64 = optimized
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let dt_hours = dt_hours_for(i).abs();
            let dt_seconds = dt_hours * 3600.0;
            let step_flow: f64 = r.schedules.iter().map(|s| s.flows_m3_s.first().copied().unwrap_or(0.0)).sum();
            step_flow * dt_seconds
        })
        .sum();
    let opt_specific_energy = if opt_volume > 0.0 { opt_energy / opt_volume } else { 0.0 };

    ComparisonReport {
        total_energy_kwh: MetricComparison::new(opt_energy, baseline_energy),
        total_cost_c: MetricComparison::new(opt_cost, baseline_cost),
        l1_violation_count: MetricComparison::new(opt_violations, 0.0),
        max_violation_m: MetricComparison::new(opt_max_violation, 0.0),
        outflow_variance: MetricComparison::new(opt_outflow_variance, baseline_outflow_variance),
        specific_energy_kwh_m3: MetricComparison::new(opt_specific_energy, 0.0),
        per_pump_hours,
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}
