//! Drives one MIP solve attempt: takes a built [`Problem`], hands it to the solver with
//! a wall-clock budget, and extracts an [`OptimizationResult`] from whatever solution
//! came back.
//!
//! HiGHS (`good_lp`'s `highs` backend) is the default here rather than Clarabel, the
//! pure-LP/SOCP solver this codebase otherwise reaches for first: Clarabel cannot
//! represent the integer on/off decisions this problem needs, so a genuinely
//! MIP-capable backend is not optional the way it is for a continuous relaxation.
//!
//! Energy and cost are recomputed here from the extracted pump power trajectory rather
//! than trusted from the solver's reported objective value, since the objective also
//! contains smoothness/fairness/safety terms that have no monetary meaning on their own.

use std::time::{Duration, Instant};

use good_lp::solvers::highs::highs;
use good_lp::{Solution, SolverModel};

use pump_core::model::{ForecastData, OptimizationMode, OptimizationResult, PumpSchedule, PumpSpec};

use crate::builder::Problem;

#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    #[error("solver failed: {0}")]
    SolverFailed(String),
}

/// Solve a built problem with a wall-clock budget, returning a populated
/// `OptimizationResult` tagged with `mode`.
pub fn solve(
    problem: Problem,
    pumps: &[PumpSpec],
    forecast: &ForecastData,
    mode: OptimizationMode,
    time_step_minutes: u32,
    time_limit: Duration,
) -> Result<OptimizationResult, SolveError> {
    let start = Instant::now();
    let steps = problem.steps;
    let dt_hours = f64::from(time_step_minutes) / 60.0;

    let mut model = problem.vars.minimise(problem.objective).using(highs);
    model.set_time_limit(time_limit.as_secs_f64());
    for constraint in problem.constraints {
        model = model.with(constraint);
    }

    let solution = model
        .solve()
        .map_err(|e| SolveError::SolverFailed(format!("{e:?}")))?;

    let mut schedules = Vec::with_capacity(pumps.len());
    let mut power_by_step = vec![0.0_f64; steps];
    for (p, pump) in pumps.iter().enumerate() {
        let mut frequencies_hz = Vec::with_capacity(steps);
        let mut flows_m3_s = Vec::with_capacity(steps);
        let mut powers_kw = Vec::with_capacity(steps);
        for t in 0..steps {
            frequencies_hz.push(solution.value(problem.pump_vars[p][t].freq_hz));
            let flow = solution.value(problem.pump_vars[p][t].flow_m3_s);
            let power = solution.value(problem.pump_vars[p][t].power_kw);
            flows_m3_s.push(flow);
            powers_kw.push(power);
            power_by_step[t] += power;
        }
        schedules.push(PumpSchedule {
            pump_id: pump.id.clone(),
            frequencies_hz,
            flows_m3_s,
            powers_kw,
        });
    }

    let l1_trajectory: Vec<f64> = problem
        .level_vars
        .iter()
        .map(|&v| solution.value(v))
        .collect();

    let total_energy_kwh: f64 = power_by_step.iter().sum::<f64>() * dt_hours;
    let total_cost_c: f64 = power_by_step
        .iter()
        .zip(forecast.price_c_kwh.iter())
        .map(|(power_kw, price_c_kwh)| power_kw * dt_hours * price_c_kwh)
        .sum();

    let violations: Vec<f64> = problem
        .violation_slack
        .iter()
        .map(|&v| solution.value(v))
        .collect();
    let l1_violations = violations.iter().filter(|&&v| v > 1e-6).count();
    let max_violation_m = violations.iter().cloned().fold(0.0_f64, f64::max);

    Ok(OptimizationResult {
        success: true,
        mode,
        schedules,
        l1_trajectory,
        total_energy_kwh,
        total_cost_c,
        explanation: format!("{mode} solve completed in {:?}", start.elapsed()),
        solve_time_seconds: start.elapsed().as_secs_f64(),
        l1_violations,
        max_violation_m,
    })
}
