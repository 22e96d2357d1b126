//! Pure functions over the pump and tunnel physics.
//!
//! Two distinct models live here, deliberately kept apart:
//!
//! - The **band model** (`flow_band`, `power_affine`/`power_band`) is a linear surrogate
//!   for the MIP builder: `power_affine` hands back the piecewise-affine power law's
//!   `(intercept, slope)` coefficients so the builder can stay linear in its own decision
//!   variables, while `flow_band`/`power_band` evaluate a `[min, max]` range at one
//!   concrete frequency for callers (tests, diagnostics) that just want a point estimate
//!   rather than the builder's coefficient form. The true relationship between frequency,
//!   tunnel level (head) and power is cubic-ish and would make the optimization problem
//!   bilinear if plugged in directly; this surrogate is good enough for choosing a
//!   schedule, not for reporting realized energy.
//! - `realized_flow_power` is the actual nonlinear physics (used by the rule-based
//!   fallback, which never goes through the MIP, and by anything that needs to compute
//!   what a chosen schedule really consumed).
//!
//! Neither function owns a solver variable; `pump_algo::builder` is the only place that
//! talks to `good_lp`.

use pump_core::model::{FlowPower, PumpSpec};
use pump_core::units::{FlowM3S, PowerKw};

/// Flow band half-width as a fraction of the base flow at a given frequency.
pub const FLOW_BAND_TOLERANCE: f64 = 0.10;
/// Power band half-width as a fraction of the base power at a given frequency.
pub const POWER_BAND_TOLERANCE: f64 = 0.15;
/// Exponent relating frequency ratio to power in the piecewise-affine law's base-power
/// anchor (§4.B): `base_power = max_power · (min_freq/max_freq)^2.5`.
pub const POWER_LAW_EXPONENT: f64 = 2.5;
/// Multiplier applied to the piecewise-affine power law's slope above base, so the
/// linear segment still over-bounds the true curve's convexity rather than just
/// touching it at the two endpoints (§4.B).
pub const POWER_SLOPE_MULTIPLIER: f64 = 1.5;
/// Exponent of the true (non-linearized) affinity law used only by `realized_flow_power`,
/// which the MIP never sees: centrifugal pump affinity laws put power at the cube of
/// speed, unlike the shallower 2.5 the linear surrogate's base anchor uses.
pub const REALIZED_POWER_LAW_EXPONENT: f64 = 3.0;

/// Advance the tunnel level by one time step under a simple lumped mass balance:
/// level change = (inflow - outflow) * dt / surface-equivalent volume.
pub fn tunnel_mass_balance(
    level_m: f64,
    inflow_m3_s: f64,
    total_outflow_m3_s: f64,
    dt_seconds: f64,
    volume_m3: f64,
) -> f64 {
    let net_volume = (inflow_m3_s - total_outflow_m3_s) * dt_seconds;
    level_m + net_volume / volume_m3.max(1.0)
}

fn base_flow_m3_s(pump: &PumpSpec, freq_hz: f64) -> f64 {
    let scale = freq_hz / pump.max_frequency_hz.max(1e-9);
    pump.max_flow_m3_s * scale
}

/// Base power at `min_frequency_hz`, the mandatory literal formula of §4.B:
/// `max_power · (min_freq/max_freq)^2.5`.
pub fn base_power_kw(pump: &PumpSpec) -> f64 {
    let freq_frac = pump.min_frequency_hz / pump.max_frequency_hz.max(1e-9);
    pump.max_power_kw * freq_frac.powf(POWER_LAW_EXPONENT)
}

/// Coefficients of the §4.B piecewise-affine power law expressed as
/// `power ≈ intercept_kw · on + slope_kw_per_hz · freq_hz` rather than the more obvious
/// `base + slope · (freq_frac − min_freq_frac)`: the MIP builder needs power linear in
/// its own decision variables (`on`, `freq_hz`) without a bilinear `on·freq_hz` product,
/// and since `freq_hz` is already gated to zero whenever `on=0`, this form still
/// collapses correctly to zero power off-duty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerAffine {
    pub intercept_kw: f64,
    pub slope_kw_per_hz: f64,
}

pub fn power_affine(pump: &PumpSpec) -> PowerAffine {
    let max_freq = pump.max_frequency_hz.max(1e-9);
    let min_freq_frac = pump.min_frequency_hz / max_freq;
    let base = base_power_kw(pump);
    // "Slope above base is (max_power − base) / (1 − min_freq/max_freq) multiplied by
    // 1.5" (§4.B), expressed per unit of frequency fraction.
    let run = (1.0 - min_freq_frac).max(1e-9);
    let slope_per_frac = POWER_SLOPE_MULTIPLIER * (pump.max_power_kw - base) / run;
    PowerAffine {
        intercept_kw: base - slope_per_frac * min_freq_frac,
        slope_kw_per_hz: slope_per_frac / max_freq,
    }
}

/// The piecewise-affine power law evaluated at one concrete frequency, for callers that
/// want a single number rather than the builder's linear coefficients.
pub fn affine_power_kw(pump: &PumpSpec, freq_hz: f64) -> f64 {
    let coeffs = power_affine(pump);
    coeffs.intercept_kw + coeffs.slope_kw_per_hz * freq_hz
}

/// `[min, max]` flow band achievable at `freq_hz`, in m3/s.
pub fn flow_band(pump: &PumpSpec, freq_hz: f64) -> (FlowM3S, FlowM3S) {
    let base = base_flow_m3_s(pump, freq_hz);
    (
        FlowM3S(base * (1.0 - FLOW_BAND_TOLERANCE)),
        FlowM3S(base * (1.0 + FLOW_BAND_TOLERANCE)),
    )
}

/// `[min, max]` power band at `freq_hz`, in kW, ignoring the level-dependent head shift
/// `head_correction_kw` computes: folding that correction into the MIP's power-band
/// constraints would make them bilinear (power times the level decision variable) rather
/// than linear, so it is left for callers computing realized (not scheduled) power only.
pub fn power_band(pump: &PumpSpec, freq_hz: f64) -> (PowerKw, PowerKw) {
    let base = affine_power_kw(pump, freq_hz).max(0.0);
    (
        PowerKw(base * (1.0 - POWER_BAND_TOLERANCE)),
        PowerKw(base * (1.0 + POWER_BAND_TOLERANCE)),
    )
}

/// Additional power drawn (or saved) because the tunnel level differs from the pump's
/// own reference level, per §4.B's optional head-correction term: subtract
/// `power_vs_l1_slope_kw_per_m · (L1 − reference_level_m)` to reflect reduced lift at
/// higher tunnel level. Not used by the MIP builder (see `power_band`'s doc comment for
/// why); available to a caller computing realized power outside the linear program.
pub fn head_correction_kw(pump: &PumpSpec, level_m: f64) -> f64 {
    pump.power_vs_l1_slope_kw_per_m * (level_m - pump.reference_level_m)
}

/// Actual, nonlinear flow and power delivered by a running pump at `freq_hz` and the
/// given tunnel level: the true cubic-ish affinity law plus the head correction, unlike
/// the piecewise-affine surrogate the MIP builder uses. Used by the rule-based fallback
/// and by anything computing realized (not scheduled) energy.
pub fn realized_flow_power(pump: &PumpSpec, freq_hz: f64, level_m: f64) -> FlowPower {
    let scale = freq_hz / pump.max_frequency_hz.max(1e-9);
    let flow = pump.max_flow_m3_s * scale;
    let power = (pump.max_power_kw * scale.powf(REALIZED_POWER_LAW_EXPONENT)
        - head_correction_kw(pump, level_m))
    .max(0.0);
    FlowPower {
        flow: FlowM3S(flow),
        power: PowerKw(power),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pump() -> PumpSpec {
        PumpSpec {
            id: "P11".into(),
            station: 1,
            min_frequency_hz: 47.8,
            max_frequency_hz: 50.0,
            preferred_freq_min_hz: 47.8,
            preferred_freq_max_hz: 49.0,
            nominal_frequency_hz: 50.0,
            max_flow_m3_s: 1.2,
            max_power_kw: 480.0,
            power_vs_l1_slope_kw_per_m: 10.0,
            reference_level_m: 0.0,
        }
    }

    #[test]
    fn mass_balance_rises_when_inflow_exceeds_outflow() {
        let next = tunnel_mass_balance(2.0, 3.0, 1.0, 900.0, 50_000.0);
        assert!(next > 2.0);
    }

    #[test]
    fn mass_balance_falls_when_outflow_exceeds_inflow() {
        let next = tunnel_mass_balance(2.0, 1.0, 3.0, 900.0, 50_000.0);
        assert!(next < 2.0);
    }

    #[test]
    fn flow_band_widens_around_base_flow() {
        let pump = test_pump();
        let (lo, hi) = flow_band(&pump, 50.0);
        assert!(lo.value() < pump.max_flow_m3_s);
        assert!(hi.value() > pump.max_flow_m3_s);
    }

    #[test]
    fn flow_scales_down_with_frequency() {
        let pump = test_pump();
        let (lo_full, _) = flow_band(&pump, 50.0);
        let (lo_reduced, _) = flow_band(&pump, 47.8);
        assert!(lo_reduced.value() < lo_full.value());
    }

    #[test]
    fn power_band_contains_realized_power_at_nominal() {
        let pump = test_pump();
        let (lo, hi) = power_band(&pump, 50.0);
        let realized = realized_flow_power(&pump, 50.0, 0.0);
        assert!(lo.value() <= hi.value());
        // The band surrogate is centred differently from the level-aware realized
        // figure; both must at least be finite and positive.
        assert!(realized.power.value() > 0.0);
    }

    #[test]
    fn base_power_matches_the_literal_min_freq_formula() {
        let pump = test_pump();
        let expected = pump.max_power_kw * (pump.min_frequency_hz / pump.max_frequency_hz).powf(POWER_LAW_EXPONENT);
        assert!((base_power_kw(&pump) - expected).abs() < 1e-9);
    }

    #[test]
    fn power_affine_matches_base_power_at_min_frequency() {
        let pump = test_pump();
        let at_min = affine_power_kw(&pump, pump.min_frequency_hz);
        assert!((at_min - base_power_kw(&pump)).abs() < 1e-6);
    }

    #[test]
    fn realized_power_shrinks_with_level_above_reference() {
        // `power_vs_l1_slope_kw_per_m` > 0 and `reference_level_m` == 0 here, so the head
        // correction should reduce power as the level rises above the reference (§4.B:
        // "reduced lift at higher tunnel level").
        let pump = test_pump();
        let shallow = realized_flow_power(&pump, 50.0, 0.0);
        let deep = realized_flow_power(&pump, 50.0, 5.0);
        assert!(deep.power.value() < shallow.power.value());
    }
}
