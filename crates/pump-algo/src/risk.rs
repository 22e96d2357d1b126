//! Risk tiering and the adaptive objective weight presets it selects.
//!
//! Grounded in the historical optimizer's weight dictionary, which keys by risk level and
//! carries five terms: `cost`, `smoothness`, `fairness`, `safety_margin` and an optional
//! `specific_energy`. The violation weight (not present in that dictionary; it is folded
//! directly into the objective as a fixed penalty per `SystemConstraints`) is never
//! reduced by any preset, matching the invariant that safety cannot be traded away by a
//! risk-tier change.

use pump_core::model::RiskLevel;
use pump_core::model::SystemConstraints;

/// The five tunable terms of the tactical objective `J`, plus the PRE-DRAIN/overdue-flush
/// low-level bonus (§4.C.1, §4.F), which rides along on the same struct since both are
/// per-solve scalars threaded from the driver into the builder. The bonus is zero in
/// every preset below; only `PlanBias`/the driver's flush check ever set it nonzero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectiveWeights {
    pub cost: f64,
    pub smoothness: f64,
    pub fairness: f64,
    pub safety_margin: f64,
    pub specific_energy: f64,
    pub low_level_bonus: f64,
}

impl ObjectiveWeights {
    /// The preset associated with a risk tier, per the weight table of §4.C.2. CRITICAL
    /// weighs safety far above cost; LOW leans toward cost minimization since the
    /// tunnel has ample headroom. The violation weight is never part of this preset —
    /// it is folded directly into the objective as a fixed penalty, never reduced by a
    /// risk-tier change.
    pub fn for_risk_level(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Critical => ObjectiveWeights {
                cost: 0.1,
                smoothness: 0.05,
                fairness: 0.1,
                safety_margin: 2.0,
                specific_energy: 0.05,
                low_level_bonus: 0.0,
            },
            RiskLevel::High => ObjectiveWeights {
                cost: 0.4,
                smoothness: 0.1,
                fairness: 0.3,
                safety_margin: 0.8,
                specific_energy: 0.1,
                low_level_bonus: 0.0,
            },
            RiskLevel::Normal => ObjectiveWeights {
                cost: 0.8,
                smoothness: 0.2,
                fairness: 0.4,
                safety_margin: 0.3,
                specific_energy: 0.2,
                low_level_bonus: 0.0,
            },
            RiskLevel::Low => ObjectiveWeights {
                cost: 1.0,
                smoothness: 0.2,
                fairness: 0.5,
                safety_margin: 0.1,
                specific_energy: 0.3,
                low_level_bonus: 0.0,
            },
        }
    }
}

/// Distance-to-bound and inflow trend drive the risk tier, per the trigger table of
/// §4.C.2: a tunnel within 10% of either bound is CRITICAL outright; within 20% (or
/// within 30% with inflow still rising) is HIGH; within 40% is NORMAL; otherwise LOW.
/// "Unfavorable trend" only escalates HIGH, never CRITICAL — a tunnel already within
/// 10% of a bound is critical regardless of which way inflow is moving.
pub fn assess_risk_level(
    constraints: &SystemConstraints,
    level_m: f64,
    inflow_trend_m3_s_per_step: f64,
) -> RiskLevel {
    let headroom_above = constraints.l1_max_m - level_m;
    let headroom_below = level_m - constraints.l1_min_m;
    let headroom = headroom_above.min(headroom_below);
    let span = (constraints.l1_max_m - constraints.l1_min_m).max(1e-6);
    let headroom_frac = (headroom / span).clamp(0.0, 1.0);
    let rising = inflow_trend_m3_s_per_step > 0.0;

    if headroom_frac < 0.10 {
        RiskLevel::Critical
    } else if headroom_frac < 0.20 || (headroom_frac < 0.30 && rising) {
        RiskLevel::High
    } else if headroom_frac < 0.40 {
        RiskLevel::Normal
    } else {
        RiskLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints() -> SystemConstraints {
        SystemConstraints::default()
    }

    #[test]
    fn near_max_level_is_critical_even_without_rising_inflow() {
        let c = constraints();
        let level = c.l1_max_m - 0.2;
        assert_eq!(assess_risk_level(&c, level, -0.1), RiskLevel::Critical);
    }

    #[test]
    fn mid_level_with_falling_inflow_is_lower_risk() {
        let c = constraints();
        let mid = (c.l1_min_m + c.l1_max_m) / 2.0;
        let level = assess_risk_level(&c, mid, -0.2);
        assert!(matches!(level, RiskLevel::Normal | RiskLevel::Low));
    }

    #[test]
    fn rising_inflow_pushes_risk_up_at_same_level() {
        let c = constraints();
        let level = c.l1_min_m + 0.45 * (c.l1_max_m - c.l1_min_m);
        let falling = assess_risk_level(&c, level, -0.5);
        let rising = assess_risk_level(&c, level, 0.5);
        assert!(rising_outranks(rising, falling));
    }

    fn rank(level: RiskLevel) -> u8 {
        match level {
            RiskLevel::Critical => 3,
            RiskLevel::High => 2,
            RiskLevel::Normal => 1,
            RiskLevel::Low => 0,
        }
    }

    fn rising_outranks(rising: RiskLevel, falling: RiskLevel) -> bool {
        rank(rising) >= rank(falling)
    }

    #[test]
    fn critical_preset_never_has_lower_safety_weight_than_low() {
        let critical = ObjectiveWeights::for_risk_level(RiskLevel::Critical);
        let low = ObjectiveWeights::for_risk_level(RiskLevel::Low);
        assert!(critical.safety_margin > low.safety_margin);
    }
}
