//! Translates a `StrategicPlan`'s qualitative per-band guidance into a bounded
//! perturbation of the tactical objective weights. Deliberately does not and cannot
//! inject a hard constraint: the plan is advisory, and a wrong or stale plan should only
//! ever nudge the optimizer, never force it into an infeasible corner.

use chrono::{DateTime, Utc};

use pump_algo::ObjectiveWeights;
use pump_core::model::{StrategicPlan, TimeBandStrategy};

/// Bounded multiplicative bias applied to one or more objective weight terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanBias {
    pub cost_multiplier: f64,
    pub smoothness_multiplier: f64,
    pub safety_margin_multiplier: f64,
    /// A small additive bonus rewarding lower L1 during PRE-DRAIN bands; zero otherwise.
    pub low_level_bonus: f64,
}

impl PlanBias {
    pub const NEUTRAL: PlanBias = PlanBias {
        cost_multiplier: 1.0,
        smoothness_multiplier: 1.0,
        safety_margin_multiplier: 1.0,
        low_level_bonus: 0.0,
    };

    /// The bias for `at`, given an optional plan. Returns `NEUTRAL` if no plan was
    /// supplied or `at` falls outside every band — a missing or expired plan must never
    /// change the optimizer's behaviour.
    pub fn for_time(plan: Option<&StrategicPlan>, at: DateTime<Utc>) -> Self {
        let Some(plan) = plan else {
            return PlanBias::NEUTRAL;
        };
        let Some(band) = plan.band_at(at) else {
            return PlanBias::NEUTRAL;
        };
        match band.strategy {
            TimeBandStrategy::PreDrain => PlanBias {
                cost_multiplier: 0.6,
                low_level_bonus: 0.3,
                ..PlanBias::NEUTRAL
            },
            TimeBandStrategy::RideOut => PlanBias {
                safety_margin_multiplier: 1.6,
                ..PlanBias::NEUTRAL
            },
            TimeBandStrategy::Hold => PlanBias {
                smoothness_multiplier: 1.5,
                ..PlanBias::NEUTRAL
            },
            TimeBandStrategy::Balance => PlanBias::NEUTRAL,
        }
    }

    /// Apply this bias on top of a risk-tier weight preset. The violation weight baked
    /// into the builder's objective is untouched by any bias, by construction: `PlanBias`
    /// carries no field for it. `low_level_bonus` is additive (on top of whatever an
    /// overdue flush already contributed via [`flush_overdue_bonus`]) rather than
    /// multiplicative, matching §4.C.1's "adds a linear bonus" wording.
    pub fn apply(&self, weights: ObjectiveWeights) -> ObjectiveWeights {
        ObjectiveWeights {
            cost: weights.cost * self.cost_multiplier,
            smoothness: weights.smoothness * self.smoothness_multiplier,
            safety_margin: weights.safety_margin * self.safety_margin_multiplier,
            low_level_bonus: weights.low_level_bonus + self.low_level_bonus,
            ..weights
        }
    }
}

/// The §4.F step-7 "hours-since-last-flush" input, converted into the same additive
/// low-level bonus `PlanBias::PreDrain` uses: once a flush is overdue, the tactical
/// objective should reward a lower `L1` the same way a PRE-DRAIN plan band would, without
/// the driver needing a plan to say so. Ramps from 0 at the due time to a cap reached one
/// full flush interval past due, rather than snapping on, so a schedule just past due
/// does not suddenly chase the target as hard as one that has been overdue for a day.
pub fn flush_overdue_bonus(hours_since_last_flush: f64, flush_interval_hours: f64) -> f64 {
    const MAX_BONUS: f64 = 0.5;
    let interval = flush_interval_hours.max(1.0);
    if hours_since_last_flush <= interval {
        return 0.0;
    }
    let overdue_fraction = ((hours_since_last_flush - interval) / interval).clamp(0.0, 1.0);
    MAX_BONUS * overdue_fraction
}
