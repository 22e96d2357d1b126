//! The forecast-quality tracker: a bounded ring buffer of per-step forecast errors that
//! derives a quality tier and the safety-margin adjustment the rolling driver feeds into
//! the builder's effective L1 window.
//!
//! The two-step hysteresis (tighten immediately on `poor`, release only after two
//! consecutive `good` steps) lives here as explicit state (`good_streak`) rather than
//! something recomputed from the ring buffer's recent history each call — recomputing it
//! from scratch is the easy way to accidentally let the margin oscillate step to step.

use std::collections::VecDeque;

/// One step's forecast error triple, already in comparable units (percent, percent, m).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastError {
    pub inflow_err_pct: f64,
    pub price_err_pct: f64,
    pub l1_err_m: f64,
}

/// Qualitative bucket the tracker currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTier {
    Good,
    Fair,
    Poor,
}

/// Additive adjustment to apply to `l1_min_m`/`l1_max_m` before the builder sees them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarginAdjustment {
    pub l1_min_delta_m: f64,
    pub l1_max_delta_m: f64,
}

impl MarginAdjustment {
    pub const NONE: MarginAdjustment = MarginAdjustment {
        l1_min_delta_m: 0.0,
        l1_max_delta_m: 0.0,
    };
}

/// A fixed-capacity ring buffer of recent forecast errors, default capacity 10.
#[derive(Debug, Clone)]
pub struct QualityTracker {
    capacity: usize,
    mae_window: usize,
    good_streak_to_release: u8,
    errors: VecDeque<ForecastError>,
    good_streak: u8,
    released: bool,
}

impl QualityTracker {
    pub fn new(capacity: usize, mae_window: usize, good_streak_to_release: u8) -> Self {
        QualityTracker {
            capacity: capacity.max(1),
            mae_window: mae_window.max(1),
            good_streak_to_release,
            errors: VecDeque::with_capacity(capacity.max(1)),
            good_streak: 0,
            released: true,
        }
    }

    /// Push a new observation, evicting the oldest once the ring buffer is full.
    pub fn add_error(&mut self, error: ForecastError) {
        if self.errors.len() == self.capacity {
            self.errors.pop_front();
        }
        self.errors.push_back(error);

        match self.tier_from_recent() {
            QualityTier::Good => {
                self.good_streak = self.good_streak.saturating_add(1);
                if self.good_streak >= self.good_streak_to_release {
                    self.released = true;
                }
            }
            _ => {
                self.good_streak = 0;
                self.released = false;
            }
        }
    }

    fn recent(&self) -> impl Iterator<Item = &ForecastError> {
        let skip = self.errors.len().saturating_sub(self.mae_window);
        self.errors.iter().skip(skip)
    }

    fn mae<F: Fn(&ForecastError) -> f64>(&self, f: F) -> f64 {
        let recent: Vec<f64> = self.recent().map(|e| f(e).abs()).collect();
        if recent.is_empty() {
            0.0
        } else {
            recent.iter().sum::<f64>() / recent.len() as f64
        }
    }

    pub fn inflow_mae_pct(&self) -> f64 {
        self.mae(|e| e.inflow_err_pct)
    }

    pub fn price_mae_pct(&self) -> f64 {
        self.mae(|e| e.price_err_pct)
    }

    pub fn l1_mae_m(&self) -> f64 {
        self.mae(|e| e.l1_err_m)
    }

    /// The tier implied purely by the most recent window, ignoring hysteresis. `tier()`
    /// below is the hysteresis-aware value the driver should actually act on.
    fn tier_from_recent(&self) -> QualityTier {
        let worst_pct = self.inflow_mae_pct().max(self.price_mae_pct());
        let l1_mae = self.l1_mae_m();
        if worst_pct < 10.0 && l1_mae < 0.3 {
            QualityTier::Good
        } else if worst_pct < 25.0 && l1_mae < 0.5 {
            QualityTier::Fair
        } else {
            QualityTier::Poor
        }
    }

    /// The tier the driver should act on: tightened margins latch in on the very next
    /// `poor`/`fair` step, but only release once `good_streak_to_release` consecutive
    /// `good` steps have been observed.
    pub fn tier(&self) -> QualityTier {
        let raw = self.tier_from_recent();
        if raw == QualityTier::Good && !self.released {
            QualityTier::Fair
        } else {
            raw
        }
    }

    /// The margin adjustment implied by the current (hysteresis-aware) tier. Within the
    /// `poor` band the adjustment scales up with inflow MAE, but never below half its
    /// maximum: `poor` can be tripped by price or L1 error alone with inflow MAE still
    /// low, and that's still a real degradation in forecast trust, not a mild one.
    pub fn margin_adjustment(&self) -> MarginAdjustment {
        match self.tier() {
            QualityTier::Good => MarginAdjustment::NONE,
            QualityTier::Fair => MarginAdjustment {
                l1_min_delta_m: 0.2,
                l1_max_delta_m: -0.8,
            },
            QualityTier::Poor => {
                let scale = (self.inflow_mae_pct() / 100.0).clamp(0.0, 1.0).max(0.5);
                MarginAdjustment {
                    l1_min_delta_m: 0.3 * scale,
                    l1_max_delta_m: -1.5 * scale,
                }
            }
        }
    }

    pub fn sample_size(&self) -> usize {
        self.errors.len()
    }
}
