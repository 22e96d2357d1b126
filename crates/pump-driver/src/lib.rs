//! The rolling-horizon simulation driver: owns `RollingState`, drives the per-tick
//! solve/apply/advance cycle, tracks forecast quality, and compares a finished run
//! against a baseline.

pub mod advisor;
pub mod comparator;
pub mod quality;
pub mod rolling;

pub use advisor::PlanBias;
pub use comparator::{compare, ComparisonReport, MetricComparison};
pub use quality::{ForecastError, MarginAdjustment, QualityTier, QualityTracker};
pub use rolling::{RollingDriver, RollingState, SimulationRecord};
