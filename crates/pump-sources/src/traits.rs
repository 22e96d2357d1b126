//! The trait contracts for everything the core system treats as an external
//! collaborator: historical telemetry, forecasts, and the qualitative strategic advisor.
//!
//! None of these traits are async. The driver's concurrency (§ rolling driver) comes from
//! running three blocking/IO-bound calls on the blocking thread pool and joining them, not
//! from the traits themselves being `async fn` — matching the rest of the workspace, which
//! has no `async_trait` dependency and reaches for plain blocking traits wherever a
//! sync call is sufficient.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use pump_core::error::PumpResult;
use pump_core::model::{BaselinePumpState, CurrentState, ForecastData, StrategicPlan};

/// Read access to realized history: what the tunnel and fleet actually did.
pub trait HistoricalDataSource: Send + Sync {
    /// The realized system state at or nearest before `at`.
    fn state_at(&self, at: DateTime<Utc>) -> PumpResult<CurrentState>;

    /// Realized inflow and price over `[start, end)`, used by the baseline comparator
    /// and by tests that want to replay a known trace instead of a live forecast.
    fn realized(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> PumpResult<ForecastData>;

    /// The non-optimized (historical or naively-ruled) operating point for every pump
    /// at `at`, keyed by pump id. Used only by the baseline comparator (§4.I); the core
    /// optimizer never reads this.
    fn baseline_schedule_at(&self, at: DateTime<Utc>) -> PumpResult<HashMap<String, BaselinePumpState>>;

    /// The `[t_min, t_max)` range this source can answer `state_at`/`realized` queries
    /// over. A rolling simulation should stay inside this range; callers that walk past
    /// `t_max` should expect `state_at` to report a missing-data error (§7).
    fn data_range(&self) -> PumpResult<(DateTime<Utc>, DateTime<Utc>)>;
}

/// A forecast of inflow and price covering some horizon starting at `from`.
pub trait ForecastProvider: Send + Sync {
    fn forecast(&self, from: DateTime<Utc>, horizon_minutes: u32) -> PumpResult<ForecastData>;
}

/// The qualitative strategic advisor. Implementations may be absent, slow, or wrong;
/// the driver treats `Ok(None)` and any timeout identically to "no guidance this tick".
pub trait StrategicAdvisor: Send + Sync {
    fn propose_plan(
        &self,
        state: &CurrentState,
        forecast: &ForecastData,
    ) -> PumpResult<Option<StrategicPlan>>;
}
