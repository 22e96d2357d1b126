//! Advisor implementations. The production advisor that actually prompts an LLM is out
//! of scope; what ships here is the contract and a null implementation that always
//! defers to the tactical optimizer's own defaults.

use pump_core::error::PumpResult;
use pump_core::model::{CurrentState, ForecastData, StrategicPlan};

use crate::traits::StrategicAdvisor;

/// Always returns `Ok(None)`. Standing in for "advisor unavailable" so the optimizer
/// demonstrably runs with its default weights rather than silently depending on one.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAdvisor;

impl StrategicAdvisor for NullAdvisor {
    fn propose_plan(
        &self,
        _state: &CurrentState,
        _forecast: &ForecastData,
    ) -> PumpResult<Option<StrategicPlan>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn null_advisor_always_abstains() {
        let advisor = NullAdvisor;
        let state = CurrentState {
            timestamp: Utc::now(),
            l1_m: 2.0,
            inflow_m3_s: 1.0,
            outflow_m3_s: 1.0,
            pump_states: Vec::new(),
            price_c_kwh: 10.0,
        };
        let forecast = ForecastData {
            timestamps: vec![],
            inflow_m3_s: vec![],
            price_c_kwh: vec![],
        };
        assert!(advisor.propose_plan(&state, &forecast).unwrap().is_none());
    }
}
