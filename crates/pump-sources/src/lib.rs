//! Trait contracts for the system's external collaborators, plus deterministic
//! seeded implementations used by tests and the CLI's demo scenarios.

pub mod advisor;
pub mod seeded;
pub mod traits;

pub use advisor::NullAdvisor;
pub use seeded::SeededDataSource;
pub use traits::{ForecastProvider, HistoricalDataSource, StrategicAdvisor};
