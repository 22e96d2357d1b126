//! Shared data model, units, configuration and error types for the tunnel pump
//! scheduling system.
//!
//! `pump-core` has no opinion about how a schedule gets solved or how a simulation is
//! driven; it only defines the records that flow between `pump-algo`, `pump-sources` and
//! `pump-driver`, plus the small amount of compile-time unit safety worth having for
//! quantities that are easy to confuse (levels, flows, frequencies).

pub mod config;
pub mod error;
pub mod model;
pub mod units;

pub use error::{PumpError, PumpResult};
pub use model::*;
