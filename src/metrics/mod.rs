//! Derived metrics computed from raw sensor counters.

pub mod cadence;
pub mod rollover;

pub use cadence::{CadenceCalculator, CadenceRegistry, CrankRevolutionSample};
pub use rollover::{modular_diff, u16_counter_diff};
