//! Co-simulation core: clock, adapter contract, manifests, input
//! aggregation, and the hosting driver.

pub mod adapter;
/// Tick and wall-clock conversion.
pub mod clock;
pub mod engine;
pub mod inputs;
pub mod manifest;
pub mod types;
